//! Text outputs: selection masks, per-iteration trace CSV and file helpers.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::model::Model;

pub const TRACE_HEADER: &str =
    "iteration,removed_this_iteration,total_removed,remaining,cost,td_sum,mu,best_gradient,cost_ratio";

/// One line of the trace CSV.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceRow {
    pub iteration: usize,
    pub removed_this_iteration: usize,
    pub total_removed: usize,
    pub remaining: usize,
    pub cost: f64,
    pub td_sum: f64,
    pub mu: f64,
    /// `None` for the initial row, before any gradient pass.
    pub best_gradient: Option<f64>,
    pub cost_ratio: f64,
}

/// Streaming writer for the per-iteration trace.
#[derive(Debug)]
pub struct TraceWriter<W: Write> {
    writer: W,
    path: PathBuf,
}

impl TraceWriter<BufWriter<File>> {
    /// Create (truncate) the trace file and write its header.
    pub fn create(path: &Path) -> Result<Self, Error> {
        let file = File::create(path).map_err(|source| write_error(path, source))?;
        Self::new(BufWriter::new(file), path)
    }
}

impl<W: Write> TraceWriter<W> {
    pub fn new(mut writer: W, path: &Path) -> Result<Self, Error> {
        writeln!(writer, "{TRACE_HEADER}").map_err(|source| write_error(path, source))?;
        Ok(Self {
            writer,
            path: path.to_path_buf(),
        })
    }

    pub fn append(&mut self, row: &TraceRow) -> Result<(), Error> {
        let best_gradient = row
            .best_gradient
            .map(|g| g.to_string())
            .unwrap_or_default();
        writeln!(
            self.writer,
            "{},{},{},{},{},{},{},{},{}",
            row.iteration,
            row.removed_this_iteration,
            row.total_removed,
            row.remaining,
            row.cost,
            row.td_sum,
            row.mu,
            best_gradient,
            row.cost_ratio
        )
        .map_err(|source| write_error(&self.path, source))
    }

    pub fn flush(&mut self) -> Result<(), Error> {
        self.writer
            .flush()
            .map_err(|source| write_error(&self.path, source))
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// One `1` (kept) or `0` (removed) per line, in original index order.
/// Unmapped streamlines are kept.
pub fn write_selection<W: Write>(model: &Model, mut writer: W) -> io::Result<()> {
    for index in 0..model.track_count() {
        let flag = if model.is_removed(index) { b"0\n" } else { b"1\n" };
        writer.write_all(flag)?;
    }
    writer.flush()
}

/// Create `path` and hand a buffered writer to `f`, attaching the path to any io error.
pub fn write_file<F>(path: &Path, f: F) -> Result<(), Error>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    let result = File::create(path).and_then(|file| {
        let mut writer = BufWriter::new(file);
        f(&mut writer)?;
        writer.flush()
    });
    result.map_err(|source| write_error(path, source))
}

fn write_error(path: &Path, source: io::Error) -> Error {
    Error::Write {
        path: path.to_path_buf(),
        source,
    }
}
