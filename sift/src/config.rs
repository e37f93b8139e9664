//! Model and filtering configuration.
//!
//! [`ModelConfig`] controls how the fixel model is built from the input data,
//! [`SiftConfig`] controls the filtering loop: termination, batching,
//! parallelism and output emission. Both can be loaded from YAML or JSON.

use std::path::{Path, PathBuf};

use common::file_format::SerdeFormat;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, Error};

/// Smallest index range handed to one worker, to amortize dispatch overhead.
pub const MIN_RANGE_SIZE: usize = 1000;

/// Default relative improvement below which filtering counts as converged
/// when no explicit termination criterion is configured.
pub const DEFAULT_CONVERGENCE_TOLERANCE: f64 = 1e-9;

/// How streamlines and fixels are turned into a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Mapping sub-step as a fraction of the voxel size.
    pub step_ratio: f32,
    /// Exclude fixels that no streamline reaches from the processing mask.
    pub remove_untracked: bool,
    /// Keep streamlines that cross no fixel as non-removable instead of failing.
    pub allow_unmapped_tracks: bool,
    /// Fixels with a smaller FOD amplitude are excluded from the processing mask.
    pub min_fod: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            step_ratio: 0.1,
            remove_untracked: false,
            allow_unmapped_tracks: true,
            min_fod: 0.0,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(self.step_ratio > 0.0 && self.step_ratio <= 1.0) {
            return Err(ConfigurationError::StepRatioOutOfRange(self.step_ratio));
        }
        if !(self.min_fod.is_finite() && self.min_fod >= 0.0) {
            return Err(ConfigurationError::MinFodOutOfRange(self.min_fod));
        }
        Ok(())
    }
}

/// Configuration of the filtering loop.
///
/// # Examples
///
/// ```ignore
/// use sift::{SiftConfig, Sifter};
///
/// // Filter down to 100k streamlines, one removal per iteration.
/// let config = SiftConfig::to_count(100_000);
///
/// // Batched removal of 0.1% of the live set per iteration, stop at 20% of the cost.
/// let config = SiftConfig {
///     term_ratio: Some(0.2),
///     ..SiftConfig::batched(0.001)
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiftConfig {
    /// Stop once this many streamlines remain.
    pub term_number: Option<usize>,
    /// Stop once cost / initial cost drops to this ratio.
    pub term_ratio: Option<f64>,
    /// Stop once mu reaches this value.
    pub term_mu: Option<f64>,
    /// Relative improvement threshold used only when none of the above is set.
    pub convergence_tolerance: f64,
    /// Remove one streamline per iteration. When false, remove batches of
    /// `batch_ratio` of the live set, re-validating each candidate.
    pub enforce_quantisation: bool,
    pub batch_ratio: f64,
    /// Per-iteration trace CSV.
    pub csv_path: Option<PathBuf>,
    /// Directory for checkpoint outputs.
    pub output_dir: Option<PathBuf>,
    /// Live-track counts at which a selection checkpoint is written.
    pub output_at_counts: Vec<usize>,
    /// Also dump per-fixel statistics at each checkpoint.
    pub output_debug: bool,
    /// Worker threads; `None` lets rayon decide.
    pub num_threads: Option<usize>,
    /// Streamlines per gradient work unit; `None` sizes ranges from the thread count.
    pub range_size: Option<usize>,
}

impl Default for SiftConfig {
    fn default() -> Self {
        Self {
            term_number: None,
            term_ratio: None,
            term_mu: None,
            convergence_tolerance: DEFAULT_CONVERGENCE_TOLERANCE,
            enforce_quantisation: true,
            batch_ratio: 0.001,
            csv_path: None,
            output_dir: None,
            output_at_counts: vec![],
            output_debug: false,
            num_threads: None,
            range_size: None,
        }
    }
}

impl SiftConfig {
    // ========== Presets ==========

    /// Preset: filter to a fixed number of streamlines.
    pub fn to_count(term_number: usize) -> Self {
        Self {
            term_number: Some(term_number),
            ..Default::default()
        }
    }

    /// Preset: filter until the cost has dropped to `term_ratio` of its initial value.
    pub fn to_cost_ratio(term_ratio: f64) -> Self {
        Self {
            term_ratio: Some(term_ratio),
            ..Default::default()
        }
    }

    /// Preset: relaxed quantisation, removing `batch_ratio` of the live set per iteration.
    pub fn batched(batch_ratio: f64) -> Self {
        Self {
            enforce_quantisation: false,
            batch_ratio,
            ..Default::default()
        }
    }

    /// Load from a `.yaml`/`.yml`/`.json` file. Missing fields take defaults.
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let config: Self = load_file(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn has_termination_criterion(&self) -> bool {
        self.term_number.is_some() || self.term_ratio.is_some() || self.term_mu.is_some()
    }

    /// Checkpoint counts, largest first, without duplicates.
    pub fn checkpoint_counts(&self) -> Vec<usize> {
        let mut counts = self.output_at_counts.clone();
        counts.sort_unstable_by(|a, b| b.cmp(a));
        counts.dedup();
        counts
    }

    // ========== Validation ==========

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if let Some(ratio) = self.term_ratio {
            if !(ratio > 0.0 && ratio < 1.0) {
                return Err(ConfigurationError::TermRatioOutOfRange(ratio));
            }
        }
        if let Some(mu) = self.term_mu {
            if !(mu.is_finite() && mu > 0.0) {
                return Err(ConfigurationError::TermMuOutOfRange(mu));
            }
        }
        if !(self.convergence_tolerance.is_finite() && self.convergence_tolerance >= 0.0) {
            return Err(ConfigurationError::ConvergenceToleranceOutOfRange(
                self.convergence_tolerance,
            ));
        }
        if !(self.batch_ratio > 0.0 && self.batch_ratio <= 1.0) {
            return Err(ConfigurationError::BatchRatioOutOfRange(self.batch_ratio));
        }
        if self.num_threads == Some(0) {
            return Err(ConfigurationError::ZeroValue("num_threads"));
        }
        if self.range_size == Some(0) {
            return Err(ConfigurationError::ZeroValue("range_size"));
        }
        if !self.output_at_counts.is_empty() {
            if self.output_dir.is_none() {
                return Err(ConfigurationError::MissingOutputDir);
            }
            if let Some(term_number) = self.term_number {
                if let Some(&count) = self.output_at_counts.iter().find(|&&c| c <= term_number) {
                    return Err(ConfigurationError::CheckpointBelowTarget { count, term_number });
                }
            }
        }
        Ok(())
    }
}

impl ModelConfig {
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let config: Self = load_file(path)?;
        config.validate()?;
        Ok(config)
    }
}

fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T, Error> {
    let load_error = |reason: String| Error::ConfigLoad {
        path: path.to_path_buf(),
        reason,
    };
    let format = SerdeFormat::from_path(path).map_err(|e| load_error(e.to_string()))?;
    let text = std::fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
    format
        .deserialize(&text)
        .map_err(|e| load_error(e.to_string()))
}
