//! Per-iteration progress reporting.

use common::SharedFn;

/// State after one filtering iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterProgress {
    pub iteration: usize,
    /// Live streamlines after this iteration.
    pub remaining: usize,
    /// Streamlines removed in this iteration.
    pub removed: usize,
    pub cost: f64,
    pub mu: f64,
}

/// Optional callback invoked after every iteration, on the filtering thread.
pub type ProgressCallback = SharedFn<dyn Fn(FilterProgress) + Send + Sync>;
