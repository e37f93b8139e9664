//! Sift - streamline filtering of tractograms to fixel FOD amplitudes.
//!
//! Given a fixel volume (per-voxel fibre orientation lobes with their FOD
//! amplitudes) and a whole-brain tractogram, the filter removes streamlines
//! one at a time (or in small re-validated batches) so that the remaining
//! track density, scaled by a single global factor `mu`, best matches the
//! FOD amplitude in every fixel of the processing mask.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use sift::{FixelVolume, Model, ModelConfig, SiftConfig, Sifter};
//!
//! let model = Model::initialize(&volume, &streamlines, &ModelConfig::default())?;
//! let mut sifter = Sifter::new(model, SiftConfig::to_count(100_000))?;
//! let report = sifter.perform_filtering()?;
//!
//! let mut kept = Vec::new();
//! sifter.output_filtered_tracks(&streamlines, &mut kept)?;
//! println!("{}: {} streamlines left", report.reason, report.remaining_tracks);
//! ```

pub mod config;
pub mod error;
pub(crate) mod fixel_map;
pub(crate) mod gradient_sort;
pub(crate) mod mapping;
pub mod model;
pub(crate) mod output;
pub mod progress;
pub mod sifter;
pub mod tractogram;
pub mod volume;

#[cfg(test)]
mod testing;

// ============================================================================
// Input data
// ============================================================================

pub use tractogram::{Streamline, StreamlineSink};
pub use volume::{FixelVolume, Lobe};

// ============================================================================
// Model
// ============================================================================

pub use fixel_map::{Fixel, FixelMap, VoxelAccessor};
pub use mapping::{TrackContribution, TrackFixel, TrackMapper};
pub use model::{CostSnapshot, Model};

// ============================================================================
// Filtering
// ============================================================================

pub use config::{ModelConfig, SiftConfig, DEFAULT_CONVERGENCE_TOLERANCE, MIN_RANGE_SIZE};
pub use gradient_sort::{BestCandidates, GradientEntry, TrackGradientCalculator, TrackIndexRange};
pub use progress::{FilterProgress, ProgressCallback};
pub use sifter::{
    AbortHandle, FilterReport, FilterState, Sifter, TargetCriterion, TerminationReason,
};

// ============================================================================
// Output & errors
// ============================================================================

pub use error::{ConfigurationError, DegenerateStateError, Error, InitializationError};
pub use output::{TraceRow, TRACE_HEADER};
