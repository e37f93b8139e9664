//! Error types for model initialization, filtering and output.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while building, filtering or emitting a model.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Initialization failed: {0}")]
    Initialization(#[from] InitializationError),

    #[error("Degenerate model state: {0}")]
    DegenerateState(#[from] DegenerateStateError),

    #[error("Invalid configuration: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to load configuration '{path}': {reason}")]
    ConfigLoad { path: PathBuf, reason: String },

    #[error("Streamline sink failed: {0}")]
    Sink(#[source] io::Error),
}

/// Inconsistency between the fixel volume and the streamline data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InitializationError {
    #[error("Volume has zero extent: {dims:?}")]
    EmptyVolume { dims: [usize; 3] },

    #[error("Voxel size must be positive and finite, got {voxel_size}")]
    InvalidVoxelSize { voxel_size: f32 },

    #[error("{what} has {actual} entries, expected {expected} (one per voxel)")]
    VoxelCountMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Fixel in voxel {voxel:?} has invalid amplitude {amplitude}")]
    InvalidAmplitude { voxel: [usize; 3], amplitude: f32 },

    #[error("Fixel in voxel {voxel:?} has a zero-length direction")]
    InvalidDirection { voxel: [usize; 3] },

    #[error("Streamline {index} contains a non-finite vertex")]
    NonFiniteVertex { index: usize },

    #[error("Streamline {index} does not cross any fixel")]
    UnmappedStreamline { index: usize },

    #[error("Too many fixels or streamlines for 32-bit indices ({count})")]
    IndexOverflow { count: usize },

    #[error("Expected {expected} streamlines, got {actual}")]
    TrackCountMismatch { expected: usize, actual: usize },
}

/// The model cannot make progress.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DegenerateStateError {
    #[error("Track density sum over the processing mask is zero")]
    ZeroTrackDensity,

    #[error("No removable streamlines remain ({remaining} live)")]
    NoRemovableTracks { remaining: usize },

    #[error("Streamline {index} is not removable (already removed, unmapped or out of range)")]
    NotRemovable { index: usize },
}

/// Conflicting or out-of-range settings.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("term_ratio must be in (0, 1), got {0}")]
    TermRatioOutOfRange(f64),

    #[error("term_mu must be positive and finite, got {0}")]
    TermMuOutOfRange(f64),

    #[error("batch_ratio must be in (0, 1], got {0}")]
    BatchRatioOutOfRange(f64),

    #[error("convergence_tolerance must be non-negative and finite, got {0}")]
    ConvergenceToleranceOutOfRange(f64),

    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    #[error("step_ratio must be in (0, 1], got {0}")]
    StepRatioOutOfRange(f32),

    #[error("min_fod must be non-negative and finite, got {0}")]
    MinFodOutOfRange(f32),

    #[error("Checkpoint count {count} is not above term_number {term_number}")]
    CheckpointBelowTarget { count: usize, term_number: usize },

    #[error("Checkpoint outputs requested without an output directory")]
    MissingOutputDir,

    #[error("Failed to build thread pool: {0}")]
    ThreadPool(String),
}
