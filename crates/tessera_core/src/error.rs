//! # Core Error Types
//!
//! Errors raised while setting up the substrate. Per-frame failures are
//! never errors: they are logged and the work is retried next frame.

use thiserror::Error;

/// Errors that can occur in the core substrate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The worker pool could not be created.
    #[error("failed to build worker pool: {0}")]
    WorkerPool(String),

    /// A worker count outside the supported range was requested.
    #[error("invalid worker count {requested}: must be between 1 and {max}")]
    InvalidWorkerCount {
        /// The requested worker count.
        requested: usize,
        /// The largest supported worker count.
        max: usize,
    },

    /// An allocation alignment that is not a power of two.
    #[error("alignment {0} is not a power of two")]
    InvalidAlignment(u64),

    /// The world has no free object slots left.
    #[error("world capacity exhausted: {capacity} objects")]
    WorldFull {
        /// Total capacity of the world.
        capacity: usize,
    },
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
