//! # Rendering Error Types
//!
//! Configuration and registration failures. Per-frame problems (heap or
//! staging exhaustion, hard-cap overflow, presence filter collisions) are
//! not errors: they are logged and the work is retried next frame.

use thiserror::Error;

use tessera_core::CoreError;

/// Errors that can occur in the rendering core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// A property name was registered twice.
    #[error("property already registered: {0}")]
    DuplicateProperty(String),

    /// A binding id was registered twice.
    #[error("binding id already registered: {0}")]
    DuplicateBinding(u32),

    /// The catalog has no component bit left for another override.
    #[error("too many override properties: max {max}")]
    TooManyProperties {
        /// Largest supported override count.
        max: usize,
    },

    /// A per-object footprint does not fit a single object into one batch.
    #[error("archetype needs {bytes_per_object} bytes per object, batch budget is {budget}")]
    OversizedArchetype {
        /// Sum of all property sizes of the archetype.
        bytes_per_object: u64,
        /// Configured bytes per batch.
        budget: u64,
    },

    /// A culling request with no split or more than eight.
    #[error("culling request has {0} splits, expected 1 to 8")]
    InvalidSplitCount(usize),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A configuration file could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(String),

    /// A configuration file could not be read.
    #[error("failed to read {path}: {reason}")]
    Io {
        /// Path of the file.
        path: String,
        /// OS error description.
        reason: String,
    },

    /// The GPU buffer could not be resized.
    #[error("gpu buffer resize to {requested} bytes failed: {reason}")]
    BufferResize {
        /// Requested size in bytes.
        requested: u64,
        /// Backend error description.
        reason: String,
    },

    /// Draw output whose counts or offsets disagree.
    #[error("inconsistent draw output: {0}")]
    InconsistentOutput(String),

    /// Error from the core substrate.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for rendering operations.
pub type RenderResult<T> = Result<T, RenderError>;
