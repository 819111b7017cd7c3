//! # Render Configuration
//!
//! Tunables of the instanced pipeline, loaded once at startup from TOML.
//!
//! ```toml
//! batch_byte_budget = 65536
//! initial_buffer_size = 1048576
//! max_buffer_size = 8388608
//! worker_count = 8
//! ```
//!
//! Every field has a default, so a partial file (or an empty one) is valid.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::batch::BUFFER_HEADER_SIZE;
use crate::error::{RenderError, RenderResult};
use tessera_core::MAX_WORKERS;

/// Largest number of slices for the parallel sort-merge.
pub const MAX_SORT_SLICES: usize = 8;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

/// Configuration of the instanced render pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Bytes per batch allocation.
    pub batch_byte_budget: u64,
    /// Alignment of batch allocations in bytes (power of two).
    pub batch_alignment: u64,
    /// Size of the GPU buffer at startup.
    pub initial_buffer_size: u64,
    /// Hard cap of the GPU buffer.
    pub max_buffer_size: u64,
    /// Instances per draw command for unsorted bins.
    pub max_instances_per_command: u32,
    /// Instances per draw range.
    pub max_instances_per_range: u32,
    /// Draw commands per draw range.
    pub max_commands_per_range: u32,
    /// Worker threads, `0` for one per core.
    pub worker_count: usize,
    /// Slices of the parallel sort-merge (1 to 8).
    pub sort_slices: usize,
    /// Buckets of the bin presence filter (power of two).
    pub presence_buckets: usize,
    /// Initial bytes of each per-worker frame arena.
    pub arena_capacity: usize,
    /// Size of the upload staging buffer at startup.
    pub initial_staging_size: u64,
    /// Hard cap of the upload staging buffer.
    pub max_staging_size: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            batch_byte_budget: 64 * KIB,
            batch_alignment: 16,
            initial_buffer_size: MIB,
            max_buffer_size: 1024 * MIB,
            max_instances_per_command: 4096,
            max_instances_per_range: 4096,
            max_commands_per_range: 512,
            worker_count: 0,
            sort_slices: MAX_SORT_SLICES,
            presence_buckets: 1024,
            arena_capacity: 256 * 1024,
            initial_staging_size: MIB,
            max_staging_size: 256 * MIB,
        }
    }
}

impl RenderConfig {
    /// Parses and validates a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for this struct or a
    /// value is out of range.
    pub fn from_toml_str(text: &str) -> RenderResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|err| RenderError::ConfigParse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or a value is
    /// out of range.
    pub fn from_file(path: impl AsRef<Path>) -> RenderResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| RenderError::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(path = %path.display(), "render configuration loaded");
        Ok(config)
    }

    /// Serializes the configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml_string(&self) -> RenderResult<String> {
        toml::to_string(self).map_err(|err| RenderError::ConfigParse(err.to_string()))
    }

    /// Checks that every value is in range.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidConfig`] naming the first bad value.
    pub fn validate(&self) -> RenderResult<()> {
        fn invalid(message: String) -> RenderResult<()> {
            Err(RenderError::InvalidConfig(message))
        }

        if !self.batch_alignment.is_power_of_two() {
            return invalid(format!(
                "batch_alignment {} is not a power of two",
                self.batch_alignment
            ));
        }
        if self.batch_byte_budget == 0 || self.batch_byte_budget % self.batch_alignment != 0 {
            return invalid(format!(
                "batch_byte_budget {} must be a non-zero multiple of batch_alignment {}",
                self.batch_byte_budget, self.batch_alignment
            ));
        }
        if self.initial_buffer_size < BUFFER_HEADER_SIZE {
            return invalid(format!(
                "initial_buffer_size {} is smaller than the {BUFFER_HEADER_SIZE}-byte header",
                self.initial_buffer_size
            ));
        }
        if self.max_buffer_size < self.initial_buffer_size {
            return invalid(format!(
                "max_buffer_size {} is smaller than initial_buffer_size {}",
                self.max_buffer_size, self.initial_buffer_size
            ));
        }
        if self.max_instances_per_command == 0
            || self.max_instances_per_range == 0
            || self.max_commands_per_range == 0
        {
            return invalid("draw command and range caps must be non-zero".to_string());
        }
        if self.worker_count > MAX_WORKERS {
            return invalid(format!(
                "worker_count {} exceeds {MAX_WORKERS}",
                self.worker_count
            ));
        }
        if !(1..=MAX_SORT_SLICES).contains(&self.sort_slices) {
            return invalid(format!(
                "sort_slices {} must be between 1 and {MAX_SORT_SLICES}",
                self.sort_slices
            ));
        }
        if !self.presence_buckets.is_power_of_two() {
            return invalid(format!(
                "presence_buckets {} is not a power of two",
                self.presence_buckets
            ));
        }
        if self.max_staging_size < self.initial_staging_size {
            return invalid(format!(
                "max_staging_size {} is smaller than initial_staging_size {}",
                self.max_staging_size, self.initial_staging_size
            ));
        }
        Ok(())
    }
}
