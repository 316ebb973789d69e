//! Runtime configuration
//!
//! All tunables of the instrumentation runtime live in [`RuntimeConfig`].
//! It deserializes from JSON with every field optional, so a config file only
//! needs to name what it changes. CLI flags are applied on top in `main`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::ConfigError;

/// What to do when a profiling point names a handler kind the factory doesn't know
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingHandlerPolicy {
    /// Log and leave the slot empty; hits on it are ignored
    #[default]
    Skip,
    /// Fail handler registration
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Size of each thread-local event buffer in bytes
    pub local_buffer_size: usize,
    /// Size of the shared event buffer (and of the mapped buffer file) in bytes
    pub shared_buffer_size: usize,
    /// Directory for the local buffer file (system temp dir when unset)
    pub buffer_dir: Option<PathBuf>,
    /// Maximum number of application threads admitted for instrumentation
    pub max_profiled_threads: u32,
    /// Target interval between stack samples
    pub sampling_interval_ms: u64,
    /// Mean number of allocations between two captured stack traces
    pub alloc_sampling_interval: u32,
    /// Seed for the allocation sampling thresholds (random when unset)
    pub alloc_sampling_seed: Option<u64>,
    /// Frames kept per captured stack
    pub max_stack_depth: usize,
    /// Size of the dense first-invocation table
    pub max_methods: usize,
    /// Size of the per-class allocation tables
    pub max_classes: usize,
    /// Capacity of the code-region results ring
    pub code_region_buffer_size: usize,
    /// Initial capacity of the thread table
    pub thread_table_capacity: usize,
    /// How often the reference manager scans for reclaimed objects
    pub reference_scan_interval_ms: u64,
    /// Add a thread-CPU timestamp to every method event
    pub thread_cpu_timestamps: bool,
    pub missing_handler_policy: MissingHandlerPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            local_buffer_size: 8 * 1024,
            shared_buffer_size: 256 * 1024,
            buffer_dir: None,
            max_profiled_threads: 32,
            sampling_interval_ms: 10,
            alloc_sampling_interval: 10,
            alloc_sampling_seed: None,
            max_stack_depth: 128,
            max_methods: 65_536,
            max_classes: 65_536,
            code_region_buffer_size: 1000,
            thread_table_capacity: 31,
            reference_scan_interval_ms: 50,
            thread_cpu_timestamps: false,
            missing_handler_policy: MissingHandlerPolicy::Skip,
        }
    }
}

/// Largest single event the runtime writes into a thread-local buffer
/// (a method event with both timestamps)
pub const MAX_METHOD_EVENT_SIZE: usize = 17;

impl RuntimeConfig {
    /// Load a JSON config file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed, or fails validation
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::ReadFailed { path: path.to_path_buf(), source })?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|source| ConfigError::ParseFailed { path: path.to_path_buf(), source })?;
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the first offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.local_buffer_size < 4 * MAX_METHOD_EVENT_SIZE {
            return Err(ConfigError::Invalid(format!(
                "local_buffer_size must be at least {} bytes",
                4 * MAX_METHOD_EVENT_SIZE
            )));
        }
        // A full local buffer plus its thread switch header must fit the shared buffer
        if self.shared_buffer_size < self.local_buffer_size + 3 {
            return Err(ConfigError::Invalid(
                "shared_buffer_size must exceed local_buffer_size".to_string(),
            ));
        }
        if self.sampling_interval_ms == 0 {
            return Err(ConfigError::Invalid("sampling_interval_ms must be positive".to_string()));
        }
        if self.reference_scan_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "reference_scan_interval_ms must be positive".to_string(),
            ));
        }
        if self.alloc_sampling_interval == 0 {
            return Err(ConfigError::Invalid("alloc_sampling_interval must be positive".to_string()));
        }
        if self.max_methods == 0 || self.max_methods > 65_536 {
            return Err(ConfigError::Invalid("max_methods must be in 1..=65536".to_string()));
        }
        if self.max_classes == 0 || self.max_classes > 65_536 {
            return Err(ConfigError::Invalid("max_classes must be in 1..=65536".to_string()));
        }
        if self.code_region_buffer_size == 0 {
            return Err(ConfigError::Invalid("code_region_buffer_size must be positive".to_string()));
        }
        if self.thread_table_capacity < 2 {
            return Err(ConfigError::Invalid("thread_table_capacity must be at least 2".to_string()));
        }
        if self.max_stack_depth > usize::from(u16::MAX) {
            return Err(ConfigError::Invalid("max_stack_depth must fit in 16 bits".to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms)
    }

    #[must_use]
    pub fn reference_scan_interval(&self) -> Duration {
        Duration::from_millis(self.reference_scan_interval_ms)
    }

    #[must_use]
    pub fn wire_config(&self) -> prof_agent_common::WireConfig {
        prof_agent_common::WireConfig { thread_cpu_timestamps: self.thread_cpu_timestamps }
    }
}
