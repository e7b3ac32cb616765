use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// =============================================================================
// Demo driver settings
// =============================================================================

/// Tunables for the demo binaries. Every field has a default, so an empty
/// file (or no file at all) is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Capacity of the queue in the read-back demo.
    pub buffer_capacity: usize,
    /// How many values the drain demo preloads before closing.
    pub preload: usize,
    /// Number of queues the random-index select chooses between.
    pub select_candidates: usize,
    pub fairness_trials: usize,
    /// Delay before the close-during-select demo closes its queue.
    pub close_after_ms: u64,
    pub timeout_ms: u64,
    /// How long a deadlock probe waits before reporting a permanent block.
    pub probe_ms: u64,
    pub producers: usize,
    pub per_producer: usize,
}

impl Default for DemoConfig {
    fn default() -> Self {
        DemoConfig {
            buffer_capacity: 3,
            preload: 5,
            select_candidates: 3,
            fairness_trials: 3000,
            close_after_ms: 1000,
            timeout_ms: 5000,
            probe_ms: 200,
            producers: num_cpus::get(),
            per_producer: 100,
        }
    }
}

impl DemoConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: DemoConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Renders the settings as TOML, every field included.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }

    /// Loads `path` when given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.select_candidates == 0 {
            return Err(ConfigError::invalid("select_candidates", "must be at least 1"));
        }
        if self.buffer_capacity < 2 {
            return Err(ConfigError::invalid(
                "buffer_capacity",
                "must hold at least 2 values for the read-back demo",
            ));
        }
        if self.producers == 0 {
            return Err(ConfigError::invalid("producers", "must be at least 1"));
        }
        if self.probe_ms == 0 {
            return Err(ConfigError::invalid("probe_ms", "must be greater than 0"));
        }
        Ok(())
    }

    pub fn close_after(&self) -> Duration {
        Duration::from_millis(self.close_after_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn probe(&self) -> Duration {
        Duration::from_millis(self.probe_ms)
    }
}
