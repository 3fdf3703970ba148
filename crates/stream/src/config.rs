use serde::{Deserialize, Serialize};
use std::path::Path;

/// Errors from reading loader configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Loader tuning: progress cadence and per-tick completion budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Emit progress to observers every N ticks. Zero is treated as one.
    pub progress_interval_ticks: u32,
    /// Maximum number of finished fetches completed per tick. The rest wait
    /// for the next tick. Zero is treated as one.
    pub completion_budget: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            progress_interval_ticks: 1,
            completion_budget: 16,
        }
    }
}

impl LoaderConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a YAML config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path)?;
        Ok(serde_yaml::from_reader(file)?)
    }

    pub(crate) fn effective_interval(&self) -> u64 {
        u64::from(self.progress_interval_ticks.max(1))
    }

    pub(crate) fn effective_budget(&self) -> usize {
        self.completion_budget.max(1)
    }
}
