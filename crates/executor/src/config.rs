use serde::{Deserialize, Serialize};
use std::path::Path;

/// Errors loading a [`BridgeConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Sizing for one worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Pool name; worker threads are called `{name}-worker`.
    pub name: String,
    /// Maximum number of worker threads.
    pub workers: usize,
    /// Maximum tasks queued or running at once. `None` means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_capacity: Option<usize>,
}

/// Sizing for the request and response pools.
///
/// The bridge never reads this; it is consumed by whoever builds the pools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub request: PoolConfig,
    pub response: PoolConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request: PoolConfig {
                name: "request".to_string(),
                workers: 8,
                queue_capacity: None,
            },
            response: PoolConfig {
                name: "response".to_string(),
                workers: 2,
                queue_capacity: None,
            },
        }
    }
}

impl BridgeConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }
}
