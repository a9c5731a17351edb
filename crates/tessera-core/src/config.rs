use crate::concurrency::DEFAULT_STRIPES;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read runtimes config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse runtimes config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid runtimes config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RuntimesConfig {
    #[serde(default = "default_stripes")]
    pub stripes: usize,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ShutdownConfig {
    /// Worker threads used to stop environments; defaults to twice the
    /// available parallelism.
    #[serde(default)]
    pub pool_size: Option<usize>,
    #[serde(default = "default_graceful_timeout_secs")]
    pub graceful_timeout_secs: u64,
    #[serde(default = "default_forced_timeout_secs")]
    pub forced_timeout_secs: u64,
}

impl Default for RuntimesConfig {
    fn default() -> Self {
        Self {
            stripes: default_stripes(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            pool_size: None,
            graceful_timeout_secs: default_graceful_timeout_secs(),
            forced_timeout_secs: default_forced_timeout_secs(),
        }
    }
}

impl RuntimesConfig {
    pub fn parse_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stripes == 0 {
            return Err(ConfigError::Invalid("stripes must be at least 1".to_owned()));
        }
        if self.shutdown.pool_size == Some(0) {
            return Err(ConfigError::Invalid(
                "shutdown.pool_size must be at least 1".to_owned(),
            ));
        }
        if self.shutdown.graceful_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "shutdown.graceful_timeout_secs must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

impl ShutdownConfig {
    pub fn pool_size(&self) -> usize {
        self.pool_size.unwrap_or_else(|| {
            2 * std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
        })
    }

    pub fn graceful_timeout(&self) -> Duration {
        Duration::from_secs(self.graceful_timeout_secs)
    }

    pub fn forced_timeout(&self) -> Duration {
        Duration::from_secs(self.forced_timeout_secs)
    }
}

fn default_stripes() -> usize {
    DEFAULT_STRIPES
}

fn default_graceful_timeout_secs() -> u64 {
    50
}

fn default_forced_timeout_secs() -> u64 {
    10
}
