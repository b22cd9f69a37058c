//! auctioneer.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_WORKER_POOL_WIDTH: usize = 100;
pub const DEFAULT_FETCH_COOLDOWN_MS: u64 = 1000;
pub const DEFAULT_STATE_FETCH_RETRIES: u32 = 3;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuctioneerConfig {
    #[serde(default)]
    pub auctioneer: TunablesConfig,
}

/// The `[auctioneer]` table. Every key is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TunablesConfig {
    pub max_retries: Option<u32>,
    pub worker_pool_width: Option<usize>,
    pub fetch_cooldown_ms: Option<u64>,
    pub state_fetch_retries: Option<u32>,
}

/// Resolved tunables with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tunables {
    /// Highest post-pass attempt count that is still resubmitted.
    pub max_retries: u32,
    /// Parallelism of state fetches and commits.
    pub worker_pool_width: usize,
    /// Sleep after a failed cell fetch before the loop re-arms.
    pub fetch_cooldown: Duration,
    /// Attempts per cell when fetching state.
    pub state_fetch_retries: u32,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            worker_pool_width: DEFAULT_WORKER_POOL_WIDTH,
            fetch_cooldown: Duration::from_millis(DEFAULT_FETCH_COOLDOWN_MS),
            state_fetch_retries: DEFAULT_STATE_FETCH_RETRIES,
        }
    }
}

impl TunablesConfig {
    /// Apply defaults and validate.
    pub fn resolve(&self) -> Result<Tunables, ConfigError> {
        let worker_pool_width = self.worker_pool_width.unwrap_or(DEFAULT_WORKER_POOL_WIDTH);
        if worker_pool_width == 0 {
            return Err(ConfigError::Invalid {
                field: "worker_pool_width",
                reason: "must be at least 1".to_string(),
            });
        }

        let state_fetch_retries = self.state_fetch_retries.unwrap_or(DEFAULT_STATE_FETCH_RETRIES);
        if state_fetch_retries == 0 {
            return Err(ConfigError::Invalid {
                field: "state_fetch_retries",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Tunables {
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            worker_pool_width,
            fetch_cooldown: Duration::from_millis(
                self.fetch_cooldown_ms.unwrap_or(DEFAULT_FETCH_COOLDOWN_MS),
            ),
            state_fetch_retries,
        })
    }
}

impl AuctioneerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn tunables(&self) -> Result<Tunables, ConfigError> {
        self.auctioneer.resolve()
    }
}
