//! Configuration settings.
//!
//! Settings are loaded from `~/.estate-sync/config.yaml`. Every field has a
//! default, so a partial file (or no file) is valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Paths;
use crate::error::SyncError;
use crate::queue::MAX_RETRIES;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Queue processing settings.
    pub sync: SyncConfig,
    /// Remote backend settings.
    pub remote: RemoteConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Queue processing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    /// Failed attempts after which an entry is dead-lettered.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-call remote timeout in milliseconds. Unset means no timeout.
    #[serde(default)]
    pub remote_timeout_ms: Option<u64>,
    /// How long connectivity must stay up before a drain is requested.
    ///
    /// Read by applications that run a `ConnectivityMonitor`; the one-shot
    /// `run` command drains immediately.
    #[serde(default)]
    pub online_debounce_ms: u64,
}

/// Remote backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the REST backend, e.g. `https://api.example.com/v1`.
    pub base_url: Option<String>,
    /// Bearer token sent with every request.
    pub api_key: Option<String>,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `tracing` filter, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

const fn default_max_retries() -> u32 {
    MAX_RETRIES
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            remote_timeout_ms: None,
            online_debounce_ms: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl SyncConfig {
    /// Remote call timeout, if one is configured.
    #[must_use]
    pub fn remote_timeout(&self) -> Option<Duration> {
        self.remote_timeout_ms.map(Duration::from_millis)
    }

    /// Connectivity debounce window.
    #[must_use]
    pub const fn online_debounce(&self) -> Duration {
        Duration::from_millis(self.online_debounce_ms)
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self, SyncError> {
        let paths = Paths::new()?;
        Self::load_from_path(&paths.config_file)
    }

    /// Load configuration from a specific path.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load_from_path(path: &std::path::Path) -> Result<Self, SyncError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        let config: Self = serde_yaml::from_str(&contents).map_err(|e| {
            SyncError::Config(format!(
                "Failed to parse config file {}: {e}",
                path.display()
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), SyncError> {
        if self.sync.max_retries == 0 {
            return Err(SyncError::Config(
                "sync.max_retries must be at least 1".to_string(),
            ));
        }
        if self.sync.remote_timeout_ms == Some(0) {
            return Err(SyncError::Config(
                "sync.remote_timeout_ms must be greater than 0 when set".to_string(),
            ));
        }
        Ok(())
    }
}
