//! Configuration management.
//!
//! This module handles loading configuration from `~/.estate-sync/`.

mod paths;
mod settings;

pub use paths::Paths;
pub use settings::{Config, LoggingConfig, RemoteConfig, SyncConfig};
