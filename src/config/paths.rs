//! Path resolution for estate-sync configuration and data files.
//!
//! All data is stored in `~/.estate-sync/`:
//! - `config.yaml` - Main configuration file
//! - `queue.db` - SQLite database holding the mutation queue

use std::path::PathBuf;

use crate::error::SyncError;

/// Paths to the configuration and data files.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Root directory: `~/.estate-sync/`
    pub root: PathBuf,
    /// Config file: `~/.estate-sync/config.yaml`
    pub config_file: PathBuf,
    /// Database file: `~/.estate-sync/queue.db`
    pub database: PathBuf,
}

impl Paths {
    /// Create paths based on the user's home directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new() -> Result<Self, SyncError> {
        let home = std::env::var("HOME")
            .map_err(|_| SyncError::Config("Could not determine home directory".to_string()))?;

        Ok(Self::with_root(PathBuf::from(home).join(".estate-sync")))
    }

    /// Create paths with a custom root directory (useful for testing).
    #[must_use]
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            config_file: root.join("config.yaml"),
            database: root.join("queue.db"),
            root,
        }
    }

    /// Ensure the root directory exists.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn ensure_dirs(&self) -> Result<(), SyncError> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root).map_err(|e| {
                SyncError::Config(format!(
                    "Failed to create directory {}: {e}",
                    self.root.display()
                ))
            })?;
        }

        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self::with_root(PathBuf::from(".estate-sync")))
    }
}
