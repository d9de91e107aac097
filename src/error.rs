//! Error types for estate-sync.

use thiserror::Error;

use crate::queue::EntryStatus;

/// Errors raised by the queue, its storage, and the command layer.
#[derive(Debug, Error)]
pub enum SyncError {
    /// `SQLite` failure, with the operation that was attempted.
    #[error("database error: {0}")]
    Database(String),

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON or stored value.
    #[error("parse error: {0}")]
    Parse(String),

    /// A queue entry or other item does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A status change the queue state machine does not allow.
    #[error("invalid status transition for entry {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: EntryStatus,
        to: EntryStatus,
    },
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}
