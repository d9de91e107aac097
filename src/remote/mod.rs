//! Remote backend abstraction.
//!
//! The queue processor replays mutations through [`RemoteApi`]. Errors carry
//! a human-readable message only; the processor does not classify them.

mod collection;
mod http;

pub use collection::{
    Collection, LeaseData, PropertyData, Record, TaskData, TaskPriority, TaskStatus, TenantData,
    UnitData,
};
pub use http::HttpRemote;

use async_trait::async_trait;
use thiserror::Error;

/// Failure reported by the backend for a single call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RemoteError {
    message: String,
}

impl RemoteError {
    /// Create an error from a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The message as reported by the backend or transport.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// CRUD endpoints of the backend, one call per queued mutation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Create a record under the client-assigned `record_id`, returning the
    /// stored record.
    ///
    /// Later updates and deletes for the same record address it by this id.
    async fn insert(
        &self,
        record_id: &str,
        record: &Record,
    ) -> Result<serde_json::Value, RemoteError>;

    /// Apply `record` to an existing record, returning the stored record.
    async fn update(
        &self,
        record_id: &str,
        record: &Record,
    ) -> Result<serde_json::Value, RemoteError>;

    /// Remove a record.
    async fn delete(&self, collection: Collection, record_id: &str) -> Result<(), RemoteError>;
}
