//! Queue entry types.
//!
//! A queue entry is one buffered local mutation waiting to be replayed
//! against the backend.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::remote::{Collection, Record};

/// Failed attempts after which an entry leaves automatic processing.
pub const MAX_RETRIES: u32 = 3;

/// Kind of write being replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    /// Stored representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            _ => Err(SyncError::Parse(format!("Unknown operation: {s}"))),
        }
    }
}

/// Lifecycle state of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// Waiting for its first attempt
    Pending,
    /// Being replayed right now
    Syncing,
    /// Last attempt failed; eligible again while under the retry limit
    Failed,
    /// Replayed successfully; removed at the end of the pass
    Completed,
}

impl EntryStatus {
    /// Stored representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }

    /// Whether the queue state machine allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending | Self::Failed, Self::Syncing)
                | (Self::Syncing, Self::Completed | Self::Failed)
        )
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "failed" => Ok(Self::Failed),
            "completed" => Ok(Self::Completed),
            _ => Err(SyncError::Parse(format!("Unknown entry status: {s}"))),
        }
    }
}

/// One buffered mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    /// Random v4 UUID
    pub id: String,
    pub operation: Operation,
    pub collection: Collection,
    pub record_id: String,
    /// JSON snapshot used to replay the operation
    pub payload: String,
    /// Epoch milliseconds, strictly increasing in insertion order
    pub enqueued_at: i64,
    pub status: EntryStatus,
    pub retry_count: u32,
    pub error_message: Option<String>,
}

impl QueueEntry {
    /// Whether the entry has used up its retry budget.
    #[must_use]
    pub const fn is_dead_letter(&self, max_retries: u32) -> bool {
        self.retry_count >= max_retries
    }

    /// Enqueue time as a timestamp.
    #[must_use]
    pub fn enqueued_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.enqueued_at)
    }

    /// Decode the stored payload into the collection's typed record.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not match the collection's shape.
    pub fn record(&self) -> Result<Record, SyncError> {
        Record::from_payload(self.collection, &self.payload).map_err(|e| {
            SyncError::Parse(format!(
                "Invalid {} payload for entry {}: {e}",
                self.collection, self.id
            ))
        })
    }
}

/// A local write to be recorded in the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Create `record_id` with the given snapshot.
    Insert { record_id: String, record: Record },
    /// Apply the given fields to `record_id`.
    Update { record_id: String, record: Record },
    /// Remove `record_id` from `collection`.
    Delete {
        collection: Collection,
        record_id: String,
    },
}

impl Mutation {
    #[must_use]
    pub const fn operation(&self) -> Operation {
        match self {
            Self::Insert { .. } => Operation::Insert,
            Self::Update { .. } => Operation::Update,
            Self::Delete { .. } => Operation::Delete,
        }
    }

    #[must_use]
    pub const fn collection(&self) -> Collection {
        match self {
            Self::Insert { record, .. } | Self::Update { record, .. } => record.collection(),
            Self::Delete { collection, .. } => *collection,
        }
    }

    #[must_use]
    pub fn record_id(&self) -> &str {
        match self {
            Self::Insert { record_id, .. }
            | Self::Update { record_id, .. }
            | Self::Delete { record_id, .. } => record_id,
        }
    }

    /// JSON payload stored with the entry. Deletes store an empty object.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be serialized.
    pub fn payload(&self) -> Result<String, SyncError> {
        match self {
            Self::Insert { record, .. } | Self::Update { record, .. } => Ok(record.to_payload()?),
            Self::Delete { .. } => Ok("{}".to_string()),
        }
    }

    /// Build a mutation from loosely typed parts, validating the payload
    /// against the collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not match the collection.
    pub fn from_parts(
        operation: Operation,
        collection: Collection,
        record_id: impl Into<String>,
        payload: &str,
    ) -> Result<Self, SyncError> {
        let record_id = record_id.into();
        match operation {
            Operation::Delete => Ok(Self::Delete {
                collection,
                record_id,
            }),
            Operation::Insert | Operation::Update => {
                let record = Record::from_payload(collection, payload).map_err(|e| {
                    SyncError::Parse(format!("Invalid {collection} payload: {e}"))
                })?;
                Ok(if operation == Operation::Insert {
                    Self::Insert { record_id, record }
                } else {
                    Self::Update { record_id, record }
                })
            }
        }
    }
}
