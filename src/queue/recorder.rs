//! Records local writes as queue entries.
//!
//! Every tracked mutation produces exactly one entry, online or not. Writes
//! to the same record are never coalesced; replay order decides the final
//! remote state.

use std::sync::Arc;

use rusqlite::Transaction;
use tracing::debug;

use super::entry::Mutation;
use super::store::{NewEntry, QueueStore};
use crate::error::SyncError;

/// Appends mutations to the persistent queue.
#[derive(Clone)]
pub struct MutationRecorder {
    store: Arc<QueueStore>,
}

impl MutationRecorder {
    #[must_use]
    pub const fn new(store: Arc<QueueStore>) -> Self {
        Self { store }
    }

    /// Record a mutation and return the new entry's id.
    ///
    /// The entry is durable when this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded or the insert fails.
    pub fn record(&self, mutation: &Mutation) -> Result<String, SyncError> {
        self.record_with(mutation, |_| Ok(()))
    }

    /// Record a mutation together with the optimistic local write.
    ///
    /// `apply` runs inside the same transaction as the queue insert, so the
    /// local cache and the queue either both change or neither does.
    ///
    /// # Errors
    ///
    /// Returns the error from `apply`, or the storage error.
    pub fn record_with<F>(&self, mutation: &Mutation, apply: F) -> Result<String, SyncError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<(), SyncError>,
    {
        let entry = NewEntry {
            operation: mutation.operation(),
            collection: mutation.collection(),
            record_id: mutation.record_id().to_string(),
            payload: mutation.payload()?,
        };

        let stored = self.store.insert_with(entry, apply)?;
        debug!(
            entry_id = %stored.id,
            operation = %stored.operation,
            collection = %stored.collection,
            record_id = %stored.record_id,
            "recorded mutation"
        );

        Ok(stored.id)
    }
}
