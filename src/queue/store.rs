//! Persistent storage for queue entries.
//!
//! Every call locks the connection, runs to completion, and releases it
//! before returning; callers never hold the lock across an `.await`.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};
use serde::Serialize;
use uuid::Uuid;

use super::entry::{EntryStatus, Operation, QueueEntry};
use crate::error::SyncError;
use crate::remote::Collection;
use crate::storage::Database;

const COLUMNS: &str = "id, operation, collection, record_id, data, enqueued_at, status, retry_count, error_message";

/// Entry to be appended; id and enqueue time are assigned on insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub operation: Operation,
    pub collection: Collection,
    pub record_id: String,
    pub payload: String,
}

/// Predicate over status and retry count.
///
/// An empty filter matches every entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFilter {
    statuses: Vec<EntryStatus>,
    retries_below: Option<u32>,
    retries_at_least: Option<u32>,
}

impl EntryFilter {
    /// Matches every entry.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to the given statuses.
    #[must_use]
    pub fn status(mut self, statuses: impl IntoIterator<Item = EntryStatus>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    /// Restrict to `retry_count < limit`.
    #[must_use]
    pub const fn retries_below(mut self, limit: u32) -> Self {
        self.retries_below = Some(limit);
        self
    }

    /// Restrict to `retry_count >= limit`.
    #[must_use]
    pub const fn retries_at_least(mut self, limit: u32) -> Self {
        self.retries_at_least = Some(limit);
        self
    }

    /// Entries a drain pass picks up.
    #[must_use]
    pub fn eligible(max_retries: u32) -> Self {
        Self::all()
            .status([EntryStatus::Pending, EntryStatus::Failed])
            .retries_below(max_retries)
    }

    /// Entries waiting to reach the backend, including one mid-replay.
    #[must_use]
    pub fn outstanding(max_retries: u32) -> Self {
        Self::all()
            .status([EntryStatus::Pending, EntryStatus::Syncing, EntryStatus::Failed])
            .retries_below(max_retries)
    }

    /// Entries that exhausted their retries.
    #[must_use]
    pub fn dead_letters(max_retries: u32) -> Self {
        Self::all().retries_at_least(max_retries)
    }

    #[must_use]
    pub fn completed() -> Self {
        Self::all().status([EntryStatus::Completed])
    }

    fn to_sql(&self) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        if !self.statuses.is_empty() {
            let placeholders = vec!["?"; self.statuses.len()].join(", ");
            clauses.push(format!("status IN ({placeholders})"));
            values.extend(
                self.statuses
                    .iter()
                    .map(|s| Value::Text(s.as_str().to_string())),
            );
        }
        if let Some(limit) = self.retries_below {
            clauses.push("retry_count < ?".to_string());
            values.push(Value::Integer(i64::from(limit)));
        }
        if let Some(limit) = self.retries_at_least {
            clauses.push("retry_count >= ?".to_string());
            values.push(Value::Integer(i64::from(limit)));
        }

        if clauses.is_empty() {
            (String::new(), values)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), values)
        }
    }
}

/// Partial update applied to a single entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryUpdate {
    status: Option<EntryStatus>,
    increment_retry: bool,
    error_message: Option<Option<String>>,
}

impl EntryUpdate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn status(mut self, status: EntryStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Add one to `retry_count`.
    #[must_use]
    pub const fn increment_retry(mut self) -> Self {
        self.increment_retry = true;
        self
    }

    #[must_use]
    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(Some(message.into()));
        self
    }

    #[must_use]
    pub fn clear_error(mut self) -> Self {
        self.error_message = Some(None);
        self
    }

    fn is_empty(&self) -> bool {
        self.status.is_none() && !self.increment_retry && self.error_message.is_none()
    }
}

/// Queue counts by state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub syncing: usize,
    /// Failed but still under the retry limit
    pub failed: usize,
    pub dead_letters: usize,
    pub completed: usize,
    pub oldest_pending: Option<DateTime<Utc>>,
}

/// Durable, ordered storage for queue entries.
pub struct QueueStore {
    db: Mutex<Database>,
}

impl QueueStore {
    /// Wrap an opened database.
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    /// Open a store on a fresh in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open_in_memory() -> Result<Self, SyncError> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Database>, SyncError> {
        self.db
            .lock()
            .map_err(|_| SyncError::Database("Queue store lock poisoned".to_string()))
    }

    /// Append an entry, assigning its id and enqueue time.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn insert(&self, entry: NewEntry) -> Result<QueueEntry, SyncError> {
        self.insert_with(entry, |_| Ok(()))
    }

    /// Append an entry in the same transaction as `apply`.
    ///
    /// `apply` runs first; if it or the insert fails, nothing is committed.
    ///
    /// # Errors
    ///
    /// Returns the error from `apply`, or a database error.
    pub fn insert_with<F>(&self, entry: NewEntry, apply: F) -> Result<QueueEntry, SyncError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<(), SyncError>,
    {
        let mut db = self.lock()?;
        let tx = db.transaction()?;

        apply(&tx)?;
        let stored = insert_in(&tx, entry)?;

        tx.commit()
            .map_err(|e| SyncError::Database(format!("Failed to commit entry: {e}")))?;
        Ok(stored)
    }

    /// Look up a single entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get(&self, id: &str) -> Result<Option<QueueEntry>, SyncError> {
        let db = self.lock()?;
        db.connection()
            .query_row(
                &format!("SELECT {COLUMNS} FROM mutation_queue WHERE id = ?1"),
                [id],
                row_to_entry,
            )
            .optional()
            .map_err(|e| SyncError::Database(format!("Failed to query entry: {e}")))
    }

    /// Entries matching `filter`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn select(&self, filter: &EntryFilter) -> Result<Vec<QueueEntry>, SyncError> {
        let db = self.lock()?;
        let (clause, values) = filter.to_sql();

        let mut stmt = db
            .connection()
            .prepare(&format!(
                "SELECT {COLUMNS} FROM mutation_queue{clause} ORDER BY enqueued_at ASC, rowid ASC"
            ))
            .map_err(|e| SyncError::Database(format!("Failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map(params_from_iter(values.iter()), row_to_entry)
            .map_err(|e| SyncError::Database(format!("Failed to query entries: {e}")))?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(|e| SyncError::Database(e.to_string()))?);
        }

        Ok(entries)
    }

    /// Apply a partial update to one entry.
    ///
    /// A status change must follow the entry state machine.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no entry has this id, `InvalidTransition` if the
    /// status change is not allowed, or a database error.
    pub fn update(&self, id: &str, update: &EntryUpdate) -> Result<(), SyncError> {
        if update.is_empty() {
            return Ok(());
        }

        let mut sets = Vec::new();
        let mut values = Vec::new();

        if let Some(status) = update.status {
            sets.push("status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        if update.increment_retry {
            sets.push("retry_count = retry_count + 1");
        }
        if let Some(message) = &update.error_message {
            sets.push("error_message = ?");
            values.push(message.clone().map_or(Value::Null, Value::Text));
        }
        values.push(Value::Text(id.to_string()));

        let db = self.lock()?;

        if let Some(next) = update.status {
            let current: String = db
                .connection()
                .query_row(
                    "SELECT status FROM mutation_queue WHERE id = ?1",
                    [id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| SyncError::Database(format!("Failed to read entry status: {e}")))?
                .ok_or_else(|| SyncError::NotFound(format!("Queue entry {id}")))?;

            let current: EntryStatus = current.parse()?;
            if !current.can_transition_to(next) {
                return Err(SyncError::InvalidTransition {
                    id: id.to_string(),
                    from: current,
                    to: next,
                });
            }
        }

        let changed = db
            .connection()
            .execute(
                &format!("UPDATE mutation_queue SET {} WHERE id = ?", sets.join(", ")),
                params_from_iter(values.iter()),
            )
            .map_err(|e| SyncError::Database(format!("Failed to update entry: {e}")))?;

        if changed == 0 {
            return Err(SyncError::NotFound(format!("Queue entry {id}")));
        }
        Ok(())
    }

    /// Remove every entry matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn delete(&self, filter: &EntryFilter) -> Result<usize, SyncError> {
        let db = self.lock()?;
        let (clause, values) = filter.to_sql();

        db.connection()
            .execute(
                &format!("DELETE FROM mutation_queue{clause}"),
                params_from_iter(values.iter()),
            )
            .map_err(|e| SyncError::Database(format!("Failed to delete entries: {e}")))
    }

    /// Number of entries matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count(&self, filter: &EntryFilter) -> Result<usize, SyncError> {
        let db = self.lock()?;
        let (clause, values) = filter.to_sql();

        let count: i64 = db
            .connection()
            .query_row(
                &format!("SELECT COUNT(*) FROM mutation_queue{clause}"),
                params_from_iter(values.iter()),
                |row| row.get(0),
            )
            .map_err(|e| SyncError::Database(format!("Failed to count entries: {e}")))?;

        usize::try_from(count).map_err(|e| SyncError::Database(e.to_string()))
    }

    /// Counts by state, splitting failed entries at `max_retries`.
    ///
    /// # Errors
    ///
    /// Returns an error if any query fails.
    pub fn stats(&self, max_retries: u32) -> Result<QueueStats, SyncError> {
        let live = |status: EntryStatus| {
            EntryFilter::all()
                .status([status])
                .retries_below(max_retries)
        };

        let oldest_pending = {
            let db = self.lock()?;
            db.connection()
                .query_row(
                    "SELECT enqueued_at FROM mutation_queue WHERE status = 'pending'
                     ORDER BY enqueued_at ASC LIMIT 1",
                    [],
                    |row| row.get::<_, i64>(0),
                )
                .optional()
                .map_err(|e| SyncError::Database(format!("Failed to get oldest pending: {e}")))?
        };

        Ok(QueueStats {
            pending: self.count(&live(EntryStatus::Pending))?,
            syncing: self.count(&live(EntryStatus::Syncing))?,
            failed: self.count(&live(EntryStatus::Failed))?,
            dead_letters: self.count(&EntryFilter::dead_letters(max_retries))?,
            completed: self.count(&EntryFilter::completed())?,
            oldest_pending: oldest_pending.and_then(DateTime::<Utc>::from_timestamp_millis),
        })
    }

    /// Move an entry from `Pending` or `Failed` to `Syncing`.
    ///
    /// Returns `false` if the entry is gone or was claimed by another drain.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn claim(&self, id: &str) -> Result<bool, SyncError> {
        let db = self.lock()?;
        let changed = db
            .connection()
            .execute(
                "UPDATE mutation_queue SET status = 'syncing'
                 WHERE id = ?1 AND status IN ('pending', 'failed')",
                [id],
            )
            .map_err(|e| SyncError::Database(format!("Failed to claim entry: {e}")))?;
        Ok(changed > 0)
    }

    /// Take or extend the drain lease for `owner`, valid for `ttl`.
    ///
    /// Returns `false` while a different owner holds an unexpired lease.
    ///
    /// # Errors
    ///
    /// Returns an error if the lease row cannot be written.
    pub fn acquire_lease(&self, owner: &str, ttl: Duration) -> Result<bool, SyncError> {
        let now = Utc::now().timestamp_millis();
        let ttl = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = now.saturating_add(ttl);

        let db = self.lock()?;
        let changed = db
            .connection()
            .execute(
                "INSERT INTO drain_lease (id, owner, expires_at) VALUES (1, ?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET
                     owner = excluded.owner,
                     expires_at = excluded.expires_at
                 WHERE drain_lease.owner = excluded.owner OR drain_lease.expires_at <= ?3",
                params![owner, expires_at, now],
            )
            .map_err(|e| SyncError::Database(format!("Failed to acquire drain lease: {e}")))?;
        Ok(changed > 0)
    }

    /// Drop the drain lease if `owner` holds it.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn release_lease(&self, owner: &str) -> Result<(), SyncError> {
        let db = self.lock()?;
        db.connection()
            .execute("DELETE FROM drain_lease WHERE owner = ?1", [owner])
            .map_err(|e| SyncError::Database(format!("Failed to release drain lease: {e}")))?;
        Ok(())
    }

    /// Fail entries left in `Syncing` by a pass that never finished.
    ///
    /// Each counts as a failed attempt. Only call this while holding the
    /// drain lease, or a live drain's entry would be replayed twice. Returns
    /// the reset entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn reset_interrupted(&self) -> Result<Vec<QueueEntry>, SyncError> {
        let db = self.lock()?;
        let mut stmt = db
            .connection()
            .prepare(&format!(
                "UPDATE mutation_queue SET
                 status = 'failed',
                 retry_count = retry_count + 1,
                 error_message = 'Interrupted before completion'
                 WHERE status = 'syncing'
                 RETURNING {COLUMNS}"
            ))
            .map_err(|e| SyncError::Database(format!("Failed to reset interrupted entries: {e}")))?;

        let rows = stmt
            .query_map([], row_to_entry)
            .map_err(|e| SyncError::Database(format!("Failed to reset interrupted entries: {e}")))?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(|e| SyncError::Database(e.to_string()))?);
        }

        entries.sort_by_key(|e| e.enqueued_at);
        Ok(entries)
    }
}

fn insert_in(conn: &Connection, entry: NewEntry) -> Result<QueueEntry, SyncError> {
    let last: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(enqueued_at), 0) FROM mutation_queue",
            [],
            |row| row.get(0),
        )
        .map_err(|e| SyncError::Database(format!("Failed to read queue clock: {e}")))?;

    // Strictly increasing even when the wall clock stalls or goes backwards.
    let enqueued_at = Utc::now().timestamp_millis().max(last + 1);

    let stored = QueueEntry {
        id: Uuid::new_v4().to_string(),
        operation: entry.operation,
        collection: entry.collection,
        record_id: entry.record_id,
        payload: entry.payload,
        enqueued_at,
        status: EntryStatus::Pending,
        retry_count: 0,
        error_message: None,
    };

    conn.execute(
        "INSERT INTO mutation_queue (id, operation, collection, record_id, data, enqueued_at, status, retry_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)",
        params![
            stored.id,
            stored.operation.as_str(),
            stored.collection.as_str(),
            stored.record_id,
            stored.payload,
            stored.enqueued_at,
            stored.status.as_str(),
        ],
    )
    .map_err(|e| SyncError::Database(format!("Failed to enqueue mutation: {e}")))?;

    Ok(stored)
}

fn parse_column<T>(idx: usize, raw: &str) -> Result<T, rusqlite::Error>
where
    T: std::str::FromStr<Err = SyncError>,
{
    raw.parse()
        .map_err(|e: SyncError| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_entry(row: &Row<'_>) -> Result<QueueEntry, rusqlite::Error> {
    let operation: String = row.get(1)?;
    let collection: String = row.get(2)?;
    let status: String = row.get(6)?;

    Ok(QueueEntry {
        id: row.get(0)?,
        operation: parse_column(1, &operation)?,
        collection: parse_column(2, &collection)?,
        record_id: row.get(3)?,
        payload: row.get(4)?,
        enqueued_at: row.get(5)?,
        status: parse_column(6, &status)?,
        retry_count: row.get(7)?,
        error_message: row.get(8)?,
    })
}
