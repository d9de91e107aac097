//! Queue processor: replays buffered mutations against the backend.
//!
//! A pass snapshots every eligible entry in global enqueue order and replays
//! them one at a time. Each entry moves `Pending`/`Failed` -> `Syncing` ->
//! `Completed`/`Failed`. Failures are recorded per entry and never abort the
//! pass; they are retried on a later pass until the retry limit is reached.
//!
//! Only one pass runs at a time. Within a process an atomic flag guards the
//! processor; across processors and processes sharing a database file, a
//! pass must also hold the drain lease stored next to the queue. A drain
//! requested while either is taken returns [`DrainOutcome::AlreadyRunning`]
//! without touching the queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::entry::{EntryStatus, Operation, QueueEntry, MAX_RETRIES};
use super::store::{EntryFilter, EntryUpdate, QueueStore};
use crate::config::SyncConfig;
use crate::connectivity::DrainTrigger;
use crate::error::SyncError;
use crate::remote::{RemoteApi, RemoteError};

/// How long a drain lease stays valid without renewal.
///
/// The lease is renewed before every entry, so this bounds a single remote
/// call, not a whole pass.
pub const DRAIN_LEASE_TTL: Duration = Duration::from_secs(300);

/// Configuration for the queue processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Failed attempts after which an entry is dead-lettered
    pub max_retries: u32,
    /// Upper bound on a single remote call
    pub remote_timeout: Option<Duration>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            remote_timeout: None,
        }
    }
}

impl From<&SyncConfig> for ProcessorConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            remote_timeout: config.remote_timeout(),
        }
    }
}

/// Result of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Entries replayed successfully
    pub success: usize,
    /// Entries whose attempt failed in this pass
    pub failed: usize,
    /// Entries that reached the retry limit in this pass, including ones
    /// recovered from an interrupted pass
    pub dead_lettered: Vec<String>,
}

impl DrainReport {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.success + self.failed
    }

    #[must_use]
    pub const fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// What happened to a drain request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// A pass ran to completion.
    Completed(DrainReport),
    /// Another pass was in flight; nothing was done.
    AlreadyRunning,
    /// The device is offline; nothing was done.
    Offline,
}

impl DrainOutcome {
    /// The pass report, if a pass ran.
    #[must_use]
    pub const fn report(&self) -> Option<&DrainReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::AlreadyRunning | Self::Offline => None,
        }
    }
}

/// Proof that the caller owns the single active drain.
///
/// Releases the in-flight flag on drop, including on error paths.
pub struct DrainGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Why a single replay attempt failed.
#[derive(Debug, Error)]
enum ReplayError {
    #[error("{0}")]
    Remote(#[from] RemoteError),

    #[error("{0}")]
    Payload(#[from] SyncError),

    #[error("Remote call timed out after {} ms", .0.as_millis())]
    Timeout(Duration),
}

/// Drains the mutation queue against a remote backend.
pub struct QueueProcessor {
    store: Arc<QueueStore>,
    remote: Arc<dyn RemoteApi>,
    config: ProcessorConfig,
    in_flight: AtomicBool,
    /// Lease owner id, unique per processor
    owner: String,
}

impl QueueProcessor {
    /// Create a processor with default configuration.
    #[must_use]
    pub fn new(store: Arc<QueueStore>, remote: Arc<dyn RemoteApi>) -> Self {
        Self::with_config(store, remote, ProcessorConfig::default())
    }

    /// Create a processor with custom configuration.
    #[must_use]
    pub fn with_config(
        store: Arc<QueueStore>,
        remote: Arc<dyn RemoteApi>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            store,
            remote,
            config,
            in_flight: AtomicBool::new(false),
            owner: Uuid::new_v4().to_string(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Whether a pass is running right now.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Claim the single active drain, or `None` if one is already running.
    #[must_use]
    pub fn try_begin(&self) -> Option<DrainGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| DrainGuard {
                flag: &self.in_flight,
            })
    }

    /// Run one pass unless another is already active.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue storage fails. Remote failures are
    /// recorded on their entries and never surface here.
    pub async fn drain(&self) -> Result<DrainOutcome, SyncError> {
        let Some(guard) = self.try_begin() else {
            debug!("drain already in flight, ignoring request");
            return Ok(DrainOutcome::AlreadyRunning);
        };

        self.run_pass(guard).await
    }

    /// Run one pass while holding `guard`.
    ///
    /// Returns [`DrainOutcome::AlreadyRunning`] if another processor holds
    /// the drain lease on this queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue storage fails.
    pub async fn run_pass(&self, guard: DrainGuard<'_>) -> Result<DrainOutcome, SyncError> {
        if !self.store.acquire_lease(&self.owner, DRAIN_LEASE_TTL)? {
            debug!("drain lease held by another processor, ignoring request");
            return Ok(DrainOutcome::AlreadyRunning);
        }

        let result = self.replay_eligible().await;

        if let Err(e) = self.store.release_lease(&self.owner) {
            error!(error = %e, "failed to release drain lease");
        }
        drop(guard);
        result.map(DrainOutcome::Completed)
    }

    async fn replay_eligible(&self) -> Result<DrainReport, SyncError> {
        let max_retries = self.config.max_retries;
        let mut report = DrainReport::default();

        // Holding the lease means no live drain owns a `Syncing` entry.
        let interrupted = self.store.reset_interrupted()?;
        if !interrupted.is_empty() {
            warn!(count = interrupted.len(), "recovered entries interrupted mid-replay");
        }
        for entry in interrupted.iter().filter(|e| e.retry_count >= max_retries) {
            warn!(
                entry_id = %entry.id,
                collection = %entry.collection,
                record_id = %entry.record_id,
                attempts = entry.retry_count,
                "interrupted entry exhausted its retries and was dead-lettered"
            );
            report.dead_lettered.push(entry.id.clone());
        }

        let snapshot = self.store.select(&EntryFilter::eligible(max_retries))?;
        if snapshot.is_empty() {
            debug!("queue empty, nothing to drain");
            return Ok(report);
        }

        info!(entries = snapshot.len(), "starting drain");

        for entry in &snapshot {
            if !self.store.acquire_lease(&self.owner, DRAIN_LEASE_TTL)? {
                warn!("drain lease lost to another processor, ending pass early");
                break;
            }
            if !self.begin_entry(entry)? {
                continue;
            }

            match self.replay(entry).await {
                Ok(()) => {
                    let update = EntryUpdate::new()
                        .status(EntryStatus::Completed)
                        .clear_error();
                    if self.finish_entry(entry, update)? {
                        debug!(entry_id = %entry.id, "replayed");
                        report.success += 1;
                    }
                }
                Err(err) => {
                    let message = err.to_string();
                    let update = EntryUpdate::new()
                        .status(EntryStatus::Failed)
                        .increment_retry()
                        .error_message(message.clone());
                    if !self.finish_entry(entry, update)? {
                        continue;
                    }

                    report.failed += 1;
                    let attempts = entry.retry_count + 1;
                    if attempts >= max_retries {
                        warn!(
                            entry_id = %entry.id,
                            collection = %entry.collection,
                            record_id = %entry.record_id,
                            attempts,
                            error = %message,
                            "entry exhausted its retries and was dead-lettered"
                        );
                        report.dead_lettered.push(entry.id.clone());
                    } else {
                        warn!(entry_id = %entry.id, attempts, error = %message, "replay failed");
                    }
                }
            }
        }

        let removed = self.store.delete(&EntryFilter::completed())?;
        info!(
            success = report.success,
            failed = report.failed,
            total = report.total(),
            removed,
            "drain finished"
        );

        Ok(report)
    }

    /// Claim an entry for replay. Returns `false` if it is gone or taken.
    fn begin_entry(&self, entry: &QueueEntry) -> Result<bool, SyncError> {
        let claimed = self.store.claim(&entry.id)?;
        if !claimed {
            debug!(entry_id = %entry.id, "entry no longer eligible, skipping");
        }
        Ok(claimed)
    }

    /// Record the outcome of an attempt. Returns `false` if the entry is gone.
    fn finish_entry(&self, entry: &QueueEntry, update: EntryUpdate) -> Result<bool, SyncError> {
        match self.store.update(&entry.id, &update) {
            Ok(()) => Ok(true),
            Err(SyncError::NotFound(_)) => {
                debug!(entry_id = %entry.id, "entry purged during replay");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn replay(&self, entry: &QueueEntry) -> Result<(), ReplayError> {
        match self.config.remote_timeout {
            Some(limit) => tokio::time::timeout(limit, self.dispatch(entry))
                .await
                .map_err(|_| ReplayError::Timeout(limit))?,
            None => self.dispatch(entry).await,
        }
    }

    async fn dispatch(&self, entry: &QueueEntry) -> Result<(), ReplayError> {
        match entry.operation {
            Operation::Insert => {
                let record = entry.record()?;
                self.remote.insert(&entry.record_id, &record).await?;
            }
            Operation::Update => {
                let record = entry.record()?;
                self.remote.update(&entry.record_id, &record).await?;
            }
            Operation::Delete => {
                self.remote.delete(entry.collection, &entry.record_id).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DrainTrigger for QueueProcessor {
    async fn request_drain(&self) {
        if let Err(e) = self.drain().await {
            error!(error = %e, "drain failed");
        }
    }
}
