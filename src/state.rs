//! Observable offline state.
//!
//! [`OfflineStateStore`] is the single place the UI layer reads connectivity,
//! drain activity, and the outstanding queue size from. Every change is
//! republished on a `watch` channel.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info};

use crate::connectivity::DrainTrigger;
use crate::error::SyncError;
use crate::queue::{
    DrainOutcome, EntryFilter, Mutation, MutationRecorder, QueueProcessor, QueueStats, QueueStore,
};

/// Snapshot of the offline state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OfflineState {
    pub is_online: bool,
    pub is_syncing: bool,
    /// Entries still waiting for a successful replay, dead-letters excluded
    pub pending_sync_count: usize,
}

/// Owns the queue's public surface: recording, draining, and purging.
pub struct OfflineStateStore {
    store: Arc<QueueStore>,
    recorder: MutationRecorder,
    processor: Arc<QueueProcessor>,
    connectivity: watch::Receiver<bool>,
    state: watch::Sender<OfflineState>,
}

impl OfflineStateStore {
    /// Build the store around an existing processor.
    ///
    /// `connectivity` is usually [`ConnectivityMonitor::subscribe`].
    ///
    /// # Errors
    ///
    /// Returns an error if the initial queue count cannot be read.
    ///
    /// [`ConnectivityMonitor::subscribe`]: crate::connectivity::ConnectivityMonitor::subscribe
    pub fn new(
        store: Arc<QueueStore>,
        processor: Arc<QueueProcessor>,
        connectivity: watch::Receiver<bool>,
    ) -> Result<Self, SyncError> {
        let (state, _rx) = watch::channel(OfflineState::default());
        let this = Self {
            recorder: MutationRecorder::new(Arc::clone(&store)),
            store,
            processor,
            connectivity,
            state,
        };
        this.refresh()?;
        Ok(this)
    }

    /// The latest published state.
    #[must_use]
    pub fn current(&self) -> OfflineState {
        *self.state.borrow()
    }

    /// Receiver that observes every republished state.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<OfflineState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.connectivity.borrow()
    }

    /// Queue counts, including dead-letters.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    pub fn stats(&self) -> Result<QueueStats, SyncError> {
        self.store.stats(self.max_retries())
    }

    /// Record a local write.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be persisted.
    pub fn record(&self, mutation: &Mutation) -> Result<String, SyncError> {
        let id = self.recorder.record(mutation)?;
        self.refresh()?;
        Ok(id)
    }

    /// Drain the queue if online and no drain is active.
    ///
    /// Safe to call redundantly.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue storage fails.
    pub async fn process_queue(&self) -> Result<DrainOutcome, SyncError> {
        if !self.is_online() {
            info!("offline, leaving queue untouched");
            return Ok(DrainOutcome::Offline);
        }

        let Some(guard) = self.processor.try_begin() else {
            return Ok(DrainOutcome::AlreadyRunning);
        };

        self.refresh()?;
        let result = self.processor.run_pass(guard).await;
        self.finish_drain(result)
    }

    /// Delete every dead-lettered entry. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn clear_failed_items(&self) -> Result<usize, SyncError> {
        let removed = self
            .store
            .delete(&EntryFilter::dead_letters(self.max_retries()))?;
        info!(removed, "cleared dead-lettered entries");
        self.refresh()?;
        Ok(removed)
    }

    /// Delete every entry regardless of state. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn clear_sync_queue(&self) -> Result<usize, SyncError> {
        let removed = self.store.delete(&EntryFilter::all())?;
        info!(removed, "cleared sync queue");
        self.refresh()?;
        Ok(removed)
    }

    fn max_retries(&self) -> u32 {
        self.processor.config().max_retries
    }

    /// Republish after a pass. A failed refresh is logged so the pass's
    /// report still reaches the caller.
    fn finish_drain(
        &self,
        result: Result<DrainOutcome, SyncError>,
    ) -> Result<DrainOutcome, SyncError> {
        if let Err(e) = self.refresh() {
            error!(error = %e, "failed to refresh offline state after drain");
        }
        result
    }

    /// Recompute and publish the state.
    fn refresh(&self) -> Result<(), SyncError> {
        let next = OfflineState {
            is_online: self.is_online(),
            is_syncing: self.processor.is_syncing(),
            pending_sync_count: self
                .store
                .count(&EntryFilter::outstanding(self.max_retries()))?,
        };

        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        Ok(())
    }
}

#[async_trait]
impl DrainTrigger for OfflineStateStore {
    async fn request_drain(&self) {
        if let Err(e) = self.process_queue().await {
            error!(error = %e, "drain failed");
        }
    }

    async fn connectivity_changed(&self, _online: bool) {
        if let Err(e) = self.refresh() {
            error!(error = %e, "failed to refresh offline state");
        }
    }
}
