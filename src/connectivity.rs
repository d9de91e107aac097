//! Connectivity monitoring.
//!
//! The platform reachability source feeds [`ConnectivityMonitor::set_online`].
//! A listener task spawned with [`ConnectivityMonitor::spawn`] turns each
//! offline -> online edge into one drain request. The monitor itself does no
//! I/O against the queue or the backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Receives the monitor's signals.
#[async_trait]
pub trait DrainTrigger: Send + Sync {
    /// Connectivity was regained; drain the queue once.
    async fn request_drain(&self);

    /// Connectivity flipped to `online`.
    async fn connectivity_changed(&self, _online: bool) {}
}

/// Observable online/offline flag.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    tx: watch::Sender<bool>,
    debounce: Duration,
}

impl ConnectivityMonitor {
    /// Create a monitor with the given initial state.
    ///
    /// A non-zero `debounce` delays the drain request until the connection
    /// has stayed up for that long.
    #[must_use]
    pub fn new(online: bool, debounce: Duration) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx, debounce }
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Report the current reachability. Returns `true` if the state changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            info!(online, "connectivity changed");
        }
        changed
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Start the listener task.
    ///
    /// The task ends when the monitor is dropped.
    pub fn spawn<T>(&self, trigger: Arc<T>) -> JoinHandle<()>
    where
        T: DrainTrigger + ?Sized + 'static,
    {
        let mut rx = self.tx.subscribe();
        let debounce = self.debounce;

        tokio::spawn(async move {
            let mut was_online = *rx.borrow_and_update();

            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                if online == was_online {
                    continue;
                }
                was_online = online;

                trigger.connectivity_changed(online).await;
                if !online {
                    continue;
                }

                if !debounce.is_zero() {
                    tokio::time::sleep(debounce).await;
                    if !*rx.borrow() {
                        debug!("connection dropped within debounce window, skipping drain");
                        continue;
                    }
                }

                debug!("back online, requesting drain");
                trigger.request_drain().await;
            }

            debug!("connectivity monitor closed, listener exiting");
        })
    }
}
