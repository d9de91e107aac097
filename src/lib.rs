//! estate-sync - offline mutation queue for a property-management backend
//!
//! Local writes are recorded in a durable SQLite queue and replayed against
//! the remote backend in enqueue order once connectivity returns.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod output;
pub mod queue;
pub mod remote;
pub mod state;
pub mod storage;

pub use cli::args::{Cli, Commands, OutputFormat};
pub use connectivity::{ConnectivityMonitor, DrainTrigger};
pub use error::SyncError;
pub use queue::{
    DrainOutcome, DrainReport, Mutation, MutationRecorder, QueueProcessor, QueueStore,
};
pub use remote::{Collection, HttpRemote, Record, RemoteApi, RemoteError};
pub use state::{OfflineState, OfflineStateStore};
