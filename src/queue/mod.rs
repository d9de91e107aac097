//! Persistent offline mutation queue.
//!
//! Local writes are recorded as queue entries and replayed against the
//! backend in global enqueue order once the device is online.

mod entry;
mod processor;
mod recorder;
mod store;

pub use entry::{EntryStatus, Mutation, Operation, QueueEntry, MAX_RETRIES};
pub use processor::{
    DrainGuard, DrainOutcome, DrainReport, ProcessorConfig, QueueProcessor, DRAIN_LEASE_TTL,
};
pub use recorder::MutationRecorder;
pub use store::{EntryFilter, EntryUpdate, NewEntry, QueueStats, QueueStore};
