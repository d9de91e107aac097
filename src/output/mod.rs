//! Output formatting for estate-sync.
//!
//! Every command renders either colored text for a terminal or pretty-printed
//! JSON for scripting.

mod json;
mod pretty;

use crate::cli::args::OutputFormat;
use crate::error::SyncError;
use crate::queue::{DrainOutcome, QueueEntry, QueueStats};

pub use json::*;
pub use pretty::*;

/// Format queue counts based on output format
///
/// # Errors
///
/// Returns `SyncError::Parse` if JSON serialization fails.
pub fn format_stats(stats: &QueueStats, format: OutputFormat) -> Result<String, SyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_stats_pretty(stats)),
        OutputFormat::Json => to_json(stats),
    }
}

/// Format queue entries based on output format
///
/// # Errors
///
/// Returns `SyncError::Parse` if JSON serialization fails.
pub fn format_entries(
    entries: &[QueueEntry],
    title: &str,
    max_retries: u32,
    format: OutputFormat,
) -> Result<String, SyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_entries_pretty(entries, title, max_retries)),
        OutputFormat::Json => format_entries_json(entries, title, max_retries),
    }
}

/// Format a drain outcome based on output format
///
/// # Errors
///
/// Returns `SyncError::Parse` if JSON serialization fails.
pub fn format_outcome(outcome: &DrainOutcome, format: OutputFormat) -> Result<String, SyncError> {
    match format {
        OutputFormat::Pretty => Ok(format_outcome_pretty(outcome)),
        OutputFormat::Json => format_outcome_json(outcome),
    }
}
