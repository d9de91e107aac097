//! JSON output formatting.

use serde::Serialize;
use serde_json::json;

use crate::error::SyncError;
use crate::queue::{DrainOutcome, QueueEntry};

/// Format queue entries as JSON
///
/// Each entry carries a `dead_letter` flag computed against `max_retries`.
///
/// # Errors
///
/// Returns `SyncError::Parse` if JSON serialization fails.
pub fn format_entries_json(
    entries: &[QueueEntry],
    title: &str,
    max_retries: u32,
) -> Result<String, SyncError> {
    let items: Vec<_> = entries
        .iter()
        .map(|entry| {
            json!({
                "id": entry.id,
                "operation": entry.operation,
                "collection": entry.collection,
                "record_id": entry.record_id,
                "data": serde_json::from_str::<serde_json::Value>(&entry.payload)
                    .unwrap_or_else(|_| serde_json::Value::String(entry.payload.clone())),
                "enqueued_at": entry.enqueued_at_utc().map(|t| t.to_rfc3339()),
                "status": entry.status,
                "retry_count": entry.retry_count,
                "error_message": entry.error_message,
                "dead_letter": entry.is_dead_letter(max_retries),
            })
        })
        .collect();

    to_json(&json!({
        "list": title,
        "count": entries.len(),
        "items": items,
    }))
}

/// Format a drain outcome as JSON
///
/// # Errors
///
/// Returns `SyncError::Parse` if JSON serialization fails.
pub fn format_outcome_json(outcome: &DrainOutcome) -> Result<String, SyncError> {
    let data = match outcome {
        DrainOutcome::Completed(report) => json!({
            "outcome": "completed",
            "success": report.success,
            "failed": report.failed,
            "dead_lettered": report.dead_lettered,
            "total": report.total(),
        }),
        DrainOutcome::AlreadyRunning => json!({ "outcome": "already_running" }),
        DrainOutcome::Offline => json!({ "outcome": "offline" }),
    };
    to_json(&data)
}

/// Generic JSON serialization
///
/// # Errors
///
/// Returns `SyncError::Parse` if JSON serialization fails.
pub fn to_json<T: Serialize>(value: &T) -> Result<String, SyncError> {
    Ok(serde_json::to_string_pretty(value)?)
}
