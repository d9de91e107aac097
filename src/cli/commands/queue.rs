//! Queue command implementations.

use std::sync::Arc;

use colored::Colorize;
use serde_json::json;
use tokio::sync::watch;

use super::Context;
use crate::cli::args::OutputFormat;
use crate::error::SyncError;
use crate::output::{format_entries, format_outcome, format_stats, to_json};
use crate::queue::{
    EntryFilter, EntryStatus, Mutation, MutationRecorder, Operation, ProcessorConfig,
    QueueProcessor,
};
use crate::remote::{Collection, HttpRemote};
use crate::state::OfflineStateStore;

/// Show queue counts.
///
/// # Errors
///
/// Returns an error if the queue cannot be read.
pub fn status(ctx: &Context) -> Result<String, SyncError> {
    let stats = ctx.store.stats(ctx.max_retries())?;
    format_stats(&stats, ctx.format)
}

/// List entries in replay order.
///
/// # Errors
///
/// Returns an error if the queue cannot be read.
pub fn list(ctx: &Context, status: Option<EntryStatus>, limit: usize) -> Result<String, SyncError> {
    let (filter, title) = match status {
        Some(status) => (
            EntryFilter::all().status([status]),
            format!("{} Entries", status.as_str().to_uppercase()),
        ),
        None => (EntryFilter::all(), "Queue".to_string()),
    };

    let mut entries = ctx.store.select(&filter)?;
    entries.truncate(limit);
    format_entries(&entries, &title, ctx.max_retries(), ctx.format)
}

/// Record a local write.
///
/// # Errors
///
/// Returns an error if `data` does not match the collection or the insert fails.
pub fn record(
    ctx: &Context,
    operation: Operation,
    collection: Collection,
    record_id: String,
    data: &str,
) -> Result<String, SyncError> {
    let mutation = Mutation::from_parts(operation, collection, record_id, data)?;
    let id = MutationRecorder::new(Arc::clone(&ctx.store)).record(&mutation)?;

    match ctx.format {
        OutputFormat::Json => match ctx.store.get(&id)? {
            Some(entry) => to_json(&entry),
            None => Err(SyncError::NotFound(format!("Queue entry {id}"))),
        },
        OutputFormat::Pretty => Ok(format!(
            "Queued {} {}/{} (ID: {})",
            mutation.operation(),
            mutation.collection(),
            mutation.record_id(),
            id
        )),
    }
}

/// Drain the queue once against the configured backend.
///
/// The command only runs when the operator asks for it, so connectivity is
/// assumed and no connectivity listener is started.
///
/// # Errors
///
/// Returns an error if no backend is configured or the queue storage fails.
pub async fn run(ctx: &Context) -> Result<String, SyncError> {
    let remote = HttpRemote::from_config(&ctx.config.remote)?;
    let processor = Arc::new(QueueProcessor::with_config(
        Arc::clone(&ctx.store),
        Arc::new(remote),
        ProcessorConfig::from(&ctx.config.sync),
    ));

    let (_online, connectivity) = watch::channel(true);
    let state = OfflineStateStore::new(Arc::clone(&ctx.store), processor, connectivity)?;

    let outcome = state.process_queue().await?;
    format_outcome(&outcome, ctx.format)
}

/// Delete dead-lettered entries.
///
/// # Errors
///
/// Returns an error if the delete fails.
pub fn clear_failed(ctx: &Context) -> Result<String, SyncError> {
    let removed = ctx
        .store
        .delete(&EntryFilter::dead_letters(ctx.max_retries()))?;

    match ctx.format {
        OutputFormat::Json => to_json(&json!({ "cleared": removed })),
        OutputFormat::Pretty => Ok(format!("Cleared {removed} dead-lettered entries")),
    }
}

/// Delete every entry.
///
/// # Errors
///
/// Returns an error without `force`, or if the delete fails.
pub fn clear(ctx: &Context, force: bool) -> Result<String, SyncError> {
    if !force {
        return Err(SyncError::Config(
            "Use --force to clear the queue; unsynced local writes will be lost".to_string(),
        ));
    }
    let removed = ctx.store.delete(&EntryFilter::all())?;

    match ctx.format {
        OutputFormat::Json => to_json(&json!({ "cleared": removed })),
        OutputFormat::Pretty => Ok(format!(
            "Cleared {} entries from the queue",
            removed.to_string().bold()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::queue::{EntryUpdate, QueueStore};

    fn context(format: OutputFormat) -> Context {
        Context {
            config: Config::default(),
            store: Arc::new(QueueStore::open_in_memory().unwrap()),
            format,
        }
    }

    #[test]
    fn test_record_then_status_json() {
        let ctx = context(OutputFormat::Json);

        let output = record(
            &ctx,
            Operation::Update,
            Collection::Tasks,
            "t1".to_string(),
            r#"{"status":"done"}"#,
        )
        .unwrap();
        let entry: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(entry["status"], "pending");
        assert_eq!(entry["record_id"], "t1");

        let stats: serde_json::Value = serde_json::from_str(&status(&ctx).unwrap()).unwrap();
        assert_eq!(stats["pending"], 1);
    }

    #[test]
    fn test_record_rejects_mismatched_payload() {
        let ctx = context(OutputFormat::Pretty);
        let result = record(
            &ctx,
            Operation::Insert,
            Collection::Units,
            "u1".to_string(),
            r#"{"full_name":"not a unit"}"#,
        );
        assert!(matches!(result, Err(SyncError::Parse(_))));
    }

    #[test]
    fn test_clear_requires_force() {
        let ctx = context(OutputFormat::Pretty);
        assert!(matches!(clear(&ctx, false), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_clear_failed_reports_count() {
        let ctx = context(OutputFormat::Json);
        let id = MutationRecorder::new(Arc::clone(&ctx.store))
            .record(&Mutation::Delete {
                collection: Collection::Tenants,
                record_id: "p1".to_string(),
            })
            .unwrap();
        for _ in 0..3 {
            ctx.store
                .update(&id, &EntryUpdate::new().increment_retry())
                .unwrap();
        }

        let output: serde_json::Value =
            serde_json::from_str(&clear_failed(&ctx).unwrap()).unwrap();
        assert_eq!(output["cleared"], 1);
    }

    #[tokio::test]
    async fn test_run_drains_immediately_despite_debounce() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/leases/l1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let mut ctx = context(OutputFormat::Json);
        ctx.config.remote.base_url = Some(server.uri());
        ctx.config.sync.online_debounce_ms = 60_000;
        record(&ctx, Operation::Delete, Collection::Leases, "l1".to_string(), "").unwrap();

        let output = tokio::time::timeout(std::time::Duration::from_secs(5), run(&ctx))
            .await
            .unwrap()
            .unwrap();
        let outcome: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(outcome["outcome"], "completed");
        assert_eq!(outcome["success"], 1);
    }

    #[tokio::test]
    async fn test_run_without_backend_is_config_error() {
        let ctx = context(OutputFormat::Pretty);
        assert!(matches!(run(&ctx).await, Err(SyncError::Config(_))));
    }
}
