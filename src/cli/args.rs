use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::queue::{EntryStatus, Operation};
use crate::remote::Collection;

#[derive(Parser)]
#[command(name = "estate-sync")]
#[command(about = "Offline mutation queue for the property-management backend")]
#[command(long_about = "estate-sync - offline mutation queue operator console

Local writes made while offline are buffered in a SQLite queue and replayed
against the backend, oldest first, once connectivity returns.

QUICK START:
  estate-sync status                       Show queue counts
  estate-sync list --status failed         Show failed entries
  estate-sync record -O update -c tasks -r t1 -d '{\"status\":\"done\"}'
  estate-sync run                          Drain the queue once

OUTPUT FORMATS:
  --output pretty    Human-readable colored output (default)
  --output json      Machine-readable JSON for scripting")]
#[command(version, propagate_version = true)]
pub struct Cli {
    /// Output format for command results
    #[arg(short, long, value_enum, default_value = "pretty", global = true)]
    pub output: OutputFormat,

    /// Queue database path (defaults to ~/.estate-sync/queue.db)
    #[arg(long, env = "ESTATE_SYNC_DB", global = true)]
    pub db: Option<PathBuf>,

    /// Config file path (defaults to ~/.estate-sync/config.yaml)
    #[arg(long, env = "ESTATE_SYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for command results.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable colored output.
    #[default]
    Pretty,
    /// Machine-readable JSON output.
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show queue status
    ///
    /// Displays pending, failed, and dead-lettered entry counts.
    #[command(alias = "st")]
    Status,

    /// List queued entries in replay order
    #[command(alias = "ls")]
    List {
        /// Filter by status (pending, syncing, failed, completed)
        #[arg(long, short = 's', value_parser = parse_status)]
        status: Option<EntryStatus>,

        /// Maximum entries to show
        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,
    },

    /// Record a local write in the queue
    Record {
        /// Operation (insert, update, delete)
        #[arg(long, short = 'O', value_parser = parse_operation)]
        operation: Operation,

        /// Target collection (properties, units, tenants, leases, tasks)
        #[arg(long, short = 'c', value_parser = parse_collection)]
        collection: Collection,

        /// Target record ID
        #[arg(long, short = 'r')]
        record_id: String,

        /// Record fields as JSON (ignored for delete)
        #[arg(long, short = 'd', default_value = "{}")]
        data: String,
    },

    /// Drain the queue once against the configured backend
    Run,

    /// Delete entries that exhausted their retries
    ClearFailed,

    /// Delete every entry in the queue
    Clear {
        /// Required: this discards unsynced local writes
        #[arg(long)]
        force: bool,
    },
}

fn parse_status(s: &str) -> Result<EntryStatus, String> {
    s.parse().map_err(|e: crate::error::SyncError| e.to_string())
}

fn parse_operation(s: &str) -> Result<Operation, String> {
    s.parse().map_err(|e: crate::error::SyncError| e.to_string())
}

fn parse_collection(s: &str) -> Result<Collection, String> {
    s.parse().map_err(|e: crate::error::SyncError| e.to_string())
}
