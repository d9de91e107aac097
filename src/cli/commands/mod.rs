//! Command implementations for estate-sync.
//!
//! Each command returns its rendered output; `main` prints it.

mod queue;

pub use queue::{clear, clear_failed, list, record, run, status};

use std::path::Path;
use std::sync::Arc;

use crate::cli::args::{Commands, OutputFormat};
use crate::config::Config;
use crate::error::SyncError;
use crate::queue::QueueStore;
use crate::storage::Database;

/// Everything a command needs: settings, the opened queue, and the output format.
pub struct Context {
    pub config: Config,
    pub store: Arc<QueueStore>,
    pub format: OutputFormat,
}

impl Context {
    /// Open the queue database at `db_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(config: Config, db_path: &Path, format: OutputFormat) -> Result<Self, SyncError> {
        let db = Database::open_at(db_path)?;
        Ok(Self {
            config,
            store: Arc::new(QueueStore::new(db)),
            format,
        })
    }

    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.config.sync.max_retries
    }
}

/// Run a parsed command
///
/// # Errors
///
/// Returns an error if the command fails.
pub async fn execute(ctx: &Context, command: Commands) -> Result<String, SyncError> {
    match command {
        Commands::Status => status(ctx),
        Commands::List { status, limit } => list(ctx, status, limit),
        Commands::Record {
            operation,
            collection,
            record_id,
            data,
        } => record(ctx, operation, collection, record_id, &data),
        Commands::Run => run(ctx).await,
        Commands::ClearFailed => clear_failed(ctx),
        Commands::Clear { force } => clear(ctx, force),
    }
}
