//! Database migrations for the queue database.
//!
//! Each migration upgrades the schema by one version and runs when the
//! database is opened.

use rusqlite::Connection;

use crate::error::SyncError;

/// Current schema version.
const CURRENT_VERSION: i32 = 2;

/// Get the current schema version from the database.
///
/// Returns 0 for a new database.
pub fn get_version(conn: &Connection) -> Result<i32, SyncError> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| SyncError::Database(format!("Failed to get schema version: {e}")))
}

fn set_version(conn: &Connection, version: i32) -> Result<(), SyncError> {
    conn.execute_batch(&format!("PRAGMA user_version = {version};"))
        .map_err(|e| SyncError::Database(format!("Failed to set schema version: {e}")))
}

/// Run all pending migrations.
pub fn run(conn: &Connection) -> Result<(), SyncError> {
    let current = get_version(conn)?;

    if current >= CURRENT_VERSION {
        return Ok(());
    }

    for version in (current + 1)..=CURRENT_VERSION {
        run_migration(conn, version)?;
        set_version(conn, version)?;
    }

    Ok(())
}

fn run_migration(conn: &Connection, version: i32) -> Result<(), SyncError> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        _ => Err(SyncError::Database(format!(
            "Unknown migration version: {version}"
        ))),
    }
}

/// Migration v1: the mutation queue.
fn migrate_v1(conn: &Connection) -> Result<(), SyncError> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS mutation_queue (
            id TEXT PRIMARY KEY NOT NULL,
            operation TEXT NOT NULL CHECK (operation IN ('INSERT', 'UPDATE', 'DELETE')),
            collection TEXT NOT NULL,
            record_id TEXT NOT NULL,
            data TEXT NOT NULL,
            enqueued_at INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'syncing', 'failed', 'completed')),
            retry_count INTEGER NOT NULL DEFAULT 0,
            error_message TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_mutation_queue_status
        ON mutation_queue(status, retry_count);

        CREATE INDEX IF NOT EXISTS idx_mutation_queue_enqueued
        ON mutation_queue(enqueued_at);
        ",
    )
    .map_err(|e| SyncError::Database(format!("Migration v1 failed: {e}")))
}

/// Migration v2: the drain lease, a single row naming the active drainer.
fn migrate_v2(conn: &Connection) -> Result<(), SyncError> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS drain_lease (
            id INTEGER PRIMARY KEY NOT NULL CHECK (id = 1),
            owner TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        );
        ",
    )
    .map_err(|e| SyncError::Database(format!("Migration v2 failed: {e}")))
}
