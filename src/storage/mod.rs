//! Storage layer.
//!
//! SQLite-based persistence for the offline mutation queue.

mod database;
mod migrations;

pub use database::Database;
