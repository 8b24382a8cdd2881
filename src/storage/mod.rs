//! Storage module for persisting crawl results
//!
//! This module handles all persistence for the engine, including:
//! - Saved items and the fingerprint index used for dedup
//! - The failed-item ledger
//! - Archived job snapshots
//! - The scheduler's last fire times

mod memory;
mod schema;
mod sqlite;
mod traits;

pub use memory::{MemoryScheduleState, MemoryStore};
pub use schema::{initialize_schema, SCHEMA_SQL};
pub use sqlite::SqliteStore;
pub use traits::{
    FailureRecord, JobContext, RecordStore, ScheduleStateStore, StorageError, StorageResult,
};

use std::path::Path;

/// Opens the SQLite database used by the binary
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
pub fn open_storage(path: &Path) -> StorageResult<SqliteStore> {
    SqliteStore::new(path)
}
