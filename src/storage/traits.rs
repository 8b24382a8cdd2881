//! Storage traits and error types
//!
//! This module defines the trait interfaces the engine persists through and
//! the associated error types.

use crate::crawler::{CrawledItem, Fingerprint};
use crate::jobs::{Job, JobId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Write rejected: {0}")]
    WriteRejected(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// The job an item was produced by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobContext {
    pub job_id: JobId,
    pub kind: String,
}

/// One entry of the failed-item ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub job_id: JobId,
    pub kind: String,
    pub url: String,
    pub reason: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

/// Persistence for crawled items
///
/// Implementations must be safe to share across every worker of every job.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Saves one successful, non-duplicate item
    async fn save_item(&self, item: &CrawledItem, ctx: &JobContext) -> StorageResult<()>;

    /// Returns whether an item with this fingerprint was saved before
    async fn has_fingerprint(&self, fingerprint: &Fingerprint) -> StorageResult<bool>;

    /// Appends an entry to the failed-item ledger
    async fn record_failure(&self, failure: &FailureRecord) -> StorageResult<()>;

    /// Stores the final snapshot of a job
    async fn archive_job(&self, job: &Job) -> StorageResult<()>;
}

/// Persistence for the scheduler's last fire time per job kind
pub trait ScheduleStateStore: Send + Sync {
    fn load_last_fired(&self, kind: &str) -> StorageResult<Option<DateTime<Utc>>>;

    fn save_last_fired(&self, kind: &str, at: DateTime<Utc>) -> StorageResult<()>;
}
