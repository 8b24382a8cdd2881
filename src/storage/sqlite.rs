//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the record store and
//! of the scheduler state store.

use crate::crawler::{CrawledItem, Fingerprint};
use crate::jobs::{Job, JobId};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{
    FailureRecord, JobContext, RecordStore, ScheduleStateStore, StorageError, StorageResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// SQLite storage backend
///
/// A single connection is shared behind a mutex. The async `RecordStore`
/// methods run their statements on the blocking pool so a slow disk never
/// stalls runtime workers.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens or creates the database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        lock(&self.conn)
    }

    /// Runs `f` against the connection on the blocking thread pool
    async fn blocking<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StorageResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = lock(&conn)?;
            f(&*guard)
        })
            .await
            .map_err(|e| StorageError::Database(format!("storage task failed: {}", e)))?
    }

    /// Counts saved items, optionally for one kind
    pub fn count_items(&self, kind: Option<&str>) -> StorageResult<u64> {
        let conn = self.conn()?;
        let count: i64 = match kind {
            Some(kind) => conn.query_row(
                "SELECT COUNT(*) FROM items WHERE kind = ?1",
                params![kind],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?,
        };
        Ok(count as u64)
    }

    /// Returns the most recent ledger entries, newest first
    pub fn list_failures(&self, kind: Option<&str>, limit: usize) -> StorageResult<Vec<FailureRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT job_id, kind, url, reason, attempts, failed_at FROM failed_items
             WHERE (?1 IS NULL OR kind = ?1)
             ORDER BY id DESC LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![kind, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, u32>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut failures = Vec::new();
        for row in rows {
            let (job_id, kind, url, reason, attempts, failed_at) = row?;
            failures.push(FailureRecord {
                job_id: JobId::parse(&job_id).ok_or_else(|| {
                    StorageError::Serialization(format!("invalid job id '{}'", job_id))
                })?,
                kind,
                url,
                reason,
                attempts,
                failed_at: parse_timestamp(&failed_at)?,
            });
        }

        Ok(failures)
    }

    /// Returns the archived state name and counters for a job, if archived
    pub fn archived_job_state(&self, job_id: JobId) -> StorageResult<Option<(String, u64)>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT state, processed FROM jobs WHERE id = ?1",
                params![job_id.to_string()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        Ok(row.map(|(state, processed)| (state, processed as u64)))
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn save_item(&self, item: &CrawledItem, ctx: &JobContext) -> StorageResult<()> {
        let item = item.clone();
        let ctx = ctx.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO items
                 (fingerprint, job_id, kind, source_url, final_url, title, status_code,
                  content_type, body, link_count, fetched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    item.fingerprint.as_str(),
                    ctx.job_id.to_string(),
                    ctx.kind,
                    item.source_url,
                    item.final_url,
                    item.title,
                    item.status_code,
                    item.content_type,
                    item.body,
                    item.links.len() as i64,
                    item.fetched_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn has_fingerprint(&self, fingerprint: &Fingerprint) -> StorageResult<bool> {
        let fingerprint = fingerprint.clone();
        self.blocking(move |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM items WHERE fingerprint = ?1",
                    params![fingerprint.as_str()],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn record_failure(&self, failure: &FailureRecord) -> StorageResult<()> {
        let failure = failure.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO failed_items (job_id, kind, url, reason, attempts, failed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    failure.job_id.to_string(),
                    failure.kind,
                    failure.url,
                    failure.reason,
                    failure.attempts,
                    failure.failed_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn archive_job(&self, job: &Job) -> StorageResult<()> {
        let job = job.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO jobs
                 (id, kind, mode, state, created_at, started_at, finished_at,
                  total, processed, succeeded, skipped, failed, error_summary)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    job.id.to_string(),
                    job.kind,
                    job.mode.as_str(),
                    job.state.to_db_string(),
                    job.created_at.to_rfc3339(),
                    job.started_at.map(|t| t.to_rfc3339()),
                    job.finished_at.map(|t| t.to_rfc3339()),
                    job.total as i64,
                    job.processed as i64,
                    job.succeeded as i64,
                    job.skipped as i64,
                    job.failed as i64,
                    job.error_summary,
                ],
            )?;
            Ok(())
        })
        .await
    }
}

impl ScheduleStateStore for SqliteStore {
    fn load_last_fired(&self, kind: &str) -> StorageResult<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT last_fired_at FROM scheduler_state WHERE kind = ?1",
                params![kind],
                |row| row.get(0),
            )
            .optional()?;

        raw.as_deref().map(parse_timestamp).transpose()
    }

    fn save_last_fired(&self, kind: &str, at: DateTime<Utc>) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO scheduler_state (kind, last_fired_at) VALUES (?1, ?2)
             ON CONFLICT(kind) DO UPDATE SET last_fired_at = excluded.last_fired_at",
            params![kind, at.to_rfc3339()],
        )?;
        Ok(())
    }
}

fn lock(conn: &Mutex<Connection>) -> StorageResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| StorageError::Database("connection lock poisoned".to_string()))
}

fn parse_timestamp(raw: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Serialization(format!("invalid timestamp '{}': {}", raw, e)))
}
