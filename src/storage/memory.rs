//! In-memory stores
//!
//! Used for dry runs and tests. `MemoryStore` can be told to reject writes for
//! matching URLs to exercise the storage-failure path.

use crate::crawler::{CrawledItem, Fingerprint};
use crate::jobs::Job;
use crate::storage::traits::{
    FailureRecord, JobContext, RecordStore, ScheduleStateStore, StorageError, StorageResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Records {
    items: Vec<(CrawledItem, JobContext)>,
    fingerprints: std::collections::HashSet<Fingerprint>,
    failures: Vec<FailureRecord>,
    jobs: Vec<Job>,
    reject_urls_containing: Vec<String>,
}

/// Record store kept entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Records>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `save_item` fail for any item whose source URL contains `pattern`
    pub fn reject_saves_containing(&self, pattern: &str) {
        self.lock().reject_urls_containing.push(pattern.to_string());
    }

    /// Marks a fingerprint as already stored
    pub fn seed_fingerprint(&self, fingerprint: Fingerprint) {
        self.lock().fingerprints.insert(fingerprint);
    }

    pub fn saved_items(&self) -> Vec<CrawledItem> {
        self.lock().items.iter().map(|(item, _)| item.clone()).collect()
    }

    pub fn failures(&self) -> Vec<FailureRecord> {
        self.lock().failures.clone()
    }

    pub fn archived_jobs(&self) -> Vec<Job> {
        self.lock().jobs.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Records> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn save_item(&self, item: &CrawledItem, ctx: &JobContext) -> StorageResult<()> {
        let mut records = self.lock();

        if records
            .reject_urls_containing
            .iter()
            .any(|p| item.source_url.contains(p.as_str()))
        {
            return Err(StorageError::WriteRejected(item.source_url.clone()));
        }

        if records.fingerprints.insert(item.fingerprint.clone()) {
            records.items.push((item.clone(), ctx.clone()));
        }
        Ok(())
    }

    async fn has_fingerprint(&self, fingerprint: &Fingerprint) -> StorageResult<bool> {
        Ok(self.lock().fingerprints.contains(fingerprint))
    }

    async fn record_failure(&self, failure: &FailureRecord) -> StorageResult<()> {
        self.lock().failures.push(failure.clone());
        Ok(())
    }

    async fn archive_job(&self, job: &Job) -> StorageResult<()> {
        let mut records = self.lock();
        records.jobs.retain(|j| j.id != job.id);
        records.jobs.push(job.clone());
        Ok(())
    }
}

/// Scheduler state kept in memory
#[derive(Debug, Default)]
pub struct MemoryScheduleState {
    last_fired: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryScheduleState {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScheduleStateStore for MemoryScheduleState {
    fn load_last_fired(&self, kind: &str) -> StorageResult<Option<DateTime<Utc>>> {
        let map = self
            .last_fired
            .lock()
            .map_err(|_| StorageError::Database("state lock poisoned".to_string()))?;
        Ok(map.get(kind).copied())
    }

    fn save_last_fired(&self, kind: &str, at: DateTime<Utc>) -> StorageResult<()> {
        let mut map = self
            .last_fired
            .lock()
            .map_err(|_| StorageError::Database("state lock poisoned".to_string()))?;
        map.insert(kind.to_string(), at);
        Ok(())
    }
}
