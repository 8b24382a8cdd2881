//! In-process cache behind a single lock
//!
//! A `HashMap` holds the entries and a `BTreeSet` orders them by expiry so
//! that purging and capacity eviction both start from the entry that expires
//! first.

use crate::cache::{CacheResult, CacheStore};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Longest lifetime an entry can get; larger TTLs are clamped to it
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
    seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
    by_expiry: BTreeSet<(Instant, u64, String)>,
    next_seq: u64,
}

impl Inner {
    fn take(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.by_expiry
            .remove(&(entry.expires_at, entry.seq, key.to_string()));
        Some(entry)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let mut purged = 0;
        while let Some((expires_at, _, key)) = self.by_expiry.first().cloned() {
            if expires_at > now {
                break;
            }
            self.take(&key);
            purged += 1;
        }
        purged
    }

    fn evict_earliest(&mut self) -> bool {
        match self.by_expiry.first().cloned() {
            Some((_, _, key)) => self.take(&key).is_some(),
            None => false,
        }
    }
}

/// Hit/miss counters for a cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

impl CacheStats {
    /// Percentage of lookups that found a live entry
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 * 100.0 / total as f64
        }
    }
}

/// Memory-backed `CacheStore`
///
/// With a capacity set, inserting a new key into a full cache first purges
/// expired entries and then evicts the entry closest to expiry.
#[derive(Debug)]
pub struct MemoryCache {
    inner: Mutex<Inner>,
    capacity: Option<usize>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryCache {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave the map half-updated
        // in a way that breaks expiry, so keep serving.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(None)
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let now = Instant::now();
        let mut inner = self.lock();

        let expired = match inner.entries.get(key) {
            Some(entry) if entry.expires_at > now => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(entry.value.clone()));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            inner.take(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    fn put(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        let now = Instant::now();
        let mut inner = self.lock();

        let replacing = inner.take(key).is_some();

        if let Some(capacity) = self.capacity {
            if !replacing && inner.entries.len() >= capacity {
                inner.purge_expired(now);
                while inner.entries.len() >= capacity {
                    if !inner.evict_earliest() {
                        break;
                    }
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
            }
            if capacity == 0 {
                return Ok(());
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let expires_at = now
            .checked_add(ttl.min(MAX_TTL))
            .unwrap_or(now + Duration::from_secs(24 * 60 * 60));
        inner
            .by_expiry
            .insert((expires_at, seq, key.to_string()));
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at,
                seq,
            },
        );

        Ok(())
    }

    fn remove(&self, key: &str) -> CacheResult<()> {
        self.lock().take(key);
        Ok(())
    }

    fn purge_expired(&self) -> CacheResult<usize> {
        Ok(self.lock().purge_expired(Instant::now()))
    }
}
