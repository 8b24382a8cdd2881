//! Content-addressed cache for fingerprints and short-lived responses
//!
//! Every worker of every job shares one cache. Entries carry a TTL that is
//! enforced when they are read; an optional background sweeper purges expired
//! entries so memory stays bounded between reads.

mod memory;

pub use memory::{CacheStats, MemoryCache, MAX_TTL};

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Errors raised by a cache backend
///
/// Callers treat any of these as a cache miss.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Key/value store with per-entry expiry
///
/// Implementations must be safe to call from any worker concurrently and must
/// never return an entry past its TTL.
pub trait CacheStore: Send + Sync {
    /// Returns the live value for `key`, removing it if it has expired
    fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Inserts or replaces `key`, expiring after `ttl`
    fn put(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()>;

    /// Returns whether a live entry exists for `key`
    fn contains(&self, key: &str) -> CacheResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Drops `key` if present
    fn remove(&self, key: &str) -> CacheResult<()>;

    /// Removes every expired entry, returning how many were dropped
    fn purge_expired(&self) -> CacheResult<usize>;
}

/// Spawns a task that purges expired entries every `interval` until `cancel` fires
pub fn spawn_sweeper(
    cache: Arc<dyn CacheStore>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match cache.purge_expired() {
                        Ok(0) => {}
                        Ok(purged) => tracing::debug!("Cache sweep purged {} expired entries", purged),
                        Err(e) => tracing::warn!("Cache sweep failed: {}", e),
                    }
                }
            }
        }

        tracing::debug!("Cache sweeper stopped");
    })
}
