//! The per-item crawl algorithm
//!
//! `CrawlerEngine::process` takes one work item through dedup, paced fetching
//! with bounded retries, parsing and fingerprinting. The engine is shared by
//! every worker of a job regardless of execution mode.

use crate::cache::CacheStore;
use crate::config::{CacheConfig, EngineConfig};
use crate::crawler::parser::parse_html;
use crate::crawler::retry::{RetryDecision, RetryPolicy, RetryState};
use crate::crawler::{
    CrawledItem, Fetcher, Fingerprint, IdentityRule, ItemError, Outcome, SkipReason, WorkItem,
};
use crate::storage::RecordStore;
use chrono::Utc;
use rand::Rng;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Inter-request delay ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub delay: (Duration, Duration),

    /// Range used once `slow_after` consecutive transient failures have been seen
    pub slow_delay: (Duration, Duration),
    pub slow_after: u32,
}

impl Pacing {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            delay: (
                Duration::from_millis(config.delay_min_ms),
                Duration::from_millis(config.delay_max_ms),
            ),
            slow_delay: (
                Duration::from_millis(config.slow_delay_min_ms),
                Duration::from_millis(config.slow_delay_max_ms),
            ),
            slow_after: config.slow_after,
        }
    }

    /// No delay at all
    pub fn none() -> Self {
        Self {
            delay: (Duration::ZERO, Duration::ZERO),
            slow_delay: (Duration::ZERO, Duration::ZERO),
            slow_after: u32::MAX,
        }
    }

    fn is_slow(&self, failure_streak: u32) -> bool {
        self.slow_after > 0 && failure_streak >= self.slow_after
    }

    fn pick(&self, failure_streak: u32) -> Duration {
        let (min, max) = if self.is_slow(failure_streak) {
            self.slow_delay
        } else {
            self.delay
        };

        if max <= min {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }
}

/// Live engine counters
#[derive(Debug, Default)]
pub struct EngineStats {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    fetch_attempts: AtomicU64,
    backoff_sleeps: AtomicU64,
    cache_hits: AtomicU64,
    store_hits: AtomicU64,
    cache_errors: AtomicU64,
}

/// Point-in-time copy of `EngineStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStatsSnapshot {
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub fetch_attempts: u64,
    pub backoff_sleeps: u64,
    pub cache_hits: u64,
    pub store_hits: u64,
    pub cache_errors: u64,
}

impl EngineStats {
    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(self)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
            fetch_attempts: self.fetch_attempts.load(Ordering::Relaxed),
            backoff_sleeps: self.backoff_sleeps.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            store_hits: self.store_hits.load(Ordering::Relaxed),
            cache_errors: self.cache_errors.load(Ordering::Relaxed),
        }
    }
}

struct InFlight<'a>(&'a EngineStats);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Fetches, deduplicates and fingerprints work items
pub struct CrawlerEngine {
    fetcher: Arc<dyn Fetcher>,
    cache: Arc<dyn CacheStore>,
    store: Arc<dyn RecordStore>,
    identity: IdentityRule,
    policy: RetryPolicy,
    pacing: Pacing,
    fingerprint_ttl: Duration,
    failure_streak: AtomicU32,
    stats: EngineStats,
}

impl CrawlerEngine {
    /// Creates an engine that derives identity from page content
    ///
    /// Use `with_identity` when the source's URLs identify items.
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        cache: Arc<dyn CacheStore>,
        store: Arc<dyn RecordStore>,
        engine: &EngineConfig,
        cache_config: &CacheConfig,
    ) -> Self {
        Self {
            fetcher,
            cache,
            store,
            identity: IdentityRule::Content,
            policy: RetryPolicy::from_config(engine),
            pacing: Pacing::from_config(engine),
            fingerprint_ttl: Duration::from_secs(cache_config.fingerprint_ttl_secs),
            failure_streak: AtomicU32::new(0),
            stats: EngineStats::default(),
        }
    }

    pub fn with_identity(mut self, identity: IdentityRule) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// True while the engine is using the slow delay range
    pub fn is_slowed(&self) -> bool {
        self.pacing.is_slow(self.failure_streak.load(Ordering::Relaxed))
    }

    /// Processes one work item to an outcome
    ///
    /// # Processing Steps
    ///
    /// 1. Derive the fingerprint from the URL if the identity rule allows it
    ///    and skip items already in the cache or the record store
    /// 2. Fetch with a random delay before every attempt, retrying transient
    ///    failures with jittered exponential backoff
    /// 3. Parse the page, derive or confirm the fingerprint, drop duplicates
    /// 4. Remember the fingerprint in the cache and return the item
    ///
    /// Cancellation interrupts the delays and the backoff sleeps. A fetch that
    /// is already on the wire is allowed to finish; the caller bounds it with
    /// its grace period.
    pub async fn process(&self, item: &mut WorkItem, cancel: &CancellationToken) -> Outcome {
        let _in_flight = self.stats.enter();

        if item.fingerprint.is_none() {
            item.fingerprint = Fingerprint::from_url(&item.source_url, &self.identity);
        }

        if let Some(fingerprint) = item.fingerprint.clone() {
            if let Some(reason) = self.check_seen(&fingerprint).await {
                tracing::debug!("Skipping {} ({})", item.source_url, reason);
                return Outcome::Skipped(reason);
            }
        }

        let page = match self.fetch_with_retry(item, cancel).await {
            Ok(page) => page,
            Err(ItemError::Cancelled { url }) => {
                return Outcome::TransientFailure(ItemError::Cancelled { url })
            }
            Err(e) => return Outcome::PermanentFailure(e),
        };

        let base = Url::parse(&page.final_url)
            .or_else(|_| Url::parse(&item.source_url))
            .ok();
        let parsed = base
            .as_ref()
            .map(|base| parse_html(&page.body, base))
            .unwrap_or_default();

        let prefetched = item.fingerprint.is_some();
        let fingerprint = match item.fingerprint.clone() {
            Some(fp) => fp,
            None => {
                let fp = Fingerprint::from_page(
                    &page.final_url,
                    parsed.canonical.as_deref(),
                    &page.body,
                );
                item.fingerprint = Some(fp.clone());
                fp
            }
        };

        match self.cache.contains(&fingerprint.cache_key()) {
            Ok(true) => {
                tracing::debug!("Dropping duplicate {} ({})", item.source_url, fingerprint);
                self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Outcome::Skipped(SkipReason::Duplicate);
            }
            Ok(false) => {}
            Err(e) => {
                self.stats.cache_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Cache lookup failed, treating as miss: {}", e);
            }
        }

        if !prefetched {
            match self.store.has_fingerprint(&fingerprint).await {
                Ok(true) => {
                    self.stats.store_hits.fetch_add(1, Ordering::Relaxed);
                    self.remember(&fingerprint);
                    return Outcome::Skipped(SkipReason::Duplicate);
                }
                Ok(false) => {}
                Err(e) => tracing::warn!("Record store lookup failed, treating as miss: {}", e),
            }
        }

        self.remember(&fingerprint);

        Outcome::Success(Box::new(CrawledItem {
            source_url: item.source_url.clone(),
            final_url: page.final_url,
            fingerprint,
            title: parsed.title,
            status_code: page.status_code,
            content_type: page.content_type,
            body: page.body,
            links: parsed.links,
            fetched_at: Utc::now(),
        }))
    }

    /// Cache first, then the record store; errors from either count as a miss
    async fn check_seen(&self, fingerprint: &Fingerprint) -> Option<SkipReason> {
        match self.cache.contains(&fingerprint.cache_key()) {
            Ok(true) => {
                self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Some(SkipReason::AlreadySeen);
            }
            Ok(false) => {}
            Err(e) => {
                self.stats.cache_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Cache lookup failed, treating as miss: {}", e);
            }
        }

        match self.store.has_fingerprint(fingerprint).await {
            Ok(true) => {
                self.stats.store_hits.fetch_add(1, Ordering::Relaxed);
                self.remember(fingerprint);
                Some(SkipReason::AlreadyStored)
            }
            Ok(false) => None,
            Err(e) => {
                tracing::warn!("Record store lookup failed, treating as miss: {}", e);
                None
            }
        }
    }

    /// Evicts a fingerprint so a later run fetches the item again
    pub fn forget(&self, fingerprint: &Fingerprint) {
        if let Err(e) = self.cache.remove(&fingerprint.cache_key()) {
            self.stats.cache_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Failed to evict fingerprint {}: {}", fingerprint, e);
        }
    }

    fn remember(&self, fingerprint: &Fingerprint) {
        let now = Utc::now().to_rfc3339();
        if let Err(e) = self
            .cache
            .put(&fingerprint.cache_key(), now, self.fingerprint_ttl)
        {
            self.stats.cache_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Failed to cache fingerprint {}: {}", fingerprint, e);
        }
    }

    async fn fetch_with_retry(
        &self,
        item: &mut WorkItem,
        cancel: &CancellationToken,
    ) -> Result<crate::crawler::FetchedPage, ItemError> {
        let mut retry = RetryState::new();

        loop {
            let delay = self.pacing.pick(self.failure_streak.load(Ordering::Relaxed));
            if !pause(delay, cancel).await {
                return Err(ItemError::Cancelled {
                    url: item.source_url.clone(),
                });
            }

            item.attempt_count += 1;
            self.stats.fetch_attempts.fetch_add(1, Ordering::Relaxed);

            let reason = match self.fetcher.fetch(&item.source_url).await {
                Ok(page) => {
                    if self.pacing.is_slow(self.failure_streak.swap(0, Ordering::Relaxed)) {
                        tracing::info!("Fetch succeeded, leaving slow mode");
                    }
                    return Ok(page);
                }
                Err(ItemError::Transient { reason, .. }) => reason,
                Err(e) => return Err(e),
            };

            let streak = self.failure_streak.fetch_add(1, Ordering::Relaxed) + 1;
            if streak == self.pacing.slow_after {
                tracing::warn!(
                    "{} consecutive transient failures, switching to slow mode",
                    streak
                );
            }

            match retry.record_failure(&self.policy) {
                RetryDecision::Retry(delay) => {
                    tracing::debug!(
                        "Attempt {} for {} failed ({}), retrying in {:?}",
                        retry.attempt,
                        item.source_url,
                        reason,
                        delay
                    );
                    self.stats.backoff_sleeps.fetch_add(1, Ordering::Relaxed);
                    if !pause(delay, cancel).await {
                        return Err(ItemError::Cancelled {
                            url: item.source_url.clone(),
                        });
                    }
                }
                RetryDecision::GiveUp => {
                    return Err(ItemError::RetriesExhausted {
                        url: item.source_url.clone(),
                        attempts: retry.attempt,
                        last: reason,
                    });
                }
            }
        }
    }
}

/// Sleeps for `delay` unless cancelled first; returns false on cancellation
async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    if delay.is_zero() {
        return true;
    }

    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
