//! Work source built from `[[source]]` configuration entries
//!
//! Each entry lists item URLs directly and/or listing pages whose matching
//! links become items. Listing responses are cached for a short TTL so that
//! back-to-back runs do not refetch them.

use crate::cache::CacheStore;
use crate::config::SourceEntry;
use crate::crawler::{extract_item_links, Fetcher, IdentityRule, WorkItem};
use crate::source::WorkSource;
use crate::CrawlError;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub struct ConfiguredSource {
    entries: Vec<SourceEntry>,
    fetcher: Arc<dyn Fetcher>,
    cache: Arc<dyn CacheStore>,
    response_ttl: Duration,
}

impl ConfiguredSource {
    pub fn new(
        entries: Vec<SourceEntry>,
        fetcher: Arc<dyn Fetcher>,
        cache: Arc<dyn CacheStore>,
        response_ttl: Duration,
    ) -> Self {
        Self {
            entries,
            fetcher,
            cache,
            response_ttl,
        }
    }

    fn entry(&self, kind: &str) -> Option<&SourceEntry> {
        self.entries.iter().find(|e| e.kind == kind)
    }

    /// Returns the listing page body, from the cache when still fresh
    async fn listing_body(&self, listing_url: &str) -> Result<String, String> {
        let key = format!("resp:{}", listing_url);

        match self.cache.get(&key) {
            Ok(Some(body)) => {
                tracing::debug!("Listing {} served from cache", listing_url);
                return Ok(body);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Cache lookup failed, treating as miss: {}", e),
        }

        let page = self
            .fetcher
            .fetch(listing_url)
            .await
            .map_err(|e| e.to_string())?;

        if let Err(e) = self.cache.put(&key, page.body.clone(), self.response_ttl) {
            tracing::warn!("Failed to cache listing {}: {}", listing_url, e);
        }

        Ok(page.body)
    }
}

#[async_trait]
impl WorkSource for ConfiguredSource {
    /// Collects direct URLs first, then links from every listing page in order
    ///
    /// A failing listing page is logged and skipped. Enumeration only fails
    /// when the kind is unknown or when every listing page failed and there
    /// are no direct URLs to fall back on.
    async fn enumerate(&self, kind: &str) -> Result<Vec<WorkItem>, CrawlError> {
        let entry = self.entry(kind).ok_or_else(|| CrawlError::Enumeration {
            kind: kind.to_string(),
            reason: "no source configured for this kind".to_string(),
        })?;

        let mut seen = HashSet::new();
        let mut items = Vec::new();

        for url in &entry.urls {
            if seen.insert(url.clone()) {
                items.push(WorkItem::new(url.clone()));
            }
        }

        let mut last_error = None;
        let mut listings_ok = 0;

        for listing_url in &entry.listing_urls {
            let base = match Url::parse(listing_url) {
                Ok(base) => base,
                Err(e) => {
                    last_error = Some(format!("{}: {}", listing_url, e));
                    continue;
                }
            };

            match self.listing_body(listing_url).await {
                Ok(body) => {
                    listings_ok += 1;
                    let links =
                        extract_item_links(&body, &base, entry.link_contains.as_deref());
                    tracing::debug!("Listing {} yielded {} links", listing_url, links.len());
                    for link in links {
                        if seen.insert(link.clone()) {
                            items.push(WorkItem::new(link));
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to fetch listing {}: {}", listing_url, e);
                    last_error = Some(e);
                }
            }
        }

        if !entry.listing_urls.is_empty() && listings_ok == 0 && entry.urls.is_empty() {
            return Err(CrawlError::Enumeration {
                kind: kind.to_string(),
                reason: last_error.unwrap_or_else(|| "no listing page could be read".to_string()),
            });
        }

        tracing::info!("Enumerated {} items for kind '{}'", items.len(), kind);
        Ok(items)
    }

    fn identity(&self, kind: &str) -> IdentityRule {
        self.entry(kind)
            .map(|e| e.identity.clone())
            .unwrap_or_default()
    }
}
