//! Crawler module for fetching and processing work items
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching with error classification
//! - HTML parsing and link extraction
//! - Fingerprinting and dedup against the cache and record store
//! - Bounded retries with jittered exponential backoff
//! - The async, threaded and serial execution strategies

mod engine;
mod fetcher;
mod fingerprint;
mod parser;
mod retry;
mod strategy;
mod types;

pub use engine::{CrawlerEngine, EngineStats, EngineStatsSnapshot, Pacing};
pub use fetcher::{build_http_client, FetchedPage, Fetcher, HttpFetcher};
pub use fingerprint::{canonicalize_url, Fingerprint};
pub use parser::{extract_item_links, parse_html, ParsedPage};
pub use retry::{RetryDecision, RetryPolicy, RetryState};
pub use strategy::{dispatch, DispatchPlan, DispatchReport, WorkerEvent};
pub use types::{
    CrawledItem, ExecutionMode, IdentityRule, ItemError, Outcome, SkipReason, WorkItem,
};
