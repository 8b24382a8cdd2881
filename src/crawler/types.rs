//! Core crawler types shared by the engine, strategies and job driver

use crate::crawler::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// How a job's work items are admitted and suspended
///
/// All three modes share the same engine and produce identical outcomes;
/// they only differ in where the work runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Tasks on the job's runtime, gated by a semaphore
    #[default]
    Async,

    /// A fixed pool of OS threads, one blocking item per thread
    #[serde(alias = "thread")]
    Threaded,

    /// One item at a time in the driver task
    #[serde(alias = "sync")]
    Serial,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Async => "async",
            ExecutionMode::Threaded => "threaded",
            ExecutionMode::Serial => "serial",
        }
    }

    /// Effective admission limit for this mode
    pub fn admission_limit(&self, configured: usize) -> usize {
        match self {
            ExecutionMode::Serial => 1,
            _ => configured.max(1),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "async" => Ok(ExecutionMode::Async),
            "threaded" | "thread" => Ok(ExecutionMode::Threaded),
            "serial" | "sync" => Ok(ExecutionMode::Serial),
            other => Err(format!(
                "unknown execution mode '{}' (expected async, threaded or serial)",
                other
            )),
        }
    }
}

/// How a source derives item identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityRule {
    /// The value of one query parameter identifies the item (e.g. `tid`)
    QueryParam(String),

    /// The canonicalized URL identifies the item
    Path,

    /// Identity is only known after fetching (canonical link or body digest)
    #[default]
    Content,
}

/// A unit of work: one item URL to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub source_url: String,

    /// Set before the fetch when the identity rule allows it, after otherwise
    pub fingerprint: Option<Fingerprint>,

    pub attempt_count: u32,
}

impl WorkItem {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            fingerprint: None,
            attempt_count: 0,
        }
    }
}

/// A successfully fetched, fingerprinted item
#[derive(Debug, Clone, Serialize)]
pub struct CrawledItem {
    pub source_url: String,
    pub final_url: String,
    pub fingerprint: Fingerprint,
    pub title: Option<String>,
    pub status_code: u16,
    pub content_type: String,
    pub body: String,
    pub links: Vec<String>,
    pub fetched_at: DateTime<Utc>,
}

/// Why an item was skipped without being stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Pre-fetch fingerprint found in the cache
    AlreadySeen,

    /// Pre-fetch fingerprint found in the record store
    AlreadyStored,

    /// Post-fetch fingerprint matched an item seen earlier
    Duplicate,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::AlreadySeen => "already seen",
            SkipReason::AlreadyStored => "already stored",
            SkipReason::Duplicate => "duplicate",
        };
        f.write_str(s)
    }
}

/// Per-item failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemError {
    /// Timeout, connection reset, 5xx or 429; worth retrying
    #[error("Transient failure fetching {url}: {reason}")]
    Transient { url: String, reason: String },

    /// Any other 4xx, unexpected content type or empty body
    #[error("Permanent failure fetching {url}: {reason}")]
    Permanent { url: String, reason: String },

    #[error("Gave up on {url} after {attempts} attempts: {last}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last: String,
    },

    #[error("Cancelled while processing {url}")]
    Cancelled { url: String },
}

impl ItemError {
    pub fn transient(url: &str, reason: impl Into<String>) -> Self {
        ItemError::Transient {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    pub fn permanent(url: &str, reason: impl Into<String>) -> Self {
        ItemError::Permanent {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    pub fn url(&self) -> &str {
        match self {
            ItemError::Transient { url, .. }
            | ItemError::Permanent { url, .. }
            | ItemError::RetriesExhausted { url, .. }
            | ItemError::Cancelled { url } => url,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ItemError::Transient { .. })
    }
}

/// Result of processing one work item
#[derive(Debug, Clone)]
pub enum Outcome {
    Success(Box<CrawledItem>),
    Skipped(SkipReason),
    PermanentFailure(ItemError),
    TransientFailure(ItemError),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn error(&self) -> Option<&ItemError> {
        match self {
            Outcome::PermanentFailure(e) | Outcome::TransientFailure(e) => Some(e),
            _ => None,
        }
    }
}
