//! Harvest: a crawl orchestration engine
//!
//! This crate runs crawl jobs against configured work sources, deduplicates the
//! results by fingerprint and hands new items to a record store. It provides a
//! task manager with per-kind admission control, a crawler engine with three
//! execution strategies, a drift-tolerant scheduler and a TTL cache.

pub mod cache;
pub mod config;
pub mod control;
pub mod crawler;
pub mod jobs;
pub mod notify;
pub mod output;
pub mod scheduler;
pub mod source;
pub mod storage;

use thiserror::Error;

/// Main error type for Harvest operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to enumerate work for kind '{kind}': {reason}")]
    Enumeration { kind: String, reason: String },

    #[error("Invalid job state transition: {from} -> {to}")]
    InvalidTransition {
        from: jobs::JobState,
        to: jobs::JobState,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Cache error: {0}")]
    Cache(#[from] cache::CacheError),

    #[error("Task error: {0}")]
    Task(#[from] jobs::TaskError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Harvest operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use cache::{CacheStore, MemoryCache};
pub use config::Config;
pub use crawler::{CrawlerEngine, ExecutionMode, Outcome, WorkItem};
pub use jobs::{Job, JobId, JobState, TaskError, TaskManager};
pub use scheduler::Scheduler;
