use crate::crawler::{ExecutionMode, IdentityRule};
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub engine: EngineConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default, rename = "source")]
    pub sources: Vec<SourceEntry>,
}

impl Config {
    /// Looks up the source entry for a job kind
    pub fn source(&self, kind: &str) -> Option<&SourceEntry> {
        self.sources.iter().find(|s| s.kind == kind)
    }
}

/// Crawler engine tunables
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of work items in flight at once, in every mode
    pub concurrency: u32,

    /// Execution strategy used when a job does not override it
    #[serde(rename = "default-mode", default)]
    pub default_mode: ExecutionMode,

    /// Lower bound of the random delay before each fetch attempt (milliseconds)
    #[serde(rename = "delay-min-ms")]
    pub delay_min_ms: u64,

    /// Upper bound of the random delay before each fetch attempt (milliseconds)
    #[serde(rename = "delay-max-ms")]
    pub delay_max_ms: u64,

    /// Consecutive transient failures before switching to the slow delay range
    #[serde(rename = "slow-after", default = "default_slow_after")]
    pub slow_after: u32,

    #[serde(rename = "slow-delay-min-ms", default = "default_slow_delay_min")]
    pub slow_delay_min_ms: u64,

    #[serde(rename = "slow-delay-max-ms", default = "default_slow_delay_max")]
    pub slow_delay_max_ms: u64,

    /// Total attempts per item, including the first
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    #[serde(rename = "backoff-base-ms")]
    pub backoff_base_ms: u64,

    #[serde(rename = "backoff-ceiling-ms")]
    pub backoff_ceiling_ms: u64,

    #[serde(rename = "request-timeout-secs", default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Proxy endpoint handed to the HTTP client as-is
    #[serde(default)]
    pub proxy: Option<String>,

    /// Content types accepted as a successful fetch
    #[serde(rename = "accept-content-types", default = "default_content_types")]
    pub accept_content_types: Vec<String>,
}

impl EngineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Lifetime of a fingerprint entry (seconds)
    #[serde(rename = "fingerprint-ttl-secs", default = "default_fingerprint_ttl")]
    pub fingerprint_ttl_secs: u64,

    /// Lifetime of a cached listing response (seconds)
    #[serde(rename = "response-ttl-secs", default = "default_response_ttl")]
    pub response_ttl_secs: u64,

    /// Maximum number of entries; unbounded when absent
    #[serde(default)]
    pub capacity: Option<usize>,

    /// Background purge interval (seconds); no sweeper when absent
    #[serde(rename = "sweep-interval-secs", default)]
    pub sweep_interval_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fingerprint_ttl_secs: default_fingerprint_ttl(),
            response_ttl_secs: default_response_ttl(),
            capacity: None,
            sweep_interval_secs: None,
        }
    }
}

/// Job lifecycle configuration
#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    /// Time in-flight items get to finish after a cancellation (milliseconds)
    #[serde(rename = "grace-period-ms", default = "default_grace_period")]
    pub grace_period_ms: u64,

    /// Failed-item percentage that triggers an error notification
    #[serde(rename = "error-rate-percent", default = "default_error_rate")]
    pub error_rate_percent: f64,

    /// Minimum processed items before the error rate is evaluated
    #[serde(rename = "error-rate-min-items", default = "default_error_rate_min_items")]
    pub error_rate_min_items: u64,

    /// Failed items after which the job stops itself
    #[serde(rename = "max-failed-items", default)]
    pub max_failed_items: Option<u64>,

    /// Interval between progress notifications while a job runs (seconds)
    #[serde(rename = "heartbeat-secs", default)]
    pub heartbeat_secs: Option<u64>,

    /// Number of finished jobs kept for status queries
    #[serde(rename = "history-limit", default = "default_history_limit")]
    pub history_limit: usize,
}

impl JobsConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period(),
            error_rate_percent: default_error_rate(),
            error_rate_min_items: default_error_rate_min_items(),
            max_failed_items: None,
            heartbeat_secs: None,
            history_limit: default_history_limit(),
        }
    }
}

/// Periodic scheduler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Job kind fired on every cadence slot
    #[serde(rename = "default-kind", default = "default_kind")]
    pub default_kind: String,

    /// Daily fire time as "HH:MM"
    #[serde(rename = "daily-at", default)]
    pub daily_at: Option<String>,

    /// Fixed interval between fires (seconds)
    #[serde(rename = "interval-secs", default)]
    pub interval_secs: Option<u64>,

    /// Offset of the local clock `daily-at` refers to
    #[serde(rename = "utc-offset-hours", default)]
    pub utc_offset_hours: i32,

    #[serde(rename = "poll-interval-secs", default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_kind: default_kind(),
            daily_at: Some("03:00".to_string()),
            interval_secs: None,
            utc_offset_hours: 0,
            poll_interval_secs: default_poll_interval(),
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Notification transport configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifyConfig {
    /// Endpoint receiving job events as JSON; events are only logged when absent
    #[serde(rename = "webhook-url", default)]
    pub webhook_url: Option<String>,
}

/// A work source for one job kind
#[derive(Debug, Clone, Deserialize)]
pub struct SourceEntry {
    /// Job kind this source feeds
    pub kind: String,

    /// Item URLs crawled directly
    #[serde(default)]
    pub urls: Vec<String>,

    /// Listing pages whose links become work items
    #[serde(rename = "listing-urls", default)]
    pub listing_urls: Vec<String>,

    /// Only links containing this substring are taken from listing pages
    #[serde(rename = "link-contains", default)]
    pub link_contains: Option<String>,

    /// How item identity is derived
    #[serde(default)]
    pub identity: IdentityRule,
}

fn default_slow_after() -> u32 {
    3
}

fn default_slow_delay_min() -> u64 {
    1000
}

fn default_slow_delay_max() -> u64 {
    3000
}

fn default_request_timeout() -> u64 {
    30
}

fn default_content_types() -> Vec<String> {
    vec!["text/html".to_string()]
}

fn default_fingerprint_ttl() -> u64 {
    7 * 24 * 3600
}

fn default_response_ttl() -> u64 {
    300
}

fn default_grace_period() -> u64 {
    5000
}

fn default_error_rate() -> f64 {
    50.0
}

fn default_error_rate_min_items() -> u64 {
    10
}

fn default_history_limit() -> usize {
    50
}

fn default_kind() -> String {
    "default".to_string()
}

fn default_poll_interval() -> u64 {
    30
}
