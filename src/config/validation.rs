use crate::cache::MAX_TTL;
use crate::config::types::{
    CacheConfig, Config, EngineConfig, JobsConfig, NotifyConfig, SchedulerConfig, SourceEntry, UserAgentConfig,
};
use crate::ConfigError;
use crate::crawler::IdentityRule;
use crate::scheduler::parse_daily_time;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_engine_config(&config.engine)?;
    validate_cache_config(&config.cache)?;
    validate_jobs_config(&config.jobs)?;
    validate_scheduler_config(&config.scheduler)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    validate_notify_config(&config.notify)?;
    validate_sources(&config.sources)?;
    Ok(())
}

/// Validates crawler engine configuration
fn validate_engine_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 256 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 256, got {}",
            config.concurrency
        )));
    }

    if config.delay_min_ms > config.delay_max_ms {
        return Err(ConfigError::Validation(format!(
            "delay-min-ms ({}) must not exceed delay-max-ms ({})",
            config.delay_min_ms, config.delay_max_ms
        )));
    }

    if config.slow_delay_min_ms > config.slow_delay_max_ms {
        return Err(ConfigError::Validation(format!(
            "slow-delay-min-ms ({}) must not exceed slow-delay-max-ms ({})",
            config.slow_delay_min_ms, config.slow_delay_max_ms
        )));
    }

    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max-attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.backoff_base_ms == 0 {
        return Err(ConfigError::Validation(
            "backoff-base-ms must be greater than zero".to_string(),
        ));
    }

    if config.backoff_ceiling_ms < config.backoff_base_ms {
        return Err(ConfigError::Validation(format!(
            "backoff-ceiling-ms ({}) must be >= backoff-base-ms ({})",
            config.backoff_ceiling_ms, config.backoff_base_ms
        )));
    }

    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request-timeout-secs must be greater than zero".to_string(),
        ));
    }

    if let Some(proxy) = &config.proxy {
        Url::parse(proxy)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy '{}': {}", proxy, e)))?;
    }

    if config.accept_content_types.is_empty() {
        return Err(ConfigError::Validation(
            "accept-content-types cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates cache lifetimes and sizing
fn validate_cache_config(config: &CacheConfig) -> Result<(), ConfigError> {
    let max_secs = MAX_TTL.as_secs();

    for (name, secs) in [
        ("fingerprint-ttl-secs", config.fingerprint_ttl_secs),
        ("response-ttl-secs", config.response_ttl_secs),
    ] {
        if secs > max_secs {
            return Err(ConfigError::Validation(format!(
                "{} must be at most {} seconds, got {}",
                name, max_secs, secs
            )));
        }
    }

    if config.sweep_interval_secs == Some(0) {
        return Err(ConfigError::Validation(
            "sweep-interval-secs must be >= 1 when set".to_string(),
        ));
    }

    Ok(())
}

/// Validates job lifecycle configuration
fn validate_jobs_config(config: &JobsConfig) -> Result<(), ConfigError> {
    if !(0.0..=100.0).contains(&config.error_rate_percent) {
        return Err(ConfigError::Validation(format!(
            "error-rate-percent must be between 0 and 100, got {}",
            config.error_rate_percent
        )));
    }

    if config.max_failed_items == Some(0) {
        return Err(ConfigError::Validation(
            "max-failed-items must be >= 1 when set".to_string(),
        ));
    }

    if config.heartbeat_secs == Some(0) {
        return Err(ConfigError::Validation(
            "heartbeat-secs must be >= 1 when set".to_string(),
        ));
    }

    Ok(())
}

/// Validates scheduler configuration
fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), ConfigError> {
    if config.default_kind.is_empty() {
        return Err(ConfigError::Validation(
            "default-kind cannot be empty".to_string(),
        ));
    }

    match (&config.daily_at, config.interval_secs) {
        (Some(_), Some(_)) => {
            return Err(ConfigError::Validation(
                "scheduler accepts either daily-at or interval-secs, not both".to_string(),
            ));
        }
        (None, None) if config.enabled => {
            return Err(ConfigError::Validation(
                "an enabled scheduler needs daily-at or interval-secs".to_string(),
            ));
        }
        (Some(at), None) => {
            parse_daily_time(at).ok_or_else(|| {
                ConfigError::Validation(format!("daily-at must be HH:MM, got '{}'", at))
            })?;
        }
        (None, Some(0)) => {
            return Err(ConfigError::Validation(
                "interval-secs must be greater than zero".to_string(),
            ));
        }
        _ => {}
    }

    if !(-12..=14).contains(&config.utc_offset_hours) {
        return Err(ConfigError::Validation(format!(
            "utc-offset-hours must be between -12 and 14, got {}",
            config.utc_offset_hours
        )));
    }

    if config.poll_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "poll-interval-secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler-name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler-name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact-url: {}", e)))?;

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &crate::config::types::OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_notify_config(config: &NotifyConfig) -> Result<(), ConfigError> {
    if let Some(webhook) = &config.webhook_url {
        Url::parse(webhook)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid webhook-url: {}", e)))?;
    }
    Ok(())
}

/// Validates work source entries
fn validate_sources(sources: &[SourceEntry]) -> Result<(), ConfigError> {
    let mut kinds = HashSet::new();

    for entry in sources {
        if entry.kind.is_empty() {
            return Err(ConfigError::Validation(
                "source kind cannot be empty".to_string(),
            ));
        }

        if !kinds.insert(entry.kind.as_str()) {
            return Err(ConfigError::Validation(format!(
                "source kind '{}' is defined more than once",
                entry.kind
            )));
        }

        if entry.urls.is_empty() && entry.listing_urls.is_empty() {
            return Err(ConfigError::Validation(format!(
                "source '{}' must have at least one url or listing-url",
                entry.kind
            )));
        }

        for raw in entry.urls.iter().chain(entry.listing_urls.iter()) {
            let url = Url::parse(raw).map_err(|e| {
                ConfigError::InvalidUrl(format!("Invalid source URL '{}': {}", raw, e))
            })?;

            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(ConfigError::Validation(format!(
                    "Source URL '{}' must use HTTP or HTTPS",
                    raw
                )));
            }
        }

        if let IdentityRule::QueryParam(param) = &entry.identity {
            if param.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "source '{}' has an empty query-param identity",
                    entry.kind
                )));
            }
        }
    }

    Ok(())
}
