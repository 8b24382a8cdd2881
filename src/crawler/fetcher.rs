//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building HTTP clients with the configured user agent, timeout and proxy
//! - GET requests to fetch item pages
//! - Classifying failures as transient or permanent

use crate::config::{EngineConfig, UserAgentConfig};
use crate::crawler::ItemError;
use async_trait::async_trait;
use reqwest::{Client, Proxy, StatusCode};
use std::time::Duration;

/// Raw result of a successful fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    /// Final URL after redirects
    pub final_url: String,
    pub status_code: u16,
    /// Content-Type header value
    pub content_type: String,
    pub body: String,
}

/// Fetches one URL, classifying any failure
///
/// Implementations return `ItemError::Transient` for failures worth retrying
/// and `ItemError::Permanent` for everything else. Retrying is the caller's job.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, ItemError>;
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `user_agent` - The user agent configuration
/// * `timeout` - Whole-request timeout
/// * `proxy` - Optional proxy endpoint applied to every scheme
///
/// # Example
///
/// ```no_run
/// use harvest_engine::config::UserAgentConfig;
/// use harvest_engine::crawler::build_http_client;
/// use std::time::Duration;
///
/// let config = UserAgentConfig {
///     crawler_name: "Harvest".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
/// };
///
/// let client = build_http_client(&config, Duration::from_secs(30), None).unwrap();
/// ```
pub fn build_http_client(
    user_agent: &UserAgentConfig,
    timeout: Duration,
    proxy: Option<&str>,
) -> Result<Client, reqwest::Error> {
    // Format: CrawlerName/Version (+ContactURL)
    let user_agent = format!(
        "{}/{} (+{})",
        user_agent.crawler_name, user_agent.crawler_version, user_agent.contact_url
    );

    let mut builder = Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = proxy {
        builder = builder.proxy(Proxy::all(proxy)?);
    }

    builder.build()
}

/// `Fetcher` backed by a reqwest client
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    accept_content_types: Vec<String>,
}

impl HttpFetcher {
    pub fn new(client: Client, accept_content_types: Vec<String>) -> Self {
        Self {
            client,
            accept_content_types,
        }
    }

    pub fn from_config(
        engine: &EngineConfig,
        user_agent: &UserAgentConfig,
    ) -> Result<Self, reqwest::Error> {
        let client = build_http_client(
            user_agent,
            engine.request_timeout(),
            engine.proxy.as_deref(),
        )?;
        Ok(Self::new(client, engine.accept_content_types.clone()))
    }

    fn accepts(&self, content_type: &str) -> bool {
        let content_type = content_type.to_ascii_lowercase();
        self.accept_content_types
            .iter()
            .any(|accepted| content_type.starts_with(&accepted.to_ascii_lowercase()))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    /// Fetches a URL and classifies the result
    ///
    /// | Condition | Classification |
    /// |-----------|----------------|
    /// | Timeout, connect error, reset | Transient |
    /// | HTTP 429, HTTP 5xx | Transient |
    /// | Other non-2xx | Permanent |
    /// | Unaccepted Content-Type | Permanent |
    /// | Empty body | Permanent |
    async fn fetch(&self, url: &str) -> Result<FetchedPage, ItemError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_request_error(url, &e))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(ItemError::transient(url, format!("HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            return Err(ItemError::permanent(url, format!("HTTP {}", status.as_u16())));
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if !self.accepts(&content_type) {
            return Err(ItemError::permanent(
                url,
                format!("unexpected content type '{}'", content_type),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify_request_error(url, &e))?;

        if body.trim().is_empty() {
            return Err(ItemError::permanent(url, "empty body"));
        }

        Ok(FetchedPage {
            final_url,
            status_code: status.as_u16(),
            content_type,
            body,
        })
    }
}

fn classify_request_error(url: &str, e: &reqwest::Error) -> ItemError {
    if e.is_timeout() {
        ItemError::transient(url, "request timeout")
    } else if e.is_connect() {
        ItemError::transient(url, "connection failed")
    } else if e.is_builder() || e.is_redirect() {
        ItemError::permanent(url, e.to_string())
    } else {
        // resets and truncated bodies surface as request/body errors
        ItemError::transient(url, e.to_string())
    }
}
