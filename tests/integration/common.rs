//! Shared fixtures

use async_trait::async_trait;
use harvest_engine::cache::{CacheStore, MemoryCache};
use harvest_engine::config::{parse_config, Config};
use harvest_engine::crawler::{FetchedPage, Fetcher, HttpFetcher, ItemError};
use harvest_engine::jobs::{JobServices, ManagerSettings, TaskManager};
use harvest_engine::notify::MemorySink;
use harvest_engine::source::ConfiguredSource;
use harvest_engine::storage::SqliteStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Builds a validated config whose `default` source lists `urls`
///
/// `extra` is appended verbatim, so tests can add `[jobs]` or further sources.
pub fn config(urls: &[String], db_path: &str, concurrency: u32, extra: &str) -> Config {
    let urls = urls
        .iter()
        .map(|u| format!("\"{}\"", u))
        .collect::<Vec<_>>()
        .join(", ");

    let toml = format!(
        r#"
[engine]
concurrency = {concurrency}
delay-min-ms = 0
delay-max-ms = 0
slow-after = 0
max-attempts = 3
backoff-base-ms = 5
backoff-ceiling-ms = 20
request-timeout-secs = 5

[jobs]
grace-period-ms = 100
{extra}

[user-agent]
crawler-name = "TestBot"
crawler-version = "1.0.0"
contact-url = "https://example.com/contact"

[output]
database-path = "{db_path}"

[[source]]
kind = "default"
urls = [{urls}]
identity = "path"
"#
    );

    parse_config(&toml, None).expect("test config must be valid")
}

/// Counts in-flight fetches around a real HTTP fetcher
pub struct GaugedFetcher {
    inner: HttpFetcher,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl GaugedFetcher {
    pub fn new(inner: HttpFetcher) -> Self {
        Self {
            inner,
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for GaugedFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, ItemError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let result = self.inner.fetch(url).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub struct Harness {
    pub manager: TaskManager,
    pub store: Arc<SqliteStore>,
    pub cache: Arc<MemoryCache>,
    pub sink: Arc<MemorySink>,
    pub fetcher: Arc<GaugedFetcher>,
    pub config: Config,
    _dir: TempDir,
}

/// Wires a task manager over `config` with a SQLite store in a temp dir
pub fn harness(build: impl FnOnce(&str) -> Config) -> Harness {
    let dir = tempfile::tempdir().expect("temp dir");
    let db_path = dir.path().join("harvest.db");
    let config = build(&db_path.to_string_lossy());

    let store = Arc::new(SqliteStore::new(&db_path).expect("open store"));
    let cache = Arc::new(MemoryCache::new(config.cache.capacity));
    let sink = Arc::new(MemorySink::new());
    let fetcher = Arc::new(GaugedFetcher::new(
        HttpFetcher::from_config(&config.engine, &config.user_agent).expect("http client"),
    ));

    let shared_cache: Arc<dyn CacheStore> = cache.clone();
    let source = ConfiguredSource::new(
        config.sources.clone(),
        fetcher.clone(),
        shared_cache.clone(),
        Duration::from_secs(config.cache.response_ttl_secs),
    );

    let services = JobServices {
        source: Arc::new(source),
        fetcher: fetcher.clone(),
        cache: shared_cache,
        store: store.clone(),
        notifier: sink.clone(),
    };

    Harness {
        manager: TaskManager::new(services, ManagerSettings::from_config(&config)),
        store,
        cache,
        sink,
        fetcher,
        config,
        _dir: dir,
    }
}

/// Mounts `count` item pages at `/item/N` and returns their URLs
pub async fn mount_items(server: &MockServer, count: usize, delay: Duration) -> Vec<String> {
    let mut urls = Vec::new();
    for i in 0..count {
        let route = format!("/item/{}", i);
        Mock::given(method("GET"))
            .and(path(route.as_str()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(
                        format!("<html><head><title>Item {i}</title></head><body>item {i}</body></html>"),
                        "text/html",
                    )
                    .set_delay(delay),
            )
            .mount(server)
            .await;
        urls.push(format!("{}{}", server.uri(), route));
    }
    urls
}
