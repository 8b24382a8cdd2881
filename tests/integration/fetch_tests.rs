//! HTTP classification and the retry loop against a mock server

use crate::common;
use harvest_engine::config::Config;
use harvest_engine::cache::MemoryCache;
use harvest_engine::crawler::{
    CrawlerEngine, Fetcher, HttpFetcher, IdentityRule, ItemError, Outcome, WorkItem,
};
use harvest_engine::storage::MemoryStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config() -> Config {
    common::config(&["http://127.0.0.1/unused".to_string()], "unused.db", 1, "")
}

fn fetcher() -> HttpFetcher {
    let config = config();
    HttpFetcher::from_config(&config.engine, &config.user_agent).unwrap()
}

async fn mount(server: &MockServer, route: &str, response: ResponseTemplate) -> String {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(response)
        .mount(server)
        .await;
    format!("{}{}", server.uri(), route)
}

#[tokio::test]
async fn test_html_page_is_fetched() {
    let server = MockServer::start().await;
    let url = mount(
        &server,
        "/ok",
        ResponseTemplate::new(200).set_body_raw("<title>fine</title>", "text/html; charset=utf-8"),
    )
    .await;

    let page = fetcher().fetch(&url).await.unwrap();
    assert_eq!(page.status_code, 200);
    assert!(page.content_type.starts_with("text/html"));
    assert!(page.body.contains("fine"));
}

#[tokio::test]
async fn test_classification() {
    let server = MockServer::start().await;
    let fetcher = fetcher();

    let cases = [
        ("/unavailable", ResponseTemplate::new(503), true),
        ("/throttled", ResponseTemplate::new(429), true),
        ("/missing", ResponseTemplate::new(404), false),
        ("/forbidden", ResponseTemplate::new(403), false),
        (
            "/json",
            ResponseTemplate::new(200).set_body_raw("{}", "application/json"),
            false,
        ),
        (
            "/empty",
            ResponseTemplate::new(200).set_body_raw("  ", "text/html"),
            false,
        ),
    ];

    for (route, response, transient) in cases {
        let url = mount(&server, route, response).await;
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert_eq!(err.is_transient(), transient, "{}: {}", route, err);
        assert_eq!(err.url(), url);
    }
}

#[tokio::test]
async fn test_backoff_sleeps_between_transient_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<title>back</title>", "text/html"))
        .mount(&server)
        .await;

    let config = config();
    let engine = CrawlerEngine::new(
        Arc::new(fetcher()),
        Arc::new(MemoryCache::new(None)),
        Arc::new(MemoryStore::new()),
        &config.engine,
        &config.cache,
    )
    .with_identity(IdentityRule::Path);

    let mut item = WorkItem::new(format!("{}/flaky", server.uri()));
    let outcome = engine.process(&mut item, &CancellationToken::new()).await;

    assert!(outcome.is_success(), "{:?}", outcome);
    assert_eq!(item.attempt_count, 3);
    let stats = engine.stats().snapshot();
    assert_eq!(stats.backoff_sleeps, 2);
    assert_eq!(stats.fetch_attempts, 3);
}

#[tokio::test]
async fn test_retries_exhausted_becomes_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = config();
    let engine = CrawlerEngine::new(
        Arc::new(fetcher()),
        Arc::new(MemoryCache::new(None)),
        Arc::new(MemoryStore::new()),
        &config.engine,
        &config.cache,
    );

    let mut item = WorkItem::new(format!("{}/down", server.uri()));
    let outcome = engine.process(&mut item, &CancellationToken::new()).await;

    match outcome {
        Outcome::PermanentFailure(ItemError::RetriesExhausted { attempts, .. }) => {
            assert_eq!(attempts, 3)
        }
        other => panic!("expected RetriesExhausted, got {:?}", other),
    }
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}
