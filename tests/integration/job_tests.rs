//! End-to-end job runs through the task manager

use crate::common::{config, harness, mount_items};
use harvest_engine::cache::CacheStore;
use harvest_engine::crawler::{ExecutionMode, Fingerprint, IdentityRule};
use harvest_engine::jobs::{JobState, TaskError};
use harvest_engine::notify::EventKind;
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_all_items_succeed() {
    let server = MockServer::start().await;
    let urls = mount_items(&server, 10, Duration::ZERO).await;
    let h = harness(|db| config(&urls, db, 4, ""));

    let id = h.manager.enqueue("default", None).unwrap();
    let job = h.manager.wait(id).await.unwrap();

    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.processed, 10);
    assert_eq!(job.succeeded, 10);
    assert_eq!(job.error_summary, None);
    assert_eq!(h.store.count_items(Some("default")).unwrap(), 10);
    assert_eq!(h.sink.kinds(), vec![EventKind::Start, EventKind::Complete]);

    let (state, processed) = h.store.archived_job_state(id).unwrap().unwrap();
    assert_eq!(state, "completed");
    assert_eq!(processed, 10);
}

#[tokio::test]
async fn test_cached_fingerprints_are_skipped() {
    let server = MockServer::start().await;
    let urls = mount_items(&server, 10, Duration::ZERO).await;
    let h = harness(|db| config(&urls, db, 4, ""));

    for url in &urls[..3] {
        let fingerprint = Fingerprint::from_url(url, &IdentityRule::Path).unwrap();
        h.cache
            .put(&fingerprint.cache_key(), "seen".to_string(), Duration::from_secs(60))
            .unwrap();
    }

    let id = h.manager.enqueue("default", None).unwrap();
    let job = h.manager.wait(id).await.unwrap();

    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.succeeded, 7);
    assert_eq!(job.skipped, 3);
    assert_eq!(h.store.count_items(Some("default")).unwrap(), 7);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let server = MockServer::start().await;
    let urls = mount_items(&server, 5, Duration::ZERO).await;
    let h = harness(|db| config(&urls, db, 2, ""));

    let first = h.manager.enqueue("default", None).unwrap();
    h.manager.wait(first).await.unwrap();
    let second = h.manager.enqueue("default", Some(ExecutionMode::Serial)).unwrap();
    let job = h.manager.wait(second).await.unwrap();

    assert_eq!(job.skipped, 5);
    assert_eq!(job.succeeded, 0);
    assert_eq!(h.store.count_items(None).unwrap(), 5);
}

#[tokio::test]
async fn test_transient_failures_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<title>ok</title>", "text/html"))
        .mount(&server)
        .await;

    let urls = vec![format!("{}/flaky", server.uri())];
    let h = harness(|db| config(&urls, db, 1, ""));

    let id = h.manager.enqueue("default", None).unwrap();
    let job = h.manager.wait(id).await.unwrap();

    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.succeeded, 1);
    assert_eq!(job.failed, 0);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_enumeration_error_fails_job() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/listing"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let listing = format!("{}/listing", server.uri());
    let urls = vec![format!("{}/unused", server.uri())];
    let extra = format!(
        "\n[[source]]\nkind = \"forum\"\nlisting-urls = [\"{}\"]\nlink-contains = \"thread\"\n",
        listing
    );
    let h = harness(|db| config(&urls, db, 2, &extra));

    let id = h.manager.enqueue("forum", None).unwrap();
    let job = h.manager.wait(id).await.unwrap();

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.processed, 0);
    assert!(job.started_at.is_none());
    assert!(job.error_summary.unwrap().contains("HTTP 500"));
    assert_eq!(h.store.count_items(None).unwrap(), 0);
    assert_eq!(h.sink.kinds(), vec![EventKind::Error]);
}

#[tokio::test]
async fn test_listing_source_feeds_items() {
    let server = MockServer::start().await;
    mount_items(&server, 3, Duration::ZERO).await;
    Mock::given(method("GET"))
        .and(path("/listing"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"<a href="/item/0">0</a><a href="/item/1">1</a><a href="/item/2">2</a><a href="/about">about</a>"#,
            "text/html",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let extra = format!(
        "\n[[source]]\nkind = \"listed\"\nlisting-urls = [\"{}/listing\"]\nlink-contains = \"/item/\"\nidentity = \"path\"\n",
        server.uri()
    );
    let urls = vec![format!("{}/unused", server.uri())];
    let h = harness(|db| config(&urls, db, 2, &extra));

    let id = h.manager.enqueue("listed", None).unwrap();
    let job = h.manager.wait(id).await.unwrap();
    assert_eq!(job.total, 3);
    assert_eq!(job.succeeded, 3);

    // The listing response is served from cache on the second run
    let rerun = h.manager.enqueue("listed", None).unwrap();
    let job = h.manager.wait(rerun).await.unwrap();
    assert_eq!(job.skipped, 3);
}

#[tokio::test]
async fn test_one_active_job_per_kind() {
    let server = MockServer::start().await;
    let urls = mount_items(&server, 3, Duration::from_millis(200)).await;
    let h = harness(|db| config(&urls, db, 3, ""));

    let first = h.manager.enqueue("default", None).unwrap();
    match h.manager.enqueue("default", Some(ExecutionMode::Threaded)) {
        Err(TaskError::AlreadyRunning { kind, job_id }) => {
            assert_eq!(kind, "default");
            assert_eq!(job_id, first);
        }
        other => panic!("expected AlreadyRunning, got {:?}", other),
    }

    h.manager.wait(first).await.unwrap();
    assert!(!h.manager.is_active("default"));
    assert!(h.manager.enqueue("default", None).is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_in_flight_never_exceeds_limit() {
    let server = MockServer::start().await;
    let urls = mount_items(&server, 9, Duration::from_millis(50)).await;

    for (mode, limit) in [
        (ExecutionMode::Async, 3),
        (ExecutionMode::Threaded, 3),
        (ExecutionMode::Serial, 1),
    ] {
        let h = harness(|db| config(&urls, db, 3, ""));

        let id = h.manager.enqueue("default", Some(mode)).unwrap();
        let job = h.manager.wait(id).await.unwrap();

        assert_eq!(job.state, JobState::Completed, "{} mode", mode);
        assert_eq!(job.succeeded, 9, "{} mode", mode);
        let peak = h.fetcher.peak();
        assert!(peak >= 1 && peak <= limit, "{} mode peaked at {}", mode, peak);
    }
}

#[tokio::test]
async fn test_cancel_returns_within_grace() {
    let server = MockServer::start().await;
    let urls = mount_items(&server, 6, Duration::from_secs(3)).await;
    let h = harness(|db| config(&urls, db, 2, ""));
    assert_eq!(h.config.jobs.grace_period_ms, 100);

    let id = h.manager.enqueue("default", None).unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let cancelled_at = Instant::now();
    h.manager.cancel(id).unwrap();
    let job = h.manager.wait(id).await.unwrap();

    assert!(cancelled_at.elapsed() < Duration::from_secs(2));
    assert_eq!(job.state, JobState::Cancelled);
    assert_eq!(job.processed, 0);
    assert!(job.error_summary.unwrap().contains("abandoned"));
    assert_eq!(
        h.manager.cancel(id),
        Err(TaskError::AlreadyTerminal {
            job_id: id,
            state: JobState::Cancelled
        })
    );
}

#[tokio::test]
async fn test_failed_items_reach_the_ledger() {
    let server = MockServer::start().await;
    let mut urls = mount_items(&server, 2, Duration::ZERO).await;
    urls.push(format!("{}/missing", server.uri()));
    let h = harness(|db| config(&urls, db, 2, "error-rate-percent = 30.0\nerror-rate-min-items = 1"));

    let id = h.manager.enqueue("default", None).unwrap();
    let job = h.manager.wait(id).await.unwrap();

    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.succeeded, 2);
    assert_eq!(job.failed, 1);
    assert!(job.error_summary.unwrap().contains("HTTP 404"));

    let failures = h.store.list_failures(Some("default"), 10).unwrap();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].url.ends_with("/missing"));
    assert_eq!(failures[0].job_id, id);
    assert!(h.sink.kinds().contains(&EventKind::Error));
}

#[tokio::test]
async fn test_error_budget_stops_job() {
    let server = MockServer::start().await;
    let urls: Vec<String> = (0..20)
        .map(|i| format!("{}/gone/{}", server.uri(), i))
        .collect();
    let h = harness(|db| config(&urls, db, 1, "max-failed-items = 2"));

    let id = h.manager.enqueue("default", Some(ExecutionMode::Serial)).unwrap();
    let job = h.manager.wait(id).await.unwrap();

    assert_eq!(job.state, JobState::Cancelled);
    assert!(job.failed >= 2 && job.failed < 20);
    assert!(job.error_summary.unwrap().contains("error budget"));
}
