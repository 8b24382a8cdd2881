//! Scheduler against a real task manager and SQLite state

use crate::common::{config, harness, mount_items};
use chrono::{Duration as ChronoDuration, Utc};
use harvest_engine::jobs::JobState;
use harvest_engine::scheduler::{Cadence, Scheduler, Tick};
use harvest_engine::storage::ScheduleStateStore;
use std::sync::Arc;
use std::time::Duration;
use wiremock::MockServer;

#[tokio::test]
async fn test_missed_slots_fire_one_catch_up_job() {
    let server = MockServer::start().await;
    let urls = mount_items(&server, 2, Duration::ZERO).await;
    let h = harness(|db| config(&urls, db, 2, ""));

    let now = Utc::now();
    h.store
        .save_last_fired("default", now - ChronoDuration::days(3))
        .unwrap();

    let scheduler = Scheduler::new(
        Arc::new(h.manager.clone()),
        h.store.clone(),
        "default",
        Cadence::every(Duration::from_secs(3600)),
        Duration::from_secs(1),
    );

    let job_id = match scheduler.tick(now) {
        Tick::Fired(job_id) => job_id,
        other => panic!("expected a catch-up fire, got {:?}", other),
    };
    assert_eq!(scheduler.tick(now), Tick::Idle);

    let job = h.manager.wait(job_id).await.unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(h.manager.list().len(), 1);
    assert_eq!(h.store.load_last_fired("default").unwrap(), Some(now));
}

#[tokio::test]
async fn test_running_job_skips_the_slot() {
    let server = MockServer::start().await;
    let urls = mount_items(&server, 2, Duration::from_millis(300)).await;
    let h = harness(|db| config(&urls, db, 2, ""));

    let running = h.manager.enqueue("default", None).unwrap();

    let now = Utc::now();
    let scheduler = Scheduler::new(
        Arc::new(h.manager.clone()),
        h.store.clone(),
        "default",
        Cadence::every(Duration::from_secs(60)),
        Duration::from_secs(1),
    )
    .with_baseline(now - ChronoDuration::hours(1));

    assert_eq!(scheduler.tick(now), Tick::Busy(running));
    assert_eq!(scheduler.tick(now), Tick::Idle);

    h.manager.wait(running).await.unwrap();
    assert_eq!(h.manager.list().len(), 1);
}

#[tokio::test]
async fn test_restarted_scheduler_does_not_fire_immediately() {
    let server = MockServer::start().await;
    let urls = mount_items(&server, 1, Duration::ZERO).await;
    let h = harness(|db| config(&urls, db, 1, "\n[scheduler]\nenabled = true\n"));

    let scheduler = Scheduler::from_config(
        Arc::new(h.manager.clone()),
        h.store.clone(),
        &h.config.scheduler,
    )
    .unwrap();

    assert_eq!(scheduler.tick(Utc::now()), Tick::Idle);
    assert!(h.manager.list().is_empty());
}
