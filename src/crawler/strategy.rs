//! Execution strategies
//!
//! `dispatch` drives one job's work items through the shared engine. The mode
//! only decides admission and suspension:
//! - async: tasks on the current runtime, gated by a semaphore
//! - threaded: a fixed pool of OS threads, each blocking on one item
//! - serial: one item at a time in the calling task
//!
//! Cancellation is checked before every dispatch. Items already in flight get
//! the grace period to finish and are abandoned after it.

use crate::crawler::{CrawlerEngine, ExecutionMode, Outcome, WorkItem};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Progress reported by workers to the job driver
#[derive(Debug)]
pub enum WorkerEvent {
    /// An item was admitted and is now in flight
    Dispatched { url: String },

    /// An item resolved
    Finished { item: WorkItem, outcome: Outcome },
}

/// How a job's items are to be run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPlan {
    pub mode: ExecutionMode,

    /// Configured concurrency limit; serial mode always uses 1
    pub limit: usize,

    /// Time in-flight items get after cancellation
    pub grace: Duration,
}

/// Summary of a finished dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub dispatched: usize,

    /// Items still in flight when the grace period ran out
    pub abandoned: usize,
}

/// Runs `items` through `engine` with the plan's strategy
///
/// Returns once every dispatched item has resolved, or once the grace period
/// after cancellation has elapsed. Events for abandoned items are never sent.
pub async fn dispatch(
    engine: Arc<CrawlerEngine>,
    items: Vec<WorkItem>,
    plan: DispatchPlan,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<WorkerEvent>,
) -> DispatchReport {
    let limit = plan.mode.admission_limit(plan.limit);
    tracing::debug!(
        "Dispatching {} items in {} mode (limit {})",
        items.len(),
        plan.mode,
        limit
    );

    let report = match plan.mode {
        ExecutionMode::Async => run_async(engine, items, limit, plan.grace, cancel, events).await,
        ExecutionMode::Threaded => {
            run_threaded(engine, items, limit, plan.grace, cancel, events).await
        }
        ExecutionMode::Serial => run_serial(engine, items, plan.grace, cancel, events).await,
    };

    if report.abandoned > 0 {
        tracing::warn!(
            "Abandoned {} in-flight items after the grace period",
            report.abandoned
        );
    }

    report
}

async fn run_async(
    engine: Arc<CrawlerEngine>,
    items: Vec<WorkItem>,
    limit: usize,
    grace: Duration,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<WorkerEvent>,
) -> DispatchReport {
    let semaphore = Arc::new(Semaphore::new(limit));
    let mut tasks = JoinSet::new();
    let mut dispatched = 0;

    for mut item in items {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        dispatched += 1;
        let _ = events.send(WorkerEvent::Dispatched {
            url: item.source_url.clone(),
        });

        let engine = engine.clone();
        let cancel = cancel.clone();
        let events = events.clone();
        tasks.spawn(async move {
            let outcome = engine.process(&mut item, &cancel).await;
            drop(permit);
            let _ = events.send(WorkerEvent::Finished { item, outcome });
        });
    }

    let join_all = async {
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    tracing::error!("Worker task panicked: {}", e);
                }
            }
        }
    };

    let mut abandoned = 0;
    if !settle(join_all, &cancel, grace).await {
        abandoned = engine.stats().in_flight();
        tasks.abort_all();
    }

    DispatchReport {
        dispatched,
        abandoned,
    }
}

async fn run_threaded(
    engine: Arc<CrawlerEngine>,
    items: Vec<WorkItem>,
    limit: usize,
    grace: Duration,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<WorkerEvent>,
) -> DispatchReport {
    let pool_size = limit.min(items.len());
    let queue = Arc::new(Mutex::new(VecDeque::from(items)));
    let dispatched = Arc::new(AtomicUsize::new(0));
    let runtime = tokio::runtime::Handle::current();

    // Each worker holds a sender; the channel closes once every worker exits.
    let (alive_tx, mut alive_rx) = mpsc::channel::<()>(1);

    for index in 0..pool_size {
        let engine = engine.clone();
        let queue = queue.clone();
        let dispatched = dispatched.clone();
        let runtime = runtime.clone();
        let cancel = cancel.clone();
        let events = events.clone();
        let alive = alive_tx.clone();

        let spawned = std::thread::Builder::new()
            .name(format!("harvest-worker-{}", index))
            .spawn(move || {
                let _alive = alive;
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }

                    let next = queue
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .pop_front();
                    let mut item = match next {
                        Some(item) => item,
                        None => break,
                    };

                    dispatched.fetch_add(1, Ordering::SeqCst);
                    let _ = events.send(WorkerEvent::Dispatched {
                        url: item.source_url.clone(),
                    });

                    let outcome = runtime.block_on(engine.process(&mut item, &cancel));
                    let _ = events.send(WorkerEvent::Finished { item, outcome });
                }
            });

        if let Err(e) = spawned {
            tracing::error!("Failed to spawn worker thread {}: {}", index, e);
        }
    }
    drop(alive_tx);

    let all_exited = async {
        let _ = alive_rx.recv().await;
    };

    let mut abandoned = 0;
    if !settle(all_exited, &cancel, grace).await {
        // Threads cannot be killed; they exit on their own once their item resolves
        abandoned = engine.stats().in_flight();
    }

    DispatchReport {
        dispatched: dispatched.load(Ordering::SeqCst),
        abandoned,
    }
}

async fn run_serial(
    engine: Arc<CrawlerEngine>,
    items: Vec<WorkItem>,
    grace: Duration,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<WorkerEvent>,
) -> DispatchReport {
    let mut dispatched = 0;

    let work = async {
        for mut item in items {
            if cancel.is_cancelled() {
                break;
            }

            dispatched += 1;
            let _ = events.send(WorkerEvent::Dispatched {
                url: item.source_url.clone(),
            });

            let outcome = engine.process(&mut item, &cancel).await;
            let _ = events.send(WorkerEvent::Finished { item, outcome });
        }
    };

    let finished = settle(work, &cancel, grace).await;

    DispatchReport {
        dispatched,
        abandoned: if finished { 0 } else { 1 },
    }
}

/// Drives `work` to completion, or until `grace` has passed since cancellation
///
/// Returns false when the deadline cut the work short.
async fn settle<F>(work: F, cancel: &CancellationToken, grace: Duration) -> bool
where
    F: Future<Output = ()>,
{
    tokio::pin!(work);

    tokio::select! {
        _ = &mut work => return true,
        _ = cancel.cancelled() => {}
    }

    tokio::time::timeout(grace, work).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::{CacheConfig, EngineConfig};
    use crate::crawler::{FetchedPage, Fetcher, ItemError};
    use crate::storage::MemoryStore;
    use async_trait::async_trait;

    /// Answers every URL after a fixed delay, ignoring cancellation
    struct SlowFetcher {
        delay: Duration,
    }

    #[async_trait]
    impl Fetcher for SlowFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedPage, ItemError> {
            tokio::time::sleep(self.delay).await;
            Ok(FetchedPage {
                final_url: url.to_string(),
                status_code: 200,
                content_type: "text/html".to_string(),
                body: format!("<title>{}</title>", url),
            })
        }
    }

    fn engine(delay: Duration) -> Arc<CrawlerEngine> {
        let config = EngineConfig {
            concurrency: 3,
            default_mode: ExecutionMode::Async,
            delay_min_ms: 0,
            delay_max_ms: 0,
            slow_after: 3,
            slow_delay_min_ms: 0,
            slow_delay_max_ms: 0,
            max_attempts: 1,
            backoff_base_ms: 1,
            backoff_ceiling_ms: 1,
            request_timeout_secs: 5,
            proxy: None,
            accept_content_types: vec!["text/html".to_string()],
        };
        Arc::new(CrawlerEngine::new(
            Arc::new(SlowFetcher { delay }),
            Arc::new(MemoryCache::new(None)),
            Arc::new(MemoryStore::new()),
            &config,
            &CacheConfig::default(),
        ))
    }

    fn items(n: usize) -> Vec<WorkItem> {
        (0..n)
            .map(|i| WorkItem::new(format!("https://example.com/item/{}", i)))
            .collect()
    }

    async fn run(
        mode: ExecutionMode,
        engine: Arc<CrawlerEngine>,
        n: usize,
        cancel: CancellationToken,
    ) -> (DispatchReport, Vec<WorkerEvent>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let plan = DispatchPlan {
            mode,
            limit: 3,
            grace: Duration::from_millis(50),
        };
        let report = dispatch(engine, items(n), plan, cancel, tx).await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        (report, events)
    }

    fn finished(events: &[WorkerEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, WorkerEvent::Finished { .. }))
            .count()
    }

    #[tokio::test]
    async fn test_async_respects_limit() {
        let engine = engine(Duration::from_millis(20));
        let (report, events) =
            run(ExecutionMode::Async, engine.clone(), 12, CancellationToken::new()).await;

        assert_eq!(report.dispatched, 12);
        assert_eq!(finished(&events), 12);
        let peak = engine.stats().snapshot().peak_in_flight;
        assert!(peak <= 3 && peak >= 2, "peak {}", peak);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_threaded_respects_limit() {
        let engine = engine(Duration::from_millis(20));
        let (report, events) =
            run(ExecutionMode::Threaded, engine.clone(), 12, CancellationToken::new()).await;

        assert_eq!(report.dispatched, 12);
        assert_eq!(finished(&events), 12);
        assert!(engine.stats().snapshot().peak_in_flight <= 3);
    }

    #[tokio::test]
    async fn test_serial_one_at_a_time() {
        let engine = engine(Duration::from_millis(5));
        let (report, events) =
            run(ExecutionMode::Serial, engine.clone(), 5, CancellationToken::new()).await;

        assert_eq!(report.dispatched, 5);
        assert_eq!(finished(&events), 5);
        assert_eq!(engine.stats().snapshot().peak_in_flight, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_dispatches_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        for mode in [ExecutionMode::Async, ExecutionMode::Serial] {
            let (report, events) = run(mode, engine(Duration::ZERO), 4, cancel.clone()).await;
            assert_eq!(report.dispatched, 0);
            assert!(events.is_empty());
        }
    }

    #[tokio::test]
    async fn test_async_abandons_after_grace() {
        let engine = engine(Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let (report, events) = run(ExecutionMode::Async, engine, 10, cancel).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.dispatched, 3);
        assert_eq!(report.abandoned, 3);
        assert_eq!(finished(&events), 0);
    }

    #[tokio::test]
    async fn test_serial_abandons_after_grace() {
        let engine = engine(Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let (report, _) = run(ExecutionMode::Serial, engine, 10, cancel).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.abandoned, 1);
    }

    #[tokio::test]
    async fn test_in_flight_items_finish_within_grace() {
        let engine = engine(Duration::from_millis(60));
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let plan = DispatchPlan {
            mode: ExecutionMode::Async,
            limit: 3,
            grace: Duration::from_secs(2),
        };

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let report = dispatch(engine, items(10), plan, cancel, tx).await;

        let mut done = 0;
        while let Ok(event) = rx.try_recv() {
            if let WorkerEvent::Finished { outcome, .. } = event {
                assert!(outcome.is_success());
                done += 1;
            }
        }
        assert_eq!(report.abandoned, 0);
        assert_eq!(done, report.dispatched);
        assert!(report.dispatched < 10);
    }
}
