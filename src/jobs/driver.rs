//! Per-job driver
//!
//! Enumerates the job's work, dispatches it through the crawler engine and
//! folds every worker event into the job record. All counter updates happen
//! here, under the job mutex.

use crate::crawler::{
    dispatch, CrawledItem, CrawlerEngine, DispatchPlan, DispatchReport, Fingerprint, Outcome,
    WorkItem, WorkerEvent,
};
use crate::jobs::manager::{JobHandle, JobServices, ManagerSettings};
use crate::jobs::{Job, JobState};
use crate::notify::{deliver, EventKind, JobEvent};
use crate::storage::{FailureRecord, JobContext};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval};

pub(crate) struct JobDriver {
    handle: Arc<JobHandle>,
    services: JobServices,
    settings: Arc<ManagerSettings>,
}

/// Per-run bookkeeping that never leaves the driver
#[derive(Default)]
struct RunTally {
    seen: HashSet<Fingerprint>,
    error_rate_notified: bool,
    budget_exhausted: bool,
    last_failure: Option<String>,
}

impl JobDriver {
    pub(crate) fn new(
        handle: Arc<JobHandle>,
        services: JobServices,
        settings: Arc<ManagerSettings>,
    ) -> Self {
        Self {
            handle,
            services,
            settings,
        }
    }

    pub(crate) async fn run(self) {
        let job = self.handle.snapshot();
        let cancel = self.handle.cancel.clone();

        if cancel.is_cancelled() {
            self.finish(JobState::Cancelled, Some("cancelled before start".to_string()))
                .await;
            return;
        }

        let items = match self.services.source.enumerate(&job.kind).await {
            Ok(items) => items,
            Err(e) => {
                tracing::error!("Job {} failed: {}", job.id, e);
                self.finish(JobState::Failed, Some(e.to_string())).await;
                return;
            }
        };

        let total = items.len() as u64;
        self.handle.update(|job| job.total = total);

        if items.is_empty() {
            tracing::info!("Job {} has no work items", job.id);
            self.finish(JobState::Completed, None).await;
            return;
        }

        let engine = Arc::new(self.build_engine(&job.kind));
        let plan = DispatchPlan {
            mode: job.mode,
            limit: self.settings.engine.concurrency as usize,
            grace: self.settings.jobs.grace_period(),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let workers = tokio::spawn(dispatch(engine.clone(), items, plan, cancel.clone(), tx));

        let mut tally = RunTally::default();
        let report = self.collect(&engine, workers, rx, &mut tally).await;

        let snapshot = self.handle.snapshot();
        let (state, summary) = if tally.budget_exhausted {
            let summary = format!(
                "stopped by error budget after {} failed items",
                snapshot.failed
            );
            (JobState::Cancelled, Some(summary))
        } else if cancel.is_cancelled() {
            let summary = if report.abandoned > 0 {
                format!(
                    "cancelled, {} in-flight items abandoned after the grace period",
                    report.abandoned
                )
            } else {
                "cancelled".to_string()
            };
            (JobState::Cancelled, Some(summary))
        } else {
            let summary = (snapshot.failed > 0).then(|| {
                format!(
                    "{} items failed; last: {}",
                    snapshot.failed,
                    tally.last_failure.as_deref().unwrap_or("unknown")
                )
            });
            (JobState::Completed, summary)
        };

        self.finish(state, summary).await;
    }

    fn build_engine(&self, kind: &str) -> CrawlerEngine {
        let mut engine = CrawlerEngine::new(
            self.services.fetcher.clone(),
            self.services.cache.clone(),
            self.services.store.clone(),
            &self.settings.engine,
            &self.settings.cache,
        )
        .with_identity(self.services.source.identity(kind));

        if let Some(pacing) = self.settings.pacing {
            engine = engine.with_pacing(pacing);
        }
        if let Some(policy) = self.settings.retry {
            engine = engine.with_retry_policy(policy);
        }
        engine
    }

    /// Applies worker events until the dispatch returns
    ///
    /// Events still queued when it returns are drained; anything an abandoned
    /// worker sends later is ignored.
    async fn collect(
        &self,
        engine: &CrawlerEngine,
        mut workers: tokio::task::JoinHandle<DispatchReport>,
        mut rx: mpsc::UnboundedReceiver<WorkerEvent>,
        tally: &mut RunTally,
    ) -> DispatchReport {
        let mut heartbeat = self
            .settings
            .jobs
            .heartbeat_secs
            .filter(|secs| *secs > 0)
            .map(|secs| {
                let period = Duration::from_secs(secs);
                interval_at(Instant::now() + period, period)
            });

        let report = loop {
            tokio::select! {
                joined = &mut workers => {
                    break joined.unwrap_or_else(|e| {
                        tracing::error!("Dispatch task failed: {}", e);
                        DispatchReport::default()
                    });
                }
                Some(event) = rx.recv() => self.apply(event, engine, tally).await,
                _ = next_beat(&mut heartbeat) => self.progress().await,
            }
        };

        while let Ok(event) = rx.try_recv() {
            self.apply(event, engine, tally).await;
        }

        report
    }

    async fn apply(&self, event: WorkerEvent, engine: &CrawlerEngine, tally: &mut RunTally) {
        match event {
            WorkerEvent::Dispatched { url } => {
                tracing::trace!("Dispatched {}", url);
                let started = self.handle.update(|job| {
                    if job.state == JobState::Pending {
                        job.transition(JobState::Running).ok().map(|_| job.clone())
                    } else {
                        None
                    }
                });
                if let Some(job) = started {
                    tracing::info!("Job {} running ({} items)", job.id, job.total);
                    self.notify(EventKind::Start, job, "job started").await;
                }
            }
            WorkerEvent::Finished { item, outcome } => match outcome {
                Outcome::Success(crawled) => self.save(*crawled, engine, tally).await,
                Outcome::Skipped(reason) => {
                    tracing::debug!("Skipped {}: {}", item.source_url, reason);
                    self.handle.update(Job::record_skip);
                }
                Outcome::PermanentFailure(error) | Outcome::TransientFailure(error) => {
                    self.fail(&item, &error.to_string(), tally).await;
                }
            },
        }
    }

    async fn save(&self, crawled: CrawledItem, engine: &CrawlerEngine, tally: &mut RunTally) {
        if !tally.seen.insert(crawled.fingerprint.clone()) {
            tracing::debug!("Duplicate within run: {}", crawled.source_url);
            self.handle.update(Job::record_skip);
            return;
        }

        match self.services.store.save_item(&crawled, &self.context()).await {
            Ok(()) => {
                tracing::debug!("Saved {}", crawled.source_url);
                self.handle.update(Job::record_success);
            }
            Err(e) => {
                tracing::warn!("Failed to save {}: {}", crawled.source_url, e);
                engine.forget(&crawled.fingerprint);
                tally.seen.remove(&crawled.fingerprint);

                let mut item = WorkItem::new(crawled.source_url.clone());
                item.attempt_count = 1;
                self.fail(&item, &format!("storage write failed: {}", e), tally)
                    .await;
            }
        }
    }

    async fn fail(&self, item: &WorkItem, reason: &str, tally: &mut RunTally) {
        tracing::warn!("Item failed {}: {}", item.source_url, reason);
        tally.last_failure = Some(reason.to_string());

        let job = self.handle.update(|job| {
            job.record_failure();
            job.clone()
        });

        let record = FailureRecord {
            job_id: job.id,
            kind: job.kind.clone(),
            url: item.source_url.clone(),
            reason: reason.to_string(),
            attempts: item.attempt_count,
            failed_at: Utc::now(),
        };
        if let Err(e) = self.services.store.record_failure(&record).await {
            tracing::warn!("Failed to record failure for {}: {}", item.source_url, e);
        }

        let jobs = &self.settings.jobs;
        if !tally.error_rate_notified
            && job.processed >= jobs.error_rate_min_items
            && job.failure_rate() >= jobs.error_rate_percent
        {
            tally.error_rate_notified = true;
            let message = format!(
                "failure rate {:.1}% crossed {:.1}% after {} items",
                job.failure_rate(),
                jobs.error_rate_percent,
                job.processed
            );
            tracing::warn!("Job {}: {}", job.id, message);
            self.notify(EventKind::Error, job.clone(), message).await;
        }

        if let Some(budget) = jobs.max_failed_items {
            if !tally.budget_exhausted && job.failed >= budget {
                tally.budget_exhausted = true;
                tracing::warn!(
                    "Job {} reached its error budget of {} failed items, stopping",
                    job.id,
                    budget
                );
                self.handle.cancel.cancel();
            }
        }
    }

    async fn progress(&self) {
        let job = self.handle.snapshot();
        let message = format!(
            "{}/{} processed ({} saved, {} skipped, {} failed)",
            job.processed, job.total, job.succeeded, job.skipped, job.failed
        );
        self.notify(EventKind::Progress, job, message).await;
    }

    /// Moves the job to its terminal state, then notifies and archives it
    async fn finish(&self, state: JobState, summary: Option<String>) {
        let job = self.handle.update(|job| {
            if job.error_summary.is_none() {
                job.error_summary = summary;
            }
            if let Err(e) = job.transition(state) {
                tracing::error!("Job {}: {}", job.id, e);
            }
            job.clone()
        });

        tracing::info!(
            "Job {} {}: {} processed, {} saved, {} skipped, {} failed",
            job.id,
            job.state,
            job.processed,
            job.succeeded,
            job.skipped,
            job.failed
        );

        let kind = match job.state {
            JobState::Failed => EventKind::Error,
            _ => EventKind::Complete,
        };
        let message = job
            .error_summary
            .clone()
            .unwrap_or_else(|| format!("job {}", job.state));
        self.notify(kind, job.clone(), message).await;

        if let Err(e) = self.services.store.archive_job(&job).await {
            tracing::warn!("Failed to archive job {}: {}", job.id, e);
        }
    }

    async fn notify(&self, kind: EventKind, job: Job, message: impl Into<String>) {
        deliver(
            self.services.notifier.as_ref(),
            JobEvent::new(kind, job, message),
        )
        .await;
    }

    fn context(&self) -> JobContext {
        let job = self.handle.snapshot();
        JobContext {
            job_id: job.id,
            kind: job.kind,
        }
    }
}

async fn next_beat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
