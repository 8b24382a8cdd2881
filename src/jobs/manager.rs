//! Task manager
//!
//! Owns every job record. Admission is a check-and-insert on the
//! `kind -> active job` registry under a single lock, so two concurrent
//! `enqueue` calls for the same kind can never both succeed.

use crate::cache::CacheStore;
use crate::config::{CacheConfig, Config, EngineConfig, JobsConfig};
use crate::crawler::{ExecutionMode, Fetcher, Pacing, RetryPolicy};
use crate::jobs::driver::JobDriver;
use crate::jobs::{Job, JobId, JobState, TaskError};
use crate::notify::NotificationSink;
use crate::source::WorkSource;
use crate::storage::RecordStore;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Collaborators shared by every job
#[derive(Clone)]
pub struct JobServices {
    pub source: Arc<dyn WorkSource>,
    pub fetcher: Arc<dyn Fetcher>,
    pub cache: Arc<dyn CacheStore>,
    pub store: Arc<dyn RecordStore>,
    pub notifier: Arc<dyn NotificationSink>,
}

/// Tunables the task manager hands to each job
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub engine: EngineConfig,
    pub cache: CacheConfig,
    pub jobs: JobsConfig,

    /// Replaces the configured delay ranges when set
    pub pacing: Option<Pacing>,

    /// Replaces the configured retry policy when set
    pub retry: Option<RetryPolicy>,
}

impl ManagerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            engine: config.engine.clone(),
            cache: config.cache.clone(),
            jobs: config.jobs.clone(),
            pacing: None,
            retry: None,
        }
    }
}

/// A job record plus the controls its driver listens to
pub(crate) struct JobHandle {
    job: Mutex<Job>,
    pub(crate) cancel: CancellationToken,
    done: watch::Sender<bool>,
}

impl JobHandle {
    fn new(job: Job) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            job: Mutex::new(job),
            cancel: CancellationToken::new(),
            done,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Job> {
        self.job.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Point-in-time copy of the job record
    pub(crate) fn snapshot(&self) -> Job {
        self.lock().clone()
    }

    /// Mutates the record under the job mutex
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut Job) -> R) -> R {
        f(&mut self.lock())
    }
}

#[derive(Default)]
struct Registry {
    jobs: HashMap<JobId, Arc<JobHandle>>,
    active: HashMap<String, JobId>,
    history: VecDeque<JobId>,
}

impl Registry {
    /// The job holding `kind`, unless it already reached a terminal state
    ///
    /// A driver makes its job terminal before the registry retires it, so a
    /// terminal job can still sit in `active` for a moment.
    fn running(&self, kind: &str) -> Option<JobId> {
        let id = *self.active.get(kind)?;
        let handle = self.jobs.get(&id)?;
        (!handle.snapshot().state.is_terminal()).then_some(id)
    }

    /// Frees the kind and moves the job into the bounded history
    fn retire(&mut self, id: JobId, kind: &str, history_limit: usize) {
        if self.active.get(kind) == Some(&id) {
            self.active.remove(kind);
        }

        self.history.push_back(id);
        while self.history.len() > history_limit {
            if let Some(oldest) = self.history.pop_front() {
                self.jobs.remove(&oldest);
            }
        }
    }
}

/// Creates, runs and tracks crawl jobs
///
/// Cloning yields another handle onto the same registry.
#[derive(Clone)]
pub struct TaskManager {
    services: JobServices,
    settings: Arc<ManagerSettings>,
    registry: Arc<Mutex<Registry>>,
}

impl TaskManager {
    pub fn new(services: JobServices, settings: ManagerSettings) -> Self {
        Self {
            services,
            settings: Arc::new(settings),
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn handle(&self, job_id: JobId) -> Result<Arc<JobHandle>, TaskError> {
        self.registry()
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or(TaskError::NotFound(job_id))
    }

    /// Creates a job for `kind` and starts driving it
    ///
    /// Fails with `AlreadyRunning` while another job of the same kind is
    /// active. Kinds without a configured source are accepted; their job ends
    /// `Failed` once enumeration reports the missing source.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn enqueue(&self, kind: &str, mode: Option<ExecutionMode>) -> Result<JobId, TaskError> {
        let mode = mode.unwrap_or(self.settings.engine.default_mode);

        let handle = {
            let mut registry = self.registry();
            if let Some(job_id) = registry.running(kind) {
                return Err(TaskError::AlreadyRunning {
                    kind: kind.to_string(),
                    job_id,
                });
            }

            let handle = Arc::new(JobHandle::new(Job::new(kind, mode)));
            let id = handle.snapshot().id;
            registry.jobs.insert(id, handle.clone());
            registry.active.insert(kind.to_string(), id);
            handle
        };

        let id = handle.snapshot().id;
        tracing::info!("Enqueued job {} (kind '{}', {} mode)", id, kind, mode);

        let driver = JobDriver::new(handle.clone(), self.services.clone(), self.settings.clone());
        let registry = self.registry.clone();
        let history_limit = self.settings.jobs.history_limit;
        let kind = kind.to_string();

        tokio::spawn(async move {
            if let Err(e) = tokio::spawn(driver.run()).await {
                tracing::error!("Driver for job {} stopped abnormally: {}", id, e);
                handle.update(|job| {
                    job.error_summary = Some(format!("job driver stopped abnormally: {}", e));
                    if !job.state.is_terminal() {
                        let _ = job.transition(JobState::Failed);
                    }
                });
            }

            registry
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .retire(id, &kind, history_limit);
            handle.done.send_replace(true);
        });

        Ok(id)
    }

    /// Requests cooperative cancellation of a job
    ///
    /// No new items are dispatched afterwards; items in flight get the grace
    /// period to finish.
    pub fn cancel(&self, job_id: JobId) -> Result<(), TaskError> {
        let handle = self.handle(job_id)?;

        let state = handle.snapshot().state;
        if state.is_terminal() {
            return Err(TaskError::AlreadyTerminal { job_id, state });
        }

        tracing::info!("Cancelling job {}", job_id);
        handle.cancel.cancel();
        Ok(())
    }

    /// Cancels every active job
    pub fn cancel_all(&self) {
        let active: Vec<JobId> = self.registry().active.values().copied().collect();
        for job_id in active {
            let _ = self.cancel(job_id);
        }
    }

    pub fn status(&self, job_id: JobId) -> Result<Job, TaskError> {
        Ok(self.handle(job_id)?.snapshot())
    }

    /// Resolves with the job's terminal snapshot
    pub async fn wait(&self, job_id: JobId) -> Result<Job, TaskError> {
        let handle = self.handle(job_id)?;
        let mut done = handle.done.subscribe();

        while !*done.borrow_and_update() {
            if done.changed().await.is_err() {
                break;
            }
        }

        Ok(handle.snapshot())
    }

    /// Snapshots of active and retained jobs, oldest first
    pub fn list(&self) -> Vec<Job> {
        let handles: Vec<Arc<JobHandle>> = self.registry().jobs.values().cloned().collect();
        let mut jobs: Vec<Job> = handles.iter().map(|h| h.snapshot()).collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    pub fn is_active(&self, kind: &str) -> bool {
        self.registry().running(kind).is_some()
    }

    pub fn active_job(&self, kind: &str) -> Option<JobId> {
        self.registry().running(kind)
    }
}
