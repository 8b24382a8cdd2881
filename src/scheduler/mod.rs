//! Periodic job scheduler
//!
//! Fires the default job kind on a daily or fixed-interval cadence. The
//! scheduler is drift tolerant: a tick fires when the most recent cadence slot
//! is later than the last recorded fire, so any number of missed slots yields
//! a single catch-up run.

mod cadence;

pub use cadence::{parse_daily_time, Cadence};

use crate::config::SchedulerConfig;
use crate::control::JobControl;
use crate::jobs::{JobId, TaskError};
use crate::storage::ScheduleStateStore;
use crate::ConfigError;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What a single tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// The latest slot was already satisfied
    Idle,

    /// A new job was started
    Fired(JobId),

    /// The slot was due but a job of the kind was still running
    Busy(JobId),

    /// The job could not be started; the slot stays due
    Rejected(String),
}

pub struct Scheduler {
    control: Arc<dyn JobControl>,
    state: Arc<dyn ScheduleStateStore>,
    kind: String,
    cadence: Cadence,
    poll_interval: Duration,

    /// Last fire known in this process; covers a state store that fails writes
    last_fired: Mutex<Option<DateTime<Utc>>>,
    baseline: DateTime<Utc>,
}

impl Scheduler {
    pub fn new(
        control: Arc<dyn JobControl>,
        state: Arc<dyn ScheduleStateStore>,
        kind: &str,
        cadence: Cadence,
        poll_interval: Duration,
    ) -> Self {
        Self {
            control,
            state,
            kind: kind.to_string(),
            cadence,
            poll_interval,
            last_fired: Mutex::new(None),
            baseline: Utc::now(),
        }
    }

    pub fn from_config(
        control: Arc<dyn JobControl>,
        state: Arc<dyn ScheduleStateStore>,
        config: &SchedulerConfig,
    ) -> Result<Self, ConfigError> {
        if !config.enabled {
            return Err(ConfigError::Validation(
                "scheduler is disabled; set enabled = true under [scheduler]".to_string(),
            ));
        }

        let cadence = Cadence::from_config(config)?;
        Ok(Self::new(
            control,
            state,
            &config.default_kind,
            cadence,
            Duration::from_secs(config.poll_interval_secs.max(1)),
        ))
    }

    /// Replaces the start-time baseline used when nothing has been persisted
    pub fn with_baseline(mut self, baseline: DateTime<Utc>) -> Self {
        self.baseline = baseline;
        self
    }

    pub fn cadence(&self) -> &Cadence {
        &self.cadence
    }

    /// The last fire time in effect: persisted, in-process or the baseline
    pub fn last_fired(&self) -> DateTime<Utc> {
        let persisted = match self.state.load_last_fired(&self.kind) {
            Ok(at) => at,
            Err(e) => {
                tracing::warn!("Failed to load scheduler state for '{}': {}", self.kind, e);
                None
            }
        };
        let local = *self
            .last_fired
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match (persisted, local) {
            (Some(a), Some(b)) => a.max(b),
            (Some(at), None) | (None, Some(at)) => at,
            (None, None) => self.baseline,
        }
    }

    /// Fires the job if a cadence slot has passed since the last fire
    pub fn tick(&self, now: DateTime<Utc>) -> Tick {
        let slot = self.cadence.latest_slot(now);
        if slot <= self.last_fired() {
            return Tick::Idle;
        }

        let tick = match self.control.start_job(&self.kind, None) {
            Ok(job_id) => {
                tracing::info!("Scheduled slot {} fired job {}", slot, job_id);
                Tick::Fired(job_id)
            }
            Err(TaskError::AlreadyRunning { job_id, .. }) => {
                tracing::info!(
                    "Scheduled slot {} skipped: job {} of kind '{}' is still running",
                    slot,
                    job_id,
                    self.kind
                );
                Tick::Busy(job_id)
            }
            Err(e) => {
                tracing::error!("Scheduled slot {} could not start a job: {}", slot, e);
                return Tick::Rejected(e.to_string());
            }
        };

        self.record_fire(now);
        tick
    }

    fn record_fire(&self, at: DateTime<Utc>) {
        *self
            .last_fired
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(at);

        if let Err(e) = self.state.save_last_fired(&self.kind, at) {
            tracing::warn!("Failed to persist scheduler state for '{}': {}", self.kind, e);
        }
    }

    /// Ticks every poll interval until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            "Scheduler started for kind '{}' ({}), polling every {:?}",
            self.kind,
            self.cadence,
            self.poll_interval
        );

        loop {
            self.tick(Utc::now());

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        tracing::info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::ExecutionMode;
    use crate::jobs::Job;
    use crate::storage::MemoryScheduleState;
    use chrono::TimeZone;

    #[derive(Default)]
    struct RecordingControl {
        started: Mutex<Vec<String>>,
        busy_with: Option<JobId>,
    }

    impl JobControl for RecordingControl {
        fn start_job(&self, kind: &str, _: Option<ExecutionMode>) -> Result<JobId, TaskError> {
            if let Some(job_id) = self.busy_with {
                return Err(TaskError::AlreadyRunning {
                    kind: kind.to_string(),
                    job_id,
                });
            }
            self.started.lock().unwrap().push(kind.to_string());
            Ok(JobId::new())
        }

        fn stop_job(&self, job_id: JobId) -> Result<(), TaskError> {
            Err(TaskError::NotFound(job_id))
        }

        fn job_status(&self, job_id: JobId) -> Result<Job, TaskError> {
            Err(TaskError::NotFound(job_id))
        }
    }

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, minute, 0).unwrap()
    }

    fn hourly(
        control: Arc<RecordingControl>,
        state: Arc<MemoryScheduleState>,
        baseline: DateTime<Utc>,
    ) -> Scheduler {
        Scheduler::new(
            control,
            state,
            "news",
            Cadence::every(Duration::from_secs(3600)),
            Duration::from_secs(30),
        )
        .with_baseline(baseline)
    }

    #[test]
    fn test_no_fire_right_after_start() {
        let control = Arc::new(RecordingControl::default());
        let scheduler = hourly(control.clone(), Arc::default(), at(1, 10, 15));

        assert_eq!(scheduler.tick(at(1, 10, 30)), Tick::Idle);
        assert!(control.started.lock().unwrap().is_empty());
    }

    #[test]
    fn test_fires_once_per_slot() {
        let control = Arc::new(RecordingControl::default());
        let scheduler = hourly(control.clone(), Arc::default(), at(1, 10, 15));

        assert!(matches!(scheduler.tick(at(1, 11, 0)), Tick::Fired(_)));
        assert_eq!(scheduler.tick(at(1, 11, 1)), Tick::Idle);
        assert_eq!(scheduler.tick(at(1, 11, 59)), Tick::Idle);
        assert!(matches!(scheduler.tick(at(1, 12, 0)), Tick::Fired(_)));
        assert_eq!(control.started.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_missed_slots_yield_one_catch_up() {
        let control = Arc::new(RecordingControl::default());
        let state = Arc::new(MemoryScheduleState::new());
        state.save_last_fired("news", at(1, 3, 0)).unwrap();

        let scheduler = Scheduler::new(
            control.clone(),
            state.clone(),
            "news",
            Cadence::daily(parse_daily_time("03:00").unwrap(), 0),
            Duration::from_secs(30),
        );

        // Three daily slots were missed while the process was down
        let now = at(4, 9, 0);
        assert!(matches!(scheduler.tick(now), Tick::Fired(_)));
        assert_eq!(scheduler.tick(now), Tick::Idle);
        assert_eq!(control.started.lock().unwrap().len(), 1);
        assert_eq!(state.load_last_fired("news").unwrap(), Some(now));
    }

    #[test]
    fn test_busy_kind_satisfies_the_slot() {
        let running = JobId::new();
        let control = Arc::new(RecordingControl {
            busy_with: Some(running),
            ..Default::default()
        });
        let scheduler = hourly(control.clone(), Arc::default(), at(1, 10, 15));

        assert_eq!(scheduler.tick(at(1, 11, 5)), Tick::Busy(running));
        assert_eq!(scheduler.tick(at(1, 11, 6)), Tick::Idle);
        assert!(control.started.lock().unwrap().is_empty());
    }

    #[test]
    fn test_state_survives_restart() {
        let control = Arc::new(RecordingControl::default());
        let state = Arc::new(MemoryScheduleState::new());

        let first = hourly(control.clone(), state.clone(), at(1, 10, 15));
        assert!(matches!(first.tick(at(1, 11, 0)), Tick::Fired(_)));

        // A restarted scheduler picks up the persisted fire time
        let second = hourly(control.clone(), state, at(1, 11, 30));
        assert_eq!(second.last_fired(), at(1, 11, 0));
        assert_eq!(second.tick(at(1, 11, 45)), Tick::Idle);
        assert!(matches!(second.tick(at(1, 12, 10)), Tick::Fired(_)));
    }

    #[test]
    fn test_from_config_requires_enabled() {
        let control = Arc::new(RecordingControl::default());
        let mut config = SchedulerConfig::default();

        let state = Arc::new(MemoryScheduleState::new());

        let disabled = Scheduler::from_config(control.clone(), state.clone(), &config);
        assert!(matches!(disabled, Err(ConfigError::Validation(_))));

        config.enabled = true;
        let scheduler = Scheduler::from_config(control, state, &config).unwrap();
        assert!(matches!(scheduler.cadence(), Cadence::Daily { .. }));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let control = Arc::new(RecordingControl::default());
        let scheduler = Arc::new(hourly(control, Arc::default(), Utc::now()));
        let cancel = CancellationToken::new();

        let task = {
            let scheduler = scheduler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.run(cancel).await })
        };

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }
}
