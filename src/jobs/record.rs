//! The job record and its counters

use crate::crawler::ExecutionMode;
use crate::jobs::JobState;
use crate::CrawlError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Opaque job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        JobId(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(JobId)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One crawl run for a job kind
///
/// `processed == succeeded + skipped + failed` holds at every snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub kind: String,
    pub mode: ExecutionMode,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub skipped: u64,
    pub failed: u64,
    pub error_summary: Option<String>,
}

impl Job {
    pub fn new(kind: &str, mode: ExecutionMode) -> Self {
        Self {
            id: JobId::new(),
            kind: kind.to_string(),
            mode,
            state: JobState::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            total: 0,
            processed: 0,
            succeeded: 0,
            skipped: 0,
            failed: 0,
            error_summary: None,
        }
    }

    /// Moves the job to `next`, stamping start and finish times
    pub fn transition(&mut self, next: JobState) -> Result<(), CrawlError> {
        if !self.state.can_transition_to(next) {
            return Err(CrawlError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        let now = Utc::now();
        if next == JobState::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        self.state = next;
        Ok(())
    }

    pub fn record_success(&mut self) {
        self.processed += 1;
        self.succeeded += 1;
    }

    pub fn record_skip(&mut self) {
        self.processed += 1;
        self.skipped += 1;
    }

    pub fn record_failure(&mut self) {
        self.processed += 1;
        self.failed += 1;
    }

    /// Failed items as a percentage of processed items
    pub fn failure_rate(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.failed as f64 * 100.0 / self.processed as f64
        }
    }

    /// Elapsed run time, if the job has started
    pub fn duration(&self) -> Option<chrono::Duration> {
        let start = self.started_at?;
        Some(self.finished_at.unwrap_or_else(Utc::now) - start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_is_pending() {
        let job = Job::new("news", ExecutionMode::Async);
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.processed, 0);
        assert!(job.started_at.is_none());
    }

    #[test]
    fn test_transition_stamps_times() {
        let mut job = Job::new("news", ExecutionMode::Serial);
        job.transition(JobState::Running).unwrap();
        assert!(job.started_at.is_some());
        assert!(job.finished_at.is_none());

        job.transition(JobState::Completed).unwrap();
        assert!(job.finished_at.is_some());
        assert!(job.duration().is_some());
    }

    #[test]
    fn test_invalid_transition_is_an_error() {
        let mut job = Job::new("news", ExecutionMode::Async);
        job.transition(JobState::Cancelled).unwrap();

        let err = job.transition(JobState::Running).unwrap_err();
        assert!(matches!(
            err,
            CrawlError::InvalidTransition {
                from: JobState::Cancelled,
                to: JobState::Running
            }
        ));
        assert_eq!(job.state, JobState::Cancelled);
    }

    #[test]
    fn test_counters_stay_consistent() {
        let mut job = Job::new("news", ExecutionMode::Async);
        job.record_success();
        job.record_skip();
        job.record_failure();
        job.record_failure();

        assert_eq!(job.processed, 4);
        assert_eq!(job.processed, job.succeeded + job.skipped + job.failed);
        assert!((job.failure_rate() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_job_ids_are_unique() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);
        assert_eq!(JobId::parse(&a.to_string()), Some(a));
        assert_eq!(JobId::parse("nope"), None);
    }
}
