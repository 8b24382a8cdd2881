//! Inbound job control
//!
//! The operations an outer surface (CLI, scheduler, an HTTP front end) uses to
//! drive jobs. `TaskManager` is the implementation.

use crate::crawler::ExecutionMode;
use crate::jobs::{Job, JobId, TaskError, TaskManager};

pub trait JobControl: Send + Sync {
    /// Starts a job of `kind`, in `mode` or the configured default
    fn start_job(&self, kind: &str, mode: Option<ExecutionMode>) -> Result<JobId, TaskError>;

    /// Requests cancellation; in-flight items get the grace period
    fn stop_job(&self, job_id: JobId) -> Result<(), TaskError>;

    fn job_status(&self, job_id: JobId) -> Result<Job, TaskError>;
}

impl JobControl for TaskManager {
    fn start_job(&self, kind: &str, mode: Option<ExecutionMode>) -> Result<JobId, TaskError> {
        self.enqueue(kind, mode)
    }

    fn stop_job(&self, job_id: JobId) -> Result<(), TaskError> {
        self.cancel(job_id)
    }

    fn job_status(&self, job_id: JobId) -> Result<Job, TaskError> {
        self.status(job_id)
    }
}
