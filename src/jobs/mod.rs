//! Job records, lifecycle and the task manager
//!
//! The task manager admits at most one active job per kind, runs each job on
//! its own driver task and keeps a bounded history of finished jobs.

mod driver;
mod manager;
mod record;
mod state;

pub use manager::{JobServices, ManagerSettings, TaskManager};
pub use record::{Job, JobId};
pub use state::JobState;

use thiserror::Error;

/// Errors returned by task manager operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("A job of kind '{kind}' is already running ({job_id})")]
    AlreadyRunning { kind: String, job_id: JobId },

    #[error("No job with id {0}")]
    NotFound(JobId),

    #[error("Job {job_id} is already {state}")]
    AlreadyTerminal { job_id: JobId, state: JobState },
}
