//! Job lifecycle notifications
//!
//! The job driver emits an event when a job starts running, when it reaches a
//! terminal state, when its failure rate crosses the configured threshold and
//! periodically while it runs. Delivery failures are logged and never affect
//! the job.

mod webhook;

pub use webhook::WebhookNotifier;

use crate::jobs::Job;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Mutex;
use thiserror::Error;

/// Which lifecycle moment an event marks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Start,
    Complete,
    Error,
    Progress,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Start => "start",
            EventKind::Complete => "complete",
            EventKind::Error => "error",
            EventKind::Progress => "progress",
        };
        f.write_str(s)
    }
}

/// A notification about one job, carrying a snapshot taken when it was raised
#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub kind: EventKind,
    pub job: Job,
    pub message: String,
}

impl JobEvent {
    pub fn new(kind: EventKind, job: Job, message: impl Into<String>) -> Self {
        Self {
            kind,
            job,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Outbound notification transport
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: &JobEvent) -> Result<(), NotifyError>;
}

/// Writes events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, event: &JobEvent) -> Result<(), NotifyError> {
        match event.kind {
            EventKind::Error => tracing::warn!(
                "[{}] job {} ({}): {}",
                event.kind,
                event.job.id,
                event.job.kind,
                event.message
            ),
            _ => tracing::info!(
                "[{}] job {} ({}): {}",
                event.kind,
                event.job.id,
                event.job.kind,
                event.message
            ),
        }
        Ok(())
    }
}

/// Keeps every event it receives, in order
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<JobEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<JobEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Event kinds received so far, in order
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().iter().map(|e| e.kind).collect()
    }
}

#[async_trait]
impl NotificationSink for MemorySink {
    async fn notify(&self, event: &JobEvent) -> Result<(), NotifyError> {
        self.events
            .lock()
            .map_err(|_| NotifyError::Delivery("sink lock poisoned".to_string()))?
            .push(event.clone());
        Ok(())
    }
}

/// Delivers to `sink`, logging instead of propagating a failure
pub async fn deliver(sink: &dyn NotificationSink, event: JobEvent) {
    if let Err(e) = sink.notify(&event).await {
        tracing::warn!(
            "Failed to deliver {} notification for job {}: {}",
            event.kind,
            event.job.id,
            e
        );
    }
}
