//! JSON webhook transport

use crate::notify::{JobEvent, NotificationSink, NotifyError};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// POSTs every event as JSON to a fixed endpoint
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    endpoint: String,
}

impl WebhookNotifier {
    pub fn new(endpoint: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self::with_client(client, endpoint))
    }

    pub fn with_client(client: Client, endpoint: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn notify(&self, event: &JobEvent) -> Result<(), NotifyError> {
        let response = self.client.post(&self.endpoint).json(event).send().await?;

        if !response.status().is_success() {
            return Err(NotifyError::Delivery(format!(
                "{} answered HTTP {}",
                self.endpoint,
                response.status().as_u16()
            )));
        }

        tracing::debug!("Delivered {} event for job {}", event.kind, event.job.id);
        Ok(())
    }
}
