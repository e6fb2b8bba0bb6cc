use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::{Notifier, NotifyError, OpenedIncident};
use crate::db::Incident;

/// Posts incident transitions as JSON to a webhook.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

#[derive(Serialize)]
struct WebhookPayload<'a, T: Serialize> {
    event: &'static str,
    incidents: &'a [T],
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn post<T: Serialize + Sync>(
        &self,
        event: &'static str,
        incidents: &[T],
    ) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookPayload { event, incidents })
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(NotifyError::Rejected(format!(
                "Webhook returned non-success status: {}. Body: {}",
                status, error_body
            )));
        }

        tracing::debug!("Delivered {} notification for {} incident(s)", event, incidents.len());
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_opened(&self, incidents: &[OpenedIncident]) -> Result<(), NotifyError> {
        self.post("incident.opened", incidents).await
    }

    async fn notify_closed(&self, incidents: &[Incident]) -> Result<(), NotifyError> {
        self.post("incident.closed", incidents).await
    }
}
