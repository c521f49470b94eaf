//! Webhook notification channel.

use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use std::time::Duration;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Notification;
use crate::domain::ports::NotificationChannel;

/// POSTs every notification as JSON to a fixed URL.
pub struct WebhookNotifier {
    client: ReqwestClient,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = ReqwestClient::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationChannel for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, notification: &Notification) -> DomainResult<()> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| DomainError::collaborator("webhook", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DomainError::collaborator(
                "webhook",
                format!("webhook returned {status}: {body}"),
            ));
        }
        Ok(())
    }
}
