//! Generic webhook channel: POSTs each notification as JSON.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::{ChannelError, NotificationChannel};
use crate::db::{CheckResult, MonitoredSite};

/// A channel that POSTs a JSON event document to a URL.
pub struct WebhookChannel {
    client: Client,
    url: String,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>) -> Result<Self, ChannelError> {
        let url = url.into();
        reqwest::Url::parse(&url)
            .map_err(|e| ChannelError::InvalidConfiguration(format!("invalid webhook URL {}: {}", url, e)))?;

        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { client, url })
    }

    async fn post(&self, payload: Value) -> Result<(), ChannelError> {
        let response = self.client.post(&self.url).json(&payload).send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(ChannelError::SendFailed(format!(
                "Webhook returned non-success status: {}. Body: {}",
                status, error_body
            )));
        }

        Ok(())
    }
}

fn site_event(event: &str, site: &MonitoredSite, result: &CheckResult) -> Value {
    json!({
        "event": event,
        "site": site,
        "result": result,
    })
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send_alert(&self, site: &MonitoredSite, result: &CheckResult) -> Result<(), ChannelError> {
        self.post(site_event("alert", site, result)).await
    }

    async fn send_recovery(&self, site: &MonitoredSite, result: &CheckResult) -> Result<(), ChannelError> {
        self.post(site_event("recovery", site, result)).await
    }

    async fn send_report(&self, content: &str, report_type: &str) -> Result<(), ChannelError> {
        self.post(json!({
            "event": "report",
            "report_type": report_type,
            "content": content,
        }))
        .await
    }
}
