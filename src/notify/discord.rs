//! Discord channel: posts embeds to an incoming webhook.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::{alert_title, format_millis, ChannelError, NotificationChannel};
use crate::db::{CheckResult, MonitoredSite, Severity};

const EMBED_DESCRIPTION_LIMIT: usize = 4096;
const FOOTER: &str = "SiteWatch Monitoring";

/// Posts embeds to a Discord webhook.
pub struct DiscordChannel {
    client: Client,
    webhook_url: String,
}

#[derive(Serialize)]
struct WebhookMessage {
    username: &'static str,
    embeds: Vec<Embed>,
}

#[derive(Serialize)]
struct Embed {
    title: String,
    description: String,
    color: u32,
    timestamp: String,
    fields: Vec<EmbedField>,
    footer: EmbedFooter,
}

#[derive(Serialize)]
struct EmbedField {
    name: String,
    value: String,
    inline: bool,
}

#[derive(Serialize)]
struct EmbedFooter {
    text: &'static str,
}

impl DiscordChannel {
    pub fn new(webhook_url: impl Into<String>) -> Result<Self, ChannelError> {
        let webhook_url = webhook_url.into();
        if !webhook_url.starts_with("http://") && !webhook_url.starts_with("https://") {
            return Err(ChannelError::InvalidConfiguration(format!(
                "Discord webhook URL must be http(s): {}",
                webhook_url
            )));
        }

        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { client, webhook_url })
    }

    async fn post(&self, embed: Embed) -> Result<(), ChannelError> {
        let payload = WebhookMessage {
            username: "SiteWatch",
            embeds: vec![embed],
        };

        let response = self.client.post(&self.webhook_url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed(format!(
                "Discord returned {}: {}",
                status, body
            )));
        }
        Ok(())
    }
}

fn severity_color(severity: Severity) -> u32 {
    match severity {
        Severity::Critical => 0xFF0000,
        Severity::High => 0xFF4500,
        Severity::Medium => 0xFFA500,
        _ => 0xFFFF00,
    }
}

fn field(name: &str, value: impl Into<String>, inline: bool) -> EmbedField {
    EmbedField {
        name: name.to_string(),
        value: value.into(),
        inline,
    }
}

fn alert_embed(site: &MonitoredSite, result: &CheckResult) -> Embed {
    let mut fields = vec![field("URL", site.url.clone(), false)];
    if let Some(code) = result.status_code {
        fields.push(field("Status code", code.to_string(), true));
    }
    if let Some(ms) = result.response_time_ms {
        fields.push(field("Response time", format_millis(ms), true));
    }
    if !result.content_check_passed {
        fields.push(field("Content check", "Failed", true));
    }
    if !result.ssl_check_passed && site.ssl_check {
        fields.push(field("TLS certificate", "Invalid", true));
    }
    if let Some(err) = result.error_message.as_deref().filter(|e| !e.is_empty()) {
        fields.push(field("Error", err, false));
    }

    Embed {
        title: alert_title(result.severity).to_string(),
        description: format!("Problem detected on {}", site.name),
        color: severity_color(result.severity),
        timestamp: Utc::now().to_rfc3339(),
        fields,
        footer: EmbedFooter { text: FOOTER },
    }
}

fn recovery_embed(site: &MonitoredSite, result: &CheckResult) -> Embed {
    let code = result
        .status_code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "N/A".to_string());
    let elapsed = result
        .response_time_ms
        .map(format_millis)
        .unwrap_or_else(|| "N/A".to_string());

    Embed {
        title: "SITE RECOVERED".to_string(),
        description: format!("{} is back up", site.name),
        color: 0x00FF00,
        timestamp: Utc::now().to_rfc3339(),
        fields: vec![
            field("URL", site.url.clone(), false),
            field("Status code", code, true),
            field("Response time", elapsed, true),
        ],
        footer: EmbedFooter { text: FOOTER },
    }
}

fn report_embed(content: &str, report_type: &str) -> Embed {
    let description: String = content.chars().take(EMBED_DESCRIPTION_LIMIT).collect();
    Embed {
        title: format!("{} report", report_type),
        description,
        color: 0x0000FF,
        timestamp: Utc::now().to_rfc3339(),
        fields: Vec::new(),
        footer: EmbedFooter { text: FOOTER },
    }
}

#[async_trait]
impl NotificationChannel for DiscordChannel {
    fn name(&self) -> &str {
        "discord"
    }

    async fn send_alert(&self, site: &MonitoredSite, result: &CheckResult) -> Result<(), ChannelError> {
        self.post(alert_embed(site, result)).await
    }

    async fn send_recovery(&self, site: &MonitoredSite, result: &CheckResult) -> Result<(), ChannelError> {
        self.post(recovery_embed(site, result)).await
    }

    async fn send_report(&self, content: &str, report_type: &str) -> Result<(), ChannelError> {
        self.post(report_embed(content, report_type)).await
    }
}
