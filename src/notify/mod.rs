//! Notification channels and the multi-channel dispatcher.

mod discord;
mod email;
mod webhook;

pub use discord::DiscordChannel;
pub use email::EmailChannel;
pub use webhook::WebhookChannel;

use crate::db::{CheckResult, MonitoredSite, Severity};

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Failed to send notification: {0}")]
    SendFailed(String),
    #[error("Invalid configuration for channel: {0}")]
    InvalidConfiguration(String),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// A delivery mechanism for alerts, recoveries and reports.
///
/// Implementations enforce their own transport timeouts.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn send_alert(&self, site: &MonitoredSite, result: &CheckResult) -> Result<(), ChannelError>;

    async fn send_recovery(&self, site: &MonitoredSite, result: &CheckResult) -> Result<(), ChannelError>;

    async fn send_report(&self, content: &str, report_type: &str) -> Result<(), ChannelError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Alert,
    Recovery,
    Report,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NotificationKind::Alert => "alert",
            NotificationKind::Recovery => "recovery",
            NotificationKind::Report => "report",
        })
    }
}

#[derive(Debug, Clone)]
pub enum Notification {
    Alert { site: MonitoredSite, result: CheckResult },
    Recovery { site: MonitoredSite, result: CheckResult },
    Report { content: String, report_type: String },
}

impl Notification {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Notification::Alert { .. } => NotificationKind::Alert,
            Notification::Recovery { .. } => NotificationKind::Recovery,
            Notification::Report { .. } => NotificationKind::Report,
        }
    }

    async fn send_via(&self, channel: &dyn NotificationChannel) -> Result<(), ChannelError> {
        match self {
            Notification::Alert { site, result } => channel.send_alert(site, result).await,
            Notification::Recovery { site, result } => channel.send_recovery(site, result).await,
            Notification::Report { content, report_type } => channel.send_report(content, report_type).await,
        }
    }
}

/// Fans a notification out to every registered channel.
#[derive(Default)]
pub struct Dispatcher {
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl Dispatcher {
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        Self { channels }
    }

    pub fn add_channel(&mut self, channel: Arc<dyn NotificationChannel>) {
        tracing::info!("Notification channel added: {}", channel.name());
        self.channels.push(channel);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Send through all channels concurrently and wait for every one of them.
    ///
    /// Returns true if at least one channel succeeded. A channel that errors
    /// or panics counts as failed and does not affect the others.
    pub async fn deliver(&self, notification: Notification) -> bool {
        let kind = notification.kind();
        if self.channels.is_empty() {
            tracing::warn!("No notification channels configured, dropping {}", kind);
            return false;
        }

        tracing::debug!("Sending {} via {} channels", kind, self.channels.len());

        let notification = Arc::new(notification);
        let mut tasks = JoinSet::new();
        for channel in &self.channels {
            let channel = channel.clone();
            let notification = notification.clone();
            tasks.spawn(async move {
                let outcome = notification.send_via(channel.as_ref()).await;
                (channel.name().to_string(), outcome)
            });
        }

        let mut delivered = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => delivered += 1,
                Ok((name, Err(e))) => {
                    tracing::error!("Failed to send {} via {}: {}", kind, name, e);
                }
                Err(e) => {
                    tracing::error!("Notification channel task for {} failed: {}", kind, e);
                }
            }
        }

        if delivered == 0 {
            tracing::warn!("Every notification channel failed to deliver {}", kind);
        }
        delivered > 0
    }
}

pub(crate) fn alert_title(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "CRITICAL ALERT",
        Severity::High => "HIGH ALERT",
        Severity::Medium => "MEDIUM ALERT",
        _ => "LOW ALERT",
    }
}

pub(crate) fn format_millis(ms: u64) -> String {
    if ms < 1000 {
        format!("{} ms", ms)
    } else {
        format!("{:.2} s", ms as f64 / 1000.0)
    }
}

/// Plain-text lines describing a failed check.
pub(crate) fn alert_lines(site: &MonitoredSite, result: &CheckResult) -> Vec<String> {
    let mut lines = vec![format!("Problem detected on {}", site.name), format!("URL: {}", site.url)];
    if let Some(code) = result.status_code {
        lines.push(format!("Status code: {}", code));
    }
    if let Some(ms) = result.response_time_ms {
        lines.push(format!("Response time: {}", format_millis(ms)));
    }
    if !result.content_check_passed {
        lines.push("Content check: failed".to_string());
    }
    if !result.ssl_check_passed && site.ssl_check {
        lines.push("TLS certificate: invalid".to_string());
    }
    if let Some(err) = result.error_message.as_deref().filter(|e| !e.is_empty()) {
        lines.push(format!("Error: {}", err));
    }
    lines
}
