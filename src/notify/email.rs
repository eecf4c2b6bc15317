//! Email channel: plain-text mail over SMTP.

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::time::Duration;

use super::{alert_lines, alert_title, format_millis, ChannelError, NotificationChannel};
use crate::config::SmtpSettings;
use crate::db::{CheckResult, MonitoredSite};

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends plain-text mail through an SMTP relay.
pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl EmailChannel {
    pub fn new(settings: &SmtpSettings) -> Result<Self, ChannelError> {
        let from: Mailbox = format!("SiteWatch <{}>", settings.from)
            .parse()
            .map_err(|e| ChannelError::InvalidConfiguration(format!("invalid sender address: {}", e)))?;

        let to = settings
            .to
            .iter()
            .map(|addr| {
                addr.parse::<Mailbox>()
                    .map_err(|e| ChannelError::InvalidConfiguration(format!("invalid recipient {}: {}", addr, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if to.is_empty() {
            return Err(ChannelError::InvalidConfiguration("no email recipients".to_string()));
        }

        let builder = if settings.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
                .map_err(|e| ChannelError::InvalidConfiguration(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
        };

        let mut builder = builder.port(settings.port).timeout(Some(SMTP_TIMEOUT));
        if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            to,
        })
    }

    fn build_message(&self, subject: &str, body: String) -> Result<Message, ChannelError> {
        let mut builder = Message::builder().from(self.from.clone()).subject(subject);
        for recipient in &self.to {
            builder = builder.to(recipient.clone());
        }
        builder
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| ChannelError::SendFailed(format!("failed to build message: {}", e)))
    }

    async fn send(&self, subject: &str, body: String) -> Result<(), ChannelError> {
        let message = self.build_message(subject, body)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    async fn send_alert(&self, site: &MonitoredSite, result: &CheckResult) -> Result<(), ChannelError> {
        let subject = format!("[{}] {} is having problems", alert_title(result.severity), site.name);
        let mut lines = alert_lines(site, result);
        lines.push(format!("Checked at: {}", result.timestamp.format("%Y-%m-%d %H:%M:%S UTC")));
        self.send(&subject, lines.join("\n")).await
    }

    async fn send_recovery(&self, site: &MonitoredSite, result: &CheckResult) -> Result<(), ChannelError> {
        let subject = format!("[RECOVERED] {} is back up", site.name);
        let mut lines = vec![format!("{} is back up", site.name), format!("URL: {}", site.url)];
        if let Some(code) = result.status_code {
            lines.push(format!("Status code: {}", code));
        }
        if let Some(ms) = result.response_time_ms {
            lines.push(format!("Response time: {}", format_millis(ms)));
        }
        self.send(&subject, lines.join("\n")).await
    }

    async fn send_report(&self, content: &str, report_type: &str) -> Result<(), ChannelError> {
        self.send(&format!("SiteWatch {} report", report_type), content.to_string())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SmtpSettings {
        SmtpSettings {
            host: "smtp.example.com".to_string(),
            port: 587,
            username: Some("user".to_string()),
            password: Some("secret".to_string()),
            from: "monitor@example.com".to_string(),
            to: vec!["ops@example.com".to_string(), "oncall@example.com".to_string()],
            use_tls: true,
        }
    }

    #[test]
    fn test_builds_with_valid_settings() {
        let channel = EmailChannel::new(&settings()).unwrap();
        assert_eq!(channel.to.len(), 2);
        assert_eq!(channel.name(), "email");
    }

    #[test]
    fn test_rejects_bad_addresses() {
        let mut bad_from = settings();
        bad_from.from = "not an address".to_string();
        assert!(matches!(
            EmailChannel::new(&bad_from),
            Err(ChannelError::InvalidConfiguration(_))
        ));

        let mut no_recipients = settings();
        no_recipients.to.clear();
        assert!(EmailChannel::new(&no_recipients).is_err());
    }

    #[test]
    fn test_message_has_every_recipient() {
        let channel = EmailChannel::new(&settings()).unwrap();
        let message = channel.build_message("subject", "body".to_string()).unwrap();
        assert_eq!(message.envelope().to().len(), 2);
    }
}
