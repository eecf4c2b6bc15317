//! Configuration module for SiteWatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the management API (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "sitewatch.db")
    pub db_path: String,
    /// Upper bound on checks running at once across all sites (default: 10)
    pub max_concurrent_checks: usize,
    /// Floor applied to every site's check interval (default: 10s)
    pub min_check_interval_secs: u64,
    /// Delay before a newly scheduled site is first checked (default: 5s)
    pub startup_delay_secs: u64,
    /// Interval given to new sites that don't specify one (default: 300s)
    pub default_check_interval_secs: u64,
    /// Default for the stored, currently unused, retry count (default: 3)
    pub default_max_retries: u32,
    /// Probe connect and total request timeout (default: 30s)
    pub probe_timeout_secs: u64,
    pub discord_webhook_url: Option<String>,
    pub webhook_url: Option<String>,
    pub smtp: Option<SmtpSettings>,
}

/// SMTP relay settings for the email channel.
#[derive(Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub to: Vec<String>,
    pub use_tls: bool,
}

impl fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("from", &self.from)
            .field("to", &self.to)
            .field("use_tls", &self.use_tls)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "sitewatch.db".to_string(),
            max_concurrent_checks: 10,
            min_check_interval_secs: 10,
            startup_delay_secs: 5,
            default_check_interval_secs: 300,
            default_max_retries: 3,
            probe_timeout_secs: 30,
            discord_webhook_url: None,
            webhook_url: None,
            smtp: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SITEWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `SITEWATCH_DB_PATH`: Database file path (default: "sitewatch.db")
    /// - `SITEWATCH_MAX_CONCURRENT_CHECKS`: worker pool size (default: 10)
    /// - `SITEWATCH_MIN_CHECK_INTERVAL_SECS`: interval floor (default: 10)
    /// - `SITEWATCH_STARTUP_DELAY_SECS`: first-check delay (default: 5)
    /// - `SITEWATCH_DEFAULT_CHECK_INTERVAL_SECS`: default site interval (default: 300)
    /// - `SITEWATCH_DEFAULT_MAX_RETRIES`: default retry count (default: 3)
    /// - `SITEWATCH_PROBE_TIMEOUT_SECS`: probe timeout (default: 30)
    /// - `SITEWATCH_DISCORD_WEBHOOK_URL`: enables the Discord channel
    /// - `SITEWATCH_WEBHOOK_URL`: enables the JSON webhook channel
    /// - `SITEWATCH_SMTP_HOST`, `_PORT`, `_USERNAME`, `_PASSWORD`, `_FROM`,
    ///   `_TO` (comma separated), `_USE_TLS`: enable the email channel
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        parse_into(&lookup, "SITEWATCH_HTTP_PORT", &mut cfg.http_port);
        if let Some(db_path) = non_empty(&lookup, "SITEWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }
        parse_into(&lookup, "SITEWATCH_MAX_CONCURRENT_CHECKS", &mut cfg.max_concurrent_checks);
        parse_into(&lookup, "SITEWATCH_MIN_CHECK_INTERVAL_SECS", &mut cfg.min_check_interval_secs);
        parse_into(&lookup, "SITEWATCH_STARTUP_DELAY_SECS", &mut cfg.startup_delay_secs);
        parse_into(&lookup, "SITEWATCH_DEFAULT_CHECK_INTERVAL_SECS", &mut cfg.default_check_interval_secs);
        parse_into(&lookup, "SITEWATCH_DEFAULT_MAX_RETRIES", &mut cfg.default_max_retries);
        parse_into(&lookup, "SITEWATCH_PROBE_TIMEOUT_SECS", &mut cfg.probe_timeout_secs);

        // A pool of zero workers would never run anything
        cfg.max_concurrent_checks = cfg.max_concurrent_checks.max(1);

        cfg.discord_webhook_url = non_empty(&lookup, "SITEWATCH_DISCORD_WEBHOOK_URL");
        cfg.webhook_url = non_empty(&lookup, "SITEWATCH_WEBHOOK_URL");
        cfg.smtp = smtp_from_lookup(&lookup);

        cfg
    }

    pub fn min_check_interval(&self) -> Duration {
        Duration::from_secs(self.min_check_interval_secs)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_into<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = non_empty(lookup, key) {
        match raw.parse() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!("Ignoring invalid value for {}: {}", key, raw),
        }
    }
}

fn smtp_from_lookup<F>(lookup: &F) -> Option<SmtpSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let host = non_empty(lookup, "SITEWATCH_SMTP_HOST")?;
    let from = non_empty(lookup, "SITEWATCH_SMTP_FROM")?;
    let to: Vec<String> = non_empty(lookup, "SITEWATCH_SMTP_TO")?
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if to.is_empty() {
        return None;
    }

    let mut port: u16 = 587;
    parse_into(lookup, "SITEWATCH_SMTP_PORT", &mut port);

    let use_tls = non_empty(lookup, "SITEWATCH_SMTP_USE_TLS")
        .map(|v| v.to_lowercase() != "false" && v != "0")
        .unwrap_or(true);

    Some(SmtpSettings {
        host,
        port,
        username: non_empty(lookup, "SITEWATCH_SMTP_USERNAME"),
        password: non_empty(lookup, "SITEWATCH_SMTP_PASSWORD"),
        from,
        to,
        use_tls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.db_path, "sitewatch.db");
        assert_eq!(cfg.min_check_interval(), Duration::from_secs(10));
        assert_eq!(cfg.startup_delay(), Duration::from_secs(5));
        assert!(cfg.smtp.is_none());
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let cfg = ServerConfig::from_lookup(lookup(&[
            ("SITEWATCH_HTTP_PORT", "9090"),
            ("SITEWATCH_MIN_CHECK_INTERVAL_SECS", "30"),
            ("SITEWATCH_MAX_CONCURRENT_CHECKS", "lots"),
            ("SITEWATCH_DISCORD_WEBHOOK_URL", "  "),
            ("SITEWATCH_WEBHOOK_URL", "https://hooks.example.com/x"),
        ]));
        assert_eq!(cfg.http_port, 9090);
        assert_eq!(cfg.min_check_interval_secs, 30);
        assert_eq!(cfg.max_concurrent_checks, 10);
        assert_eq!(cfg.discord_webhook_url, None);
        assert_eq!(cfg.webhook_url.as_deref(), Some("https://hooks.example.com/x"));
    }

    #[test]
    fn test_zero_workers_is_clamped() {
        let cfg = ServerConfig::from_lookup(lookup(&[("SITEWATCH_MAX_CONCURRENT_CHECKS", "0")]));
        assert_eq!(cfg.max_concurrent_checks, 1);
    }

    #[test]
    fn test_smtp_requires_host_sender_and_recipients() {
        let partial = ServerConfig::from_lookup(lookup(&[
            ("SITEWATCH_SMTP_HOST", "smtp.example.com"),
            ("SITEWATCH_SMTP_FROM", "monitor@example.com"),
        ]));
        assert!(partial.smtp.is_none());

        let cfg = ServerConfig::from_lookup(lookup(&[
            ("SITEWATCH_SMTP_HOST", "smtp.example.com"),
            ("SITEWATCH_SMTP_FROM", "monitor@example.com"),
            ("SITEWATCH_SMTP_TO", "ops@example.com, oncall@example.com"),
            ("SITEWATCH_SMTP_PORT", "2525"),
            ("SITEWATCH_SMTP_USE_TLS", "false"),
            ("SITEWATCH_SMTP_PASSWORD", "hunter2"),
        ]));
        let smtp = cfg.smtp.unwrap();
        assert_eq!(smtp.to, vec!["ops@example.com", "oncall@example.com"]);
        assert_eq!(smtp.port, 2525);
        assert!(!smtp.use_tls);
        assert!(!format!("{:?}", smtp).contains("hunter2"));
    }
}
