//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Externally visible availability state of a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SiteStatus {
    Up,
    Down,
    Degraded,
    Maintenance,
    #[default]
    Unknown,
}

impl SiteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteStatus::Up => "UP",
            SiteStatus::Down => "DOWN",
            SiteStatus::Degraded => "DEGRADED",
            SiteStatus::Maintenance => "MAINTENANCE",
            SiteStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SiteStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UP" => Ok(SiteStatus::Up),
            "DOWN" => Ok(SiteStatus::Down),
            "DEGRADED" => Ok(SiteStatus::Degraded),
            "MAINTENANCE" => Ok(SiteStatus::Maintenance),
            "UNKNOWN" => Ok(SiteStatus::Unknown),
            other => Err(format!("unknown site status: {}", other)),
        }
    }
}

/// Classification of a single probe execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckOutcome {
    Success,
    Failure,
    Timeout,
    Error,
}

impl CheckOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckOutcome::Success => "SUCCESS",
            CheckOutcome::Failure => "FAILURE",
            CheckOutcome::Timeout => "TIMEOUT",
            CheckOutcome::Error => "ERROR",
        }
    }
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(CheckOutcome::Success),
            "FAILURE" => Ok(CheckOutcome::Failure),
            "TIMEOUT" => Ok(CheckOutcome::Timeout),
            "ERROR" => Ok(CheckOutcome::Error),
            other => Err(format!("unknown check outcome: {}", other)),
        }
    }
}

/// Alert severity attached to a check result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "NONE",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(Severity::None),
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// A monitored web endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoredSite {
    pub id: i64,
    pub name: String,
    /// Unique across all sites.
    pub url: String,
    pub check_interval_secs: u64,
    /// Responses slower than this are classified as a low-severity failure.
    pub response_time_threshold_ms: Option<u64>,
    /// Stored and editable, but the probe never re-probes on failure.
    pub max_retries: u32,
    pub content_check_string: Option<String>,
    pub check_content: bool,
    pub ssl_check: bool,
    pub notify_on_issue: bool,
    pub maintenance_mode: bool,
    pub current_status: SiteStatus,
}

impl Default for MonitoredSite {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            url: String::new(),
            check_interval_secs: 300,
            response_time_threshold_ms: None,
            max_retries: 3,
            content_check_string: None,
            check_content: false,
            ssl_check: false,
            notify_on_issue: true,
            maintenance_mode: false,
            current_status: SiteStatus::Unknown,
        }
    }
}

impl MonitoredSite {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn response_time_threshold(&self) -> Option<Duration> {
        self.response_time_threshold_ms.map(Duration::from_millis)
    }

    /// The substring the body must contain, when content assertion is on.
    pub fn content_assertion(&self) -> Option<&str> {
        if !self.check_content {
            return None;
        }
        self.content_check_string.as_deref().filter(|s| !s.is_empty())
    }

    pub fn is_https(&self) -> bool {
        self.url.to_ascii_lowercase().starts_with("https://")
    }
}

/// Immutable snapshot of one probe execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub id: i64,
    pub site_id: i64,
    pub timestamp: DateTime<Utc>,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<u64>,
    pub content_size: u64,
    pub status: CheckOutcome,
    pub content_check_passed: bool,
    pub ssl_check_passed: bool,
    pub error_message: Option<String>,
    pub severity: Severity,
}

impl CheckResult {
    /// A result with the given classification and nothing else filled in.
    pub fn new(site_id: i64, status: CheckOutcome, severity: Severity) -> Self {
        Self {
            id: 0,
            site_id,
            timestamp: Utc::now(),
            status_code: None,
            response_time_ms: None,
            content_size: 0,
            status,
            content_check_passed: true,
            ssl_check_passed: true,
            error_message: None,
            severity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_text_round_trip() {
        for status in [
            SiteStatus::Up,
            SiteStatus::Down,
            SiteStatus::Degraded,
            SiteStatus::Maintenance,
            SiteStatus::Unknown,
        ] {
            assert_eq!(status.as_str().parse::<SiteStatus>().unwrap(), status);
        }
        assert!("up".parse::<SiteStatus>().is_err());
        assert_eq!("TIMEOUT".parse::<CheckOutcome>().unwrap(), CheckOutcome::Timeout);
        assert_eq!("CRITICAL".parse::<Severity>().unwrap(), Severity::Critical);
    }

    #[test]
    fn test_site_defaults() {
        let site = MonitoredSite::default();
        assert_eq!(site.current_status, SiteStatus::Unknown);
        assert_eq!(site.check_interval(), Duration::from_secs(300));
        assert!(!site.maintenance_mode);
    }

    #[test]
    fn test_content_assertion_requires_flag_and_string() {
        let mut site = MonitoredSite {
            content_check_string: Some("OK".to_string()),
            ..Default::default()
        };
        assert_eq!(site.content_assertion(), None);

        site.check_content = true;
        assert_eq!(site.content_assertion(), Some("OK"));

        site.content_check_string = Some(String::new());
        assert_eq!(site.content_assertion(), None);
    }

    #[test]
    fn test_serde_uses_upper_case_enums() {
        let json = serde_json::to_value(CheckResult::new(1, CheckOutcome::Failure, Severity::High)).unwrap();
        assert_eq!(json["status"], "FAILURE");
        assert_eq!(json["severity"], "HIGH");
    }
}
