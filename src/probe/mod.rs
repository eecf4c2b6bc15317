//! Probe module: one HTTP check against a site, classified into a `CheckResult`.

mod http;

pub use http::*;

use crate::db::{CheckOutcome, CheckResult, MonitoredSite, Severity};

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Transport error types.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// A fully received HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
    /// Time from sending the request until the whole body was read.
    pub elapsed: Duration,
}

/// HTTP access used by the probe. Swappable so tests can script responses.
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `url`, following redirects.
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError>;

    /// Whether `url` presents a certificate chain that validates.
    async fn verify_certificate(&self, url: &str) -> bool;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        (**self).get(url).await
    }

    async fn verify_certificate(&self, url: &str) -> bool {
        (**self).verify_certificate(url).await
    }
}

/// Anything that can check a site. Never fails: problems end up in the result.
#[async_trait]
pub trait SiteChecker: Send + Sync {
    async fn check(&self, site: &MonitoredSite) -> CheckResult;
}

/// The HTTP probe. Stateless, so one instance serves every site concurrently.
pub struct HttpProbe<T = ReqwestTransport> {
    transport: T,
}

impl<T: Transport> HttpProbe<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl<T: Transport> SiteChecker for HttpProbe<T> {
    async fn check(&self, site: &MonitoredSite) -> CheckResult {
        tracing::debug!("Checking site {}", site.url);

        let response = match self.transport.get(&site.url).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Probe failed for {}: {}", site.url, e);
                return transport_failure(site.id, &e);
            }
        };

        let ssl_check_passed = if site.ssl_check && site.is_https() {
            self.transport.verify_certificate(&site.url).await
        } else {
            true
        };

        classify(site, &response, ssl_check_passed)
    }
}

fn transport_failure(site_id: i64, err: &TransportError) -> CheckResult {
    let outcome = match err {
        TransportError::Timeout(_) => CheckOutcome::Timeout,
        _ => CheckOutcome::Error,
    };
    let mut result = CheckResult::new(site_id, outcome, Severity::High);
    result.error_message = Some(err.to_string());
    result
}

/// Classify a received response.
///
/// Precedence: status code, then content assertion, then response time, then TLS.
pub fn classify(site: &MonitoredSite, response: &HttpResponse, ssl_check_passed: bool) -> CheckResult {
    let status_ok = (200..400).contains(&response.status);

    let content_check_passed = match site.content_assertion() {
        Some(needle) => String::from_utf8_lossy(&response.body).contains(needle),
        None => true,
    };

    let response_time_ok = site
        .response_time_threshold()
        .map_or(true, |threshold| response.elapsed <= threshold);

    let (status, severity) = if !status_ok {
        let severity = if response.status >= 500 { Severity::High } else { Severity::Medium };
        (CheckOutcome::Failure, severity)
    } else if !content_check_passed {
        (CheckOutcome::Failure, Severity::Medium)
    } else if !response_time_ok {
        (CheckOutcome::Failure, Severity::Low)
    } else if !ssl_check_passed {
        (CheckOutcome::Failure, Severity::High)
    } else {
        (CheckOutcome::Success, Severity::None)
    };

    CheckResult {
        id: 0,
        site_id: site.id,
        timestamp: Utc::now(),
        status_code: Some(response.status),
        response_time_ms: Some(response.elapsed.as_millis() as u64),
        content_size: response.body.len() as u64,
        status,
        content_check_passed,
        ssl_check_passed,
        error_message: None,
        severity,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Transport that replays a fixed response and certificate verdict.
    pub(crate) struct ScriptedTransport {
        pub response: Mutex<Result<HttpResponse, TransportError>>,
        pub certificate_valid: bool,
        pub calls: AtomicUsize,
    }

    impl ScriptedTransport {
        pub fn ok(status: u16, body: &str, elapsed_ms: u64) -> Self {
            Self {
                response: Mutex::new(Ok(HttpResponse {
                    status,
                    body: body.as_bytes().to_vec(),
                    elapsed: Duration::from_millis(elapsed_ms),
                })),
                certificate_valid: true,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn err(err: TransportError) -> Self {
            Self {
                response: Mutex::new(Err(err)),
                certificate_valid: true,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn set_ok(&self, status: u16, body: &str) {
            *self.response.lock().unwrap() = Ok(HttpResponse {
                status,
                body: body.as_bytes().to_vec(),
                elapsed: Duration::from_millis(50),
            });
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&self, _url: &str) -> Result<HttpResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &*self.response.lock().unwrap() {
                Ok(r) => Ok(r.clone()),
                Err(TransportError::Timeout(d)) => Err(TransportError::Timeout(*d)),
                Err(TransportError::Network(m)) => Err(TransportError::Network(m.clone())),
                Err(TransportError::Config(m)) => Err(TransportError::Config(m.clone())),
            }
        }

        async fn verify_certificate(&self, _url: &str) -> bool {
            self.certificate_valid
        }
    }

    fn site() -> MonitoredSite {
        MonitoredSite {
            id: 7,
            name: "A".to_string(),
            url: "https://a.test".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_success() {
        let probe = HttpProbe::new(ScriptedTransport::ok(200, "hello", 40));
        let result = probe.check(&site()).await;
        assert_eq!(result.status, CheckOutcome::Success);
        assert_eq!(result.severity, Severity::None);
        assert_eq!(result.status_code, Some(200));
        assert_eq!(result.content_size, 5);
        assert_eq!(result.response_time_ms, Some(40));
        assert_eq!(result.site_id, 7);
    }

    #[tokio::test]
    async fn test_redirect_status_counts_as_success() {
        let probe = HttpProbe::new(ScriptedTransport::ok(302, "", 10));
        assert_eq!(probe.check(&site()).await.status, CheckOutcome::Success);
    }

    #[tokio::test]
    async fn test_bad_status_severity() {
        let probe = HttpProbe::new(ScriptedTransport::ok(503, "", 10));
        let result = probe.check(&site()).await;
        assert_eq!(result.status, CheckOutcome::Failure);
        assert_eq!(result.severity, Severity::High);

        let probe = HttpProbe::new(ScriptedTransport::ok(404, "", 10));
        let result = probe.check(&site()).await;
        assert_eq!(result.status, CheckOutcome::Failure);
        assert_eq!(result.severity, Severity::Medium);
    }

    #[tokio::test]
    async fn test_transport_errors() {
        let probe = HttpProbe::new(ScriptedTransport::err(TransportError::Timeout(Duration::from_secs(30))));
        let result = probe.check(&site()).await;
        assert_eq!(result.status, CheckOutcome::Timeout);
        assert_eq!(result.severity, Severity::High);
        assert_eq!(result.status_code, None);
        assert!(result.error_message.is_some());

        let probe = HttpProbe::new(ScriptedTransport::err(TransportError::Network("refused".into())));
        let result = probe.check(&site()).await;
        assert_eq!(result.status, CheckOutcome::Error);
        assert_eq!(result.severity, Severity::High);
        assert_eq!(result.error_message.as_deref(), Some("network error: refused"));
    }

    #[tokio::test]
    async fn test_content_check_precedes_ssl_check() {
        let mut transport = ScriptedTransport::ok(200, "nothing here", 10);
        transport.certificate_valid = false;
        let probe = HttpProbe::new(transport);

        let site = MonitoredSite {
            check_content: true,
            content_check_string: Some("OK".to_string()),
            ssl_check: true,
            ..site()
        };
        let result = probe.check(&site).await;
        assert_eq!(result.status, CheckOutcome::Failure);
        assert_eq!(result.severity, Severity::Medium);
        assert!(!result.content_check_passed);
        assert!(!result.ssl_check_passed);
    }

    #[tokio::test]
    async fn test_slow_response_is_low_severity() {
        let probe = HttpProbe::new(ScriptedTransport::ok(200, "system OK", 900));
        let site = MonitoredSite {
            response_time_threshold_ms: Some(500),
            check_content: true,
            content_check_string: Some("OK".to_string()),
            ..site()
        };
        let result = probe.check(&site).await;
        assert_eq!(result.status, CheckOutcome::Failure);
        assert_eq!(result.severity, Severity::Low);
        assert!(result.content_check_passed);
    }

    #[tokio::test]
    async fn test_certificate_failure() {
        let mut transport = ScriptedTransport::ok(200, "", 10);
        transport.certificate_valid = false;
        let probe = HttpProbe::new(transport);

        let secure = MonitoredSite { ssl_check: true, ..site() };
        let result = probe.check(&secure).await;
        assert_eq!(result.status, CheckOutcome::Failure);
        assert_eq!(result.severity, Severity::High);
        assert!(!result.ssl_check_passed);

        // Plain http URLs never get a certificate check.
        let plain = MonitoredSite {
            ssl_check: true,
            url: "http://a.test".to_string(),
            ..site()
        };
        let result = probe.check(&plain).await;
        assert_eq!(result.status, CheckOutcome::Success);
        assert!(result.ssl_check_passed);
    }

    #[test]
    fn test_content_check_matches_substring() {
        let site = MonitoredSite {
            check_content: true,
            content_check_string: Some("OK".to_string()),
            ..site()
        };
        let response = HttpResponse {
            status: 200,
            body: b"system OK".to_vec(),
            elapsed: Duration::from_millis(5),
        };
        let result = classify(&site, &response, true);
        assert_eq!(result.status, CheckOutcome::Success);
        assert!(result.content_check_passed);
    }
}
