//! HTTP transport implementation.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{redirect, Client};

use super::{HttpResponse, Transport, TransportError};

/// User agent sent with every probe request.
pub const USER_AGENT: &str = "SiteWatch Monitoring Bot/1.0";

const MAX_REDIRECTS: usize = 10;

/// reqwest-backed transport.
///
/// Availability requests accept any certificate so status and content checks
/// still run against sites with broken TLS; `verify_certificate` uses a
/// second, strict client.
pub struct ReqwestTransport {
    client: Client,
    strict_client: Client,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = builder(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| TransportError::Config(e.to_string()))?;

        let strict_client = builder(timeout)
            .build()
            .map_err(|e| TransportError::Config(e.to_string()))?;

        Ok(Self {
            client,
            strict_client,
            timeout,
        })
    }

    fn map_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

fn builder(timeout: Duration) -> reqwest::ClientBuilder {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(timeout)
        .timeout(timeout)
        .redirect(redirect::Policy::limited(MAX_REDIRECTS))
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let start = Instant::now();

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status().as_u16();

        // Read the full body to measure complete transfer time
        let body = response.bytes().await.map_err(|e| self.map_error(e))?;

        Ok(HttpResponse {
            status,
            body: body.to_vec(),
            elapsed: start.elapsed(),
        })
    }

    async fn verify_certificate(&self, url: &str) -> bool {
        match self.strict_client.get(url).send().await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Certificate validation failed for {}: {}", url, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, response::Redirect, routing::get, Router};
    use std::net::SocketAddr;

    async fn spawn_server() -> SocketAddr {
        let app = Router::new()
            .route("/ok", get(|| async { "system OK" }))
            .route("/unavailable", get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }))
            .route("/moved", get(|| async { Redirect::temporary("/ok") }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    "late"
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_get_reads_status_and_body() {
        let addr = spawn_server().await;
        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();

        let response = transport.get(&format!("http://{}/ok", addr)).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"system OK");

        let response = transport.get(&format!("http://{}/unavailable", addr)).await.unwrap();
        assert_eq!(response.status, 503);
    }

    #[tokio::test]
    async fn test_follows_redirects() {
        let addr = spawn_server().await;
        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();

        let response = transport.get(&format!("http://{}/moved", addr)).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"system OK");
    }

    #[tokio::test]
    async fn test_timeout_is_reported_as_timeout() {
        let addr = spawn_server().await;
        let transport = ReqwestTransport::new(Duration::from_millis(200)).unwrap();

        let err = transport.get(&format!("http://{}/slow", addr)).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = ReqwestTransport::new(Duration::from_secs(2)).unwrap();
        let err = transport.get(&format!("http://{}/", addr)).await.unwrap_err();
        assert!(matches!(err, TransportError::Network(_)), "got {:?}", err);
    }
}
