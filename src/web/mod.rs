//! Management API server.

mod handlers;

use crate::config::ServerConfig;
use crate::monitor::{MonitoringService, ReportService};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub service: Arc<MonitoringService>,
    pub reports: Arc<ReportService>,
}

/// Web server for SiteWatch.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(config: ServerConfig, service: Arc<MonitoringService>, reports: Arc<ReportService>) -> Self {
        Self {
            state: AppState {
                config,
                service,
                reports,
            },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

        Router::new()
            .route("/health", get(handlers::handle_health))
            // Sites
            .route(
                "/api/sites",
                get(handlers::handle_list_sites).post(handlers::handle_create_site),
            )
            .route(
                "/api/sites/{id}",
                get(handlers::handle_get_site)
                    .put(handlers::handle_update_site)
                    .delete(handlers::handle_delete_site),
            )
            .route("/api/sites/{id}/check", post(handlers::handle_check_now))
            .route("/api/sites/{id}/maintenance", put(handlers::handle_set_maintenance))
            .route("/api/sites/{id}/history", get(handlers::handle_get_history))
            .route("/api/sites/{id}/report", post(handlers::handle_send_site_report))
            // Reports
            .route("/api/reports/custom", post(handlers::handle_send_custom_report))
            .route("/api/reports/{period}", post(handlers::handle_send_report))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .layer(DefaultBodyLimit::max(64 * 1024))
            .with_state(self.state.clone())
    }

    /// Serve on the configured port until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Web server listening on {}", addr);

        self.serve(listener, shutdown).await
    }

    async fn serve<F>(
        &self,
        listener: tokio::net::TcpListener,
        shutdown: F,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(listener, self.routes())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::monitor::tests::Harness;
    use crate::monitor::SiteDefaults;
    use crate::notify::Dispatcher;
    use crate::scheduler::{Scheduler, SchedulerConfig};
    use serde_json::{json, Value};
    use std::time::Duration;

    struct TestServer {
        base: String,
        client: reqwest::Client,
        scheduler: Arc<Scheduler>,
        _harness: Harness,
    }

    async fn spawn() -> TestServer {
        let harness = Harness::new();
        let scheduler = Arc::new(Scheduler::new(
            harness.orchestrator.clone(),
            SchedulerConfig {
                initial_delay: Duration::from_secs(3600),
                ..Default::default()
            },
        ));
        let service = Arc::new(MonitoringService::new(
            harness.store.clone(),
            scheduler.clone(),
            SiteDefaults {
                check_interval_secs: 300,
                max_retries: 3,
            },
        ));
        let store: Arc<Store> = harness.store.clone();
        let reports = Arc::new(ReportService::new(store, Arc::new(Dispatcher::default())));
        let server = Server::new(ServerConfig::default(), service, reports);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            server.serve(listener, std::future::pending()).await.unwrap();
        });

        TestServer {
            base: format!("http://{}", addr),
            client: reqwest::Client::new(),
            scheduler,
            _harness: harness,
        }
    }

    #[tokio::test]
    async fn test_site_lifecycle() {
        let srv = spawn().await;

        let health = srv.client.get(format!("{}/health", srv.base)).send().await.unwrap();
        assert_eq!(health.status(), 200);

        let created = srv
            .client
            .post(format!("{}/api/sites", srv.base))
            .json(&json!({ "name": "A", "url": "https://a.test", "check_content": true, "content_check_string": "OK" }))
            .send()
            .await
            .unwrap();
        assert_eq!(created.status(), 201);
        let site: Value = created.json().await.unwrap();
        let id = site["id"].as_i64().unwrap();
        assert_eq!(site["current_status"], "UNKNOWN");

        let duplicate = srv
            .client
            .post(format!("{}/api/sites", srv.base))
            .json(&json!({ "url": "https://a.test" }))
            .send()
            .await
            .unwrap();
        assert_eq!(duplicate.status(), 409);

        let invalid = srv
            .client
            .post(format!("{}/api/sites", srv.base))
            .json(&json!({ "url": "gopher://a.test" }))
            .send()
            .await
            .unwrap();
        assert_eq!(invalid.status(), 400);

        let checked: Value = srv
            .client
            .post(format!("{}/api/sites/{}/check", srv.base, id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(checked["status"], "SUCCESS");

        let history: Vec<Value> = srv
            .client
            .get(format!("{}/api/sites/{}/history", srv.base, id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(!history.is_empty());

        let maintenance: Value = srv
            .client
            .put(format!("{}/api/sites/{}/maintenance", srv.base, id))
            .json(&json!({ "enabled": true }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(maintenance["current_status"], "MAINTENANCE");

        let updated: Value = srv
            .client
            .put(format!("{}/api/sites/{}", srv.base, id))
            .json(&json!({ "check_interval_secs": 60 }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(updated["check_interval_secs"], 60);

        let deleted = srv
            .client
            .delete(format!("{}/api/sites/{}", srv.base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(deleted.status(), 204);

        let missing = srv
            .client
            .get(format!("{}/api/sites/{}", srv.base, id))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), 404);

        srv.scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_reports_and_bad_queries() {
        let srv = spawn().await;

        let report: Value = srv
            .client
            .post(format!("{}/api/reports/daily", srv.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        // No channels configured in this server.
        assert_eq!(report["delivered"], false);

        let unknown = srv
            .client
            .post(format!("{}/api/reports/yearly", srv.base))
            .send()
            .await
            .unwrap();
        assert_eq!(unknown.status(), 400);

        let custom: Value = srv
            .client
            .post(format!("{}/api/reports/custom?from=2024-05-01&to=2024-05-07", srv.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(custom["period"], "custom");
        assert_eq!(custom["delivered"], false);

        let reversed = srv
            .client
            .post(format!("{}/api/reports/custom?from=2024-05-07&to=2024-05-01", srv.base))
            .send()
            .await
            .unwrap();
        assert_eq!(reversed.status(), 400);

        let site: Value = srv
            .client
            .post(format!("{}/api/sites", srv.base))
            .json(&json!({ "name": "Shop", "url": "https://shop.test" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let site_report: Value = srv
            .client
            .post(format!("{}/api/sites/{}/report?days=3", srv.base, site["id"]))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(site_report["days"], 3);
        assert!(site_report["content"].as_str().unwrap().contains("Shop"));

        let missing_site = srv
            .client
            .post(format!("{}/api/sites/999/report", srv.base))
            .send()
            .await
            .unwrap();
        assert_eq!(missing_site.status(), 404);

        let bad_range = srv
            .client
            .get(format!("{}/api/sites/1/history?from=yesterday", srv.base))
            .send()
            .await
            .unwrap();
        assert_eq!(bad_range.status(), 400);

        let no_site = srv
            .client
            .post(format!("{}/api/sites/77/check", srv.base))
            .send()
            .await
            .unwrap();
        assert_eq!(no_site.status(), 404);

        srv.scheduler.shutdown().await;
    }
}
