//! SiteWatch - Web Monitoring and Alerting
//!
//! Probes registered sites on a schedule, tracks their availability and
//! notifies operators when a site goes down or comes back.

mod config;
mod db;
mod monitor;
mod notify;
mod probe;
mod scheduler;
mod web;

use config::ServerConfig;
use db::{SiteRepository, Store};
use monitor::{CheckOrchestrator, MonitoringService, ReportService, SiteDefaults};
use notify::{DiscordChannel, Dispatcher, EmailChannel, NotificationChannel, WebhookChannel};
use probe::{HttpProbe, ReqwestTransport};
use scheduler::{Scheduler, SchedulerConfig};
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("sitewatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting SiteWatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store: Arc<dyn SiteRepository> = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let dispatcher = Arc::new(build_dispatcher(&cfg));
    if dispatcher.channel_count() == 0 {
        tracing::warn!("No notification channels configured; alerts will only be logged");
    }

    let transport = ReqwestTransport::new(cfg.probe_timeout())?;
    let orchestrator = Arc::new(CheckOrchestrator::new(
        Arc::new(HttpProbe::new(transport)),
        store.clone(),
        dispatcher.clone(),
    ));

    let scheduler = Arc::new(Scheduler::new(orchestrator, SchedulerConfig::from(&cfg)));
    let service = Arc::new(MonitoringService::new(
        store.clone(),
        scheduler.clone(),
        SiteDefaults::from(&cfg),
    ));
    let reports = Arc::new(ReportService::new(store, dispatcher));

    // Start scheduler
    let scheduled = service.start().await?;
    tracing::info!("Monitoring {} sites", scheduled);

    // Start web server
    let server = Server::new(cfg, service, reports);
    let served = server.start(shutdown_signal()).await;

    scheduler.shutdown().await;
    served
}

fn build_dispatcher(cfg: &ServerConfig) -> Dispatcher {
    let mut dispatcher = Dispatcher::default();

    let channels: [(&str, Option<Result<Arc<dyn NotificationChannel>, notify::ChannelError>>); 3] = [
        (
            "discord",
            cfg.discord_webhook_url
                .as_deref()
                .map(|url| DiscordChannel::new(url).map(|c| Arc::new(c) as Arc<dyn NotificationChannel>)),
        ),
        (
            "email",
            cfg.smtp
                .as_ref()
                .map(|smtp| EmailChannel::new(smtp).map(|c| Arc::new(c) as Arc<dyn NotificationChannel>)),
        ),
        (
            "webhook",
            cfg.webhook_url
                .as_deref()
                .map(|url| WebhookChannel::new(url).map(|c| Arc::new(c) as Arc<dyn NotificationChannel>)),
        ),
    ];

    for (name, channel) in channels {
        match channel {
            Some(Ok(channel)) => dispatcher.add_channel(channel),
            Some(Err(e)) => tracing::error!("Not enabling {} channel: {}", name, e),
            None => {}
        }
    }

    dispatcher
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, stopping");
}
