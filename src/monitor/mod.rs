//! Monitor module: runs checks end to end and exposes site management.

mod report;
mod service;
pub mod status;

pub use report::*;
pub use service::*;

use crate::db::{CheckOutcome, CheckResult, MonitoredSite, Severity, SiteRepository, StoreError};
use crate::notify::{Dispatcher, Notification, NotificationKind};
use crate::probe::SiteChecker;
use crate::scheduler::CheckRunner;

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;

/// Monitoring error types.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Store error: {0}")]
    Store(StoreError),
    #[error("A site with URL {0} is already monitored")]
    DuplicateUrl(String),
    #[error("Site {0} not found")]
    NotFound(i64),
    #[error("Invalid site: {0}")]
    InvalidSite(String),
    #[error("Invalid date range: {0}")]
    InvalidRange(String),
}

impl From<StoreError> for MonitorError {
    fn from(err: StoreError) -> Self {
        match err {
            // A concurrent add can pass the lookup and still lose on the UNIQUE index.
            StoreError::DuplicateUrl(url) => MonitorError::DuplicateUrl(url),
            err => MonitorError::Store(err),
        }
    }
}

/// Runs a single check: probe, persist, resolve status, notify.
///
/// Holds no per-site state. Callers must not run two checks for the same
/// site at once; the scheduler's per-site guard provides that.
pub struct CheckOrchestrator {
    checker: Arc<dyn SiteChecker>,
    store: Arc<dyn SiteRepository>,
    dispatcher: Arc<Dispatcher>,
}

impl CheckOrchestrator {
    pub fn new(
        checker: Arc<dyn SiteChecker>,
        store: Arc<dyn SiteRepository>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            checker,
            store,
            dispatcher,
        }
    }

    /// Check `site` as given. Only repository failures are returned as errors.
    pub async fn run_check(&self, site: &MonitoredSite) -> Result<CheckResult, MonitorError> {
        if site.maintenance_mode {
            tracing::debug!("Site {} is in maintenance, skipping check", site.name);
            return Ok(CheckResult::new(site.id, CheckOutcome::Success, Severity::None));
        }

        let mut result = self.checker.check(site).await;
        result.site_id = site.id;
        result.timestamp = Utc::now();
        let result = self.store.save_check_result(&result)?;

        let previous = site.current_status;
        let current = status::resolve(result.status);
        if previous == current {
            return Ok(result);
        }

        let mut updated = site.clone();
        updated.current_status = current;
        let updated = self.store.save(&updated)?;
        tracing::info!(
            "Site {} ({}) status changed: {} -> {}",
            updated.name,
            updated.url,
            previous,
            current
        );

        if !updated.notify_on_issue {
            return Ok(result);
        }

        let notification = match status::notification_for(previous, current) {
            Some(NotificationKind::Alert) => Notification::Alert {
                site: updated,
                result: result.clone(),
            },
            Some(NotificationKind::Recovery) => Notification::Recovery {
                site: updated,
                result: result.clone(),
            },
            Some(NotificationKind::Report) | None => return Ok(result),
        };

        let kind = notification.kind();
        if !self.dispatcher.deliver(notification).await {
            tracing::warn!("No channel delivered the {} for site {}", kind, site.url);
        }

        Ok(result)
    }
}

#[async_trait]
impl CheckRunner for CheckOrchestrator {
    async fn run_scheduled(&self, site_id: i64) -> Result<Option<CheckResult>, MonitorError> {
        // Always work from the persisted copy so status comparisons see the latest write.
        let Some(site) = self.store.find_by_id(site_id)? else {
            return Ok(None);
        };
        self.run_check(&site).await.map(Some)
    }
}
