//! Site management on top of the store and the scheduler.

use super::MonitorError;
use crate::config::ServerConfig;
use crate::db::{CheckResult, MonitoredSite, SiteRepository, SiteStatus};
use crate::scheduler::Scheduler;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

/// A site to start monitoring.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewSite {
    #[serde(default)]
    pub name: String,
    pub url: String,
    pub check_interval_secs: Option<u64>,
    pub response_time_threshold_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub content_check_string: Option<String>,
    #[serde(default)]
    pub check_content: bool,
    #[serde(default)]
    pub ssl_check: bool,
    pub notify_on_issue: Option<bool>,
}

/// Configuration changes for an existing site. Absent fields are left alone.
///
/// A response time threshold of 0 clears the threshold.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SiteUpdate {
    pub name: Option<String>,
    pub url: Option<String>,
    pub check_interval_secs: Option<u64>,
    pub response_time_threshold_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub content_check_string: Option<String>,
    pub check_content: Option<bool>,
    pub ssl_check: Option<bool>,
    pub notify_on_issue: Option<bool>,
}

#[derive(Debug, Clone, Copy)]
pub struct SiteDefaults {
    pub check_interval_secs: u64,
    pub max_retries: u32,
}

impl From<&ServerConfig> for SiteDefaults {
    fn from(cfg: &ServerConfig) -> Self {
        Self {
            check_interval_secs: cfg.default_check_interval_secs,
            max_retries: cfg.default_max_retries,
        }
    }
}

/// Adds, edits and removes sites while keeping the scheduler in step.
pub struct MonitoringService {
    store: Arc<dyn SiteRepository>,
    scheduler: Arc<Scheduler>,
    defaults: SiteDefaults,
}

impl MonitoringService {
    pub fn new(store: Arc<dyn SiteRepository>, scheduler: Arc<Scheduler>, defaults: SiteDefaults) -> Self {
        Self {
            store,
            scheduler,
            defaults,
        }
    }

    /// Schedule every stored site. Returns how many were scheduled.
    pub async fn start(&self) -> Result<usize, MonitorError> {
        let sites = self.store.find_all()?;
        let count = sites.len();
        self.scheduler.start(sites).await;
        Ok(count)
    }

    pub async fn add_site(&self, new: NewSite) -> Result<MonitoredSite, MonitorError> {
        let url = new.url.trim().to_string();
        validate_url(&url)?;
        validate_interval(new.check_interval_secs)?;

        if self.store.find_by_url(&url)?.is_some() {
            return Err(MonitorError::DuplicateUrl(url));
        }

        let name = match new.name.trim() {
            "" => url.clone(),
            name => name.to_string(),
        };

        let site = MonitoredSite {
            id: 0,
            name,
            url,
            check_interval_secs: new.check_interval_secs.unwrap_or(self.defaults.check_interval_secs),
            response_time_threshold_ms: new.response_time_threshold_ms.filter(|ms| *ms > 0),
            max_retries: new.max_retries.unwrap_or(self.defaults.max_retries),
            content_check_string: new.content_check_string,
            check_content: new.check_content,
            ssl_check: new.ssl_check,
            notify_on_issue: new.notify_on_issue.unwrap_or(true),
            maintenance_mode: false,
            current_status: SiteStatus::Unknown,
        };
        let site = self.store.save(&site)?;
        tracing::info!("Added site {} ({}) with id {}", site.name, site.url, site.id);

        self.scheduler.schedule(&site).await;
        self.scheduler.trigger_now(site.id).await;

        Ok(site)
    }

    pub async fn update_site(&self, id: i64, update: SiteUpdate) -> Result<MonitoredSite, MonitorError> {
        let guard = self.scheduler.lock_site(id).await;

        let mut site = self.store.find_by_id(id)?.ok_or(MonitorError::NotFound(id))?;
        let previous_interval = site.check_interval_secs;

        if let Some(url) = update.url.map(|u| u.trim().to_string()) {
            if url != site.url {
                validate_url(&url)?;
                if self.store.find_by_url(&url)?.is_some_and(|other| other.id != id) {
                    return Err(MonitorError::DuplicateUrl(url));
                }
                site.url = url;
            }
        }
        if let Some(name) = update.name.filter(|n| !n.trim().is_empty()) {
            site.name = name.trim().to_string();
        }
        if let Some(secs) = update.check_interval_secs {
            validate_interval(Some(secs))?;
            site.check_interval_secs = secs;
        }
        if let Some(ms) = update.response_time_threshold_ms {
            site.response_time_threshold_ms = (ms > 0).then_some(ms);
        }
        if let Some(retries) = update.max_retries {
            site.max_retries = retries;
        }
        if let Some(content) = update.content_check_string {
            site.content_check_string = Some(content).filter(|c| !c.is_empty());
        }
        if let Some(check_content) = update.check_content {
            site.check_content = check_content;
        }
        if let Some(ssl_check) = update.ssl_check {
            site.ssl_check = ssl_check;
        }
        if let Some(notify) = update.notify_on_issue {
            site.notify_on_issue = notify;
        }

        let site = self.store.save(&site)?;
        drop(guard);

        tracing::info!("Updated site {} ({})", site.name, site.url);
        // A reschedule restarts the first-fire delay.
        if site.check_interval_secs != previous_interval {
            self.scheduler.reschedule(&site).await;
        }

        Ok(site)
    }

    /// Stop monitoring `id` and delete it with its history.
    pub async fn remove_site(&self, id: i64) -> Result<bool, MonitorError> {
        self.scheduler.unschedule(id).await;

        // Waits out a check still running for this site so it cannot re-save it.
        let guard = self.scheduler.lock_site(id).await;
        let removed = self.store.delete(id);
        drop(guard);

        let removed = removed?;
        if removed {
            tracing::info!("Removed site {}", id);
        }
        Ok(removed)
    }

    pub async fn scheduled_sites(&self) -> usize {
        self.scheduler.scheduled_count().await
    }

    pub fn list_sites(&self) -> Result<Vec<MonitoredSite>, MonitorError> {
        Ok(self.store.find_all()?)
    }

    pub fn get_site(&self, id: i64) -> Result<Option<MonitoredSite>, MonitorError> {
        Ok(self.store.find_by_id(id)?)
    }

    pub fn check_history(
        &self,
        id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, MonitorError> {
        if self.store.find_by_id(id)?.is_none() {
            return Err(MonitorError::NotFound(id));
        }
        Ok(self.store.get_check_history(id, from, to)?)
    }

    /// Check a site right away and wait for the result.
    pub async fn check_now(&self, id: i64) -> Result<Option<CheckResult>, MonitorError> {
        self.scheduler.run_now(id).await
    }

    pub async fn set_maintenance_mode(&self, id: i64, enabled: bool) -> Result<MonitoredSite, MonitorError> {
        let guard = self.scheduler.lock_site(id).await;
        let mut site = self.store.find_by_id(id)?.ok_or(MonitorError::NotFound(id))?;
        site.maintenance_mode = enabled;
        site.current_status = if enabled {
            SiteStatus::Maintenance
        } else {
            SiteStatus::Unknown
        };
        let site = self.store.save(&site)?;
        drop(guard);

        if enabled {
            self.scheduler.suspend(id).await;
            tracing::info!("Site {} entered maintenance", site.url);
        } else {
            if !self.scheduler.resume(id).await {
                self.scheduler.schedule(&site).await;
            }
            self.scheduler.trigger_now(id).await;
            tracing::info!("Site {} left maintenance", site.url);
        }

        Ok(site)
    }
}

fn validate_url(url: &str) -> Result<(), MonitorError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| MonitorError::InvalidSite(format!("invalid URL {}: {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(()),
        _ => Err(MonitorError::InvalidSite(format!("URL must be http(s): {}", url))),
    }
}

fn validate_interval(secs: Option<u64>) -> Result<(), MonitorError> {
    match secs {
        Some(0) => Err(MonitorError::InvalidSite("check interval must be positive".to_string())),
        _ => Ok(()),
    }
}
