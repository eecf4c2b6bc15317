//! Scheduler module: one recurring check loop per monitored site.

use crate::config::ServerConfig;
use crate::db::{CheckResult, MonitoredSite};
use crate::monitor::MonitorError;

use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Runs the check for one site id. Implemented by the check orchestrator.
#[async_trait]
pub trait CheckRunner: Send + Sync {
    /// Returns `Ok(None)` when the site no longer exists.
    async fn run_scheduled(&self, site_id: i64) -> Result<Option<CheckResult>, MonitorError>;
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Floor applied to every site's interval.
    pub min_interval: Duration,
    /// Base delay before a newly scheduled site fires; up to the same again is added as jitter.
    pub initial_delay: Duration,
    /// Checks allowed in flight at once across all sites.
    pub max_concurrent_checks: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(10),
            initial_delay: Duration::from_secs(5),
            max_concurrent_checks: 10,
        }
    }
}

impl From<&ServerConfig> for SchedulerConfig {
    fn from(cfg: &ServerConfig) -> Self {
        Self {
            min_interval: cfg.min_check_interval(),
            initial_delay: cfg.startup_delay(),
            max_concurrent_checks: cfg.max_concurrent_checks.max(1),
        }
    }
}

struct SiteJob {
    stop: broadcast::Sender<()>,
    suspended: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

type GuardMap = Arc<std::sync::Mutex<HashMap<i64, Arc<Mutex<()>>>>>;

/// Exclusive hold on one site with respect to its checks.
///
/// A site has an entry in the guard map only while someone holds or waits
/// for its lock. Dropping the last holder removes the entry.
pub struct SiteLock {
    site_id: i64,
    guard: Option<OwnedMutexGuard<()>>,
    guards: GuardMap,
}

impl Drop for SiteLock {
    fn drop(&mut self) {
        // Release the mutex first so its count reflects only other holders.
        self.guard.take();
        let mut guards = self.guards.lock().unwrap_or_else(PoisonError::into_inner);
        if guards.get(&self.site_id).is_some_and(|g| Arc::strong_count(g) == 1) {
            guards.remove(&self.site_id);
        }
    }
}

/// Shared pieces every check execution needs, cheap to clone into tasks.
#[derive(Clone)]
struct Executor {
    runner: Arc<dyn CheckRunner>,
    workers: Arc<Semaphore>,
    guards: GuardMap,
}

impl Executor {
    async fn lock(&self, site_id: i64) -> SiteLock {
        let mutex = self
            .guards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(site_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        SiteLock {
            site_id,
            guard: Some(mutex.lock_owned().await),
            guards: self.guards.clone(),
        }
    }

    /// Run one check for `site_id`, never concurrently with another check of the same site.
    async fn execute(&self, site_id: i64) -> Result<Option<CheckResult>, MonitorError> {
        let _site_lock = self.lock(site_id).await;
        let _permit = match self.workers.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => {
                tracing::debug!("Scheduler stopped, dropping check for site {}", site_id);
                return Ok(None);
            }
        };
        self.runner.run_scheduled(site_id).await
    }
}

/// Owns one timer loop per site and a bounded pool of check workers.
///
/// Different sites are checked in parallel. Checks of the same site are
/// serialized, whether they come from the timer or from `trigger_now`.
pub struct Scheduler {
    config: SchedulerConfig,
    executor: Executor,
    jobs: Arc<RwLock<HashMap<i64, SiteJob>>>,
    shutting_down: AtomicBool,
}

impl Scheduler {
    pub fn new(runner: Arc<dyn CheckRunner>, config: SchedulerConfig) -> Self {
        let workers = Arc::new(Semaphore::new(config.max_concurrent_checks.max(1)));
        Self {
            config,
            executor: Executor {
                runner,
                workers,
                guards: Arc::new(std::sync::Mutex::new(HashMap::new())),
            },
            jobs: Arc::new(RwLock::new(HashMap::new())),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Schedule every site in `sites`.
    pub async fn start(&self, sites: Vec<MonitoredSite>) {
        tracing::info!("Starting scheduler with {} sites", sites.len());
        for site in &sites {
            self.schedule(site).await;
        }
    }

    /// Create or replace the recurring check for `site`.
    ///
    /// A site in maintenance mode is scheduled suspended.
    pub async fn schedule(&self, site: &MonitoredSite) {
        if self.shutting_down.load(Ordering::SeqCst) {
            tracing::warn!("Scheduler is shutting down, not scheduling {}", site.url);
            return;
        }

        // tokio intervals reject a zero period
        let period = site
            .check_interval()
            .max(self.config.min_interval)
            .max(Duration::from_millis(1));
        let start = Instant::now() + self.first_fire_delay();

        let (stop_tx, stop_rx) = broadcast::channel(1);
        let suspended = Arc::new(AtomicBool::new(site.maintenance_mode));

        let handle = tokio::spawn(run_site_loop(
            site.id,
            start,
            period,
            self.executor.clone(),
            suspended.clone(),
            stop_rx,
        ));

        let replaced = self.jobs.write().await.insert(
            site.id,
            SiteJob {
                stop: stop_tx,
                suspended,
                handle,
            },
        );
        if let Some(old) = replaced {
            let _ = old.stop.send(());
            tracing::debug!("Scheduler: Replaced timer for site {}", site.id);
        }

        tracing::info!(
            "Scheduler: Scheduled {} every {:?}{}",
            site.url,
            period,
            if site.maintenance_mode { " (suspended)" } else { "" }
        );
    }

    /// Cancel the recurring check for `site_id`. A check already running completes.
    pub async fn unschedule(&self, site_id: i64) {
        let removed = self.jobs.write().await.remove(&site_id);
        if let Some(job) = removed {
            let _ = job.stop.send(());
            tracing::info!("Scheduler: Removed site {}", site_id);
        }
    }

    /// Replace the timer so it picks up a changed interval.
    pub async fn reschedule(&self, site: &MonitoredSite) {
        self.unschedule(site.id).await;
        self.schedule(site).await;
    }

    /// Fire an out-of-band check without waiting for it or touching the cadence.
    pub async fn trigger_now(&self, site_id: i64) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }

        let executor = self.executor.clone();
        tokio::spawn(async move {
            match executor.execute(site_id).await {
                Ok(Some(result)) => {
                    tracing::debug!("Triggered check for site {} finished: {}", site_id, result.status)
                }
                Ok(None) => tracing::debug!("Triggered check for site {} produced no result", site_id),
                Err(e) => tracing::error!("Triggered check for site {} failed: {}", site_id, e),
            }
        });
    }

    /// Run a check now and wait for its result, honouring the per-site guard.
    pub async fn run_now(&self, site_id: i64) -> Result<Option<CheckResult>, MonitorError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.executor.execute(site_id).await
    }

    /// Exclusive access to `site_id` with respect to its checks.
    ///
    /// Writers of site configuration hold this so a running check cannot
    /// save a stale copy over their change.
    pub async fn lock_site(&self, site_id: i64) -> SiteLock {
        self.executor.lock(site_id).await
    }

    /// Keep the timer but skip its ticks until resumed.
    pub async fn suspend(&self, site_id: i64) -> bool {
        self.set_suspended(site_id, true).await
    }

    pub async fn resume(&self, site_id: i64) -> bool {
        self.set_suspended(site_id, false).await
    }

    async fn set_suspended(&self, site_id: i64, value: bool) -> bool {
        match self.jobs.read().await.get(&site_id) {
            Some(job) => {
                job.suspended.store(value, Ordering::SeqCst);
                tracing::info!(
                    "Scheduler: {} site {}",
                    if value { "Suspended" } else { "Resumed" },
                    site_id
                );
                true
            }
            None => false,
        }
    }

    pub async fn is_scheduled(&self, site_id: i64) -> bool {
        self.jobs.read().await.contains_key(&site_id)
    }

    pub async fn is_suspended(&self, site_id: i64) -> bool {
        self.jobs
            .read()
            .await
            .get(&site_id)
            .is_some_and(|job| job.suspended.load(Ordering::SeqCst))
    }

    pub async fn scheduled_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Stop every timer and wait for checks in flight to finish.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let jobs: Vec<(i64, SiteJob)> = self.jobs.write().await.drain().collect();
        tracing::info!("Scheduler: Shutting down {} timers", jobs.len());

        for (_, job) in &jobs {
            let _ = job.stop.send(());
        }
        for (site_id, job) in jobs {
            if let Err(e) = job.handle.await {
                tracing::error!("Timer task for site {} ended abnormally: {}", site_id, e);
            }
        }

        // Triggered one-shot checks hold worker permits; taking all of them waits those out.
        let workers = &self.executor.workers;
        let total = self.config.max_concurrent_checks.max(1) as u32;
        if let Ok(permits) = workers.acquire_many(total).await {
            permits.forget();
        }
        workers.close();

        tracing::info!("Scheduler: Shutdown complete");
    }

    #[cfg(test)]
    fn locked_sites(&self) -> usize {
        self.executor.guards.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn first_fire_delay(&self) -> Duration {
        let base = self.config.initial_delay;
        let jitter_ms = base.as_millis() as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Run the timer loop for a single site.
async fn run_site_loop(
    site_id: i64,
    start: Instant,
    period: Duration,
    executor: Executor,
    suspended: Arc<AtomicBool>,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let mut interval = interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = stop_rx.recv() => {
                break;
            }
            _ = interval.tick() => {
                if suspended.load(Ordering::SeqCst) {
                    tracing::debug!("Site {} is suspended, skipping tick", site_id);
                    continue;
                }

                // Awaited inline: the next tick cannot start before this one is done.
                match executor.execute(site_id).await {
                    Ok(Some(result)) => {
                        tracing::debug!("Scheduled check for site {} finished: {}", site_id, result.status);
                    }
                    Ok(None) => {
                        tracing::warn!("Scheduled check for site {} produced no result", site_id);
                    }
                    Err(e) => {
                        tracing::error!("Scheduled check for site {} failed: {}", site_id, e);
                    }
                }
            }
        }
    }

    tracing::debug!("Timer loop for site {} stopped", site_id);
}
