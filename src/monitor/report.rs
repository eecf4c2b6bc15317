//! Periodic availability reports.

use super::MonitorError;
use crate::db::{CheckOutcome, CheckResult, MonitoredSite, SiteRepository, SiteStatus};
use crate::notify::{Dispatcher, Notification};

use chrono::{DateTime, Datelike, Days, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportPeriod {
    Daily,
    Weekly,
    Monthly,
}

impl ReportPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportPeriod::Daily => "daily",
            ReportPeriod::Weekly => "weekly",
            ReportPeriod::Monthly => "monthly",
        }
    }

    /// Start of the period containing `now`, in UTC. Weeks start on Monday.
    pub fn start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();
        let first_day = match self {
            ReportPeriod::Daily => Some(today),
            ReportPeriod::Weekly => {
                Some(today - ChronoDuration::days(today.weekday().num_days_from_monday() as i64))
            }
            ReportPeriod::Monthly => today.with_day(1),
        };
        first_day.and_then(midnight).unwrap_or(now)
    }
}

fn midnight(day: NaiveDate) -> Option<DateTime<Utc>> {
    day.and_hms_opt(0, 0, 0).map(|dt| Utc.from_utc_datetime(&dt))
}

impl fmt::Display for ReportPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(ReportPeriod::Daily),
            "weekly" => Ok(ReportPeriod::Weekly),
            "monthly" => Ok(ReportPeriod::Monthly),
            other => Err(format!("unknown report period: {}", other)),
        }
    }
}

/// Look-back used by per-site reports when none is given.
pub const DEFAULT_PERFORMANCE_DAYS: u32 = 7;

fn is_incident(result: &CheckResult) -> bool {
    matches!(result.status, CheckOutcome::Failure | CheckOutcome::Error)
}

fn uptime_percent(history: &[CheckResult]) -> Option<f64> {
    let successes = history.iter().filter(|r| r.status == CheckOutcome::Success).count();
    (!history.is_empty()).then(|| successes as f64 * 100.0 / history.len() as f64)
}

fn avg_response_ms(history: &[CheckResult]) -> Option<f64> {
    let timings: Vec<u64> = history.iter().filter_map(|r| r.response_time_ms).collect();
    (!timings.is_empty()).then(|| timings.iter().sum::<u64>() as f64 / timings.len() as f64)
}

#[derive(Debug, Clone)]
pub struct SiteSummary {
    pub name: String,
    pub url: String,
    pub status: SiteStatus,
    pub total_checks: usize,
    /// None when there were no checks in the period.
    pub uptime_percent: Option<f64>,
    pub avg_response_ms: Option<f64>,
    /// Checks that ended in FAILURE or ERROR.
    pub incidents: usize,
}

#[derive(Debug, Clone)]
pub struct Report {
    /// `daily`, `weekly`, `monthly` or `custom`.
    pub label: &'static str,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub sites: Vec<SiteSummary>,
    pub up: usize,
    pub down: usize,
    pub degraded: usize,
}

impl Report {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "SiteWatch {} report ({} to {})",
            self.label,
            self.from.format("%Y-%m-%d %H:%M UTC"),
            self.to.format("%Y-%m-%d %H:%M UTC")
        );
        let _ = writeln!(
            out,
            "Sites: {} total, {} up, {} down, {} degraded",
            self.sites.len(),
            self.up,
            self.down,
            self.degraded
        );

        for site in &self.sites {
            let _ = writeln!(out);
            let _ = writeln!(out, "{} ({})", site.name, site.url);
            let _ = writeln!(out, "  Current status: {}", site.status);
            let Some(uptime) = site.uptime_percent else {
                let _ = writeln!(out, "  No data for this period");
                continue;
            };
            let _ = writeln!(out, "  Checks: {}", site.total_checks);
            let _ = writeln!(out, "  Uptime: {:.2}%", uptime);
            if let Some(avg) = site.avg_response_ms {
                let _ = writeln!(out, "  Average response time: {:.2} ms", avg);
            }
            let _ = writeln!(out, "  Incidents: {}", site.incidents);
        }

        out
    }
}

/// Builds reports from check history and sends them through the dispatcher.
pub struct ReportService {
    store: Arc<dyn SiteRepository>,
    dispatcher: Arc<Dispatcher>,
}

impl ReportService {
    pub fn new(store: Arc<dyn SiteRepository>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { store, dispatcher }
    }

    pub fn build(&self, period: ReportPeriod, now: DateTime<Utc>) -> Result<Report, MonitorError> {
        self.summarize(period.as_str(), period.start(now), now)
    }

    /// Report over whole UTC days, `from` through `to` inclusive.
    pub fn custom(&self, from: NaiveDate, to: NaiveDate) -> Result<Report, MonitorError> {
        if from > to {
            return Err(MonitorError::InvalidRange(format!("{} is after {}", from, to)));
        }
        let start = midnight(from).ok_or_else(|| MonitorError::InvalidRange(from.to_string()))?;
        let end = to
            .succ_opt()
            .and_then(midnight)
            .map(|next| next - ChronoDuration::nanoseconds(1))
            .ok_or_else(|| MonitorError::InvalidRange(to.to_string()))?;
        self.summarize("custom", start, end)
    }

    fn summarize(&self, label: &'static str, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Report, MonitorError> {
        let sites = self.store.find_all()?;

        let mut summaries = Vec::with_capacity(sites.len());
        for site in &sites {
            let history = self.store.get_check_history(site.id, from, to)?;
            summaries.push(SiteSummary {
                name: site.name.clone(),
                url: site.url.clone(),
                status: site.current_status,
                total_checks: history.len(),
                uptime_percent: uptime_percent(&history),
                avg_response_ms: avg_response_ms(&history),
                incidents: history.iter().filter(|r| is_incident(r)).count(),
            });
        }

        let count = |status: SiteStatus| sites.iter().filter(|s| s.current_status == status).count();

        Ok(Report {
            label,
            from,
            to,
            up: count(SiteStatus::Up),
            down: count(SiteStatus::Down),
            degraded: count(SiteStatus::Degraded),
            sites: summaries,
        })
    }

    /// Performance of one site over the last `days` days, starting at midnight UTC.
    /// Zero days means the default week.
    pub fn site_performance(&self, site_id: i64, days: u32, now: DateTime<Utc>) -> Result<SitePerformance, MonitorError> {
        let days = if days == 0 { DEFAULT_PERFORMANCE_DAYS } else { days };
        let site = self.store.find_by_id(site_id)?.ok_or(MonitorError::NotFound(site_id))?;

        let from = now
            .date_naive()
            .checked_sub_days(Days::new(days.into()))
            .and_then(midnight)
            .ok_or_else(|| MonitorError::InvalidRange(format!("{} days back", days)))?;
        let history = self.store.get_check_history(site_id, from, now)?;

        let mut incidents_by_day = BTreeMap::new();
        for result in history.iter().filter(|r| is_incident(r)) {
            *incidents_by_day.entry(result.timestamp.date_naive()).or_insert(0) += 1;
        }

        Ok(SitePerformance {
            days,
            from,
            to: now,
            total_checks: history.len(),
            uptime_percent: uptime_percent(&history),
            avg_response_ms: avg_response_ms(&history),
            incidents_by_day,
            site,
        })
    }

    /// Build the report for the current period and deliver it. Returns whether any channel accepted it.
    pub async fn send(&self, period: ReportPeriod) -> Result<bool, MonitorError> {
        let report = self.build(period, Utc::now())?;
        tracing::info!("Sending {} report covering {} sites", period, report.sites.len());
        Ok(self.deliver(report.render(), period.as_str()).await)
    }

    pub async fn send_custom(&self, from: NaiveDate, to: NaiveDate) -> Result<(Report, bool), MonitorError> {
        let report = self.custom(from, to)?;
        tracing::info!("Sending custom report from {} to {}", from, to);
        let delivered = self.deliver(report.render(), report.label).await;
        Ok((report, delivered))
    }

    pub async fn send_site_performance(&self, site_id: i64, days: u32) -> Result<(SitePerformance, bool), MonitorError> {
        let performance = self.site_performance(site_id, days, Utc::now())?;
        tracing::info!(
            "Sending {} day performance report for {}",
            performance.days,
            performance.site.url
        );
        let delivered = self.deliver(performance.render(), "site").await;
        Ok((performance, delivered))
    }

    async fn deliver(&self, content: String, report_type: &str) -> bool {
        self.dispatcher
            .deliver(Notification::Report {
                content,
                report_type: report_type.to_string(),
            })
            .await
    }
}

/// One site's availability over a recent window.
#[derive(Debug, Clone)]
pub struct SitePerformance {
    pub site: MonitoredSite,
    pub days: u32,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub total_checks: usize,
    pub uptime_percent: Option<f64>,
    pub avg_response_ms: Option<f64>,
    /// FAILURE and ERROR checks per UTC day. Days without incidents are absent.
    pub incidents_by_day: BTreeMap<NaiveDate, usize>,
}

impl SitePerformance {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Performance of {} over the last {} days", self.site.name, self.days);
        let _ = writeln!(out, "URL: {}", self.site.url);
        let _ = writeln!(out, "Check interval: {}s", self.site.check_interval_secs);
        let _ = writeln!(out, "Current status: {}", self.site.current_status);

        let Some(uptime) = self.uptime_percent else {
            let _ = writeln!(out, "No data for this period");
            return out;
        };
        let _ = writeln!(out, "Checks: {}", self.total_checks);
        let _ = writeln!(out, "Uptime: {:.2}%", uptime);
        let _ = writeln!(out, "Average response time: {:.2} ms", self.avg_response_ms.unwrap_or(0.0));

        let _ = writeln!(out);
        if self.incidents_by_day.is_empty() {
            let _ = writeln!(out, "No incidents");
        } else {
            let _ = writeln!(out, "Incidents by day:");
            for (day, count) in &self.incidents_by_day {
                let _ = writeln!(out, "  {}: {}", day, count);
            }
        }
        out
    }
}
