//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;

mod embedded {
    refinery::embed_migrations!("migrations");
}

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

const SITE_COLUMNS: &str = "id, name, url, check_interval_secs, response_time_threshold_ms, max_retries, \
     content_check_string, check_content, ssl_check, notify_on_issue, maintenance_mode, current_status";

const RESULT_COLUMNS: &str = "id, site_id, time, status_code, response_time_ms, content_size, status, \
     content_check_passed, ssl_check_passed, error_message, severity";

/// Database error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("URL already stored: {0}")]
    DuplicateUrl(String),
    #[error("database lock poisoned")]
    Poisoned,
}

/// Persistence boundary for sites and their check history.
///
/// Implementations must be safe to call concurrently for different sites.
pub trait SiteRepository: Send + Sync {
    fn find_by_url(&self, url: &str) -> Result<Option<MonitoredSite>, StoreError>;
    fn find_by_id(&self, id: i64) -> Result<Option<MonitoredSite>, StoreError>;
    fn find_all(&self) -> Result<Vec<MonitoredSite>, StoreError>;
    /// Upsert keyed by id. A site with id 0 is inserted and gets a fresh id.
    fn save(&self, site: &MonitoredSite) -> Result<MonitoredSite, StoreError>;
    /// Delete a site and its check history. Returns false if nothing was deleted.
    fn delete(&self, id: i64) -> Result<bool, StoreError>;
    /// Append a check result. Returns the stored copy with its id.
    fn save_check_result(&self, result: &CheckResult) -> Result<CheckResult, StoreError>;
    /// Results with `from <= timestamp <= to`, newest first.
    fn get_check_history(
        &self,
        site_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, StoreError>;
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Create a store backed by a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        embedded::migrations::runner()
            .run(&mut *conn)
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl SiteRepository for Store {
    fn find_by_url(&self, url: &str) -> Result<Option<MonitoredSite>, StoreError> {
        let conn = self.conn()?;
        let site = conn
            .query_row(
                &format!("SELECT {} FROM monitored_sites WHERE url = ?1", SITE_COLUMNS),
                params![url],
                site_from_row,
            )
            .optional()?;
        Ok(site)
    }

    fn find_by_id(&self, id: i64) -> Result<Option<MonitoredSite>, StoreError> {
        let conn = self.conn()?;
        let site = conn
            .query_row(
                &format!("SELECT {} FROM monitored_sites WHERE id = ?1", SITE_COLUMNS),
                params![id],
                site_from_row,
            )
            .optional()?;
        Ok(site)
    }

    fn find_all(&self) -> Result<Vec<MonitoredSite>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM monitored_sites ORDER BY id", SITE_COLUMNS))?;
        let sites = stmt
            .query_map([], site_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(sites)
    }

    fn save(&self, site: &MonitoredSite) -> Result<MonitoredSite, StoreError> {
        let conn = self.conn()?;
        let id = if site.id == 0 { None } else { Some(site.id) };

        conn.execute(
            "INSERT INTO monitored_sites (id, name, url, check_interval_secs, response_time_threshold_ms, max_retries,
                content_check_string, check_content, ssl_check, notify_on_issue, maintenance_mode, current_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(id) DO UPDATE SET
                name=excluded.name, url=excluded.url, check_interval_secs=excluded.check_interval_secs,
                response_time_threshold_ms=excluded.response_time_threshold_ms, max_retries=excluded.max_retries,
                content_check_string=excluded.content_check_string, check_content=excluded.check_content,
                ssl_check=excluded.ssl_check, notify_on_issue=excluded.notify_on_issue,
                maintenance_mode=excluded.maintenance_mode, current_status=excluded.current_status",
            params![
                id,
                site.name,
                site.url,
                site.check_interval_secs as i64,
                site.response_time_threshold_ms.map(|ms| ms as i64),
                site.max_retries as i64,
                site.content_check_string,
                site.check_content,
                site.ssl_check,
                site.notify_on_issue,
                site.maintenance_mode,
                site.current_status.as_str(),
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref err, _) if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE => {
                StoreError::DuplicateUrl(site.url.clone())
            }
            e => StoreError::Sqlite(e),
        })?;

        let mut saved = site.clone();
        if id.is_none() {
            saved.id = conn.last_insert_rowid();
        }
        Ok(saved)
    }

    fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM check_results WHERE site_id = ?1", params![id])?;
        let deleted = conn.execute("DELETE FROM monitored_sites WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    fn save_check_result(&self, result: &CheckResult) -> Result<CheckResult, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO check_results (site_id, time, status_code, response_time_ms, content_size, status,
                content_check_passed, ssl_check_passed, error_message, severity)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                result.site_id,
                result.timestamp.format(TIME_FORMAT).to_string(),
                result.status_code.map(i64::from),
                result.response_time_ms.map(|ms| ms as i64),
                result.content_size as i64,
                result.status.as_str(),
                result.content_check_passed,
                result.ssl_check_passed,
                result.error_message,
                result.severity.as_str(),
            ],
        )?;

        let mut saved = result.clone();
        saved.id = conn.last_insert_rowid();
        Ok(saved)
    }

    fn get_check_history(
        &self,
        site_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM check_results
             WHERE site_id = ?1 AND time >= ?2 AND time <= ?3 ORDER BY time DESC, id DESC",
            RESULT_COLUMNS
        ))?;

        let results = stmt
            .query_map(
                params![
                    site_id,
                    from.format(TIME_FORMAT).to_string(),
                    to.format(TIME_FORMAT).to_string(),
                ],
                result_from_row,
            )?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(results)
    }
}

fn site_from_row(row: &Row<'_>) -> SqlResult<MonitoredSite> {
    let status: String = row.get(11)?;
    Ok(MonitoredSite {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        check_interval_secs: row.get::<_, i64>(3)?.max(0) as u64,
        response_time_threshold_ms: row.get::<_, Option<i64>>(4)?.map(|ms| ms.max(0) as u64),
        max_retries: row.get::<_, i64>(5)?.max(0) as u32,
        content_check_string: row.get(6)?,
        check_content: row.get(7)?,
        ssl_check: row.get(8)?,
        notify_on_issue: row.get(9)?,
        maintenance_mode: row.get(10)?,
        current_status: status.parse().unwrap_or_default(),
    })
}

fn result_from_row(row: &Row<'_>) -> SqlResult<CheckResult> {
    let time_str: String = row.get(2)?;
    let status: String = row.get(6)?;
    let severity: String = row.get(10)?;
    Ok(CheckResult {
        id: row.get(0)?,
        site_id: row.get(1)?,
        timestamp: parse_db_time(&time_str).unwrap_or_else(Utc::now),
        status_code: row.get::<_, Option<i64>>(3)?.and_then(|c| u16::try_from(c).ok()),
        response_time_ms: row.get::<_, Option<i64>>(4)?.map(|ms| ms.max(0) as u64),
        content_size: row.get::<_, i64>(5)?.max(0) as u64,
        status: status.parse().unwrap_or(CheckOutcome::Error),
        content_check_passed: row.get(7)?,
        ssl_check_passed: row.get(8)?,
        error_message: row.get(9)?,
        severity: severity.parse().unwrap_or(Severity::None),
    })
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}
