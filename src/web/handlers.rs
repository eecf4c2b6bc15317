//! HTTP request handlers.

use super::AppState;
use crate::monitor::{MonitorError, NewSite, ReportPeriod, SiteUpdate};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;

fn error_response(err: MonitorError) -> Response {
    let status = match &err {
        MonitorError::DuplicateUrl(_) => StatusCode::CONFLICT,
        MonitorError::InvalidSite(_) | MonitorError::InvalidRange(_) => StatusCode::BAD_REQUEST,
        MonitorError::NotFound(_) => StatusCode::NOT_FOUND,
        MonitorError::Store(e) => {
            tracing::error!("Store error while handling request: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string()).into_response()
}

pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "status": "ok", "scheduled_sites": state.service.scheduled_sites().await }))
}

// ============================================================================
// API: Sites
// ============================================================================

pub async fn handle_list_sites(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.list_sites() {
        Ok(sites) => Json(sites).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_create_site(
    State(state): State<AppState>,
    Json(req): Json<NewSite>,
) -> impl IntoResponse {
    match state.service.add_site(req).await {
        Ok(site) => (StatusCode::CREATED, Json(site)).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_get_site(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    match state.service.get_site(id) {
        Ok(Some(site)) => Json(site).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Site not found").into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_update_site(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<SiteUpdate>,
) -> impl IntoResponse {
    match state.service.update_site(id, req).await {
        Ok(site) => Json(site).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_delete_site(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    match state.service.remove_site(id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => (StatusCode::NOT_FOUND, "Site not found").into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_check_now(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    match state.service.check_now(id).await {
        Ok(Some(result)) => Json(result).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Site not found").into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct MaintenanceRequest {
    pub enabled: bool,
}

pub async fn handle_set_maintenance(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<MaintenanceRequest>,
) -> impl IntoResponse {
    match state.service.set_maintenance_mode(id, req.enabled).await {
        Ok(site) => Json(site).into_response(),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// API: History
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// RFC 3339; defaults to 24 hours before `to`.
    pub from: Option<String>,
    /// RFC 3339; defaults to now.
    pub to: Option<String>,
}

fn parse_time(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, String> {
    match raw.filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| format!("invalid timestamp {}: {}", s, e)),
    }
}

pub async fn handle_get_history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let (from, to) = match (parse_time(query.from.as_deref()), parse_time(query.to.as_deref())) {
        (Ok(from), Ok(to)) => (from, to),
        (Err(e), _) | (_, Err(e)) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };
    let to = to.unwrap_or_else(Utc::now);
    let from = from.unwrap_or(to - ChronoDuration::hours(24));
    if from > to {
        return (StatusCode::BAD_REQUEST, "from must not be after to").into_response();
    }

    match state.service.check_history(id, from, to) {
        Ok(results) => Json(results).into_response(),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// API: Reports
// ============================================================================

pub async fn handle_send_report(
    State(state): State<AppState>,
    Path(period): Path<String>,
) -> impl IntoResponse {
    let period: ReportPeriod = match period.parse() {
        Ok(p) => p,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };

    match state.reports.send(period).await {
        Ok(delivered) => Json(json!({ "period": period.as_str(), "delivered": delivered })).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CustomReportQuery {
    /// First day, `YYYY-MM-DD`.
    pub from: NaiveDate,
    /// Last day, inclusive.
    pub to: NaiveDate,
}

pub async fn handle_send_custom_report(
    State(state): State<AppState>,
    Query(query): Query<CustomReportQuery>,
) -> impl IntoResponse {
    match state.reports.send_custom(query.from, query.to).await {
        Ok((report, delivered)) => Json(json!({
            "period": report.label,
            "from": report.from,
            "to": report.to,
            "delivered": delivered,
            "content": report.render(),
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SiteReportQuery {
    #[serde(default)]
    pub days: u32,
}

pub async fn handle_send_site_report(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<SiteReportQuery>,
) -> impl IntoResponse {
    match state.reports.send_site_performance(id, query.days).await {
        Ok((performance, delivered)) => Json(json!({
            "site_id": id,
            "days": performance.days,
            "delivered": delivered,
            "content": performance.render(),
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}
