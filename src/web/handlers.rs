//! HTTP request handlers.

use super::AppState;
use crate::db::{CheckRecord, DbError, HistoryPage, Target};
use crate::scheduler::{schedule_report, CheckReport, Recorded};
use crate::stats::{self, AggregateStats, HourlyPoint, StatsError, DEFAULT_WINDOW_DAYS};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{Duration as ChronoDuration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

const DEFAULT_HISTORY_DAYS: i64 = 7;
const DEFAULT_PER_PAGE: u32 = 20;
const MAX_PER_PAGE: u32 = 100;
const MAX_TIMEOUT_SECS: i64 = 120;
const MAX_CHECK_INTERVAL_SECS: i64 = 365 * 24 * 3600;

// ============================================================================
// Error mapping
// ============================================================================

fn db_error(e: DbError) -> Response {
    match e {
        DbError::NotFound => (StatusCode::NOT_FOUND, "Target not found").into_response(),
        e => {
            tracing::error!("API: store failure: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

fn stats_error(e: StatsError) -> Response {
    match e {
        StatsError::InvalidWindow(_) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        StatsError::UnknownTarget(_) => (StatusCode::NOT_FOUND, e.to_string()).into_response(),
        StatsError::Db(e) => db_error(e),
    }
}

// ============================================================================
// API: Targets
// ============================================================================

pub async fn handle_get_targets(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.get_targets() {
        Ok(targets) => Json(targets).into_response(),
        Err(e) => db_error(e),
    }
}

/// A target together with its most recent outcome.
#[derive(Debug, Serialize)]
pub struct TargetDetail {
    #[serde(flatten)]
    pub target: Target,
    pub latest_check: Option<CheckRecord>,
}

pub async fn handle_get_target(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    let target = match state.store.get_target(id) {
        Ok(t) => t,
        Err(e) => return db_error(e),
    };
    match state.store.latest_check(id) {
        Ok(latest_check) => Json(TargetDetail { target, latest_check }).into_response(),
        Err(e) => db_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct TargetRequest {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub check_interval: Option<i64>,
    #[serde(default)]
    pub timeout: Option<i64>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub owner_id: Option<i64>,
}

impl TargetRequest {
    /// Copy the request onto `target`, keeping its fields where the request is silent.
    fn apply(self, target: &mut Target) {
        target.name = self.name.trim().to_string();
        target.url = self.url.trim().to_string();
        if let Some(interval) = self.check_interval {
            target.check_interval = interval;
        }
        if let Some(timeout) = self.timeout {
            target.timeout = timeout;
        }
        if let Some(active) = self.is_active {
            target.is_active = active;
        }
        if self.owner_id.is_some() {
            target.owner_id = self.owner_id;
        }
    }
}

/// Reject targets the scheduler could not sensibly check.
pub fn validate_target(target: &Target) -> Result<(), String> {
    if target.name.is_empty() {
        return Err("name must not be empty".to_string());
    }
    let url = target.url.to_ascii_lowercase();
    if !(url.starts_with("http://") || url.starts_with("https://")) || url.len() <= "https://".len() {
        return Err("url must be an http:// or https:// address".to_string());
    }
    if !(1..=MAX_CHECK_INTERVAL_SECS).contains(&target.check_interval) {
        return Err(format!(
            "check_interval must be between 1 and {} seconds",
            MAX_CHECK_INTERVAL_SECS
        ));
    }
    if !(1..=MAX_TIMEOUT_SECS).contains(&target.timeout) {
        return Err(format!("timeout must be between 1 and {} seconds", MAX_TIMEOUT_SECS));
    }
    Ok(())
}

pub async fn handle_create_target(
    State(state): State<AppState>,
    Json(req): Json<TargetRequest>,
) -> impl IntoResponse {
    let mut target = Target::default();
    req.apply(&mut target);

    if let Err(e) = validate_target(&target) {
        return (StatusCode::BAD_REQUEST, e).into_response();
    }

    match state.store.add_target(&mut target) {
        Ok(_) => {
            tracing::info!(target_id = target.id, "API: added target {}", target.name);
            (StatusCode::CREATED, Json(target)).into_response()
        }
        Err(e) => db_error(e),
    }
}

pub async fn handle_update_target(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<TargetRequest>,
) -> impl IntoResponse {
    let mut target = match state.store.get_target(id) {
        Ok(t) => t,
        Err(e) => return db_error(e),
    };
    req.apply(&mut target);

    if let Err(e) = validate_target(&target) {
        return (StatusCode::BAD_REQUEST, e).into_response();
    }

    match state.store.update_target(&target) {
        Ok(_) => Json(target).into_response(),
        Err(e) => db_error(e),
    }
}

pub async fn handle_delete_target(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    match state.store.delete_target(id) {
        Ok(_) => {
            tracing::info!(target_id = id, "API: deleted target");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => db_error(e),
    }
}

// ============================================================================
// API: Checks and history
// ============================================================================

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub target_id: i64,
    pub attempts: u32,
    pub exhausted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub notified: bool,
}

impl CheckResponse {
    fn new(target_id: i64, attempts: u32, exhausted: bool, recorded: Option<Recorded>) -> Self {
        let mut resp = Self {
            target_id,
            attempts,
            exhausted,
            record_id: None,
            status: None,
            notified: false,
        };
        if let Some(Recorded::Applied { record_id, status, notified }) = recorded {
            resp.record_id = Some(record_id);
            resp.status = Some(status.as_str().to_string());
            resp.notified = notified;
        }
        resp
    }
}

pub async fn handle_check_now(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    match state.scheduler.check_now(id).await {
        Ok(CheckReport::Skipped) => (StatusCode::NOT_FOUND, "Target not found").into_response(),
        Ok(CheckReport::Completed { attempts, recorded }) => {
            Json(CheckResponse::new(id, attempts, false, Some(recorded))).into_response()
        }
        Ok(CheckReport::Exhausted { attempts, recorded }) => {
            Json(CheckResponse::new(id, attempts, true, recorded)).into_response()
        }
        Err(e) => db_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub days: Option<i64>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub per_page: Option<u32>,
}

pub async fn handle_get_history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let days = query.days.unwrap_or(DEFAULT_HISTORY_DAYS);
    if !(1..=3650).contains(&days) {
        return stats_error(StatsError::InvalidWindow(days));
    }
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);

    if let Err(e) = state.store.get_target(id) {
        return db_error(e);
    }

    let since = Utc::now() - ChronoDuration::days(days);
    match state.store.get_history(id, since, page, per_page) {
        Ok(history) => Json::<HistoryPage>(history).into_response(),
        Err(e) => db_error(e),
    }
}

// ============================================================================
// API: Stats
// ============================================================================

/// Stats plus hour labels in the report offset.
#[derive(Debug, Serialize)]
pub struct StatsResponse<T: Serialize> {
    #[serde(flatten)]
    pub stats: T,
    pub hour_labels: Vec<String>,
}

fn hour_labels(points: &[HourlyPoint], offset: &FixedOffset) -> Vec<String> {
    points
        .iter()
        .map(|p| p.hour.with_timezone(offset).format("%Y-%m-%d %H:%M").to_string())
        .collect()
}

fn labelled<T: Serialize>(stats: T, hourly: &[HourlyPoint], offset: &FixedOffset) -> StatsResponse<T> {
    let hour_labels = hour_labels(hourly, offset);
    StatsResponse { stats, hour_labels }
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    #[serde(default)]
    pub days: Option<i64>,
}

pub async fn handle_target_stats(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<StatsQuery>,
) -> impl IntoResponse {
    let days = query.days.unwrap_or(DEFAULT_WINDOW_DAYS);
    match stats::get_stats(&state.store, id, days, Utc::now(), &state.stats) {
        Ok(result) => {
            let hourly = result.hourly.clone();
            Json(labelled::<AggregateStats>(result, &hourly, &state.stats.offset)).into_response()
        }
        Err(e) => stats_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct MultiStatsQuery {
    pub ids: String,
    #[serde(default)]
    pub days: Option<i64>,
}

/// Parse a comma separated id list such as `1,2,3`.
pub fn parse_ids(raw: &str) -> Result<Vec<i64>, String> {
    let ids = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<i64>().map_err(|_| format!("invalid target id: {}", s)))
        .collect::<Result<Vec<_>, _>>()?;
    if ids.is_empty() {
        return Err("ids must list at least one target".to_string());
    }
    Ok(ids)
}

pub async fn handle_multi_stats(
    State(state): State<AppState>,
    Query(query): Query<MultiStatsQuery>,
) -> impl IntoResponse {
    let ids = match parse_ids(&query.ids) {
        Ok(ids) => ids,
        Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
    };
    let days = query.days.unwrap_or(DEFAULT_WINDOW_DAYS);

    match stats::get_stats_many(&state.store, &ids, days, Utc::now(), &state.stats) {
        Ok(result) => {
            let hourly = result.stats.hourly.clone();
            Json(labelled(result, &hourly, &state.stats.offset)).into_response()
        }
        Err(e) => stats_error(e),
    }
}

pub async fn handle_overview(State(state): State<AppState>, Query(query): Query<StatsQuery>) -> impl IntoResponse {
    let days = query.days.unwrap_or(DEFAULT_WINDOW_DAYS);
    match stats::get_overview(&state.store, days, Utc::now(), &state.stats) {
        Ok(overview) => Json(overview).into_response(),
        Err(e) => stats_error(e),
    }
}

// ============================================================================
// API: Schedule
// ============================================================================

pub async fn handle_schedule(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.get_targets() {
        Ok(targets) => Json(schedule_report(Utc::now(), &targets)).into_response(),
        Err(e) => db_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn valid() -> Target {
        Target {
            name: "api".to_string(),
            url: "https://api.example.com/health".to_string(),
            ..Default::default()
        }
    }

    fn rejected(mutate: impl FnOnce(&mut Target)) -> String {
        let mut target = valid();
        mutate(&mut target);
        validate_target(&target).unwrap_err()
    }

    #[test]
    fn test_validate_target() {
        assert!(validate_target(&valid()).is_ok());
        let mut yearly = valid();
        yearly.check_interval = 31_536_000;
        assert!(validate_target(&yearly).is_ok());

        assert!(rejected(|t| t.name.clear()).contains("name"));
        assert!(rejected(|t| t.url = "ftp://example.com".to_string()).contains("url"));
        assert!(rejected(|t| t.url = "example.com".to_string()).contains("url"));
        assert!(rejected(|t| t.url = "https://".to_string()).contains("url"));
        assert!(rejected(|t| t.check_interval = 0).contains("check_interval"));
        assert!(rejected(|t| t.check_interval = 31_536_001).contains("check_interval"));
        assert!(rejected(|t| t.check_interval = 10_000_000_000_000_000).contains("check_interval"));
        assert!(rejected(|t| t.timeout = 0).contains("timeout"));
        assert!(rejected(|t| t.timeout = 121).contains("timeout"));
    }

    #[test]
    fn test_request_apply_keeps_unset_fields() {
        let mut target = valid();
        target.check_interval = 60;
        target.owner_id = Some(7);

        let req = TargetRequest {
            name: "  renamed ".to_string(),
            url: "http://renamed.example.com".to_string(),
            check_interval: None,
            timeout: Some(10),
            is_active: Some(false),
            owner_id: None,
        };
        req.apply(&mut target);

        assert_eq!(target.name, "renamed");
        assert_eq!(target.check_interval, 60);
        assert_eq!(target.timeout, 10);
        assert!(!target.is_active);
        assert_eq!(target.owner_id, Some(7));
    }

    #[test]
    fn test_parse_ids() {
        assert_eq!(parse_ids("1,2, 3").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_ids("4,").unwrap(), vec![4]);
        assert!(parse_ids("").is_err());
        assert!(parse_ids("1,x").is_err());
    }

    #[test]
    fn test_hour_labels_use_offset() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let point = HourlyPoint {
            hour: Utc.with_ymd_and_hms(2024, 5, 1, 22, 0, 0).unwrap(),
            total_checks: 1,
            up_checks: 1,
            availability_pct: 100.0,
            avg_latency_ms: Some(1.0),
        };
        assert_eq!(hour_labels(&[point], &offset), vec!["2024-05-02 00:00".to_string()]);
    }
}
