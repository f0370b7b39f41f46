//! Reliability statistics over the check history.
//!
//! Everything here works on UTC instants; the report offset only decides where hour
//! buckets start.

mod series;

pub use series::*;

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Offset, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::config::ServerConfig;
use crate::db::{CheckRecord, CheckStatus, DbError, IncidentRecord, StatusDistribution, Store};

pub const DEFAULT_WINDOW_DAYS: i64 = 30;
const MAX_WINDOW_DAYS: i64 = 3650;

/// Stats error types.
#[derive(Error, Debug)]
pub enum StatsError {
    #[error("invalid window: {0} days")]
    InvalidWindow(i64),
    #[error("unknown target: {0}")]
    UnknownTarget(i64),
    #[error(transparent)]
    Db(#[from] DbError),
}

/// How aggregated series are shaped for reporting.
#[derive(Debug, Clone, Copy)]
pub struct StatsOptions {
    pub offset: FixedOffset,
    pub series_cap: usize,
}

impl Default for StatsOptions {
    fn default() -> Self {
        Self {
            offset: Utc.fix(),
            series_cap: 15,
        }
    }
}

impl From<&ServerConfig> for StatsOptions {
    fn from(cfg: &ServerConfig) -> Self {
        let defaults = Self::default();
        Self {
            offset: cfg.report_offset().unwrap_or(defaults.offset),
            series_cap: cfg.series_cap,
        }
    }
}

/// Availability, latency and incident figures for a window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateStats {
    pub total_checks: u64,
    pub up_checks: u64,
    pub availability_pct: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub incidents: u64,
    pub downtime_minutes: i64,
    pub hourly: Vec<HourlyPoint>,
}

impl AggregateStats {
    /// The result for a window with no outcomes.
    pub fn empty() -> Self {
        Self {
            total_checks: 0,
            up_checks: 0,
            availability_pct: None,
            avg_latency_ms: None,
            incidents: 0,
            downtime_minutes: 0,
            hourly: Vec::new(),
        }
    }
}

/// Aggregate over several targets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MultiTargetStats {
    /// Targets asked for.
    pub targets: usize,
    /// Targets that had at least one outcome in the window.
    pub reporting_targets: usize,
    #[serde(flatten)]
    pub stats: AggregateStats,
}

/// Dashboard summary across every target.
#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    pub distribution: StatusDistribution,
    pub performance: MultiTargetStats,
    pub recent_incidents: Vec<IncidentRecord>,
}

/// Number of maximal runs of consecutive down outcomes, in the order given.
pub fn count_incidents<I>(statuses: I) -> u64
where
    I: IntoIterator<Item = CheckStatus>,
{
    let mut incidents = 0;
    let mut in_incident = false;
    for status in statuses {
        match status {
            CheckStatus::Down if !in_incident => {
                incidents += 1;
                in_incident = true;
            }
            CheckStatus::Down => {}
            CheckStatus::Up => in_incident = false,
        }
    }
    incidents
}

/// Downtime approximated from the sampling interval: `down * interval / 60`, rounded.
pub fn downtime_minutes(down_checks: u64, check_interval: i64) -> i64 {
    ((down_checks as f64 * check_interval.max(0) as f64) / 60.0).round() as i64
}

/// Compute stats for one target's outcomes.
pub fn compute_stats(records: &[CheckRecord], check_interval: i64, opts: &StatsOptions) -> AggregateStats {
    if records.is_empty() {
        return AggregateStats::empty();
    }

    let mut ordered: Vec<&CheckRecord> = records.iter().collect();
    ordered.sort_by_key(|r| (r.checked_at, r.id));

    let total = ordered.len() as u64;
    let up = ordered.iter().filter(|r| r.outcome.is_up()).count() as u64;

    AggregateStats {
        total_checks: total,
        up_checks: up,
        availability_pct: Some(round2(100.0 * up as f64 / total as f64)),
        avg_latency_ms: mean_up_latency(records).map(round2),
        incidents: count_incidents(ordered.iter().map(|r| r.status())),
        downtime_minutes: downtime_minutes(total - up, check_interval),
        hourly: downsample(hourly_series(records, &opts.offset), opts.series_cap),
    }
}

/// Combine several targets' outcomes.
///
/// Counts, incidents and downtime are summed; latency is the mean of the per-target means.
/// Targets without outcomes are skipped rather than counted as zero.
pub fn combine_stats(parts: &[(Vec<CheckRecord>, i64)], opts: &StatsOptions) -> MultiTargetStats {
    let mut total = 0u64;
    let mut up = 0u64;
    let mut incidents = 0u64;
    let mut downtime = 0i64;
    let mut latency_means = Vec::new();
    let mut buckets = HourBuckets::new();
    let mut reporting = 0;

    for (records, interval) in parts {
        if records.is_empty() {
            continue;
        }
        reporting += 1;

        let single = compute_stats(records, *interval, opts);
        total += single.total_checks;
        up += single.up_checks;
        incidents += single.incidents;
        downtime += single.downtime_minutes;
        if let Some(mean) = mean_up_latency(records) {
            latency_means.push(mean);
        }
        merge_buckets(&mut buckets, bucket_hours(records, &opts.offset));
    }

    let stats = if total == 0 {
        AggregateStats::empty()
    } else {
        AggregateStats {
            total_checks: total,
            up_checks: up,
            availability_pct: Some(round2(100.0 * up as f64 / total as f64)),
            avg_latency_ms: mean(&latency_means).map(round2),
            incidents,
            downtime_minutes: downtime,
            hourly: downsample(to_points(&buckets), opts.series_cap),
        }
    };

    MultiTargetStats {
        targets: parts.len(),
        reporting_targets: reporting,
        stats,
    }
}

/// Stats for one target over the last `window_days`.
pub fn get_stats(
    store: &Store,
    target_id: i64,
    window_days: i64,
    now: DateTime<Utc>,
    opts: &StatsOptions,
) -> Result<AggregateStats, StatsError> {
    let since = window_start(window_days, now)?;
    let target = store
        .find_target(target_id)?
        .ok_or(StatsError::UnknownTarget(target_id))?;
    let records = store.get_checks(target_id, since, now)?;
    Ok(compute_stats(&records, target.check_interval, opts))
}

/// Stats across several targets over the last `window_days`.
pub fn get_stats_many(
    store: &Store,
    target_ids: &[i64],
    window_days: i64,
    now: DateTime<Utc>,
    opts: &StatsOptions,
) -> Result<MultiTargetStats, StatsError> {
    let since = window_start(window_days, now)?;

    let mut parts = Vec::with_capacity(target_ids.len());
    for &id in target_ids {
        let target = store.find_target(id)?.ok_or(StatsError::UnknownTarget(id))?;
        parts.push((store.get_checks(id, since, now)?, target.check_interval));
    }

    Ok(combine_stats(&parts, opts))
}

/// Status distribution, overall performance and latest incidents.
pub fn get_overview(
    store: &Store,
    window_days: i64,
    now: DateTime<Utc>,
    opts: &StatsOptions,
) -> Result<Overview, StatsError> {
    let since = window_start(window_days, now)?;
    let ids: Vec<i64> = store.get_targets()?.into_iter().map(|t| t.id).collect();

    Ok(Overview {
        distribution: store.status_distribution()?,
        performance: get_stats_many(store, &ids, window_days, now, opts)?,
        recent_incidents: store.recent_incidents(since, 10)?,
    })
}

fn window_start(window_days: i64, now: DateTime<Utc>) -> Result<DateTime<Utc>, StatsError> {
    if !(1..=MAX_WINDOW_DAYS).contains(&window_days) {
        return Err(StatsError::InvalidWindow(window_days));
    }
    Ok(now - ChronoDuration::days(window_days))
}

fn mean_up_latency(records: &[CheckRecord]) -> Option<f64> {
    let latencies: Vec<f64> = records
        .iter()
        .filter(|r| r.outcome.is_up())
        .filter_map(|r| r.outcome.latency_ms())
        .map(|l| l as f64)
        .collect();
    mean(&latencies)
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Outcome, Target};
    use chrono::TimeZone;
    use tempfile::NamedTempFile;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap()
    }

    fn records(pattern: &[(bool, u64)]) -> Vec<CheckRecord> {
        pattern
            .iter()
            .enumerate()
            .map(|(i, &(up, latency))| CheckRecord {
                id: i as i64,
                target_id: 1,
                checked_at: base() + ChronoDuration::minutes(i as i64),
                outcome: if up {
                    Outcome::Up { latency_ms: latency, http_code: 200 }
                } else {
                    Outcome::Down { latency_ms: Some(latency), http_code: Some(500), detail: "HTTP 500".into() }
                },
            })
            .collect()
    }

    #[test]
    fn test_incident_count() {
        use CheckStatus::{Down, Up};
        assert_eq!(count_incidents([Up, Down, Down, Up, Down]), 2);
        assert_eq!(count_incidents([Down, Down, Down]), 1);
        assert_eq!(count_incidents([Up, Up]), 0);
        assert_eq!(count_incidents(Vec::new()), 0);
    }

    #[test]
    fn test_downtime_minutes() {
        assert_eq!(downtime_minutes(3, 60), 3);
        assert_eq!(downtime_minutes(1, 90), 2);
        assert_eq!(downtime_minutes(1, 20), 0);
        assert_eq!(downtime_minutes(0, 300), 0);
    }

    #[test]
    fn test_compute_stats() {
        let recs = records(&[(true, 100), (false, 900), (false, 900), (true, 200), (false, 5)]);
        let stats = compute_stats(&recs, 60, &StatsOptions::default());

        assert_eq!(stats.total_checks, 5);
        assert_eq!(stats.up_checks, 2);
        assert_eq!(stats.availability_pct, Some(40.0));
        // down latencies are ignored
        assert_eq!(stats.avg_latency_ms, Some(150.0));
        assert_eq!(stats.incidents, 2);
        assert_eq!(stats.downtime_minutes, 3);
        assert_eq!(stats.hourly.len(), 1);
    }

    #[test]
    fn test_compute_stats_orders_before_counting_incidents() {
        let mut recs = records(&[(true, 1), (false, 1), (false, 1), (true, 1)]);
        recs.reverse();
        assert_eq!(compute_stats(&recs, 60, &StatsOptions::default()).incidents, 1);
    }

    #[test]
    fn test_availability_rounding() {
        let recs = records(&[(true, 1), (true, 1), (false, 1)]);
        assert_eq!(
            compute_stats(&recs, 60, &StatsOptions::default()).availability_pct,
            Some(66.67)
        );
    }

    #[test]
    fn test_empty_stats() {
        let stats = compute_stats(&[], 60, &StatsOptions::default());
        assert_eq!(stats, AggregateStats::empty());
        assert_eq!(stats.availability_pct, None);
        assert!(stats.hourly.is_empty());
    }

    #[test]
    fn test_combine_skips_empty_targets() {
        let a = records(&[(true, 100), (true, 300)]);
        let b = records(&[(true, 50), (false, 0)]);
        let multi = combine_stats(&[(a, 60), (Vec::new(), 60), (b, 120)], &StatsOptions::default());

        assert_eq!(multi.targets, 3);
        assert_eq!(multi.reporting_targets, 2);
        assert_eq!(multi.stats.total_checks, 4);
        assert_eq!(multi.stats.up_checks, 3);
        assert_eq!(multi.stats.availability_pct, Some(75.0));
        // mean of per-target means (200 and 50)
        assert_eq!(multi.stats.avg_latency_ms, Some(125.0));
        assert_eq!(multi.stats.downtime_minutes, 2);
        assert_eq!(multi.stats.incidents, 1);
        // same hour across both targets merges into one point
        assert_eq!(multi.stats.hourly.len(), 1);
        assert_eq!(multi.stats.hourly[0].total_checks, 4);
    }

    #[test]
    fn test_combine_all_empty() {
        let multi = combine_stats(&[(Vec::new(), 60)], &StatsOptions::default());
        assert_eq!(multi.reporting_targets, 0);
        assert_eq!(multi.stats, AggregateStats::empty());
    }

    #[test]
    fn test_hourly_series_is_capped() {
        let recs: Vec<CheckRecord> = (0..150)
            .map(|h| CheckRecord {
                id: h,
                target_id: 1,
                checked_at: base() + ChronoDuration::hours(h),
                outcome: Outcome::Up { latency_ms: 1, http_code: 200 },
            })
            .collect();
        let stats = compute_stats(&recs, 3600, &StatsOptions::default());
        assert!(stats.hourly.len() <= 15);
        assert_eq!(stats.hourly[0].hour, base());
    }

    fn store_with_target() -> (NamedTempFile, Store, i64) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let mut target = Target {
            name: "stats".to_string(),
            url: "https://stats.example.com".to_string(),
            check_interval: 60,
            ..Default::default()
        };
        let id = store.add_target(&mut target).unwrap();
        (tmp, store, id)
    }

    #[test]
    fn test_get_stats_empty_window_is_not_an_error() {
        let (_tmp, store, id) = store_with_target();
        let stats = get_stats(&store, id, 30, Utc::now(), &StatsOptions::default()).unwrap();
        assert_eq!(stats, AggregateStats::empty());
    }

    #[test]
    fn test_get_stats_respects_window() {
        let (_tmp, store, id) = store_with_target();
        let now = base();
        store
            .apply_outcome(id, &Outcome::failure("old"), now - ChronoDuration::days(40))
            .unwrap();
        store
            .apply_outcome(id, &Outcome::Up { latency_ms: 80, http_code: 200 }, now - ChronoDuration::days(2))
            .unwrap();

        let stats = get_stats(&store, id, 30, now, &StatsOptions::default()).unwrap();
        assert_eq!(stats.total_checks, 1);
        assert_eq!(stats.availability_pct, Some(100.0));

        let wide = get_stats(&store, id, 60, now, &StatsOptions::default()).unwrap();
        assert_eq!(wide.total_checks, 2);
        assert_eq!(wide.incidents, 1);
    }

    #[test]
    fn test_get_stats_input_errors() {
        let (_tmp, store, id) = store_with_target();
        let opts = StatsOptions::default();

        assert!(matches!(
            get_stats(&store, id, 0, Utc::now(), &opts),
            Err(StatsError::InvalidWindow(0))
        ));
        assert!(matches!(
            get_stats(&store, id, -3, Utc::now(), &opts),
            Err(StatsError::InvalidWindow(-3))
        ));
        assert!(matches!(
            get_stats(&store, id + 100, 30, Utc::now(), &opts),
            Err(StatsError::UnknownTarget(_))
        ));
        assert!(matches!(
            get_stats_many(&store, &[id, id + 100], 30, Utc::now(), &opts),
            Err(StatsError::UnknownTarget(_))
        ));
    }

    #[test]
    fn test_overview() {
        let (_tmp, store, id) = store_with_target();
        let now = Utc::now();
        store
            .apply_outcome(id, &Outcome::failure("connection timeout or refused"), now)
            .unwrap();

        let overview = get_overview(&store, 30, now + ChronoDuration::seconds(1), &StatsOptions::default()).unwrap();
        assert_eq!(overview.distribution.down, 1);
        assert_eq!(overview.performance.stats.total_checks, 1);
        assert_eq!(overview.recent_incidents.len(), 1);
    }
}
