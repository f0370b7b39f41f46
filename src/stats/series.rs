//! Hourly availability series and chart down-sampling.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;

use super::round2;
use crate::db::CheckRecord;

/// Availability for one hour bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyPoint {
    /// Start of the bucket, as a UTC instant.
    pub hour: DateTime<Utc>,
    pub total_checks: u64,
    pub up_checks: u64,
    pub availability_pct: f64,
    pub avg_latency_ms: Option<f64>,
}

/// Running counts for one hour, mergeable across targets.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct HourBucket {
    total: u64,
    up: u64,
    latency_sum: u64,
    latency_n: u64,
}

/// Hour buckets keyed by bucket start (unix seconds).
pub(crate) type HourBuckets = BTreeMap<i64, HourBucket>;

/// Group outcomes into hours aligned to `offset`.
pub(crate) fn bucket_hours(records: &[CheckRecord], offset: &FixedOffset) -> HourBuckets {
    let mut buckets = HourBuckets::new();
    for record in records {
        let bucket = buckets
            .entry(hour_start(record.checked_at, offset))
            .or_default();
        bucket.total += 1;
        if record.outcome.is_up() {
            bucket.up += 1;
            if let Some(latency) = record.outcome.latency_ms() {
                bucket.latency_sum = bucket.latency_sum.saturating_add(latency);
                bucket.latency_n += 1;
            }
        }
    }
    buckets
}

pub(crate) fn merge_buckets(into: &mut HourBuckets, from: HourBuckets) {
    for (hour, b) in from {
        let slot = into.entry(hour).or_default();
        slot.total += b.total;
        slot.up += b.up;
        slot.latency_sum = slot.latency_sum.saturating_add(b.latency_sum);
        slot.latency_n += b.latency_n;
    }
}

/// Turn buckets into chronological points.
pub(crate) fn to_points(buckets: &HourBuckets) -> Vec<HourlyPoint> {
    buckets
        .iter()
        .filter(|(_, b)| b.total > 0)
        .filter_map(|(&start, b)| {
            Some(HourlyPoint {
                hour: DateTime::from_timestamp(start, 0)?,
                total_checks: b.total,
                up_checks: b.up,
                availability_pct: round2(100.0 * b.up as f64 / b.total as f64),
                avg_latency_ms: (b.latency_n > 0)
                    .then(|| round2(b.latency_sum as f64 / b.latency_n as f64)),
            })
        })
        .collect()
}

/// Hourly availability for `records`, oldest hour first.
pub fn hourly_series(records: &[CheckRecord], offset: &FixedOffset) -> Vec<HourlyPoint> {
    to_points(&bucket_hours(records, offset))
}

/// Keep every k-th point, `k = ceil(len / cap)`, so at most `cap` points remain.
///
/// Point 0 is always kept and order is preserved. Lossy; only meant to bound chart size.
pub fn downsample<T>(points: Vec<T>, cap: usize) -> Vec<T> {
    if cap == 0 || points.len() <= cap {
        return points;
    }
    let step = points.len().div_ceil(cap);
    points.into_iter().step_by(step).collect()
}

/// Start of the hour containing `at`, with hours aligned to `offset`.
fn hour_start(at: DateTime<Utc>, offset: &FixedOffset) -> i64 {
    let shift = i64::from(offset.local_minus_utc());
    (at.timestamp() + shift).div_euclid(3600) * 3600 - shift
}
