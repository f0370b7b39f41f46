//! Due-check selection.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;

use crate::db::Target;

/// One row of the schedule report.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleEntry {
    pub id: i64,
    pub name: String,
    pub check_interval: i64,
    pub is_active: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub next_check_at: DateTime<Utc>,
    pub seconds_until_next_check: i64,
    pub due: bool,
}

/// Whether a target is eligible for a check at `now`.
///
/// Inactive targets and targets with a non-positive interval are never due. A target that
/// was never checked is always due. An interval too large to represent never comes due again.
pub fn is_due(target: &Target, now: DateTime<Utc>) -> bool {
    if !target.is_active || target.check_interval <= 0 {
        return false;
    }

    match target.last_checked_at {
        None => true,
        Some(last) => {
            ChronoDuration::try_seconds(target.check_interval).is_some_and(|interval| now - last >= interval)
        }
    }
}

/// Ids of the targets due at `now`.
///
/// Ordered oldest-last-checked first (never checked before everything else), then
/// shortest interval first, then by id.
pub fn select_due(now: DateTime<Utc>, targets: &[Target]) -> Vec<i64> {
    let mut due: Vec<&Target> = targets.iter().filter(|t| is_due(t, now)).collect();
    due.sort_by_key(|t| (t.last_checked_at, t.check_interval, t.id));
    due.into_iter().map(|t| t.id).collect()
}

/// When every target last ran and runs next, soonest first.
pub fn schedule_report(now: DateTime<Utc>, targets: &[Target]) -> Vec<ScheduleEntry> {
    let mut entries: Vec<ScheduleEntry> = targets
        .iter()
        .map(|t| ScheduleEntry {
            id: t.id,
            name: t.name.clone(),
            check_interval: t.check_interval,
            is_active: t.is_active,
            last_checked_at: t.last_checked_at,
            next_check_at: t.next_check_at(now),
            seconds_until_next_check: t.seconds_until_next_check(now),
            due: is_due(t, now),
        })
        .collect();
    entries.sort_by_key(|e| (e.next_check_at, e.id));
    entries
}
