//! Database model types.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// Last known state of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    #[default]
    Unknown,
    Up,
    Down,
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Unknown => "unknown",
            TargetStatus::Up => "up",
            TargetStatus::Down => "down",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "up" => TargetStatus::Up,
            "down" => TargetStatus::Down,
            _ => TargetStatus::Unknown,
        }
    }
}

impl From<CheckStatus> for TargetStatus {
    fn from(status: CheckStatus) -> Self {
        match status {
            CheckStatus::Up => TargetStatus::Up,
            CheckStatus::Down => TargetStatus::Down,
        }
    }
}

/// A monitored endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: i64,
    pub name: String,
    pub url: String,
    /// Seconds between checks. Targets with a non-positive interval are never scheduled.
    pub check_interval: i64,
    /// Overall request timeout in seconds.
    pub timeout: i64,
    pub is_active: bool,
    pub owner_id: Option<i64>,
    pub status: TargetStatus,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl Default for Target {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            url: String::new(),
            check_interval: 300,
            timeout: 30,
            is_active: true,
            owner_id: None,
            status: TargetStatus::Unknown,
            last_checked_at: None,
        }
    }
}

impl Target {
    /// When the next check becomes due. Never-checked targets are due immediately.
    ///
    /// An interval too large to represent puts the next check at the end of time.
    pub fn next_check_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.last_checked_at {
            Some(last) => ChronoDuration::try_seconds(self.check_interval.max(0))
                .and_then(|interval| last.checked_add_signed(interval))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            None => now,
        }
    }

    /// Seconds until the target is due, 0 if it already is.
    pub fn seconds_until_next_check(&self, now: DateTime<Utc>) -> i64 {
        (self.next_check_at(now) - now).num_seconds().max(0)
    }
}

/// Classification of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Up,
    Down,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Up => "up",
            CheckStatus::Down => "down",
        }
    }
}

/// Result of a single probe.
///
/// `Up` always carries a latency and status code. `Down` carries whatever was observed
/// before the failure plus a short human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Up {
        latency_ms: u64,
        http_code: u16,
    },
    Down {
        latency_ms: Option<u64>,
        http_code: Option<u16>,
        detail: String,
    },
}

impl Outcome {
    pub fn status(&self) -> CheckStatus {
        match self {
            Outcome::Up { .. } => CheckStatus::Up,
            Outcome::Down { .. } => CheckStatus::Down,
        }
    }

    pub fn is_up(&self) -> bool {
        matches!(self, Outcome::Up { .. })
    }

    pub fn latency_ms(&self) -> Option<u64> {
        match self {
            Outcome::Up { latency_ms, .. } => Some(*latency_ms),
            Outcome::Down { latency_ms, .. } => *latency_ms,
        }
    }

    pub fn http_code(&self) -> Option<u16> {
        match self {
            Outcome::Up { http_code, .. } => Some(*http_code),
            Outcome::Down { http_code, .. } => *http_code,
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            Outcome::Up { .. } => None,
            Outcome::Down { detail, .. } => Some(detail),
        }
    }

    /// A down outcome with nothing observed but an error.
    pub fn failure(detail: impl Into<String>) -> Self {
        Outcome::Down {
            latency_ms: None,
            http_code: None,
            detail: detail.into(),
        }
    }
}

/// A recorded outcome in the history ledger.
#[derive(Debug, Clone, Serialize)]
pub struct CheckRecord {
    pub id: i64,
    pub target_id: i64,
    pub checked_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl CheckRecord {
    pub fn status(&self) -> CheckStatus {
        self.outcome.status()
    }
}

/// Result of applying an outcome to a target, as seen inside the write transaction.
#[derive(Debug, Clone)]
pub struct AppliedOutcome {
    /// The target after the status update.
    pub target: Target,
    /// Status of the most recent outcome recorded before this one.
    pub previous: Option<CheckStatus>,
    pub record_id: i64,
}

/// Count of targets per current status.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusDistribution {
    pub up: i64,
    pub down: i64,
    pub unknown: i64,
}

/// A down outcome joined with its target, for incident listings.
#[derive(Debug, Clone, Serialize)]
pub struct IncidentRecord {
    pub target_id: i64,
    pub target_name: String,
    pub target_url: String,
    pub checked_at: DateTime<Utc>,
    pub http_code: Option<u16>,
    pub detail: Option<String>,
}

/// One page of history, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
    pub records: Vec<CheckRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_next_check_never_checked_is_now() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let target = Target::default();
        assert_eq!(target.next_check_at(now), now);
        assert_eq!(target.seconds_until_next_check(now), 0);
    }

    #[test]
    fn test_seconds_until_next_check() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let target = Target {
            check_interval: 300,
            last_checked_at: Some(now - ChronoDuration::seconds(120)),
            ..Default::default()
        };
        assert_eq!(target.seconds_until_next_check(now), 180);

        let overdue = Target {
            check_interval: 60,
            last_checked_at: Some(now - ChronoDuration::seconds(600)),
            ..Default::default()
        };
        assert_eq!(overdue.seconds_until_next_check(now), 0);
    }

    #[test]
    fn test_outcome_accessors() {
        let up = Outcome::Up { latency_ms: 42, http_code: 200 };
        assert_eq!(up.status(), CheckStatus::Up);
        assert_eq!(up.latency_ms(), Some(42));
        assert!(up.detail().is_none());

        let down = Outcome::failure("connection timeout or refused");
        assert_eq!(down.status(), CheckStatus::Down);
        assert_eq!(down.http_code(), None);
        assert_eq!(down.detail(), Some("connection timeout or refused"));
    }

    #[test]
    fn test_outcome_serializes_tagged() {
        let json = serde_json::to_value(Outcome::Down {
            latency_ms: Some(12),
            http_code: Some(503),
            detail: "HTTP 503".to_string(),
        })
        .unwrap();
        assert_eq!(json["status"], "down");
        assert_eq!(json["http_code"], 503);
        assert_eq!(json["detail"], "HTTP 503");
    }

    #[test]
    fn test_next_check_with_unrepresentable_interval() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        for interval in [10_000_000_000_000, 10_000_000_000_000_000, i64::MAX] {
            let target = Target {
                check_interval: interval,
                last_checked_at: Some(now),
                ..Default::default()
            };
            assert_eq!(target.next_check_at(now), DateTime::<Utc>::MAX_UTC);
            assert!(target.seconds_until_next_check(now) > 0);
        }
    }
}
