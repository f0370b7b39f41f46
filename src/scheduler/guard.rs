//! Applies check outcomes to target state and decides when to alert.

use chrono::{DateTime, Utc};

use super::selector::is_due;
use crate::db::{CheckStatus, DbError, Outcome, Store, Target};
use crate::notify::Notifier;

/// What happened to an outcome handed to the guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    /// Target state updated and outcome appended.
    Applied {
        record_id: i64,
        status: CheckStatus,
        notified: bool,
    },
    /// The target was deleted in the meantime; nothing was written.
    Discarded,
}

/// Alert on a transition into down, or on a first-ever outcome that is down.
pub fn should_notify(previous: Option<CheckStatus>, new: CheckStatus) -> bool {
    new == CheckStatus::Down && previous != Some(CheckStatus::Down)
}

/// Re-read a target right before probing it.
///
/// Returns the fresh target only if it still exists and is still due; a concurrent check
/// that already landed makes this `None`.
pub fn revalidate(store: &Store, target_id: i64, now: DateTime<Utc>) -> Result<Option<Target>, DbError> {
    Ok(store.find_target(target_id)?.filter(|t| is_due(t, now)))
}

/// Record one outcome: update the target, append history, alert if it just went down.
pub fn record_outcome(
    store: &Store,
    notifier: &dyn Notifier,
    target_id: i64,
    outcome: &Outcome,
    now: DateTime<Utc>,
) -> Result<Recorded, DbError> {
    let Some(applied) = store.apply_outcome(target_id, outcome, now)? else {
        tracing::debug!(target_id, "Discarding outcome for deleted target");
        return Ok(Recorded::Discarded);
    };

    let status = outcome.status();
    let notified = should_notify(applied.previous, status);
    if notified {
        notifier.notify_down(&applied.target, outcome.detail().unwrap_or("down"));
    }

    tracing::debug!(
        target_id,
        status = status.as_str(),
        latency_ms = ?outcome.latency_ms(),
        http_code = ?outcome.http_code(),
        notified,
        "Recorded outcome for {}",
        applied.target.name
    );

    Ok(Recorded::Applied {
        record_id: applied.record_id,
        status,
        notified,
    })
}
