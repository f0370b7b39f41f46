//! Check jobs: one probe-and-record per due target, wrapped in a bounded retry policy.
//!
//! Each job walks `Pending -> {Succeeded | Retrying(n) | Exhausted}`. A transport failure
//! or a failed write moves the job to `Retrying` until the attempt budget or the wall-clock
//! budget runs out; `Exhausted` then records exactly one synthetic down outcome so the
//! history has no gaps during an outage. An HTTP-level failure is a valid outcome and is
//! recorded on the attempt that observed it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::time::Instant;

use super::guard::{record_outcome, revalidate, Recorded};
use crate::config::ServerConfig;
use crate::db::{DbError, Outcome, Store};
use crate::notify::Notifier;
use crate::probe::{CheckExecutor, TransportFailure};

/// Retry limits for a check job.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Wall-clock cap for the whole job, independent of the per-probe timeout.
    pub budget: Duration,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            budget: Duration::from_secs(120),
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl From<&ServerConfig> for RetryPolicy {
    fn from(cfg: &ServerConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            budget: cfg.job_budget(),
            retry_delay: cfg.retry_delay(),
        }
    }
}

/// Everything a check job needs.
#[derive(Clone)]
pub struct CheckContext {
    pub store: Arc<Store>,
    pub executor: CheckExecutor,
    pub notifier: Arc<dyn Notifier>,
    pub policy: RetryPolicy,
}

/// Why a single attempt failed.
#[derive(Error, Debug)]
pub enum CheckError {
    #[error(transparent)]
    Transport(#[from] TransportFailure),
    #[error("persistence failed: {0}")]
    Persistence(#[from] DbError),
    #[error("job exceeded {0:?} budget")]
    Budget(Duration),
}

/// Progress of one check job.
#[derive(Debug)]
pub enum AttemptState {
    Pending,
    Retrying(u32),
    Succeeded(Recorded),
    Exhausted(CheckError),
}

/// Final result of a check job.
#[derive(Debug, PartialEq, Eq)]
pub enum CheckReport {
    /// The target was gone, inactive or no longer due.
    Skipped,
    /// An attempt reached the guard.
    Completed { attempts: u32, recorded: Recorded },
    /// Every attempt failed; `recorded` is `None` if even the synthetic outcome could not be written.
    Exhausted { attempts: u32, recorded: Option<Recorded> },
}

/// Run a check job for `target_id`.
///
/// Unless `force` is set, the target is re-validated first and the job is a no-op if it is
/// no longer due. Errors only surface from that initial read.
pub async fn run_check(ctx: &CheckContext, target_id: i64, force: bool) -> Result<CheckReport, DbError> {
    let deadline = Instant::now() + ctx.policy.budget;

    let target = if force {
        ctx.store.find_target(target_id)?
    } else {
        revalidate(&ctx.store, target_id, Utc::now())?
    };
    let Some(target) = target else {
        tracing::debug!(target_id, "Skipping check: target no longer due");
        return Ok(CheckReport::Skipped);
    };

    let timeout = Duration::from_secs(target.timeout.max(1) as u64);
    let mut attempts: u32 = 0;
    let mut last_error: Option<CheckError> = None;
    let mut state = AttemptState::Pending;

    loop {
        state = match state {
            AttemptState::Pending | AttemptState::Retrying(_) if Instant::now() >= deadline => {
                AttemptState::Exhausted(CheckError::Budget(ctx.policy.budget))
            }
            AttemptState::Pending | AttemptState::Retrying(_) => {
                attempts += 1;
                match tokio::time::timeout_at(deadline, attempt(ctx, target_id, &target.url, timeout)).await {
                    Ok(Ok(recorded)) => AttemptState::Succeeded(recorded),
                    Ok(Err(e)) if attempts >= ctx.policy.max_attempts => AttemptState::Exhausted(e),
                    Ok(Err(e)) => {
                        tracing::warn!(target_id, attempts, "Check attempt for {} failed: {}", target.name, e);
                        last_error = Some(e);
                        let resume = (Instant::now() + ctx.policy.retry_delay).min(deadline);
                        tokio::time::sleep_until(resume).await;
                        AttemptState::Retrying(attempts)
                    }
                    Err(_) => AttemptState::Exhausted(CheckError::Budget(ctx.policy.budget)),
                }
            }
            AttemptState::Succeeded(recorded) => {
                return Ok(CheckReport::Completed { attempts, recorded });
            }
            AttemptState::Exhausted(final_error) => {
                let outcome = exhaustion_outcome(attempts, &final_error, last_error.as_ref());
                let recorded = record_exhaustion(ctx, target_id, attempts, outcome);
                return Ok(CheckReport::Exhausted { attempts, recorded });
            }
        };
    }
}

/// The synthetic down outcome written once a job gives up.
///
/// A budget overrun keeps the error of the last finished attempt in the detail. Latency and
/// status code come from the most recent transport failure that observed them.
fn exhaustion_outcome(attempts: u32, final_error: &CheckError, previous: Option<&CheckError>) -> Outcome {
    let noun = if attempts == 1 { "attempt" } else { "attempts" };
    let detail = match (final_error, previous) {
        (CheckError::Budget(_), Some(prev)) => {
            format!("check failed after {} {}: {} (last error: {})", attempts, noun, final_error, prev)
        }
        _ => format!("check failed after {} {}: {}", attempts, noun, final_error),
    };

    let observed = [Some(final_error), previous]
        .into_iter()
        .flatten()
        .find_map(|e| match e {
            CheckError::Transport(failure) => Some(failure.clone()),
            _ => None,
        });

    match observed {
        Some(failure) => failure.into_down(detail),
        None => Outcome::failure(detail),
    }
}

async fn attempt(
    ctx: &CheckContext,
    target_id: i64,
    url: &str,
    timeout: Duration,
) -> Result<Recorded, CheckError> {
    let outcome = ctx.executor.probe(url, timeout).await?;
    let recorded = record_outcome(&ctx.store, ctx.notifier.as_ref(), target_id, &outcome, Utc::now())?;
    Ok(recorded)
}

fn record_exhaustion(ctx: &CheckContext, target_id: i64, attempts: u32, outcome: Outcome) -> Option<Recorded> {
    tracing::warn!(target_id, attempts, "Check exhausted: {}", outcome.detail().unwrap_or_default());

    match record_outcome(&ctx.store, ctx.notifier.as_ref(), target_id, &outcome, Utc::now()) {
        Ok(recorded) => Some(recorded),
        Err(e) => {
            tracing::error!(target_id, "Failed to record exhausted check: {}", e);
            None
        }
    }
}
