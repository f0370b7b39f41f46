//! Scheduler module: periodic due-check selection and concurrent check dispatch.

mod guard;
mod job;
mod retention;
mod selector;

pub use guard::*;
pub use job::*;
pub use retention::*;
pub use selector::*;

use crate::config::ServerConfig;
use crate::db::{DbError, Store};
use crate::notify::Notifier;
use crate::probe::{CheckExecutor, ProbeError};

use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, Notify, Semaphore};

/// The main scheduler that selects due targets and runs their checks.
pub struct Scheduler {
    ctx: CheckContext,
    tick_interval: Duration,
    tick_limit: usize,
    in_flight: Arc<Mutex<HashSet<i64>>>,
    /// Signalled whenever a dispatched check finishes.
    finished: Arc<Notify>,
    closing: AtomicBool,
    permits: Arc<Semaphore>,
    retention_manager: RetentionManager,
}

impl Scheduler {
    /// Create a new scheduler with the given store and alert sink.
    pub fn new(cfg: &ServerConfig, store: Arc<Store>, notifier: Arc<dyn Notifier>) -> Result<Self, ProbeError> {
        let executor = CheckExecutor::new(cfg.connect_timeout(), cfg.accept_invalid_certs)?;
        let retention_manager = RetentionManager::new(
            store.clone(),
            cfg.retention_days,
            Duration::from_secs(cfg.retention_sweep_secs),
        );

        Ok(Self {
            ctx: CheckContext {
                store,
                executor,
                notifier,
                policy: RetryPolicy::from(cfg),
            },
            tick_interval: cfg.tick_interval(),
            tick_limit: cfg.tick_limit,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            finished: Arc::new(Notify::new()),
            closing: AtomicBool::new(false),
            permits: Arc::new(Semaphore::new(cfg.max_in_flight.max(1))),
            retention_manager,
        })
    }

    /// Start the tick loop and the retention sweep.
    ///
    /// The tick loop halts if the target list cannot be read at all; per-target failures
    /// never stop it.
    pub fn start(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) {
        self.retention_manager.start(shutdown.subscribe());

        let scheduler = self.clone();
        let mut stop_rx = shutdown.subscribe();

        tokio::spawn(async move {
            tracing::info!("Scheduler: ticking every {:?}", scheduler.tick_interval);

            let mut interval = tokio::time::interval(scheduler.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = stop_rx.recv() => {
                        tracing::info!("Scheduler: stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = scheduler.tick().await {
                            tracing::error!("Scheduler: halting, cannot read targets: {}", e);
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Select the targets due now and dispatch one check task for each.
    ///
    /// Returns the number of checks dispatched.
    pub async fn tick(&self) -> Result<usize, DbError> {
        let targets = self.ctx.store.get_active_targets()?;
        let mut due = select_due(Utc::now(), &targets);
        let due_count = due.len();

        if self.tick_limit > 0 {
            due.truncate(self.tick_limit);
        }

        let mut dispatched = 0;
        for target_id in due {
            if self.dispatch(target_id).await {
                dispatched += 1;
            }
        }

        if due_count > 0 {
            let in_flight = self.in_flight().await;
            tracing::info!(
                in_flight,
                "Scheduler: {} of {} active targets due, {} dispatched",
                due_count,
                targets.len(),
                dispatched
            );
        }
        Ok(dispatched)
    }

    /// Run a check for one target right away, regardless of its schedule.
    pub async fn check_now(&self, target_id: i64) -> Result<CheckReport, DbError> {
        run_check(&self.ctx, target_id, true).await
    }

    /// Number of checks currently dispatched and not yet finished.
    pub async fn in_flight(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// Stop dispatching and wait for checks already running to record their outcomes.
    ///
    /// Waits at most one job budget plus a second; returns how many checks were still
    /// running when it gave up.
    pub async fn shutdown(&self) -> usize {
        self.closing.store(true, Ordering::SeqCst);
        let grace = self.ctx.policy.budget + Duration::from_secs(1);
        let deadline = tokio::time::Instant::now() + grace;

        loop {
            let finished = self.finished.notified();
            tokio::pin!(finished);
            finished.as_mut().enable();

            let running = self.in_flight().await;
            if running == 0 {
                tracing::info!("Scheduler: all checks finished");
                return 0;
            }
            tracing::info!("Scheduler: waiting for {} running checks", running);

            if tokio::time::timeout_at(deadline, finished).await.is_err() {
                let left = self.in_flight().await;
                tracing::warn!("Scheduler: {} checks still running at shutdown", left);
                return left;
            }
        }
    }

    async fn dispatch(&self, target_id: i64) -> bool {
        if self.closing.load(Ordering::SeqCst) {
            return false;
        }

        {
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(target_id) {
                tracing::warn!(target_id, "Skipping check: previous check still running");
                return false;
            }
        }

        let ctx = self.ctx.clone();
        let in_flight = self.in_flight.clone();
        let finished = self.finished.clone();
        let permits = self.permits.clone();

        tokio::spawn(async move {
            if let Ok(_permit) = permits.acquire_owned().await {
                // Spread the batch out a little
                let jitter = rand::random::<u64>() % 100;
                tokio::time::sleep(Duration::from_millis(jitter)).await;

                match run_check(&ctx, target_id, false).await {
                    Ok(report) => tracing::debug!(target_id, "Check finished: {:?}", report),
                    Err(e) => tracing::error!(target_id, "Check could not start: {}", e),
                }
            }

            in_flight.lock().await.remove(&target_id);
            finished.notify_waiters();
        });

        true
    }
}
