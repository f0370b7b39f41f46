//! Retention manager for pruning old check outcomes.

use crate::db::Store;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Manager for deleting outcomes past the retention horizon.
pub struct RetentionManager {
    store: Arc<Store>,
    retention: ChronoDuration,
    sweep_interval: Duration,
}

impl RetentionManager {
    pub fn new(store: Arc<Store>, retention_days: i64, sweep_interval: Duration) -> Self {
        Self {
            store,
            retention: ChronoDuration::days(retention_days),
            sweep_interval,
        }
    }

    /// Start the retention sweep background task.
    pub fn start(&self, mut shutdown: broadcast::Receiver<()>) {
        let store = self.store.clone();
        let retention = self.retention;
        let sweep_interval = self.sweep_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);

            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = interval.tick() => {
                        process_retention(&store, retention, Utc::now());
                    }
                }
            }
            tracing::info!("RetentionManager: stopped");
        });
    }
}

/// Delete every target's outcomes older than `now - retention`. Returns rows removed.
pub fn process_retention(store: &Store, retention: ChronoDuration, now: DateTime<Utc>) -> usize {
    let targets = match store.get_targets() {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("RetentionManager: Failed to get targets: {}", e);
            return 0;
        }
    };

    let cutoff = now - retention;
    let mut removed = 0;

    for target in targets {
        match store.delete_checks_before(target.id, cutoff) {
            Ok(n) => removed += n,
            Err(e) => {
                tracing::error!(
                    "RetentionManager: Failed to prune outcomes for {}: {}",
                    target.name,
                    e
                );
            }
        }
    }

    if removed > 0 {
        tracing::info!("RetentionManager: pruned {} outcomes older than {}", removed, cutoff);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Outcome, Target};
    use chrono::TimeZone;
    use tempfile::NamedTempFile;

    #[test]
    fn test_process_retention_prunes_per_target() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap();

        let mut ids = Vec::new();
        for name in ["a", "b"] {
            let mut target = Target {
                name: name.to_string(),
                url: format!("https://{}.example.com", name),
                ..Default::default()
            };
            ids.push(store.add_target(&mut target).unwrap());
        }

        for &id in &ids {
            for days_ago in [120, 91, 89, 1] {
                store
                    .apply_outcome(
                        id,
                        &Outcome::Up { latency_ms: 10, http_code: 200 },
                        now - ChronoDuration::days(days_ago),
                    )
                    .unwrap();
            }
        }

        let removed = process_retention(&store, ChronoDuration::days(90), now);
        assert_eq!(removed, 4);

        for &id in &ids {
            let left = store
                .get_checks(id, now - ChronoDuration::days(365), now)
                .unwrap();
            assert_eq!(left.len(), 2);
        }

        assert_eq!(process_retention(&store, ChronoDuration::days(90), now), 0);
    }
}
