//! Down-alert sink.
//!
//! Delivery transport is not handled here; the default sink only logs.

use crate::db::Target;

/// Receives "target went down" alerts from the outcome guard.
pub trait Notifier: Send + Sync {
    fn notify_down(&self, target: &Target, error: &str);
}

/// Emits alerts as warning-level log events.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify_down(&self, target: &Target, error: &str) {
        tracing::warn!(
            target_id = target.id,
            url = %target.url,
            owner_id = ?target.owner_id,
            "Target down: {} ({})",
            target.name,
            error
        );
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every alert it receives.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub alerts: Mutex<Vec<(i64, String)>>,
    }

    impl RecordingNotifier {
        pub fn count(&self) -> usize {
            self.alerts.lock().unwrap().len()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify_down(&self, target: &Target, error: &str) {
            self.alerts.lock().unwrap().push((target.id, error.to_string()));
        }
    }
}
