//! Idempotent trigger application

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::store::AlertStore;
use super::Alert;
use crate::error::{AlertError, Result};
use crate::tick::Tick;

/// Applies matched triggers to the store.
///
/// A trigger is applied through the store's conditional update, so replaying
/// the same tick after a crash or rebalance is a no-op for alerts that have
/// already fired.
#[derive(Clone)]
pub struct TriggerCommitter {
    store: Arc<dyn AlertStore>,
    timeout: Duration,
}

impl TriggerCommitter {
    pub fn new(store: Arc<dyn AlertStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Flip `alert` to triggered for the price carried by `tick`.
    ///
    /// Returns `Ok(true)` if this call performed the transition, `Ok(false)`
    /// if the alert had already fired. The trigger event is logged only on
    /// an actual transition.
    pub async fn commit(&self, alert: &Alert, tick: &Tick) -> Result<bool> {
        let flipped = tokio::time::timeout(self.timeout, self.store.mark_alert_triggered(alert.id))
            .await
            .map_err(|_| AlertError::Timeout(self.timeout))??;

        if flipped {
            info!(
                alert_id = alert.id,
                user_id = alert.user_id,
                symbol = %tick.symbol,
                price = tick.price,
                condition = %alert.condition,
                target_price = alert.target_price,
                "alert triggered"
            );
        }

        Ok(flipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertCatalog, AlertCondition, MemoryAlertStore, NewAlert};
    use parking_lot::Mutex;
    use tracing_subscriber::fmt::MakeWriter;

    /// Collects formatted log output in memory
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn count(&self, needle: &str) -> usize {
            String::from_utf8_lossy(&self.0.lock()).matches(needle).count()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_second_commit_reports_no_transition() {
        let store = Arc::new(MemoryAlertStore::new());
        let alert = store
            .create_alert(NewAlert::new(7, "AAPL", 150.0, AlertCondition::Above))
            .await
            .unwrap();
        let committer = TriggerCommitter::new(store.clone(), Duration::from_secs(1));
        let tick = Tick::new("AAPL", 151.0, 1);

        assert!(committer.commit(&alert, &tick).await.unwrap());
        assert!(!committer.commit(&alert, &tick).await.unwrap());
        assert_eq!(store.triggered_count(), 1);
    }

    #[tokio::test]
    async fn test_replayed_trigger_is_logged_once() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_writer(logs.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let store = Arc::new(MemoryAlertStore::new());
        let alert = store
            .create_alert(NewAlert::new(7, "AAPL", 150.0, AlertCondition::Above))
            .await
            .unwrap();
        let committer = TriggerCommitter::new(store.clone(), Duration::from_secs(1));

        // The same ticks delivered three times over
        for _ in 0..3 {
            for price in [151.0, 152.0] {
                committer.commit(&alert, &Tick::new("AAPL", price, 1)).await.unwrap();
            }
        }

        assert_eq!(logs.count("\"alert triggered\""), 1);
        assert_eq!(logs.count("\"alert_id\":"), 1);
    }
}
