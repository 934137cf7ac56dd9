//! Per-tick handlers run by partition workers

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use crate::alert::{AlertStore, TriggerCommitter};
use crate::consumer::config::ConsumerConfig;
use crate::consumer::error::ConsumerResult;
use crate::error::AlertError;
use crate::tick::Tick;

/// What handling one tick produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// Alerts whose condition matched the tick price
    pub alerts_matched: u64,
    /// Alerts that actually transitioned to triggered
    pub alerts_triggered: u64,
    /// Matched alerts whose trigger could not be written
    pub commit_failures: u64,
}

/// Trait for processing decoded ticks
///
/// Handlers are shared by every partition worker and must tolerate being
/// called concurrently. An `Err` covers the whole tick; it is logged by the
/// worker and the record's offset is still marked.
#[async_trait]
pub trait TickHandler: Send + Sync + 'static {
    /// Process a single tick
    async fn handle(&self, tick: &Tick) -> ConsumerResult<TickOutcome>;

    /// Get handler name for logs
    fn name(&self) -> &str {
        "TickHandler"
    }
}

/// Evaluates every active alert for the tick's symbol and fires the matches
pub struct AlertTickHandler {
    store: Arc<dyn AlertStore>,
    committer: TriggerCommitter,
    store_timeout: Duration,
}

impl AlertTickHandler {
    /// Both the lookup and each trigger commit are bounded by `store_timeout`
    pub fn new(store: Arc<dyn AlertStore>, store_timeout: Duration) -> Self {
        let committer = TriggerCommitter::new(store.clone(), store_timeout);
        Self {
            store,
            committer,
            store_timeout,
        }
    }

    /// Build a handler bounded by the pipeline's configured `store_timeout`
    pub fn from_config(store: Arc<dyn AlertStore>, config: &ConsumerConfig) -> Self {
        Self::new(store, config.store_timeout)
    }
}

#[async_trait]
impl TickHandler for AlertTickHandler {
    async fn handle(&self, tick: &Tick) -> ConsumerResult<TickOutcome> {
        let alerts = tokio::time::timeout(
            self.store_timeout,
            self.store.active_alerts_by_symbol(&tick.symbol),
        )
        .await
        .map_err(|_| AlertError::Timeout(self.store_timeout))??;

        let mut outcome = TickOutcome::default();

        for alert in alerts.iter().filter(|alert| !alert.triggered) {
            if !alert.is_met_by(tick.price) {
                continue;
            }
            outcome.alerts_matched += 1;

            match self.committer.commit(alert, tick).await {
                Ok(true) => outcome.alerts_triggered += 1,
                Ok(false) => {
                    debug!(
                        alert_id = alert.id,
                        symbol = %tick.symbol,
                        "Alert already triggered"
                    );
                }
                Err(e) => {
                    outcome.commit_failures += 1;
                    error!(
                        alert_id = alert.id,
                        user_id = alert.user_id,
                        symbol = %tick.symbol,
                        price = tick.price,
                        error = %e,
                        "Failed to mark alert triggered"
                    );
                }
            }
        }

        Ok(outcome)
    }

    fn name(&self) -> &str {
        "alert-evaluator"
    }
}

/// Counts ticks without looking at alerts
#[derive(Debug, Default, Clone, Copy)]
pub struct ThroughputHandler;

#[async_trait]
impl TickHandler for ThroughputHandler {
    async fn handle(&self, _tick: &Tick) -> ConsumerResult<TickOutcome> {
        Ok(TickOutcome::default())
    }

    fn name(&self) -> &str {
        "throughput"
    }
}
