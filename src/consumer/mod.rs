//! Consumer group pipeline for tick evaluation
//!
//! This module provides:
//! - Consumer group coordination with drain-before-revoke rebalancing
//! - One sequential worker per claimed partition
//! - Manual offset management (at-least-once)
//! - Per-partition backpressure via pause/resume
//! - Per-partition throughput summaries
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tick_alerts::alert::MemoryAlertStore;
//! use tick_alerts::consumer::{run_pipeline, AlertTickHandler, ConsumerConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ConsumerConfig::builder()
//!     .brokers("localhost:9092".to_string())
//!     .group_id("alert-service-group".to_string())
//!     .topics(vec!["market_ticks".to_string()])
//!     .store_timeout(Duration::from_secs(5))
//!     .build();
//!
//! let store = Arc::new(MemoryAlertStore::new());
//! let handler = Arc::new(AlertTickHandler::from_config(store, &config));
//!
//! run_pipeline(config, handler, CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

pub mod backpressure;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod handler;
pub mod kafka;
pub mod message;
pub mod metrics;
pub mod offset_manager;
pub mod partition;
pub mod state;

pub use backpressure::{BackpressureController, QueueDepth};
pub use config::{ConsumerConfig, ConsumerConfigBuilder};
pub use coordinator::{BusControl, GroupCoordinator, GroupEvent, RevokeAck};
pub use error::{ConsumerError, ConsumerResult};
pub use handler::{AlertTickHandler, ThroughputHandler, TickHandler, TickOutcome};
pub use kafka::{GroupContext, KafkaGroupBus};
pub use message::{BusMessage, TopicPartition};
pub use metrics::{PartitionMetrics, ThroughputSummary};
pub use offset_manager::{OffsetCommitter, OffsetManager};
pub use partition::{PartitionExit, PartitionReport, PartitionWorker};
pub use state::{GroupState, GroupStateMachine};

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Join the group described by `config` and evaluate ticks with `handler`
/// until `shutdown` fires or the bus fails.
///
/// Fatal bus errors are returned after workers have stopped and marked
/// offsets have been committed.
pub async fn run_pipeline(
    config: ConsumerConfig,
    handler: Arc<dyn TickHandler>,
    shutdown: CancellationToken,
) -> ConsumerResult<()> {
    config.validate().map_err(ConsumerError::ConfigError)?;
    let (events_tx, events_rx) = mpsc::channel(config.event_buffer_size);

    let bus = Arc::new(KafkaGroupBus::connect(&config, events_tx.clone())?);
    let poll_stop = CancellationToken::new();
    let poller = bus
        .spawn_poll_loop(events_tx, poll_stop.clone())
        .map_err(|e| {
            ConsumerError::ConnectionError(format!("Failed to start poll thread: {}", e))
        })?;

    let coordinator = GroupCoordinator::new(config, handler, bus, shutdown);
    let result = coordinator.run(events_rx).await;

    poll_stop.cancel();
    match tokio::task::spawn_blocking(move || poller.join()).await {
        Ok(Ok(())) => info!("Consumer pipeline stopped"),
        _ => warn!("Poll thread did not exit cleanly"),
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_config_is_rejected_before_connecting() {
        let config = ConsumerConfig {
            event_buffer_size: 0,
            ..Default::default()
        };

        let handler = Arc::new(ThroughputHandler);
        let result = run_pipeline(config, handler, CancellationToken::new()).await;
        assert!(matches!(result, Err(ConsumerError::ConfigError(_))));
    }
}
