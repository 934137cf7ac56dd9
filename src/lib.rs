//! Tick-driven price alert evaluation
//!
//! Market ticks arrive on a partitioned bus, keyed by symbol. For every tick
//! the active alerts for that symbol are looked up, evaluated against the
//! tick price, and matches are flipped to triggered with a single
//! conditional update, so redelivered ticks never fire an alert twice.
//!
//! # Example
//!
//! ```no_run
//! use tick_alerts::alert::{evaluate, AlertCondition};
//! use tick_alerts::tick::{self, Tick};
//!
//! let bytes = tick::encode(&Tick::new("AAPL", 151.0, 1_700_000_000_000));
//! let tick = tick::decode(&bytes).unwrap();
//!
//! assert!(evaluate(&AlertCondition::Above, 150.0, tick.price));
//! ```
//!
//! # Redpanda Integration
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tick_alerts::alert::{PgAlertStore, StoreConfig};
//! use tick_alerts::consumer::{run_pipeline, AlertTickHandler, ConsumerConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = PgAlertStore::connect(&StoreConfig {
//!     database_url: "postgres://localhost/alerts".to_string(),
//!     ..Default::default()
//! })
//! .await?;
//!
//! let handler = Arc::new(AlertTickHandler::new(Arc::new(store), Duration::from_secs(5)));
//! run_pipeline(ConsumerConfig::default(), handler, CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(clippy::all)]

pub use alert::{Alert, AlertCondition, AlertId, NewAlert, User, UserId};
pub use error::{AlertError, Result};
pub use tick::{Tick, TickDecodeError};

/// Alert model, matching, and storage
pub mod alert;

/// Consumer group pipeline for Redpanda/Kafka
pub mod consumer;

/// Error types
pub mod error;

/// Tick wire format
pub mod tick;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the tracing subscriber with default settings
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}
