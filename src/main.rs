//! Alert evaluation service
//!
//! Joins the `alert-service-group` consumer group on the tick topic and
//! fires price alerts stored in PostgreSQL.

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tick_alerts::alert::{PgAlertStore, StoreConfig};
use tick_alerts::consumer::{run_pipeline, AlertTickHandler, ConsumerConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "tick-alerts")]
#[command(about = "Evaluate price alerts against a market tick stream", long_about = None)]
struct Args {
    /// Kafka/Redpanda brokers, comma separated
    #[arg(long, env = "KAFKA_BROKERS", default_value = "localhost:9092")]
    brokers: String,

    /// Topic carrying encoded ticks
    #[arg(long, env = "KAFKA_TOPIC", default_value = "market_ticks")]
    topic: String,

    /// Consumer group id
    #[arg(long, env = "KAFKA_GROUP_ID", default_value = "alert-service-group")]
    group_id: String,

    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Maximum database connections
    #[arg(long, default_value = "10")]
    max_connections: u32,

    /// Create the alert tables on startup if missing
    #[arg(long)]
    ensure_schema: bool,

    /// Seconds between per-partition throughput summaries
    #[arg(long, env = "METRICS_INTERVAL_SECS", default_value = "10")]
    metrics_interval_secs: u64,

    /// Deadline for each alert store call, in milliseconds
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value = "5000")]
    store_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tick_alerts::init_tracing();
    let args = Args::parse();

    let store = PgAlertStore::connect(&StoreConfig {
        database_url: args.database_url,
        max_connections: args.max_connections,
        ensure_schema: args.ensure_schema,
        ..Default::default()
    })
    .await
    .context("failed to connect to the alert store")?;

    let config = ConsumerConfig::builder()
        .brokers(args.brokers)
        .group_id(args.group_id)
        .topics(vec![args.topic])
        .metrics_interval(Duration::from_secs(args.metrics_interval_secs))
        .store_timeout(Duration::from_millis(args.store_timeout_ms))
        .build();

    let handler = Arc::new(AlertTickHandler::from_config(
        Arc::new(store.clone()),
        &config,
    ));

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    info!(version = tick_alerts::VERSION, "Starting alert service");
    let result = run_pipeline(config, handler, shutdown).await;
    store.close().await;

    if let Err(e) = &result {
        error!(error = %e, "Alert service terminated");
    }
    result.context("alert pipeline failed")
}

async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Shutdown signal received");
    shutdown.cancel();
}
