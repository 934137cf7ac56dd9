//! Throughput-only tick consumer
//!
//! Runs in its own consumer group so it keeps an independent offset cursor
//! from the alert service, and logs per-partition tick counts every second.

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tick_alerts::consumer::{run_pipeline, ConsumerConfig, ThroughputHandler};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "tick-throughput")]
#[command(about = "Report per-partition tick throughput", long_about = None)]
struct Args {
    #[arg(long, env = "KAFKA_BROKERS", default_value = "localhost:9092")]
    brokers: String,

    #[arg(long, env = "KAFKA_TOPIC", default_value = "market_ticks")]
    topic: String,

    #[arg(long, env = "KAFKA_GROUP_ID", default_value = "processor-group")]
    group_id: String,

    /// Seconds between throughput summaries
    #[arg(long, env = "METRICS_INTERVAL_SECS", default_value = "1")]
    metrics_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tick_alerts::init_tracing();
    let args = Args::parse();

    let config = ConsumerConfig::builder()
        .brokers(args.brokers)
        .group_id(args.group_id)
        .topics(vec![args.topic])
        .metrics_interval(Duration::from_secs(args.metrics_interval_secs))
        .build();

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    info!(version = tick_alerts::VERSION, "Starting throughput consumer");
    run_pipeline(config, Arc::new(ThroughputHandler), shutdown)
        .await
        .context("throughput pipeline failed")
}
