//! Synthetic market tick producer
//!
//! Publishes random-walk prices for a set of symbols, encoded with the
//! shared tick codec and keyed by symbol so each symbol stays on one
//! partition in order.

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use futures::future::join_all;
use rand::prelude::*;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::collections::HashMap;
use std::time::Duration;
use tick_alerts::tick::{self, Tick};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "tick-generator")]
#[command(about = "Publish synthetic market ticks", long_about = None)]
struct Args {
    #[arg(long, env = "KAFKA_BROKERS", default_value = "localhost:9092")]
    brokers: String,

    #[arg(long, env = "KAFKA_TOPIC", default_value = "market_ticks")]
    topic: String,

    /// Symbols to simulate, comma separated
    #[arg(long, value_delimiter = ',', default_value = "AAPL,MSFT,GOOGL,AMZN,TSLA")]
    symbols: Vec<String>,

    /// Ticks per symbol per round
    #[arg(long, default_value = "1")]
    batch: usize,

    /// Delay between rounds in milliseconds
    #[arg(long, default_value = "500")]
    interval_ms: u64,

    /// Stop after this many rounds (runs forever when omitted)
    #[arg(long)]
    rounds: Option<u64>,

    /// Largest relative price move per tick
    #[arg(long, default_value = "0.01")]
    volatility: f64,

    /// Seed for reproducible price paths
    #[arg(long)]
    seed: Option<u64>,
}

/// Bounded random walk per symbol
struct PriceWalk {
    prices: HashMap<String, f64>,
    volatility: f64,
    rng: StdRng,
}

impl PriceWalk {
    fn new(symbols: &[String], volatility: f64, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let prices = symbols
            .iter()
            .map(|s| (s.clone(), rng.gen_range(50.0..500.0)))
            .collect();

        Self {
            prices,
            volatility,
            rng,
        }
    }

    fn next(&mut self, symbol: &str) -> Tick {
        let step = self.rng.gen_range(-self.volatility..=self.volatility);
        let price = self.prices.entry(symbol.to_string()).or_insert(100.0);
        *price = (*price * (1.0 + step)).max(0.01);
        let rounded = (*price * 100.0).round() / 100.0;

        Tick::new(symbol, rounded, Utc::now().timestamp_millis())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tick_alerts::init_tracing();
    let args = Args::parse();

    if args.symbols.is_empty() {
        anyhow::bail!("at least one symbol is required");
    }

    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", &args.brokers)
        .set("acks", "all")
        .set("message.send.max.retries", "5")
        .set("message.timeout.ms", "30000")
        .create()
        .context("failed to create producer")?;

    let mut walk = PriceWalk::new(&args.symbols, args.volatility.abs(), args.seed);
    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    let mut round = 0u64;
    let mut sent = 0u64;

    info!(
        topic = %args.topic,
        symbols = ?args.symbols,
        "Starting tick generator"
    );

    loop {
        if args.rounds.is_some_and(|limit| round >= limit) {
            break;
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            _ = ticker.tick() => {}
        }

        let ticks: Vec<Tick> = args
            .symbols
            .iter()
            .flat_map(|symbol| (0..args.batch).map(|_| walk.next(symbol)).collect::<Vec<_>>())
            .collect();

        let deliveries = ticks.iter().map(|tick| {
            let payload = tick::encode(tick);
            let producer = &producer;
            let topic = &args.topic;
            async move {
                let record = FutureRecord::to(topic)
                    .key(tick.symbol.as_str())
                    .payload(&payload);
                producer.send(record, Duration::from_secs(5)).await
            }
        });

        for result in join_all(deliveries).await {
            match result {
                Ok(_) => sent += 1,
                Err((e, _)) => warn!(error = %e, "Failed to deliver tick"),
            }
        }

        round += 1;
        if round % 20 == 0 {
            info!(rounds = round, ticks_sent = sent, "Generator progress");
        }
    }

    info!(rounds = round, ticks_sent = sent, "Tick generator stopped");
    Ok(())
}
