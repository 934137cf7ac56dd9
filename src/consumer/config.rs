//! Consumer configuration structures

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Extra librdkafka properties that may be passed through verbatim
pub const ALLOWED_KAFKA_PROPS: &[&str] = &[
    // Fetch settings
    "fetch.min.bytes",
    "fetch.wait.max.ms",
    "fetch.max.bytes",
    "max.partition.fetch.bytes",
    // Request settings
    "request.timeout.ms",
    "metadata.max.age.ms",
    "socket.receive.buffer.bytes",
    "socket.send.buffer.bytes",
    // Consumer settings
    "queued.min.messages",
    "queued.max.messages.kbytes",
    "fetch.error.backoff.ms",
    "heartbeat.interval.ms",
    "partition.assignment.strategy",
    "client.id",
    // Connection settings
    "reconnect.backoff.ms",
    "reconnect.backoff.max.ms",
    "connections.max.idle.ms",
    "socket.keepalive.enable",
    // Security
    "security.protocol",
    "sasl.mechanism",
    "sasl.username",
    "sasl.password",
    "ssl.ca.location",
    // Monitoring
    "statistics.interval.ms",
];

/// Redpanda/Kafka consumer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Kafka broker addresses (comma-separated)
    pub brokers: String,

    /// Consumer group ID
    pub group_id: String,

    /// Topics to consume from
    pub topics: Vec<String>,

    /// Session timeout in milliseconds
    pub session_timeout_ms: u32,

    /// Maximum poll interval in milliseconds
    pub max_poll_interval_ms: u32,

    /// Offset reset policy when the group has no committed offset (earliest, latest)
    pub auto_offset_reset: String,

    /// Interval between per-partition throughput summaries
    pub metrics_interval: Duration,

    /// Interval between commits of marked offsets
    pub commit_interval: Duration,

    /// Deadline for each alert store call
    pub store_timeout: Duration,

    /// How long a revoke may take to drain before the bus proceeds without us
    pub rebalance_timeout: Duration,

    /// How long shutdown waits for partition workers to stop
    pub shutdown_timeout: Duration,

    /// Queue depth per partition worker used for pause/resume decisions
    pub channel_buffer_size: usize,
    pub pause_threshold: f64,  // Pause when queue is this % full
    pub resume_threshold: f64, // Resume when queue drops to this %

    /// Capacity of the bus-to-coordinator event channel
    pub event_buffer_size: usize,

    /// Additional Kafka properties
    pub kafka_properties: HashMap<String, String>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            group_id: "alert-service-group".to_string(),
            topics: vec!["market_ticks".to_string()],
            session_timeout_ms: 30000,
            max_poll_interval_ms: 300000,
            auto_offset_reset: "earliest".to_string(),
            metrics_interval: Duration::from_secs(10),
            commit_interval: Duration::from_secs(5),
            store_timeout: Duration::from_secs(5),
            rebalance_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
            channel_buffer_size: 1000,
            pause_threshold: 0.8,
            resume_threshold: 0.5,
            event_buffer_size: 1024,
            kafka_properties: HashMap::new(),
        }
    }
}

/// Builder for ConsumerConfig
pub struct ConsumerConfigBuilder {
    config: ConsumerConfig,
}

impl ConsumerConfigBuilder {
    /// Create a new consumer config builder
    pub fn new() -> Self {
        Self {
            config: ConsumerConfig::default(),
        }
    }

    /// Set the broker addresses
    pub fn brokers(mut self, brokers: String) -> Self {
        self.config.brokers = brokers;
        self
    }

    /// Set the consumer group ID
    pub fn group_id(mut self, group_id: String) -> Self {
        self.config.group_id = group_id;
        self
    }

    /// Set the topics to consume
    pub fn topics(mut self, topics: Vec<String>) -> Self {
        self.config.topics = topics;
        self
    }

    pub fn session_timeout_ms(mut self, timeout: u32) -> Self {
        self.config.session_timeout_ms = timeout;
        self
    }

    pub fn auto_offset_reset(mut self, policy: String) -> Self {
        self.config.auto_offset_reset = policy;
        self
    }

    /// Set the throughput summary interval
    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.config.metrics_interval = interval;
        self
    }

    /// Set the offset commit interval
    pub fn commit_interval(mut self, interval: Duration) -> Self {
        self.config.commit_interval = interval;
        self
    }

    /// Set the per-call store deadline
    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.config.store_timeout = timeout;
        self
    }

    pub fn rebalance_timeout(mut self, timeout: Duration) -> Self {
        self.config.rebalance_timeout = timeout;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Set the per-partition queue size
    pub fn channel_buffer_size(mut self, size: usize) -> Self {
        self.config.channel_buffer_size = size;
        self
    }

    /// Set the pause and resume thresholds as fractions of the queue size
    pub fn backpressure_thresholds(mut self, pause: f64, resume: f64) -> Self {
        self.config.pause_threshold = pause;
        self.config.resume_threshold = resume;
        self
    }

    /// Add a custom Kafka property
    pub fn kafka_property(mut self, key: String, value: String) -> Self {
        self.config.kafka_properties.insert(key, value);
        self
    }

    /// Build the consumer configuration
    pub fn build(self) -> ConsumerConfig {
        self.config
    }
}

impl Default for ConsumerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsumerConfig {
    /// Create a new consumer config builder
    pub fn builder() -> ConsumerConfigBuilder {
        ConsumerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.brokers.trim().is_empty() {
            return Err("Brokers cannot be empty".to_string());
        }

        if self.group_id.trim().is_empty() {
            return Err("Group ID cannot be empty".to_string());
        }

        if self.topics.is_empty() || self.topics.iter().any(|t| t.trim().is_empty()) {
            return Err("Topics cannot be empty".to_string());
        }

        if !matches!(self.auto_offset_reset.as_str(), "earliest" | "latest") {
            return Err(format!(
                "Unsupported offset reset policy '{}'",
                self.auto_offset_reset
            ));
        }

        if self.metrics_interval.is_zero() {
            return Err("Metrics interval must be greater than 0".to_string());
        }

        if self.commit_interval.is_zero() {
            return Err("Commit interval must be greater than 0".to_string());
        }

        if self.store_timeout.is_zero() {
            return Err("Store timeout must be greater than 0".to_string());
        }

        if self.channel_buffer_size == 0 || self.event_buffer_size == 0 {
            return Err("Buffer sizes must be greater than 0".to_string());
        }

        if self.pause_threshold <= self.resume_threshold {
            return Err("Pause threshold must be greater than resume threshold".to_string());
        }

        if self.pause_threshold > 1.0 || self.resume_threshold < 0.0 {
            return Err("Thresholds must be between 0 and 1".to_string());
        }

        for key in self.kafka_properties.keys() {
            if !ALLOWED_KAFKA_PROPS.contains(&key.as_str()) {
                return Err(format!("Disallowed Kafka property '{}'", key));
            }
        }

        Ok(())
    }
}
