//! Kafka/Redpanda group membership over rdkafka
//!
//! A `BaseConsumer` is polled on a dedicated thread. Records and rebalance
//! callbacks are translated into [`GroupEvent`]s on one bounded channel.
//! Revoke callbacks block the poll thread until the coordinator has drained
//! and committed the revoked partitions, or until the rebalance timeout runs
//! out. Offsets are never auto-committed.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::{ClientContext, Offset, TopicPartitionList};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::consumer::config::{ConsumerConfig, ALLOWED_KAFKA_PROPS};
use crate::consumer::coordinator::{BusControl, GroupEvent, RevokeAck};
use crate::consumer::error::{is_fatal_kafka_error, ConsumerError, ConsumerResult};
use crate::consumer::message::{BusMessage, TopicPartition};
use crate::consumer::offset_manager::OffsetCommitter;

const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Send an event from an rdkafka callback.
///
/// Callbacks normally run on the poll thread where blocking is fine. They
/// can also run wherever the consumer is dropped, and blocking inside the
/// async runtime would panic, so there the send is best effort.
fn send_event(events: &mpsc::Sender<GroupEvent>, event: GroupEvent) -> bool {
    if tokio::runtime::Handle::try_current().is_ok() {
        events.try_send(event).is_ok()
    } else {
        events.blocking_send(event).is_ok()
    }
}

fn to_partitions(tpl: &TopicPartitionList) -> Vec<TopicPartition> {
    tpl.elements()
        .iter()
        .map(|elem| TopicPartition::new(elem.topic(), elem.partition()))
        .collect()
}

fn to_tpl(partitions: &[TopicPartition]) -> TopicPartitionList {
    let mut tpl = TopicPartitionList::new();
    for tp in partitions {
        tpl.add_partition(&tp.topic, tp.partition);
    }
    tpl
}

/// Client context that reports group membership changes as events
pub struct GroupContext {
    events: mpsc::Sender<GroupEvent>,
    rebalance_timeout: Duration,
}

impl GroupContext {
    pub fn new(events: mpsc::Sender<GroupEvent>, rebalance_timeout: Duration) -> Self {
        Self {
            events,
            rebalance_timeout,
        }
    }
}

impl ClientContext for GroupContext {
    fn error(&self, error: KafkaError, reason: &str) {
        if is_fatal_kafka_error(&error) {
            error!(error = %error, reason, "Fatal Kafka client error");
            let fatal = ConsumerError::ConnectionError(format!("{}: {}", error, reason));
            if !send_event(&self.events, GroupEvent::Fatal(fatal)) {
                error!("Coordinator gone, fatal client error not delivered");
            }
        } else {
            warn!(error = %error, reason, "Kafka client error");
        }
    }
}

impl ConsumerContext for GroupContext {
    fn pre_rebalance(&self, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Revoke(tpl) => {
                let partitions = to_partitions(tpl);
                info!(partitions = partitions.len(), "Partitions being revoked");

                let (ack, ack_rx) = RevokeAck::channel();
                if !send_event(&self.events, GroupEvent::Revoked { partitions, ack }) {
                    warn!("Coordinator gone, revoking without drain");
                    return;
                }

                if ack_rx.recv_timeout(self.rebalance_timeout).is_err() {
                    warn!(
                        timeout_ms = self.rebalance_timeout.as_millis() as u64,
                        "Revoke not acknowledged in time"
                    );
                }
            }
            Rebalance::Assign(tpl) => {
                debug!(partitions = tpl.count(), "Partitions about to be assigned");
            }
            Rebalance::Error(e) => {
                error!(error = %e, "Rebalance error");
                let fatal = ConsumerError::GroupJoinError(e.to_string());
                if !send_event(&self.events, GroupEvent::Fatal(fatal)) {
                    error!("Coordinator gone, rebalance error not delivered");
                }
            }
        }
    }

    fn post_rebalance(&self, rebalance: &Rebalance<'_>) {
        if let Rebalance::Assign(tpl) = rebalance {
            let partitions = to_partitions(tpl);
            info!(partitions = partitions.len(), "Partitions assigned");
            if !send_event(&self.events, GroupEvent::Assigned(partitions)) {
                warn!("Coordinator gone, assignment dropped");
            }
        }
    }

    fn commit_callback(
        &self,
        result: rdkafka::error::KafkaResult<()>,
        _offsets: &TopicPartitionList,
    ) {
        if let Err(e) = result {
            warn!(error = %e, "Offset commit callback reported failure");
        }
    }
}

/// Group member backed by an rdkafka `BaseConsumer`
pub struct KafkaGroupBus {
    consumer: Arc<BaseConsumer<GroupContext>>,
}

impl KafkaGroupBus {
    /// Create the consumer, subscribe, and route callbacks to `events`
    pub fn connect(
        config: &ConsumerConfig,
        events: mpsc::Sender<GroupEvent>,
    ) -> ConsumerResult<Self> {
        config.validate().map_err(ConsumerError::ConfigError)?;

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("max.poll.interval.ms", config.max_poll_interval_ms.to_string())
            .set("auto.offset.reset", &config.auto_offset_reset);

        for (key, value) in &config.kafka_properties {
            if !ALLOWED_KAFKA_PROPS.contains(&key.as_str()) {
                return Err(ConsumerError::ConfigError(format!(
                    "Disallowed Kafka property '{}'",
                    key
                )));
            }
            client_config.set(key, value);
        }

        let context = GroupContext::new(events, config.rebalance_timeout);
        let consumer: BaseConsumer<GroupContext> = client_config
            .create_with_context(context)
            .map_err(|e| {
                ConsumerError::ConnectionError(format!("Failed to create consumer: {}", e))
            })?;

        let topics: Vec<&str> = config.topics.iter().map(|s| s.as_str()).collect();
        consumer
            .subscribe(&topics)
            .map_err(|e| ConsumerError::ConnectionError(format!("Failed to subscribe: {}", e)))?;

        info!(
            brokers = %config.brokers,
            group_id = %config.group_id,
            topics = ?config.topics,
            "Subscribed to topics"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
        })
    }

    /// Poll on a dedicated thread until `shutdown` fires or the bus fails.
    ///
    /// The thread owns a handle to the consumer; join it after the
    /// coordinator has stopped so the consumer is closed there.
    pub fn spawn_poll_loop(
        &self,
        events: mpsc::Sender<GroupEvent>,
        shutdown: CancellationToken,
    ) -> std::io::Result<thread::JoinHandle<()>> {
        let consumer = self.consumer.clone();

        thread::Builder::new()
            .name("kafka-poll".to_string())
            .spawn(move || {
                while !shutdown.is_cancelled() {
                    match consumer.poll(POLL_TIMEOUT) {
                        None => {}
                        Some(Ok(message)) => {
                            let record = BusMessage {
                                topic: message.topic().to_string(),
                                partition: message.partition(),
                                offset: message.offset(),
                                key: message.key().map(|k| k.to_vec()),
                                payload: message.payload().map(|p| p.to_vec()),
                                timestamp: message.timestamp().to_millis(),
                            };
                            if events.blocking_send(GroupEvent::Message(record)).is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) if is_fatal_kafka_error(&e) => {
                            error!(error = %e, "Fatal error while polling");
                            let _ = events.blocking_send(GroupEvent::Fatal(e.into()));
                            break;
                        }
                        Some(Err(e)) => warn!(error = %e, "Error while polling"),
                    }
                }

                consumer.unsubscribe();
                debug!("Poll loop stopped");
            })
    }
}

#[async_trait]
impl OffsetCommitter for KafkaGroupBus {
    async fn commit(&self, offsets: &[(TopicPartition, i64)]) -> ConsumerResult<()> {
        let mut tpl = TopicPartitionList::new();
        for (tp, offset) in offsets {
            tpl.add_partition_offset(&tp.topic, tp.partition, Offset::Offset(*offset))?;
        }

        let consumer = self.consumer.clone();
        tokio::task::spawn_blocking(move || consumer.commit(&tpl, CommitMode::Sync))
            .await
            .map_err(|e| ConsumerError::ChannelError(format!("Commit task failed: {}", e)))??;
        Ok(())
    }
}

impl BusControl for KafkaGroupBus {
    fn pause(&self, partitions: &[TopicPartition]) -> ConsumerResult<()> {
        self.consumer.pause(&to_tpl(partitions))?;
        Ok(())
    }

    fn resume(&self, partitions: &[TopicPartition]) -> ConsumerResult<()> {
        self.consumer.resume(&to_tpl(partitions))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::error::RDKafkaErrorCode;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn test_fatal_client_error_waits_for_room() {
        let (tx, mut rx) = mpsc::channel(1);
        tx.try_send(GroupEvent::Assigned(Vec::new())).unwrap();
        let context = GroupContext::new(tx, Duration::from_secs(1));

        // Channel is full; the poll thread must wait rather than drop it
        let poller = thread::spawn(move || {
            context.error(
                KafkaError::Global(RDKafkaErrorCode::AllBrokersDown),
                "all brokers down",
            );
        });

        runtime().block_on(async {
            assert!(matches!(rx.recv().await, Some(GroupEvent::Assigned(_))));
            assert!(matches!(
                rx.recv().await,
                Some(GroupEvent::Fatal(ConsumerError::ConnectionError(_)))
            ));
        });
        poller.join().unwrap();
    }

    #[test]
    fn test_transient_client_error_is_not_forwarded() {
        let (tx, mut rx) = mpsc::channel(4);
        let context = GroupContext::new(tx, Duration::from_secs(1));

        context.error(
            KafkaError::MessageConsumption(RDKafkaErrorCode::OperationTimedOut),
            "slow broker",
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_revoke_blocks_until_acknowledged() {
        let (tx, mut rx) = mpsc::channel(4);
        let context = GroupContext::new(tx, Duration::from_secs(10));

        let poller = thread::spawn(move || {
            let tpl = to_tpl(&[TopicPartition::new("market_ticks", 3)]);
            context.pre_rebalance(&Rebalance::Revoke(&tpl));
        });

        runtime().block_on(async {
            match rx.recv().await {
                Some(GroupEvent::Revoked { partitions, ack }) => {
                    assert_eq!(partitions, vec![TopicPartition::new("market_ticks", 3)]);
                    ack.acknowledge();
                }
                other => panic!("expected revoke, got {:?}", other),
            }
        });
        poller.join().unwrap();
    }

    #[test]
    fn test_assignment_is_forwarded() {
        let (tx, mut rx) = mpsc::channel(4);
        let context = GroupContext::new(tx, Duration::from_secs(1));

        let tpl = to_tpl(&[
            TopicPartition::new("market_ticks", 0),
            TopicPartition::new("market_ticks", 1),
        ]);
        context.post_rebalance(&Rebalance::Assign(&tpl));

        match rx.try_recv() {
            Ok(GroupEvent::Assigned(partitions)) => assert_eq!(partitions.len(), 2),
            other => panic!("expected assignment, got {:?}", other),
        }
    }
}
