//! Shared harness for pipeline tests: an in-process bus in place of Kafka

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tick_alerts::consumer::{
    BusControl, BusMessage, ConsumerConfig, ConsumerResult, GroupCoordinator, GroupEvent,
    GroupState, OffsetCommitter, OffsetManager, PartitionReport, RevokeAck, TickHandler,
    TopicPartition,
};
use tick_alerts::tick::{self, Tick};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const TOPIC: &str = "market_ticks";

/// Bus stand-in that records commits and pause state
#[derive(Default)]
pub struct RecordingBus {
    pub commits: Mutex<Vec<Vec<(TopicPartition, i64)>>>,
    pub paused: Mutex<HashSet<TopicPartition>>,
    pub pause_calls: Mutex<usize>,
}

impl RecordingBus {
    /// Highest position committed for a partition
    pub fn committed(&self, tp: &TopicPartition) -> Option<i64> {
        self.commits
            .lock()
            .iter()
            .flatten()
            .filter(|(p, _)| p == tp)
            .map(|(_, off)| *off)
            .max()
    }

    pub fn is_paused(&self, tp: &TopicPartition) -> bool {
        self.paused.lock().contains(tp)
    }
}

#[async_trait]
impl OffsetCommitter for RecordingBus {
    async fn commit(&self, offsets: &[(TopicPartition, i64)]) -> ConsumerResult<()> {
        self.commits.lock().push(offsets.to_vec());
        Ok(())
    }
}

impl BusControl for RecordingBus {
    fn pause(&self, partitions: &[TopicPartition]) -> ConsumerResult<()> {
        *self.pause_calls.lock() += 1;
        self.paused.lock().extend(partitions.iter().cloned());
        Ok(())
    }

    fn resume(&self, partitions: &[TopicPartition]) -> ConsumerResult<()> {
        let mut paused = self.paused.lock();
        for tp in partitions {
            paused.remove(tp);
        }
        Ok(())
    }
}

/// A running coordinator fed through an in-process event channel
pub struct Pipeline {
    pub events: mpsc::Sender<GroupEvent>,
    pub reports: mpsc::UnboundedReceiver<PartitionReport>,
    pub state: watch::Receiver<GroupState>,
    pub offsets: OffsetManager,
    pub bus: Arc<RecordingBus>,
    pub shutdown: CancellationToken,
    pub task: JoinHandle<ConsumerResult<()>>,
}

pub fn test_config() -> ConsumerConfig {
    ConsumerConfig::builder()
        .metrics_interval(Duration::from_secs(60))
        .commit_interval(Duration::from_secs(60))
        .rebalance_timeout(Duration::from_secs(5))
        .shutdown_timeout(Duration::from_secs(5))
        .build()
}

pub fn start(handler: Arc<dyn TickHandler>, config: ConsumerConfig) -> Pipeline {
    let (events, events_rx) = mpsc::channel(1024);
    let (report_tx, reports) = mpsc::unbounded_channel();
    let bus = Arc::new(RecordingBus::default());
    let shutdown = CancellationToken::new();

    let coordinator = GroupCoordinator::new(config, handler, bus.clone(), shutdown.clone())
        .with_report_sink(report_tx);
    let state = coordinator.state_watcher();
    let offsets = coordinator.offsets();
    let task = tokio::spawn(coordinator.run(events_rx));

    Pipeline {
        events,
        reports,
        state,
        offsets,
        bus,
        shutdown,
        task,
    }
}

pub fn partition(n: i32) -> TopicPartition {
    TopicPartition::new(TOPIC, n)
}

pub fn tick_record(partition: i32, offset: i64, symbol: &str, price: f64) -> BusMessage {
    BusMessage::new(
        TOPIC,
        partition,
        offset,
        tick::encode(&Tick::new(symbol, price, 1_700_000_000_000 + offset)),
    )
    .with_key(symbol.as_bytes())
}

impl Pipeline {
    pub async fn assign(&self, partitions: &[i32]) {
        let assigned = partitions.iter().map(|p| partition(*p)).collect();
        self.events
            .send(GroupEvent::Assigned(assigned))
            .await
            .unwrap();
    }

    pub async fn send(&self, record: BusMessage) {
        self.events.send(GroupEvent::Message(record)).await.unwrap();
    }

    /// Send ticks for one partition at consecutive offsets starting at `first_offset`
    pub async fn send_ticks(&self, partition: i32, first_offset: i64, ticks: &[(&str, f64)]) {
        for (i, (symbol, price)) in ticks.iter().enumerate() {
            self.send(tick_record(partition, first_offset + i as i64, symbol, *price))
                .await;
        }
    }

    /// Revoke partitions and wait until the coordinator acknowledges.
    ///
    /// Returns `false` if no acknowledgement arrived in time.
    pub async fn revoke(&self, partitions: &[i32]) -> bool {
        let (ack, ack_rx) = RevokeAck::channel();
        let revoked = partitions.iter().map(|p| partition(*p)).collect();
        self.events
            .send(GroupEvent::Revoked {
                partitions: revoked,
                ack,
            })
            .await
            .unwrap();

        tokio::task::spawn_blocking(move || ack_rx.recv_timeout(Duration::from_secs(10)).is_ok())
            .await
            .unwrap()
    }

    /// Wait until the group reaches `state`
    pub async fn reached(&self, state: GroupState) -> bool {
        wait_until(Duration::from_secs(5), || *self.state.borrow() == state).await
    }

    /// Wait until `offset` is the highest marked offset of partition `p`
    pub async fn marked(&self, p: i32, offset: i64) -> bool {
        let tp = partition(p);
        let marked = || self.offsets.pending_offset(&tp) == Some(offset);
        wait_until(Duration::from_secs(5), marked).await
    }

    /// Stop the coordinator and return its result
    pub async fn stop(self) -> ConsumerResult<()> {
        self.shutdown.cancel();
        self.task.await.unwrap()
    }
}

/// Poll `condition` until it holds or `limit` passes
pub async fn wait_until<F>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Await a future with a generous upper bound
pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(10), fut)
        .await
        .expect("timed out")
}
