//! Consumer group coordination
//!
//! The [`GroupCoordinator`] turns group membership events into partition
//! workers. The bus adapter feeds it a single ordered stream of
//! [`GroupEvent`]s, so every record for a partition is routed before any
//! revoke of that partition is seen.
//!
//! On revoke the coordinator closes the revoked workers' channels, waits for
//! them to drain, commits their marked offsets and only then acknowledges
//! the revoke back to the bus. Recoverable per-record failures never reach
//! this level; fatal bus errors terminate the whole pipeline.
//!
//! Worker queues are bounded. A record that does not fit is parked in that
//! partition's backlog and the partition is paused on the bus at once; the
//! backlog is flushed in order as the worker catches up. The commit and
//! backpressure timers take precedence over incoming events so a busy bus
//! cannot starve them.

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, timeout_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::consumer::backpressure::{BackpressureController, QueueDepth};
use crate::consumer::config::ConsumerConfig;
use crate::consumer::error::{ConsumerError, ConsumerResult};
use crate::consumer::handler::TickHandler;
use crate::consumer::message::{BusMessage, TopicPartition};
use crate::consumer::offset_manager::{OffsetCommitter, OffsetManager};
use crate::consumer::partition::{PartitionExit, PartitionReport, PartitionWorker};
use crate::consumer::state::{GroupState, GroupStateMachine};

const BACKPRESSURE_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Control surface the coordinator needs from the bus
pub trait BusControl: OffsetCommitter {
    /// Stop fetching for these partitions
    fn pause(&self, partitions: &[TopicPartition]) -> ConsumerResult<()>;

    /// Resume fetching for these partitions
    fn resume(&self, partitions: &[TopicPartition]) -> ConsumerResult<()>;
}

/// Acknowledgement the bus waits on before giving up revoked partitions
#[derive(Debug)]
pub struct RevokeAck(std_mpsc::Sender<()>);

impl RevokeAck {
    /// Create an acknowledgement and the receiver the bus blocks on
    pub fn channel() -> (Self, std_mpsc::Receiver<()>) {
        let (tx, rx) = std_mpsc::channel();
        (Self(tx), rx)
    }

    pub fn acknowledge(self) {
        // The bus may have stopped waiting already
        let _ = self.0.send(());
    }
}

/// Everything the bus tells the coordinator
#[derive(Debug)]
pub enum GroupEvent {
    /// Partitions newly assigned to this member
    Assigned(Vec<TopicPartition>),
    /// Partitions being taken away; acknowledge once drained and committed
    Revoked {
        partitions: Vec<TopicPartition>,
        ack: RevokeAck,
    },
    /// A record read from an assigned partition
    Message(BusMessage),
    /// The bus cannot continue
    Fatal(ConsumerError),
}

struct PartitionHandle {
    records: mpsc::Sender<BusMessage>,
    backlog: VecDeque<BusMessage>,
    depth: QueueDepth,
    cancel: CancellationToken,
    task: JoinHandle<PartitionExit>,
    paused: bool,
}

pub struct GroupCoordinator {
    config: ConsumerConfig,
    handler: Arc<dyn TickHandler>,
    bus: Arc<dyn BusControl>,
    offsets: OffsetManager,
    state: GroupStateMachine,
    workers: HashMap<TopicPartition, PartitionHandle>,
    backpressure: BackpressureController,
    reports: Option<mpsc::UnboundedSender<PartitionReport>>,
    shutdown: CancellationToken,
}

impl PartitionHandle {
    /// Move parked records into the worker queue until it is full again
    fn flush_backlog(&mut self, tp: &TopicPartition) {
        while let Some(record) = self.backlog.pop_front() {
            self.depth.increment();
            match self.records.try_send(record) {
                Ok(()) => {}
                Err(TrySendError::Full(record)) => {
                    self.depth.decrement();
                    self.backlog.push_front(record);
                    return;
                }
                Err(TrySendError::Closed(_)) => {
                    self.depth.decrement();
                    warn!(
                        partition = %tp,
                        dropped = self.backlog.len() + 1,
                        "Partition worker is gone, records will be replayed"
                    );
                    self.backlog.clear();
                    return;
                }
            }
        }
    }

    /// Records queued, in flight or parked for this partition
    fn load(&self) -> usize {
        self.depth.get() + self.backlog.len()
    }

    fn pause(&mut self, bus: &dyn BusControl, tp: &TopicPartition) {
        match bus.pause(std::slice::from_ref(tp)) {
            Ok(()) => {
                self.paused = true;
                info!(partition = %tp, load = self.load(), "Paused partition");
            }
            Err(e) => warn!(partition = %tp, error = %e, "Failed to pause partition"),
        }
    }

    fn resume(&mut self, bus: &dyn BusControl, tp: &TopicPartition) {
        match bus.resume(std::slice::from_ref(tp)) {
            Ok(()) => {
                self.paused = false;
                info!(partition = %tp, load = self.load(), "Resumed partition");
            }
            Err(e) => warn!(partition = %tp, error = %e, "Failed to resume partition"),
        }
    }
}

impl GroupCoordinator {
    pub fn new(
        config: ConsumerConfig,
        handler: Arc<dyn TickHandler>,
        bus: Arc<dyn BusControl>,
        shutdown: CancellationToken,
    ) -> Self {
        let backpressure = BackpressureController::new(
            config.channel_buffer_size,
            config.pause_threshold,
            config.resume_threshold,
        );

        Self {
            config,
            handler,
            bus,
            offsets: OffsetManager::new(),
            state: GroupStateMachine::new(),
            workers: HashMap::new(),
            backpressure,
            reports: None,
            shutdown,
        }
    }

    /// Forward every partition throughput summary to `sink`
    pub fn with_report_sink(mut self, sink: mpsc::UnboundedSender<PartitionReport>) -> Self {
        self.reports = Some(sink);
        self
    }

    /// Watch group state transitions
    pub fn state_watcher(&self) -> watch::Receiver<GroupState> {
        self.state.subscribe()
    }

    /// Offsets marked by this coordinator's workers
    pub fn offsets(&self) -> OffsetManager {
        self.offsets.clone()
    }

    /// Run until shutdown, the end of the event stream, or a fatal error.
    ///
    /// Workers are always stopped and marked offsets committed before this
    /// returns. A fatal error is returned as `Err` after cleanup.
    pub async fn run(mut self, mut events: mpsc::Receiver<GroupEvent>) -> ConsumerResult<()> {
        let shutdown = self.shutdown.clone();

        let mut commit_timer = interval_at(
            Instant::now() + self.config.commit_interval,
            self.config.commit_interval,
        );
        commit_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut pressure_timer = interval(BACKPRESSURE_CHECK_INTERVAL);
        pressure_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            group_id = %self.config.group_id,
            topics = ?self.config.topics,
            handler = self.handler.name(),
            "Consumer group coordinator started"
        );

        let result = loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break Ok(());
                }

                _ = commit_timer.tick() => self.commit_marked().await,

                _ = pressure_timer.tick() => self.apply_backpressure(),

                event = events.recv() => match event {
                    Some(GroupEvent::Fatal(e)) => {
                        error!(error = %e, "Fatal bus error");
                        break Err(e);
                    }
                    Some(event) => {
                        if let Err(e) = self.handle_event(event).await {
                            if e.is_fatal() {
                                error!(error = %e, "Fatal coordinator error");
                                break Err(e);
                            }
                            warn!(error = %e, "Group event failed");
                        }
                    }
                    None => {
                        info!("Group event stream closed");
                        break Ok(());
                    }
                },
            }
        };

        self.terminate().await;
        result
    }

    async fn handle_event(&mut self, event: GroupEvent) -> ConsumerResult<()> {
        match event {
            GroupEvent::Assigned(partitions) => {
                for tp in partitions {
                    if !self.workers.contains_key(&tp) {
                        self.spawn_worker(tp);
                    }
                }
                info!(partitions = self.workers.len(), "Partitions assigned");
                self.state.transition(GroupState::Stable)
            }
            GroupEvent::Revoked { partitions, ack } => {
                self.state.transition(GroupState::Rebalancing)?;
                self.revoke(&partitions).await;
                ack.acknowledge();
                if self.workers.is_empty() {
                    Ok(())
                } else {
                    self.state.transition(GroupState::Stable)
                }
            }
            GroupEvent::Message(record) => {
                self.route(record);
                Ok(())
            }
            GroupEvent::Fatal(e) => Err(e),
        }
    }

    fn route(&mut self, record: BusMessage) {
        let tp = record.topic_partition();
        let Some(handle) = self.workers.get_mut(&tp) else {
            debug!(
                partition = %tp,
                offset = record.offset,
                "Dropping record for unowned partition"
            );
            return;
        };

        handle.flush_backlog(&tp);
        if !handle.backlog.is_empty() {
            handle.backlog.push_back(record);
            return;
        }

        handle.depth.increment();
        match handle.records.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(record)) => {
                handle.depth.decrement();
                handle.backlog.push_back(record);
                if !handle.paused {
                    handle.pause(&*self.bus, &tp);
                }
            }
            Err(TrySendError::Closed(_)) => {
                handle.depth.decrement();
                warn!(partition = %tp, "Partition worker is gone, record will be replayed");
            }
        }
    }

    fn spawn_worker(&mut self, tp: TopicPartition) {
        let (records, rx) = mpsc::channel(self.config.channel_buffer_size.max(1));
        let depth = QueueDepth::new();
        let cancel = self.shutdown.child_token();

        let worker = PartitionWorker::new(
            tp.clone(),
            rx,
            self.handler.clone(),
            self.offsets.clone(),
            depth.clone(),
            cancel.clone(),
        )
        .with_metrics_interval(self.config.metrics_interval)
        .with_report_sink(self.reports.clone());

        info!(partition = %tp, "Starting partition worker");
        let task = tokio::spawn(worker.run());

        self.workers.insert(
            tp,
            PartitionHandle {
                records,
                backlog: VecDeque::new(),
                depth,
                cancel,
                task,
                paused: false,
            },
        );
    }

    /// Drain revoked workers, then commit what they marked
    async fn revoke(&mut self, partitions: &[TopicPartition]) {
        let draining: Vec<(TopicPartition, PartitionHandle)> = partitions
            .iter()
            .filter_map(|tp| self.workers.remove(tp).map(|handle| (tp.clone(), handle)))
            .collect();

        info!(partitions = draining.len(), "Draining revoked partitions");

        let deadline = Instant::now() + self.config.rebalance_timeout;
        for (tp, handle) in draining {
            let PartitionHandle {
                records,
                backlog,
                cancel,
                mut task,
                ..
            } = handle;
            drop(records);
            if !backlog.is_empty() {
                debug!(
                    partition = %tp,
                    parked = backlog.len(),
                    "Leaving parked records for the next owner"
                );
            }

            match timeout_at(deadline, &mut task).await {
                Ok(Ok(exit)) => debug!(partition = %tp, ?exit, "Partition worker stopped"),
                Ok(Err(e)) => error!(partition = %tp, error = %e, "Partition worker panicked"),
                Err(_) => {
                    warn!(partition = %tp, "Partition did not drain in time, cancelling");
                    cancel.cancel();
                    let _ = task.await;
                }
            }
        }

        if let Err(e) = self.offsets.commit_partitions(&*self.bus, partitions).await {
            warn!(error = %e, "Failed to commit offsets for revoked partitions");
        }
        self.offsets.forget(partitions);
    }

    async fn commit_marked(&self) {
        if let Err(e) = self.offsets.commit_all(&*self.bus).await {
            warn!(error = %e, "Periodic offset commit failed");
        }
    }

    fn apply_backpressure(&mut self) {
        for (tp, handle) in self.workers.iter_mut() {
            handle.flush_backlog(tp);
            let load = handle.load();

            if !handle.paused && self.backpressure.should_pause(load) {
                handle.pause(&*self.bus, tp);
            } else if handle.paused
                && handle.backlog.is_empty()
                && self.backpressure.should_resume(load)
            {
                handle.resume(&*self.bus, tp);
            }
        }
    }

    /// Cancel every worker, wait for them, commit, and enter `Terminated`
    async fn terminate(&mut self) {
        let handles: Vec<(TopicPartition, PartitionHandle)> = self.workers.drain().collect();
        for (_, handle) in &handles {
            handle.cancel.cancel();
        }

        let deadline = Instant::now() + self.config.shutdown_timeout;
        for (tp, handle) in handles {
            if timeout_at(deadline, handle.task).await.is_err() {
                warn!(partition = %tp, "Partition worker did not stop before shutdown timeout");
            }
        }

        match self.offsets.commit_all(&*self.bus).await {
            Ok(count) => info!(partitions = count, "Final offset commit"),
            Err(e) => error!(error = %e, "Final offset commit failed"),
        }

        if let Err(e) = self.state.transition(GroupState::Terminated) {
            warn!(error = %e, "Unexpected state on termination");
        }
    }
}
