//! Partition claim processing
//!
//! One [`PartitionWorker`] runs per claimed partition. It owns the receiving
//! end of that partition's record channel and a worker-local
//! [`PartitionMetrics`], so no two workers ever share a counter or a queue.
//! Records are handled strictly in arrival order.
//!
//! The loop waits on three sources with fixed precedence when several are
//! ready at once:
//!
//! 1. cancellation: return at once, leaving unmarked records for replay
//! 2. the metrics timer: log and reset the throughput counters
//! 3. the next record: decode, run the handler, mark the offset
//!
//! When the channel is closed by the coordinator (partition revoked) the
//! worker finishes whatever is still queued, reports a last summary and
//! exits.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::consumer::backpressure::QueueDepth;
use crate::consumer::handler::TickHandler;
use crate::consumer::message::{BusMessage, TopicPartition};
use crate::consumer::metrics::{PartitionMetrics, ThroughputSummary};
use crate::consumer::offset_manager::OffsetManager;
use crate::tick;

/// A throughput summary tagged with the partition that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionReport {
    pub partition: TopicPartition,
    pub summary: ThroughputSummary,
}

/// Why a worker stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionExit {
    /// The channel closed and every queued record was handled
    Drained,
    /// Cancellation arrived first
    Cancelled,
}

pub struct PartitionWorker {
    partition: TopicPartition,
    records: mpsc::Receiver<BusMessage>,
    handler: Arc<dyn TickHandler>,
    offsets: OffsetManager,
    depth: QueueDepth,
    cancel: CancellationToken,
    metrics: PartitionMetrics,
    metrics_interval: Duration,
    reports: Option<mpsc::UnboundedSender<PartitionReport>>,
}

impl PartitionWorker {
    pub fn new(
        partition: TopicPartition,
        records: mpsc::Receiver<BusMessage>,
        handler: Arc<dyn TickHandler>,
        offsets: OffsetManager,
        depth: QueueDepth,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            partition,
            records,
            handler,
            offsets,
            depth,
            cancel,
            metrics: PartitionMetrics::new(),
            metrics_interval: Duration::from_secs(10),
            reports: None,
        }
    }

    /// Set how often throughput is summarized
    pub fn with_metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }

    /// Also deliver every emitted summary to `sink`
    pub fn with_report_sink(
        mut self,
        sink: Option<mpsc::UnboundedSender<PartitionReport>>,
    ) -> Self {
        self.reports = sink;
        self
    }

    /// Run until the channel is drained or the worker is cancelled
    pub async fn run(mut self) -> PartitionExit {
        let cancel = self.cancel.clone();
        let mut timer = interval_at(Instant::now() + self.metrics_interval, self.metrics_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(
            partition = %self.partition,
            handler = self.handler.name(),
            "Partition worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(partition = %self.partition, "Partition worker cancelled");
                    return PartitionExit::Cancelled;
                }

                _ = timer.tick() => self.report(),

                record = self.records.recv() => match record {
                    Some(record) => {
                        if !self.process(record, &cancel).await {
                            debug!(
                                partition = %self.partition,
                                "Partition worker cancelled mid-record"
                            );
                            return PartitionExit::Cancelled;
                        }
                    }
                    None => {
                        self.report();
                        debug!(partition = %self.partition, "Partition worker drained");
                        return PartitionExit::Drained;
                    }
                },
            }
        }
    }

    /// Handle one record. Returns `false` if cancelled before the offset was marked.
    async fn process(&mut self, record: BusMessage, cancel: &CancellationToken) -> bool {
        match tick::decode(record.payload()) {
            Ok(tick) => {
                self.metrics.record_tick();

                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return false,
                    result = self.handler.handle(&tick) => result,
                };

                match result {
                    Ok(outcome) => self.metrics.record_triggers(outcome.alerts_triggered),
                    Err(e) => {
                        error!(
                            topic = %self.partition.topic,
                            partition = self.partition.partition,
                            offset = record.offset,
                            symbol = %tick.symbol,
                            error = %e,
                            "Alert check failed"
                        );
                    }
                }
            }
            Err(e) => {
                warn!(
                    topic = %self.partition.topic,
                    partition = self.partition.partition,
                    offset = record.offset,
                    error = %e,
                    "Skipping undecodable tick"
                );
            }
        }

        self.offsets.mark_offset(&self.partition, record.offset);
        self.depth.decrement();
        true
    }

    fn report(&mut self) {
        let Some(summary) = self.metrics.take_summary() else {
            return;
        };

        info!(
            topic = %self.partition.topic,
            partition = self.partition.partition,
            ticks_processed = summary.ticks_processed,
            alerts_triggered = summary.alerts_triggered,
            "partition throughput"
        );

        if let Some(sink) = &self.reports {
            let _ = sink.send(PartitionReport {
                partition: self.partition.clone(),
                summary,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::handler::{ThroughputHandler, TickOutcome};
    use crate::consumer::error::ConsumerResult;
    use crate::tick::Tick;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Records the prices it sees, in order
    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<f64>>,
    }

    #[async_trait]
    impl TickHandler for RecordingHandler {
        async fn handle(&self, tick: &Tick) -> ConsumerResult<TickOutcome> {
            self.seen.lock().push(tick.price);
            Ok(TickOutcome {
                alerts_matched: 1,
                alerts_triggered: 1,
                commit_failures: 0,
            })
        }
    }

    struct Harness {
        tx: mpsc::Sender<BusMessage>,
        reports: mpsc::UnboundedReceiver<PartitionReport>,
        offsets: OffsetManager,
        cancel: CancellationToken,
        worker: PartitionWorker,
    }

    fn harness(handler: Arc<dyn TickHandler>) -> Harness {
        let (tx, rx) = mpsc::channel(16);
        let (report_tx, reports) = mpsc::unbounded_channel();
        let offsets = OffsetManager::new();
        let cancel = CancellationToken::new();
        let worker = PartitionWorker::new(
            TopicPartition::new("market_ticks", 0),
            rx,
            handler,
            offsets.clone(),
            QueueDepth::new(),
            cancel.clone(),
        )
        .with_metrics_interval(Duration::from_secs(1))
        .with_report_sink(Some(report_tx));

        Harness {
            tx,
            reports,
            offsets,
            cancel,
            worker,
        }
    }

    fn record(offset: i64, price: f64) -> BusMessage {
        BusMessage::new(
            "market_ticks",
            0,
            offset,
            tick::encode(&Tick::new("AAPL", price, offset)),
        )
    }

    #[tokio::test]
    async fn test_drains_in_order_and_marks_offsets() {
        let handler = Arc::new(RecordingHandler::default());
        let mut h = harness(handler.clone());

        for (offset, price) in [(0, 149.0), (1, 151.0), (2, 152.0)] {
            h.tx.try_send(record(offset, price)).unwrap();
        }
        drop(h.tx);

        assert_eq!(h.worker.run().await, PartitionExit::Drained);
        assert_eq!(*handler.seen.lock(), vec![149.0, 151.0, 152.0]);
        assert_eq!(
            h.offsets.pending_offset(&TopicPartition::new("market_ticks", 0)),
            Some(2)
        );

        let report = h.reports.try_recv().unwrap();
        assert_eq!(report.summary.ticks_processed, 3);
        assert_eq!(report.summary.alerts_triggered, 3);
    }

    #[tokio::test]
    async fn test_undecodable_record_is_skipped_but_marked() {
        let handler = Arc::new(RecordingHandler::default());
        let mut h = harness(handler.clone());

        h.tx
            .try_send(BusMessage::new("market_ticks", 0, 7, vec![0xff, 0xff, 0xff]))
            .unwrap();
        drop(h.tx);

        assert_eq!(h.worker.run().await, PartitionExit::Drained);
        assert!(handler.seen.lock().is_empty());
        assert_eq!(
            h.offsets.pending_offset(&TopicPartition::new("market_ticks", 0)),
            Some(7)
        );
        assert!(h.reports.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel_returns_without_marking() {
        let mut h = harness(Arc::new(ThroughputHandler));
        h.cancel.cancel();
        h.tx.try_send(record(0, 1.0)).unwrap();

        assert_eq!(h.worker.run().await, PartitionExit::Cancelled);
        assert_eq!(h.offsets.pending_count(), 0);
        assert!(h.reports.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_reports_then_resets() {
        let h = harness(Arc::new(ThroughputHandler));
        let Harness {
            tx,
            mut reports,
            cancel,
            worker,
            ..
        } = h;
        let task = tokio::spawn(worker.run());

        for offset in 0..4 {
            tx.try_send(record(offset, 10.0)).unwrap();
        }

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let report = reports.recv().await.unwrap();
        assert_eq!(report.summary.ticks_processed, 4);
        assert_eq!(report.summary.alerts_triggered, 0);

        // An idle window emits nothing
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(reports.try_recv().is_err());

        cancel.cancel();
        assert_eq!(task.await.unwrap(), PartitionExit::Cancelled);
    }
}
