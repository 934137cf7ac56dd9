//! Per-partition throughput counters
//!
//! Each partition worker owns its own [`PartitionMetrics`]. Counters are
//! never shared between partitions, so recording needs no synchronization;
//! throughput is reported per partition and never aggregated globally.

use serde::Serialize;

/// Counts reported by one timer fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThroughputSummary {
    pub ticks_processed: u64,
    pub alerts_triggered: u64,
}

/// Worker-local accumulator
#[derive(Debug, Default)]
pub struct PartitionMetrics {
    ticks_processed: u64,
    alerts_triggered: u64,
}

impl PartitionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one successfully decoded tick
    pub fn record_tick(&mut self) {
        self.ticks_processed += 1;
    }

    /// Count alerts that actually transitioned to triggered
    pub fn record_triggers(&mut self, count: u64) {
        self.alerts_triggered += count;
    }

    /// Take the counts accumulated since the last call and reset to zero.
    ///
    /// Returns `None` when nothing happened, so idle partitions stay quiet.
    pub fn take_summary(&mut self) -> Option<ThroughputSummary> {
        if self.ticks_processed == 0 && self.alerts_triggered == 0 {
            return None;
        }

        let summary = ThroughputSummary {
            ticks_processed: self.ticks_processed,
            alerts_triggered: self.alerts_triggered,
        };
        self.ticks_processed = 0;
        self.alerts_triggered = 0;
        Some(summary)
    }
}
