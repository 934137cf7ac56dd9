//! Backpressure control for the consumer
//!
//! Records are handed to partition workers faster than a slow store can
//! absorb them. Each worker's queue depth is tracked, and the coordinator
//! pauses fetching for a partition once its queue fills past the pause
//! threshold, resuming when it drains below the resume threshold. Other
//! partitions keep flowing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Number of records queued for one partition worker but not yet finished
#[derive(Debug, Clone, Default)]
pub struct QueueDepth(Arc<AtomicUsize>);

impl QueueDepth {
    pub fn new() -> Self {
        Self::default()
    }

    /// A record was queued
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// A record was finished
    pub fn decrement(&self) {
        // Saturate so a stray decrement cannot wrap around
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

/// Pause/resume decisions based on queue depth
#[derive(Debug, Clone, Copy)]
pub struct BackpressureController {
    capacity: usize,
    pause_threshold: f64,
    resume_threshold: f64,
}

impl BackpressureController {
    /// Create a new backpressure controller
    pub fn new(capacity: usize, pause_threshold: f64, resume_threshold: f64) -> Self {
        Self {
            capacity: capacity.max(1),
            pause_threshold,
            resume_threshold,
        }
    }

    /// Fill ratio of a queue
    pub fn utilization(&self, depth: usize) -> f64 {
        depth as f64 / self.capacity as f64
    }

    /// Whether a running partition should be paused
    pub fn should_pause(&self, depth: usize) -> bool {
        self.utilization(depth) >= self.pause_threshold
    }

    /// Whether a paused partition may resume
    pub fn should_resume(&self, depth: usize) -> bool {
        self.utilization(depth) <= self.resume_threshold
    }
}
