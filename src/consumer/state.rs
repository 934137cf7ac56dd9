//! Consumer group lifecycle state
//!
//! ```text
//! JOINING ──assign──▶ STABLE ──revoke/assign──▶ REBALANCING ──assign──▶ STABLE
//!    │                  │                            │
//!    └──────────────────┴────────────────────────────┴──▶ TERMINATED
//! ```
//!
//! `TERMINATED` is reached on an explicit shutdown or an unrecoverable bus
//! failure and has no outgoing transitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::info;

use crate::consumer::error::{ConsumerError, ConsumerResult};

/// Lifecycle state of this member of the consumer group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupState {
    /// Connected, waiting for the first partition assignment
    Joining,
    /// Assigned partitions are running
    Stable,
    /// Revoked partitions are draining or a new assignment is pending
    Rebalancing,
    /// Stopped for good
    Terminated,
}

impl GroupState {
    /// Whether moving from `self` to `target` is allowed.
    ///
    /// Re-entering the current state is allowed for every state except
    /// `Terminated`.
    pub fn can_transition_to(&self, target: GroupState) -> bool {
        use GroupState::*;

        match (self, target) {
            (Terminated, _) => false,
            (_, Terminated) => true,
            (from, to) if *from == to => true,
            (Joining, Stable) | (Joining, Rebalancing) => true,
            (Stable, Rebalancing) => true,
            (Rebalancing, Stable) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GroupState::Joining => "JOINING",
            GroupState::Stable => "STABLE",
            GroupState::Rebalancing => "REBALANCING",
            GroupState::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for GroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the group state and publishes every change to watchers.
#[derive(Debug)]
pub struct GroupStateMachine {
    state_tx: watch::Sender<GroupState>,
    entered_at: Instant,
}

impl GroupStateMachine {
    /// Create a state machine in `Joining`
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(GroupState::Joining);
        Self {
            state_tx,
            entered_at: Instant::now(),
        }
    }

    /// Current state
    pub fn current(&self) -> GroupState {
        *self.state_tx.borrow()
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<GroupState> {
        self.state_tx.subscribe()
    }

    /// Move to `target`, refusing transitions the lifecycle does not allow
    pub fn transition(&mut self, target: GroupState) -> ConsumerResult<()> {
        let from = self.current();
        if !from.can_transition_to(target) {
            return Err(ConsumerError::InvalidTransition { from, to: target });
        }
        if from == target {
            return Ok(());
        }

        info!(
            from = %from,
            to = %target,
            after_ms = self.entered_at.elapsed().as_millis() as u64,
            "Consumer group state changed"
        );
        self.entered_at = Instant::now();
        self.state_tx.send_replace(target);
        Ok(())
    }

    /// Whether the machine has reached its final state
    pub fn is_terminated(&self) -> bool {
        self.current() == GroupState::Terminated
    }
}

impl Default for GroupStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
