//! Manual offset management
//!
//! Workers mark the offset of every record they have finished with. Marked
//! offsets are committed periodically, when a partition is revoked, and once
//! more on shutdown. The committed position is always `last marked + 1`.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

use crate::consumer::error::ConsumerResult;
use crate::consumer::message::TopicPartition;

/// Something that can durably record consumer positions for the group
#[async_trait]
pub trait OffsetCommitter: Send + Sync {
    /// Commit the given next-to-read positions
    async fn commit(&self, offsets: &[(TopicPartition, i64)]) -> ConsumerResult<()>;
}

/// Tracks marked offsets per partition and commits them in batches
#[derive(Debug, Clone, Default)]
pub struct OffsetManager {
    /// Last processed offset per partition, not yet committed
    pending: Arc<Mutex<HashMap<TopicPartition, i64>>>,
    /// Last position handed to a successful commit
    committed: Arc<Mutex<HashMap<TopicPartition, i64>>>,
}

impl OffsetManager {
    /// Create a new offset manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an offset as processed
    pub fn mark_offset(&self, tp: &TopicPartition, offset: i64) {
        let mut pending = self.pending.lock();
        let entry = pending.entry(tp.clone()).or_insert(offset);
        if offset > *entry {
            *entry = offset;
        }
        debug!(partition = %tp, offset, "Marked offset");
    }

    /// Commit everything marked so far.
    ///
    /// Entries stay pending when the commit fails so the next attempt
    /// picks them up again.
    pub async fn commit_all<C>(&self, committer: &C) -> ConsumerResult<usize>
    where
        C: OffsetCommitter + ?Sized,
    {
        let snapshot: Vec<(TopicPartition, i64)> = {
            let pending = self.pending.lock();
            pending.iter().map(|(tp, off)| (tp.clone(), *off)).collect()
        };
        self.commit_snapshot(committer, snapshot).await
    }

    /// Commit marked offsets for the given partitions only
    pub async fn commit_partitions<C>(
        &self,
        committer: &C,
        partitions: &[TopicPartition],
    ) -> ConsumerResult<usize>
    where
        C: OffsetCommitter + ?Sized,
    {
        let snapshot: Vec<(TopicPartition, i64)> = {
            let pending = self.pending.lock();
            partitions
                .iter()
                .filter_map(|tp| pending.get(tp).map(|off| (tp.clone(), *off)))
                .collect()
        };
        self.commit_snapshot(committer, snapshot).await
    }

    async fn commit_snapshot<C>(
        &self,
        committer: &C,
        snapshot: Vec<(TopicPartition, i64)>,
    ) -> ConsumerResult<usize>
    where
        C: OffsetCommitter + ?Sized,
    {
        if snapshot.is_empty() {
            return Ok(0);
        }

        let positions: Vec<(TopicPartition, i64)> = snapshot
            .iter()
            .map(|(tp, off)| (tp.clone(), off + 1))
            .collect();

        if let Err(e) = committer.commit(&positions).await {
            error!(error = %e, count = positions.len(), "Failed to commit offsets");
            return Err(e);
        }

        let mut pending = self.pending.lock();
        let mut committed = self.committed.lock();
        for (tp, off) in snapshot {
            // A worker may have marked a newer offset while the commit was in flight
            if pending.get(&tp) == Some(&off) {
                pending.remove(&tp);
            }
            committed.insert(tp, off + 1);
        }

        debug!(count = positions.len(), "Committed offsets");
        Ok(positions.len())
    }

    /// Drop pending state for partitions this member no longer owns
    pub fn forget(&self, partitions: &[TopicPartition]) {
        let mut pending = self.pending.lock();
        for tp in partitions {
            pending.remove(tp);
        }
    }

    /// Last committed position for a partition
    pub fn committed_offset(&self, tp: &TopicPartition) -> Option<i64> {
        self.committed.lock().get(tp).copied()
    }

    /// Last marked but uncommitted offset for a partition
    pub fn pending_offset(&self, tp: &TopicPartition) -> Option<i64> {
        self.pending.lock().get(tp).copied()
    }

    /// Get pending offsets count
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::error::ConsumerError;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingCommitter {
        fail: AtomicBool,
        commits: Mutex<Vec<Vec<(TopicPartition, i64)>>>,
    }

    #[async_trait]
    impl OffsetCommitter for RecordingCommitter {
        async fn commit(&self, offsets: &[(TopicPartition, i64)]) -> ConsumerResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ConsumerError::ConnectionError("broker gone".to_string()));
            }
            self.commits.lock().push(offsets.to_vec());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_commits_next_position() {
        let manager = OffsetManager::new();
        let committer = RecordingCommitter::default();
        let tp = TopicPartition::new("market_ticks", 0);

        manager.mark_offset(&tp, 4);
        manager.mark_offset(&tp, 5);

        assert_eq!(manager.commit_all(&committer).await.unwrap(), 1);
        assert_eq!(committer.commits.lock()[0], vec![(tp.clone(), 6)]);
        assert_eq!(manager.committed_offset(&tp), Some(6));
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_marks_never_move_backwards() {
        let manager = OffsetManager::new();
        let tp = TopicPartition::new("market_ticks", 1);

        manager.mark_offset(&tp, 10);
        manager.mark_offset(&tp, 7);
        assert_eq!(manager.pending_offset(&tp), Some(10));
    }

    #[tokio::test]
    async fn test_failed_commit_keeps_pending() {
        let manager = OffsetManager::new();
        let committer = RecordingCommitter::default();
        committer.fail.store(true, Ordering::SeqCst);
        let tp = TopicPartition::new("market_ticks", 0);

        manager.mark_offset(&tp, 3);
        assert!(manager.commit_all(&committer).await.is_err());
        assert_eq!(manager.pending_offset(&tp), Some(3));

        committer.fail.store(false, Ordering::SeqCst);
        assert_eq!(manager.commit_all(&committer).await.unwrap(), 1);
        assert_eq!(manager.committed_offset(&tp), Some(4));
    }

    #[tokio::test]
    async fn test_commit_selected_partitions() {
        let manager = OffsetManager::new();
        let committer = RecordingCommitter::default();
        let p0 = TopicPartition::new("market_ticks", 0);
        let p1 = TopicPartition::new("market_ticks", 1);

        manager.mark_offset(&p0, 1);
        manager.mark_offset(&p1, 2);

        manager
            .commit_partitions(&committer, std::slice::from_ref(&p1))
            .await
            .unwrap();
        assert_eq!(manager.pending_offset(&p0), Some(1));
        assert_eq!(manager.pending_offset(&p1), None);
        assert_eq!(manager.committed_offset(&p1), Some(3));
    }

    #[tokio::test]
    async fn test_nothing_marked_is_a_noop() {
        let manager = OffsetManager::new();
        let committer = RecordingCommitter::default();
        assert_eq!(manager.commit_all(&committer).await.unwrap(), 0);
        assert!(committer.commits.lock().is_empty());
    }
}
