//! Reconciliation queues
//!
//! Two priority queues (under- and over-replicated) with idempotent
//! membership, plus per-container bookkeeping of repairs already in flight
//! so that consecutive cycles do not pile duplicate work on the cluster.
//!
//! One instance lives for the lifetime of a manager; [`ReconciliationQueues::close`]
//! drains it on shutdown and rejects later insertions.

use crate::common::{ContainerId, Error, Result};
use crate::coordinator::commands::DirectiveKind;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Why a container is queued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueReason {
    UnderReplicated,
    OverReplicated,
}

impl QueueReason {
    /// Repair kind that resolves this reason
    pub fn repair_kind(&self) -> DirectiveKind {
        match self {
            QueueReason::UnderReplicated => DirectiveKind::Replicate,
            QueueReason::OverReplicated => DirectiveKind::Delete,
        }
    }
}

impl fmt::Display for QueueReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueReason::UnderReplicated => write!(f, "under_replicated"),
            QueueReason::OverReplicated => write!(f, "over_replicated"),
        }
    }
}

/// A dequeued container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    pub container: ContainerId,
    pub reason: QueueReason,
    pub priority: u32,
}

/// Ordering key: reason first (under before over), then priority (lower is
/// more urgent), then insertion order.
type QueueKey = (QueueReason, u32, u64);

#[derive(Debug, Clone, Copy)]
struct Inflight {
    count: usize,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    ordered: BTreeMap<QueueKey, ContainerId>,
    members: HashMap<(ContainerId, QueueReason), QueueKey>,
    inflight: HashMap<(ContainerId, DirectiveKind), Inflight>,
    next_seq: u64,
    closed: bool,
}

#[derive(Debug, Default)]
pub struct ReconciliationQueues {
    state: Mutex<QueueState>,
}

impl ReconciliationQueues {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState>> {
        self.state
            .lock()
            .map_err(|_| Error::Internal("reconciliation queue lock poisoned".into()))
    }

    /// Queue a container for a reason. Returns `false` if it was already queued
    /// for that reason, in which case nothing changes.
    pub fn enqueue(&self, container: ContainerId, reason: QueueReason, priority: u32) -> Result<bool> {
        let mut state = self.lock()?;
        if state.closed {
            return Err(Error::QueueClosed);
        }
        if state.members.contains_key(&(container, reason)) {
            return Ok(false);
        }
        let key = (reason, priority, state.next_seq);
        state.next_seq += 1;
        state.ordered.insert(key, container);
        state.members.insert((container, reason), key);
        Ok(true)
    }

    /// Pop up to `n` entries, most urgent first
    pub fn dequeue_batch(&self, n: usize) -> Result<Vec<QueueEntry>> {
        let mut state = self.lock()?;
        let mut batch = Vec::with_capacity(n.min(state.ordered.len()));
        while batch.len() < n {
            let Some(((reason, priority, _), container)) = state.ordered.pop_first() else {
                break;
            };
            state.members.remove(&(container, reason));
            batch.push(QueueEntry {
                container,
                reason,
                priority,
            });
        }
        Ok(batch)
    }

    /// Drop a container from one queue. Returns whether it was present.
    pub fn remove(&self, container: ContainerId, reason: QueueReason) -> Result<bool> {
        let mut state = self.lock()?;
        match state.members.remove(&(container, reason)) {
            Some(key) => {
                state.ordered.remove(&key);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drop a container from both queues and forget its in-flight repairs
    pub fn forget(&self, container: ContainerId) -> Result<()> {
        self.remove(container, QueueReason::UnderReplicated)?;
        self.remove(container, QueueReason::OverReplicated)?;
        let mut state = self.lock()?;
        state.inflight.retain(|(id, _), _| *id != container);
        Ok(())
    }

    pub fn contains(&self, container: ContainerId, reason: QueueReason) -> Result<bool> {
        Ok(self.lock()?.members.contains_key(&(container, reason)))
    }

    pub fn len(&self, reason: QueueReason) -> Result<usize> {
        Ok(self
            .lock()?
            .members
            .keys()
            .filter(|(_, r)| *r == reason)
            .count())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.members.is_empty())
    }

    // === In-flight repairs ===

    /// Repairs of `kind` dispatched for `container` and not yet expired
    pub fn inflight(&self, container: ContainerId, kind: DirectiveKind, now: Instant) -> Result<usize> {
        let mut state = self.lock()?;
        let key = (container, kind);
        let live = state
            .inflight
            .get(&key)
            .map(|entry| (entry.deadline > now, entry.count));
        match live {
            Some((true, count)) => Ok(count),
            Some((false, _)) => {
                state.inflight.remove(&key);
                Ok(0)
            }
            None => Ok(0),
        }
    }

    /// Add `count` dispatched repairs; the whole entry expires `ttl` from `now`
    pub fn record_inflight(
        &self,
        container: ContainerId,
        kind: DirectiveKind,
        count: usize,
        now: Instant,
        ttl: Duration,
    ) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let mut state = self.lock()?;
        let deadline = now + ttl;
        let entry = state
            .inflight
            .entry((container, kind))
            .or_insert(Inflight { count: 0, deadline });
        if entry.deadline <= now {
            entry.count = 0;
        }
        entry.count += count;
        entry.deadline = deadline;
        Ok(())
    }

    /// Cap in-flight repairs at what the latest evaluation still needs.
    /// Completed repairs show up as changed replica counts, shrinking `needed`.
    pub fn trim_inflight(&self, container: ContainerId, kind: DirectiveKind, needed: usize) -> Result<()> {
        let mut state = self.lock()?;
        let key = (container, kind);
        if needed == 0 {
            state.inflight.remove(&key);
        } else if let Some(entry) = state.inflight.get_mut(&key) {
            entry.count = entry.count.min(needed);
        }
        Ok(())
    }

    /// Drain both queues and refuse further insertions
    pub fn close(&self) -> Result<()> {
        let mut state = self.lock()?;
        state.closed = true;
        state.ordered.clear();
        state.members.clear();
        state.inflight.clear();
        Ok(())
    }

    pub fn is_closed(&self) -> Result<bool> {
        Ok(self.lock()?.closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> ContainerId {
        ContainerId::new(n)
    }

    #[test]
    fn test_enqueue_is_idempotent() {
        let queues = ReconciliationQueues::new();
        assert!(queues.enqueue(id(1), QueueReason::UnderReplicated, 1).unwrap());
        assert!(!queues.enqueue(id(1), QueueReason::UnderReplicated, 0).unwrap());
        assert!(queues.enqueue(id(1), QueueReason::OverReplicated, 0).unwrap());

        assert_eq!(queues.len(QueueReason::UnderReplicated).unwrap(), 1);
        assert_eq!(queues.len(QueueReason::OverReplicated).unwrap(), 1);
    }

    #[test]
    fn test_dequeue_order() {
        let queues = ReconciliationQueues::new();
        queues.enqueue(id(10), QueueReason::OverReplicated, 0).unwrap();
        queues.enqueue(id(1), QueueReason::UnderReplicated, 2).unwrap();
        queues.enqueue(id(2), QueueReason::UnderReplicated, 0).unwrap();
        queues.enqueue(id(3), QueueReason::UnderReplicated, 2).unwrap();

        let batch = queues.dequeue_batch(3).unwrap();
        let order: Vec<_> = batch.iter().map(|e| e.container.get()).collect();
        assert_eq!(order, vec![2, 1, 3]);
        assert!(batch.iter().all(|e| e.reason == QueueReason::UnderReplicated));

        let rest = queues.dequeue_batch(10).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].reason, QueueReason::OverReplicated);
        assert!(queues.is_empty().unwrap());
        assert!(queues.dequeue_batch(5).unwrap().is_empty());
    }

    #[test]
    fn test_remove_and_requeue() {
        let queues = ReconciliationQueues::new();
        queues.enqueue(id(1), QueueReason::UnderReplicated, 1).unwrap();
        assert!(queues.remove(id(1), QueueReason::UnderReplicated).unwrap());
        assert!(!queues.remove(id(1), QueueReason::UnderReplicated).unwrap());
        assert!(queues.dequeue_batch(1).unwrap().is_empty());

        assert!(queues.enqueue(id(1), QueueReason::UnderReplicated, 1).unwrap());
        assert!(queues.contains(id(1), QueueReason::UnderReplicated).unwrap());
    }

    #[test]
    fn test_inflight_tracking() {
        let queues = ReconciliationQueues::new();
        let now = Instant::now();
        let ttl = Duration::from_secs(60);

        queues
            .record_inflight(id(1), DirectiveKind::Replicate, 2, now, ttl)
            .unwrap();
        assert_eq!(queues.inflight(id(1), DirectiveKind::Replicate, now).unwrap(), 2);
        assert_eq!(queues.inflight(id(1), DirectiveKind::Delete, now).unwrap(), 0);

        queues.trim_inflight(id(1), DirectiveKind::Replicate, 1).unwrap();
        assert_eq!(queues.inflight(id(1), DirectiveKind::Replicate, now).unwrap(), 1);

        let later = now + Duration::from_secs(61);
        assert_eq!(queues.inflight(id(1), DirectiveKind::Replicate, later).unwrap(), 0);

        queues
            .record_inflight(id(1), DirectiveKind::Replicate, 1, now, ttl)
            .unwrap();
        queues.trim_inflight(id(1), DirectiveKind::Replicate, 0).unwrap();
        assert_eq!(queues.inflight(id(1), DirectiveKind::Replicate, now).unwrap(), 0);
    }

    #[test]
    fn test_close_rejects_enqueue() {
        let queues = ReconciliationQueues::new();
        queues.enqueue(id(1), QueueReason::UnderReplicated, 0).unwrap();
        queues.close().unwrap();

        assert!(queues.is_closed().unwrap());
        assert!(queues.is_empty().unwrap());
        assert!(matches!(
            queues.enqueue(id(2), QueueReason::UnderReplicated, 0),
            Err(Error::QueueClosed)
        ));
        assert!(queues.remove(id(1), QueueReason::UnderReplicated).is_ok());
    }
}
