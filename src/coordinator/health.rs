//! Health classifier: capacity metrics for one replica set

use crate::common::{ContainerId, Result};
use crate::coordinator::queue::{QueueReason, ReconciliationQueues};
use crate::coordinator::replica_set::{ReplicaFilter, ReplicaSet, GOOD, UNHEALTHY};
use serde::Serialize;

/// Capacity view of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContainerHealth {
    pub container: ContainerId,
    pub replication_factor: usize,
    /// Live replicas in any state
    pub total: usize,
    /// Live replicas that are not unhealthy
    pub good: usize,
    pub unhealthy: usize,
}

impl ContainerHealth {
    pub fn is_under_replicated(&self) -> bool {
        self.good < self.replication_factor
    }

    pub fn is_over_replicated(&self) -> bool {
        self.good > self.replication_factor
    }

    pub fn is_healthy(&self) -> bool {
        self.good == self.replication_factor && self.unhealthy == 0
    }

    /// Replicas to add to reach the factor
    pub fn missing(&self) -> usize {
        self.replication_factor.saturating_sub(self.good)
    }

    /// Good replicas above the factor
    pub fn excess(&self) -> usize {
        self.good.saturating_sub(self.replication_factor)
    }
}

/// Computes [`ContainerHealth`] and keeps queue membership in line with it
#[derive(Debug, Default, Clone, Copy)]
pub struct HealthClassifier;

impl HealthClassifier {
    pub fn classify(set: &ReplicaSet) -> ContainerHealth {
        let good = set.count(&ReplicaFilter::in_states(GOOD));
        let unhealthy = set.count(&ReplicaFilter::in_states(UNHEALTHY));
        ContainerHealth {
            container: set.id(),
            replication_factor: set.replication_factor(),
            total: set.len(),
            good,
            unhealthy,
        }
    }

    /// Insert into or remove from the under/over-replicated queues.
    /// Containers that cannot be repaired in their current lifecycle state
    /// are taken out of both.
    pub fn update_queues(
        health: &ContainerHealth,
        repairable: bool,
        queues: &ReconciliationQueues,
    ) -> Result<()> {
        let id = health.container;
        if repairable && health.is_under_replicated() {
            queues.enqueue(id, QueueReason::UnderReplicated, health.good as u32)?;
        } else {
            queues.remove(id, QueueReason::UnderReplicated)?;
        }

        if repairable && health.is_over_replicated() {
            queues.enqueue(id, QueueReason::OverReplicated, 0)?;
        } else {
            queues.remove(id, QueueReason::OverReplicated)?;
        }
        Ok(())
    }
}
