//! Replica set model
//!
//! A [`ReplicaSet`] is one container plus its live replicas, captured as an
//! immutable snapshot. Every decision of an evaluation pass reads from a
//! single snapshot.

use crate::common::{ContainerId, ContainerState, NodeId, ReplicaState};
use serde::{Deserialize, Serialize};

/// Control-plane view of a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    pub state: ContainerState,
    /// Target replica count, fixed for the container's lifetime
    pub replication_factor: usize,
    /// Last write sequence acknowledged by the write quorum
    #[serde(default)]
    pub sequence: u64,
}

impl Container {
    pub fn new(id: ContainerId, state: ContainerState, replication_factor: usize) -> Self {
        Self {
            id,
            state,
            replication_factor,
            sequence: 0,
        }
    }
}

/// One host's copy of a container, normalized for evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    pub node: NodeId,
    pub state: ReplicaState,
    pub sequence: u64,
    /// Lineage the bytes derive from; absent only on malformed reports,
    /// which are always modelled as unhealthy
    pub origin: Option<NodeId>,
    pub is_empty: bool,
}

/// Composable predicate over replicas
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaFilter {
    Any,
    InStates(&'static [ReplicaState]),
    AtSequence(u64),
    Not(Box<ReplicaFilter>),
    All(Vec<ReplicaFilter>),
}

/// Replicas that count towards usable capacity
pub const GOOD: &[ReplicaState] = &[
    ReplicaState::Open,
    ReplicaState::Closing,
    ReplicaState::QuasiClosed,
    ReplicaState::Closed,
];
/// Replicas that may still be advancing their lineage
pub const WRITABLE: &[ReplicaState] = &[ReplicaState::Open, ReplicaState::Closing];
/// Replicas that stopped accepting writes
pub const SEALED: &[ReplicaState] = &[ReplicaState::QuasiClosed, ReplicaState::Closed];
/// Replicas a closed container still expects to close
pub const UNFINALIZED: &[ReplicaState] = &[
    ReplicaState::Open,
    ReplicaState::Closing,
    ReplicaState::QuasiClosed,
];
pub const UNHEALTHY: &[ReplicaState] = &[ReplicaState::Unhealthy];
pub const CLOSED: &[ReplicaState] = &[ReplicaState::Closed];

impl ReplicaFilter {
    pub fn in_states(states: &'static [ReplicaState]) -> Self {
        ReplicaFilter::InStates(states)
    }

    pub fn at_sequence(sequence: u64) -> Self {
        ReplicaFilter::AtSequence(sequence)
    }

    pub fn and(self, other: ReplicaFilter) -> Self {
        match self {
            ReplicaFilter::Any => other,
            ReplicaFilter::All(mut parts) => {
                parts.push(other);
                ReplicaFilter::All(parts)
            }
            first => ReplicaFilter::All(vec![first, other]),
        }
    }

    pub fn negate(self) -> Self {
        ReplicaFilter::Not(Box::new(self))
    }

    pub fn matches(&self, replica: &Replica) -> bool {
        match self {
            ReplicaFilter::Any => true,
            ReplicaFilter::InStates(states) => states.contains(&replica.state),
            ReplicaFilter::AtSequence(seq) => replica.sequence == *seq,
            ReplicaFilter::Not(inner) => !inner.matches(replica),
            ReplicaFilter::All(parts) => parts.iter().all(|p| p.matches(replica)),
        }
    }
}

/// Atomic snapshot of one container and its live replicas
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSet {
    container: Container,
    replicas: Vec<Replica>,
}

impl ReplicaSet {
    /// Build a snapshot; DELETED replicas are dropped and the rest sorted by node
    pub fn new(container: Container, replicas: impl IntoIterator<Item = Replica>) -> Self {
        let mut replicas: Vec<Replica> = replicas
            .into_iter()
            .filter(|r| r.state != ReplicaState::Deleted)
            .collect();
        replicas.sort_by(|a, b| a.node.cmp(&b.node));
        Self {
            container,
            replicas,
        }
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn id(&self) -> ContainerId {
        self.container.id
    }

    pub fn replication_factor(&self) -> usize {
        self.container.replication_factor
    }

    pub fn replicas(&self) -> &[Replica] {
        &self.replicas
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    pub fn filter<'a, 'f>(
        &'a self,
        filter: &'f ReplicaFilter,
    ) -> impl Iterator<Item = &'a Replica> + 'f
    where
        'a: 'f,
    {
        self.replicas.iter().filter(move |r| filter.matches(r))
    }

    pub fn count(&self, filter: &ReplicaFilter) -> usize {
        self.filter(filter).count()
    }

    pub fn any(&self, filter: &ReplicaFilter) -> bool {
        self.replicas.iter().any(|r| filter.matches(r))
    }

    /// Highest write sequence across every live replica, usable or not
    pub fn max_sequence(&self) -> u64 {
        self.replicas.iter().map(|r| r.sequence).max().unwrap_or(0)
    }
}
