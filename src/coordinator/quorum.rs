//! Quorum resolver for quasi-closed containers
//!
//! Decides whether the replicas of a quasi-closed container prove a single,
//! complete, maximally advanced lineage, in which case finalizing (closing)
//! the container cannot lose acknowledged writes.
//!
//! The advancement point is recomputed from the replicas themselves rather
//! than taken from the container record: the most advanced copy may live on
//! a replica that is currently unusable, and finalizing without it would
//! drop its writes.
//!
//! A container is *stuck* when any of these hold:
//! - a replica is still OPEN or CLOSING,
//! - fewer replicas reported than the replication factor,
//! - no QUASI_CLOSED/CLOSED replica sits at the highest known sequence,
//! - two of those replicas share an origin.

use crate::common::{NodeId, ReplicaState};
use crate::coordinator::replica_set::{Replica, ReplicaFilter, ReplicaSet, SEALED, WRITABLE};
use serde::Serialize;
use std::collections::BTreeMap;

/// Outcome of checking origin distinctness within the eligible set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OriginClassification {
    /// Every eligible replica descends from a different origin
    Clean,
    /// At least one origin is represented more than once
    Ambiguous {
        /// Origins seen more than once, with the nodes holding them
        duplicates: BTreeMap<NodeId, Vec<NodeId>>,
    },
}

impl OriginClassification {
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, OriginClassification::Ambiguous { .. })
    }
}

/// Classify an eligible set by origin distinctness.
///
/// Replicas sharing an origin are byte copies of one lineage, so they do not
/// independently confirm it. An empty set is clean.
pub fn classify_origins<'a>(eligible: impl IntoIterator<Item = &'a Replica>) -> OriginClassification {
    let mut by_origin: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
    for replica in eligible {
        // Malformed reports carry no origin and never reach the eligible set.
        if let Some(origin) = &replica.origin {
            by_origin
                .entry(origin.clone())
                .or_default()
                .push(replica.node.clone());
        }
    }

    let duplicates: BTreeMap<NodeId, Vec<NodeId>> = by_origin
        .into_iter()
        .filter(|(_, nodes)| nodes.len() > 1)
        .collect();

    if duplicates.is_empty() {
        OriginClassification::Clean
    } else {
        OriginClassification::Ambiguous { duplicates }
    }
}

/// Result of resolving one quasi-closed replica set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuorumVerdict {
    /// Highest sequence across all live replicas
    pub max_sequence: u64,
    /// Sealed replicas at `max_sequence`, sorted by node
    pub eligible: Vec<NodeId>,
    /// Nodes of eligible replicas that are already CLOSED
    pub eligible_closed: Vec<NodeId>,
    /// Nodes whose replicas are still OPEN or CLOSING
    pub writable: Vec<NodeId>,
    /// A replica may still be accepting writes
    pub blocking_open: bool,
    /// Reports exist for at least `replication_factor` replicas
    pub full_picture: bool,
    pub origins: OriginClassification,
    pub stuck: bool,
}

impl QuorumVerdict {
    pub fn no_eligible(&self) -> bool {
        self.eligible.is_empty()
    }

    /// Eligible replicas that still need a close directive
    pub fn finalize_targets(&self) -> impl Iterator<Item = &NodeId> {
        self.eligible
            .iter()
            .filter(move |n| !self.eligible_closed.contains(n))
    }

    /// Short human-readable reason, for logs
    pub fn reason(&self) -> &'static str {
        if self.blocking_open {
            "replica still open"
        } else if !self.full_picture {
            "missing replica reports"
        } else if self.no_eligible() {
            "latest sequence only on unusable replica"
        } else if self.origins.is_ambiguous() {
            "duplicate origin among eligible replicas"
        } else {
            "resolved"
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct QuorumResolver;

impl QuorumResolver {
    pub fn resolve(set: &ReplicaSet) -> QuorumVerdict {
        let max_sequence = set.max_sequence();

        let eligible_filter =
            ReplicaFilter::in_states(SEALED).and(ReplicaFilter::at_sequence(max_sequence));
        let eligible: Vec<&Replica> = set.filter(&eligible_filter).collect();

        let writable: Vec<NodeId> = set
            .filter(&ReplicaFilter::in_states(WRITABLE))
            .map(|r| r.node.clone())
            .collect();
        let blocking_open = !writable.is_empty();
        let full_picture = set.len() >= set.replication_factor();
        let origins = classify_origins(eligible.iter().copied());

        let stuck =
            blocking_open || !full_picture || eligible.is_empty() || origins.is_ambiguous();

        QuorumVerdict {
            max_sequence,
            eligible: eligible.iter().map(|r| r.node.clone()).collect(),
            eligible_closed: eligible
                .iter()
                .filter(|r| r.state == ReplicaState::Closed)
                .map(|r| r.node.clone())
                .collect(),
            writable,
            blocking_open,
            full_picture,
            origins,
            stuck,
        }
    }
}
