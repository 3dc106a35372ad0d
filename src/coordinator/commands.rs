//! Command generator
//!
//! Turns classifier and resolver output into the minimal ordered set of
//! directives for one container: close directives first, then replicate,
//! then delete. Every target is checked against the node registry; a
//! directive whose node cannot be verified is withheld for this round.

use crate::common::{ContainerId, ContainerState, NodeId};
use crate::coordinator::health::ContainerHealth;
use crate::coordinator::node_registry::{NodeRegistry, NodeStatus};
use crate::coordinator::quorum::QuorumVerdict;
use crate::coordinator::replica_set::{
    Replica, ReplicaFilter, ReplicaSet, GOOD, SEALED, UNFINALIZED, UNHEALTHY, WRITABLE,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectiveKind {
    Close,
    Replicate,
    Delete,
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectiveKind::Close => write!(f, "close"),
            DirectiveKind::Replicate => write!(f, "replicate"),
            DirectiveKind::Delete => write!(f, "delete"),
        }
    }
}

/// Command for the dispatcher to deliver to a storage node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Directive {
    pub kind: DirectiveKind,
    pub container: ContainerId,
    /// Node that acts on the directive; unset for replicate, where placement
    /// picks the destination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<NodeId>,
    /// Pinned data source of a replicate directive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<NodeId>,
}

impl Directive {
    pub fn close(container: ContainerId, target: NodeId) -> Self {
        Self {
            kind: DirectiveKind::Close,
            container,
            target: Some(target),
            source: None,
        }
    }

    pub fn replicate(container: ContainerId, source: Option<NodeId>) -> Self {
        Self {
            kind: DirectiveKind::Replicate,
            container,
            target: None,
            source,
        }
    }

    pub fn delete(container: ContainerId, target: NodeId) -> Self {
        Self {
            kind: DirectiveKind::Delete,
            container,
            target: Some(target),
            source: None,
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.container)?;
        if let Some(target) = &self.target {
            write!(f, " on {}", target)?;
        }
        if let Some(source) = &self.source {
            write!(f, " from {}", source)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WithholdReason {
    /// The registry could not answer for the node
    RegistryUnavailable,
    NodeDead,
    /// Another close target on an in-service host exists
    DecommissioningHost,
    /// No replica can serve as a copy source
    NoSource,
}

impl fmt::Display for WithholdReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WithholdReason::RegistryUnavailable => write!(f, "registry unavailable"),
            WithholdReason::NodeDead => write!(f, "node dead"),
            WithholdReason::DecommissioningHost => write!(f, "decommissioning host"),
            WithholdReason::NoSource => write!(f, "no copy source"),
        }
    }
}

/// A directive the generator decided on but did not emit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Withheld {
    pub kind: DirectiveKind,
    pub node: Option<NodeId>,
    pub reason: WithholdReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandPlan {
    pub directives: Vec<Directive>,
    pub withheld: Vec<Withheld>,
}

impl CommandPlan {
    pub fn of_kind(&self, kind: DirectiveKind) -> impl Iterator<Item = &Directive> {
        self.directives.iter().filter(move |d| d.kind == kind)
    }

    pub fn count(&self, kind: DirectiveKind) -> usize {
        self.of_kind(kind).count()
    }
}

pub struct CommandGenerator<'a> {
    registry: &'a dyn NodeRegistry,
}

impl<'a> CommandGenerator<'a> {
    pub fn new(registry: &'a dyn NodeRegistry) -> Self {
        Self { registry }
    }

    /// Build the plan for one snapshot. For QUASI_CLOSED containers the
    /// resolver verdict decides closes; without one no close is issued.
    pub fn generate(
        &self,
        set: &ReplicaSet,
        health: &ContainerHealth,
        verdict: Option<&QuorumVerdict>,
    ) -> CommandPlan {
        let mut plan = CommandPlan::default();
        let container = set.container();
        if container.state.is_being_deleted() {
            return plan;
        }

        self.plan_closes(set, verdict, &mut plan);

        if container.state.is_repairable() {
            if health.is_under_replicated() {
                self.plan_replicates(set, health.missing(), &mut plan);
            }
            if health.is_over_replicated() && !set.any(&ReplicaFilter::in_states(WRITABLE)) {
                self.plan_deletes(set, health.excess(), &mut plan);
            }
        }
        plan
    }

    fn lookup(&self, node: &NodeId) -> Option<NodeStatus> {
        match self.registry.lookup(node) {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::warn!(%node, error = %e, "node lookup failed; withholding directive");
                None
            }
        }
    }

    fn plan_closes(&self, set: &ReplicaSet, verdict: Option<&QuorumVerdict>, plan: &mut CommandPlan) {
        let container = set.container();
        let (targets, finalizing): (Vec<NodeId>, bool) = match container.state {
            ContainerState::Closing => (self.writable_nodes(set), false),
            ContainerState::QuasiClosed => match verdict {
                Some(v) if v.blocking_open => (v.writable.clone(), false),
                Some(v) if !v.stuck => (v.finalize_targets().cloned().collect(), true),
                _ => (Vec::new(), false),
            },
            ContainerState::Closed => {
                let filter = ReplicaFilter::in_states(UNFINALIZED)
                    .and(ReplicaFilter::at_sequence(container.sequence));
                (set.filter(&filter).map(|r| r.node.clone()).collect(), false)
            }
            _ => (Vec::new(), false),
        };

        let mut accepted: Vec<(NodeId, NodeStatus)> = Vec::with_capacity(targets.len());
        for node in targets {
            match self.lookup(&node) {
                None => plan.withheld.push(Withheld {
                    kind: DirectiveKind::Close,
                    node: Some(node),
                    reason: WithholdReason::RegistryUnavailable,
                }),
                Some(status) if !status.can_receive_commands() => plan.withheld.push(Withheld {
                    kind: DirectiveKind::Close,
                    node: Some(node),
                    reason: WithholdReason::NodeDead,
                }),
                Some(status) => accepted.push((node, status)),
            }
        }

        let has_in_service = accepted
            .iter()
            .any(|(_, s)| !s.operational.is_decommission());
        for (node, status) in accepted {
            if finalizing && has_in_service && status.operational.is_decommission() {
                plan.withheld.push(Withheld {
                    kind: DirectiveKind::Close,
                    node: Some(node),
                    reason: WithholdReason::DecommissioningHost,
                });
                continue;
            }
            plan.directives.push(Directive::close(container.id, node));
        }
    }

    fn writable_nodes(&self, set: &ReplicaSet) -> Vec<NodeId> {
        set.filter(&ReplicaFilter::in_states(WRITABLE))
            .map(|r| r.node.clone())
            .collect()
    }

    /// Replicas that may serve as a copy source, best tier first
    fn source_pool<'s>(&self, set: &'s ReplicaSet) -> (Vec<&'s Replica>, bool) {
        let mut lookup_failed = false;
        let mut valid = |r: &&Replica| match self.lookup(&r.node) {
            Some(status) => status.can_source_replica(),
            None => {
                lookup_failed = true;
                false
            }
        };

        let good: Vec<&Replica> = set
            .filter(&ReplicaFilter::in_states(GOOD))
            .filter(&mut valid)
            .collect();
        if !good.is_empty() {
            let sealed: Vec<&Replica> = good
                .iter()
                .copied()
                .filter(|r| SEALED.contains(&r.state) && !r.is_empty)
                .collect();
            // A lone sealed copy is pinned even when open ones are usable.
            let pool = if sealed.is_empty() { good } else { sealed };
            return (pool, lookup_failed);
        }

        // Nothing usable is left: fall back to unhealthy copies of the latest data.
        let latest = ReplicaFilter::in_states(UNHEALTHY).and(ReplicaFilter::at_sequence(set.max_sequence()));
        let pool: Vec<&Replica> = set.filter(&latest).filter(&mut valid).collect();
        (pool, lookup_failed)
    }

    fn plan_replicates(&self, set: &ReplicaSet, missing: usize, plan: &mut CommandPlan) {
        let (pool, lookup_failed) = self.source_pool(set);
        let source = match pool.as_slice() {
            [] => {
                let reason = if lookup_failed {
                    WithholdReason::RegistryUnavailable
                } else {
                    WithholdReason::NoSource
                };
                tracing::warn!(container = %set.id(), missing, %reason, "cannot replicate");
                plan.withheld.extend((0..missing).map(|_| Withheld {
                    kind: DirectiveKind::Replicate,
                    node: None,
                    reason,
                }));
                return;
            }
            [only] => Some(only.node.clone()),
            _ => None,
        };
        plan.directives
            .extend((0..missing).map(|_| Directive::replicate(set.id(), source.clone())));
    }

    /// Pick `excess` replicas to delete.
    ///
    /// Empty replicas go first, then lowest sequence, then node id. The best
    /// replica of each origin is only taken once every other candidate is
    /// used up, and the last good holder of the highest sequence is never
    /// taken.
    fn plan_deletes(&self, set: &ReplicaSet, excess: usize, plan: &mut CommandPlan) {
        let max_sequence = set.max_sequence();
        let mut candidates: Vec<&Replica> = Vec::new();
        for replica in set.filter(&ReplicaFilter::in_states(SEALED)) {
            match self.lookup(&replica.node) {
                Some(status) if status.can_receive_commands() => candidates.push(replica),
                Some(_) => {}
                None => plan.withheld.push(Withheld {
                    kind: DirectiveKind::Delete,
                    node: Some(replica.node.clone()),
                    reason: WithholdReason::RegistryUnavailable,
                }),
            }
        }

        let protected = origin_representatives(&candidates);
        candidates.sort_by(|a, b| {
            b.is_empty
                .cmp(&a.is_empty)
                .then(a.sequence.cmp(&b.sequence))
                .then(a.node.cmp(&b.node))
        });

        let mut latest_holders = set
            .filter(&ReplicaFilter::in_states(GOOD).and(ReplicaFilter::at_sequence(max_sequence)))
            .count();
        let mut chosen: Vec<NodeId> = Vec::with_capacity(excess);

        let (spare, representatives): (Vec<&Replica>, Vec<&Replica>) = candidates
            .into_iter()
            .partition(|r| !protected.contains(&r.node));
        for replica in spare.into_iter().chain(representatives) {
            if chosen.len() == excess {
                break;
            }
            if replica.sequence == max_sequence {
                if latest_holders <= 1 {
                    continue;
                }
                latest_holders -= 1;
            }
            chosen.push(replica.node.clone());
        }

        if chosen.len() < excess {
            tracing::debug!(
                container = %set.id(),
                excess,
                chosen = chosen.len(),
                "not enough deletable replicas"
            );
        }
        plan.directives
            .extend(chosen.into_iter().map(|node| Directive::delete(set.id(), node)));
    }
}

/// For each origin, the replica most worth keeping: highest sequence, then
/// non-empty, then lowest node id.
fn origin_representatives(replicas: &[&Replica]) -> HashSet<NodeId> {
    let mut best: BTreeMap<&NodeId, &Replica> = BTreeMap::new();
    for &replica in replicas {
        let Some(origin) = &replica.origin else {
            continue;
        };
        best.entry(origin)
            .and_modify(|current| {
                let better = (replica.sequence, !replica.is_empty, std::cmp::Reverse(&replica.node))
                    > (current.sequence, !current.is_empty, std::cmp::Reverse(&current.node));
                if better {
                    *current = replica;
                }
            })
            .or_insert(replica);
    }
    best.into_values().map(|r| r.node.clone()).collect()
}
