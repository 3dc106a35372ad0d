//! Single-container evaluation pass
//!
//! snapshot → classify → resolve → generate. The pass itself is pure: queue
//! membership and dispatch are applied by the manager afterwards.

use crate::common::{ContainerId, ContainerState, Result};
use crate::coordinator::commands::{CommandGenerator, Directive, DirectiveKind, Withheld};
use crate::coordinator::health::{ContainerHealth, HealthClassifier};
use crate::coordinator::metadata::ContainerStore;
use crate::coordinator::node_registry::NodeRegistry;
use crate::coordinator::quorum::{QuorumResolver, QuorumVerdict};
use crate::coordinator::replica_set::{Container, ReplicaSet};
use serde::Serialize;

/// Everything decided about one container in one pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    pub container: Container,
    pub health: ContainerHealth,
    /// Present for QUASI_CLOSED containers only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<QuorumVerdict>,
    /// Ordered close, replicate, delete
    pub directives: Vec<Directive>,
    pub withheld: Vec<Withheld>,
}

impl Evaluation {
    pub fn id(&self) -> ContainerId {
        self.container.id
    }

    pub fn is_stuck(&self) -> bool {
        self.verdict.as_ref().is_some_and(|v| v.stuck)
    }

    /// Quasi-closed and proven safe to close
    pub fn is_finalizable(&self) -> bool {
        self.verdict.as_ref().is_some_and(|v| !v.stuck)
    }

    /// Whether capacity repair and queueing apply in this lifecycle state
    pub fn is_repairable(&self) -> bool {
        self.container.state.is_repairable()
    }

    pub fn of_kind(&self, kind: DirectiveKind) -> impl Iterator<Item = &Directive> {
        self.directives.iter().filter(move |d| d.kind == kind)
    }

    pub fn count(&self, kind: DirectiveKind) -> usize {
        self.of_kind(kind).count()
    }

    pub fn withheld_count(&self) -> usize {
        self.withheld.len()
    }
}

pub struct Evaluator<'a> {
    store: &'a ContainerStore,
    registry: &'a dyn NodeRegistry,
}

impl<'a> Evaluator<'a> {
    pub fn new(store: &'a ContainerStore, registry: &'a dyn NodeRegistry) -> Self {
        Self { store, registry }
    }

    /// Evaluate one container from a fresh snapshot. An unknown container
    /// is an error, never an empty healthy result.
    pub fn evaluate(&self, id: ContainerId) -> Result<Evaluation> {
        let set = self.store.snapshot(id)?;
        Ok(self.evaluate_set(&set))
    }

    /// Evaluate an already captured snapshot
    pub fn evaluate_set(&self, set: &ReplicaSet) -> Evaluation {
        let health = HealthClassifier::classify(set);
        let verdict = match set.container().state {
            ContainerState::QuasiClosed => Some(QuorumResolver::resolve(set)),
            _ => None,
        };
        let plan = CommandGenerator::new(self.registry).generate(set, &health, verdict.as_ref());

        if let Some(v) = &verdict {
            if v.stuck {
                tracing::debug!(container = %set.id(), reason = v.reason(), "container stuck");
            }
        }

        Evaluation {
            container: set.container().clone(),
            health,
            verdict,
            directives: plan.directives,
            withheld: plan.withheld,
        }
    }
}
