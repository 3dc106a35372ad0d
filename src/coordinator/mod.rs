//! Replica-health reconciliation
//!
//! The coordinator is responsible for:
//! - Container and replica metadata (reports from storage nodes)
//! - Node status tracking (operational state + health)
//! - Health classification and quorum resolution per container
//! - Directive generation (close / replicate / delete)
//! - Reconciliation queues and the periodic manager loop

pub mod commands;
pub mod evaluator;
pub mod health;
pub mod manager;
pub mod metadata;
pub mod node_registry;
pub mod queue;
pub mod quorum;
pub mod replica_set;

pub use commands::{CommandGenerator, CommandPlan, Directive, DirectiveKind, WithholdReason, Withheld};
pub use evaluator::{Evaluation, Evaluator};
pub use health::{ContainerHealth, HealthClassifier};
pub use manager::{CycleReport, ReplicationManager};
pub use metadata::{ClusterImage, ContainerStore, ReplicaReport};
pub use node_registry::{InMemoryNodeRegistry, NodeFilter, NodeInfo, NodeRegistry, NodeStatus};
pub use queue::{QueueEntry, QueueReason, ReconciliationQueues};
pub use quorum::{classify_origins, OriginClassification, QuorumResolver, QuorumVerdict};
pub use replica_set::{Container, Replica, ReplicaFilter, ReplicaSet};
