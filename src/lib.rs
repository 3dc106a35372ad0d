//! # replicon
//!
//! Replica-health reconciliation for a replicated container store:
//! - Health classification (under / over replicated) per container
//! - Quorum resolution deciding when a quasi-closed container is safe to close
//! - Minimal close / replicate / delete directives, checked against node state
//! - Reconciliation queues with in-flight repair throttling
//!
//! ## Architecture
//!
//! ```text
//!   node reports ──► ContainerStore ──snapshot──► ReplicaSet
//!                                                    │
//!          ┌──────────────────┬──────────────────────┤
//!          ▼                  ▼                      ▼
//!   HealthClassifier    QuorumResolver        NodeRegistry
//!          │                  │                      │
//!          └────────► CommandGenerator ◄─────────────┘
//!                             │
//!              ReconciliationQueues ──► directive channel
//! ```
//!
//! ## Usage
//!
//! ### Run the manager against a cluster image
//! ```bash
//! replicon-manager serve --snapshot ./cluster.json --config ./replicon.toml
//! ```
//!
//! ### Ops commands
//! ```bash
//! replicon verify --snapshot ./cluster.json
//! replicon plan --snapshot ./cluster.json
//! ```

pub mod common;
pub mod coordinator;
pub mod ops;

// Re-export commonly used types
pub use common::{ReconcilerConfig, Error, Result};
pub use coordinator::{Evaluation, Evaluator, ReplicationManager};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
