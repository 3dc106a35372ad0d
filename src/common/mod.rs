//! Common utilities and types shared across replicon

pub mod config;
pub mod error;
pub mod metrics;
pub mod types;
pub mod utils;

pub use config::ReconcilerConfig;
pub use error::{Error, Result};
pub use metrics::ReconcilerMetrics;
pub use types::{
    ContainerId, ContainerState, NodeHealth, NodeId, NodeOperationalState, ReplicaState,
};
pub use utils::{format_duration, parse_duration};
