//! Error types for replicon

use crate::common::types::{ContainerId, NodeId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Lookup Errors ===
    #[error("Container not found: {0}")]
    ContainerNotFound(ContainerId),

    #[error("Replica of {container} on {node} not found")]
    ReplicaNotFound { container: ContainerId, node: NodeId },

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Node already exists: {0}")]
    NodeAlreadyExists(NodeId),

    #[error("Container already exists: {0}")]
    ContainerAlreadyExists(ContainerId),

    // === Report Errors ===
    #[error("Invalid report for {container}: {reason}")]
    InvalidReport {
        container: ContainerId,
        reason: String,
    },

    // === Collaborator Errors ===
    #[error("Node registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("Reconciliation queue is closed")]
    QueueClosed,

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config loader error: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RegistryUnavailable(_) | Error::Internal(_))
    }

    /// Does this error mean the referenced entity does not exist?
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::ContainerNotFound(_) | Error::ReplicaNotFound { .. } | Error::NodeNotFound(_)
        )
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}
