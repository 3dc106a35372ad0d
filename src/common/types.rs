//! Identifiers and lifecycle states shared by the reconciliation core

use serde::{Deserialize, Serialize};
use std::fmt;

/// Container identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(u64);

impl ContainerId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Storage node identifier. Also used as a replica's origin identifier,
/// since a lineage is named after the node that first wrote it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Container lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerState {
    Open,
    Closing,
    QuasiClosed,
    Closed,
    Deleting,
    Deleted,
}

impl ContainerState {
    /// Capacity repair (replicate/delete) only applies to containers that
    /// no longer accept writes.
    pub fn is_repairable(&self) -> bool {
        matches!(self, ContainerState::QuasiClosed | ContainerState::Closed)
    }

    /// Containers on their way out are never evaluated.
    pub fn is_being_deleted(&self) -> bool {
        matches!(self, ContainerState::Deleting | ContainerState::Deleted)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerState::Open => "OPEN",
            ContainerState::Closing => "CLOSING",
            ContainerState::QuasiClosed => "QUASI_CLOSED",
            ContainerState::Closed => "CLOSED",
            ContainerState::Deleting => "DELETING",
            ContainerState::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}

/// Replica state as reported by a storage node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicaState {
    Open,
    Closing,
    QuasiClosed,
    Closed,
    Unhealthy,
    Deleted,
}

impl ReplicaState {
    /// Counts towards usable capacity
    pub fn is_good(&self) -> bool {
        !matches!(self, ReplicaState::Unhealthy | ReplicaState::Deleted)
    }

    /// May still be accepting writes
    pub fn is_writable(&self) -> bool {
        matches!(self, ReplicaState::Open | ReplicaState::Closing)
    }
}

impl fmt::Display for ReplicaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReplicaState::Open => "OPEN",
            ReplicaState::Closing => "CLOSING",
            ReplicaState::QuasiClosed => "QUASI_CLOSED",
            ReplicaState::Closed => "CLOSED",
            ReplicaState::Unhealthy => "UNHEALTHY",
            ReplicaState::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}

/// Administrative state of a storage node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeOperationalState {
    InService,
    Decommissioning,
    Decommissioned,
    EnteringMaintenance,
    InMaintenance,
}

impl NodeOperationalState {
    pub fn is_decommission(&self) -> bool {
        matches!(
            self,
            NodeOperationalState::Decommissioning | NodeOperationalState::Decommissioned
        )
    }

    pub fn is_maintenance(&self) -> bool {
        matches!(
            self,
            NodeOperationalState::EnteringMaintenance | NodeOperationalState::InMaintenance
        )
    }
}

impl fmt::Display for NodeOperationalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeOperationalState::InService => "in_service",
            NodeOperationalState::Decommissioning => "decommissioning",
            NodeOperationalState::Decommissioned => "decommissioned",
            NodeOperationalState::EnteringMaintenance => "entering_maintenance",
            NodeOperationalState::InMaintenance => "in_maintenance",
        };
        f.write_str(s)
    }
}

/// Liveness of a storage node as seen through heartbeats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeHealth {
    Healthy,
    Stale,
    Dead,
}

impl fmt::Display for NodeHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeHealth::Healthy => "healthy",
            NodeHealth::Stale => "stale",
            NodeHealth::Dead => "dead",
        };
        f.write_str(s)
    }
}
