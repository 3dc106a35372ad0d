//! Container and replica metadata
//!
//! Stores:
//! - Containers (state, replication factor, authoritative sequence)
//! - Replica records per container, updated from node reports
//!
//! Report ingestion takes the write lock; [`ContainerStore::snapshot`] takes
//! the read lock once and copies out a [`ReplicaSet`], so an evaluation never
//! sees a mix of old and new reports.

use crate::common::utils::{read_lock, write_lock};
use crate::common::{ContainerId, ContainerState, Error, NodeId, ReplicaState, Result};
use crate::coordinator::node_registry::{InMemoryNodeRegistry, NodeInfo};
use crate::coordinator::replica_set::{Container, Replica, ReplicaSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::RwLock;

/// Replica state as reported by a storage node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaReport {
    pub container: ContainerId,
    pub node: NodeId,
    pub state: ReplicaState,
    /// Highest write index durably observed; missing on malformed reports
    #[serde(default)]
    pub sequence: Option<u64>,
    #[serde(default)]
    pub origin: Option<NodeId>,
    #[serde(default)]
    pub is_empty: bool,
}

impl ReplicaReport {
    pub fn new(
        container: ContainerId,
        node: impl Into<NodeId>,
        state: ReplicaState,
        sequence: u64,
        origin: impl Into<NodeId>,
    ) -> Self {
        Self {
            container,
            node: node.into(),
            state,
            sequence: Some(sequence),
            origin: Some(origin.into()),
            is_empty: false,
        }
    }
}

/// Stored replica record
#[derive(Debug, Clone, PartialEq, Eq)]
struct ReplicaRecord {
    state: ReplicaState,
    sequence: Option<u64>,
    origin: Option<NodeId>,
    is_empty: bool,
    /// The latest report lacked sequence or origin
    malformed: bool,
    reported_at: DateTime<Utc>,
}

impl ReplicaRecord {
    /// Reports lacking sequence or origin are never evidence for finalization.
    /// Values carried over from earlier reports only guard against regression.
    fn to_replica(&self, node: &NodeId) -> Replica {
        let malformed = self.malformed || self.sequence.is_none() || self.origin.is_none();
        let state = if malformed && self.state != ReplicaState::Deleted {
            ReplicaState::Unhealthy
        } else {
            self.state
        };
        Replica {
            node: node.clone(),
            state,
            sequence: if malformed { 0 } else { self.sequence.unwrap_or(0) },
            origin: self.origin.clone(),
            is_empty: self.is_empty,
        }
    }
}

#[derive(Debug, Clone)]
struct ContainerEntry {
    container: Container,
    replicas: BTreeMap<NodeId, ReplicaRecord>,
}

/// In-memory container/replica store
#[derive(Debug, Default)]
pub struct ContainerStore {
    entries: RwLock<HashMap<ContainerId, ContainerEntry>>,
}

impl ContainerStore {
    pub fn new() -> Self {
        Self::default()
    }

    // === Container operations ===

    pub fn add_container(&self, container: Container) -> Result<()> {
        let mut entries = write_lock(&self.entries, "container store")?;
        if entries.contains_key(&container.id) {
            return Err(Error::ContainerAlreadyExists(container.id));
        }
        entries.insert(
            container.id,
            ContainerEntry {
                container,
                replicas: BTreeMap::new(),
            },
        );
        Ok(())
    }

    pub fn container(&self, id: ContainerId) -> Result<Container> {
        let entries = read_lock(&self.entries, "container store")?;
        entries
            .get(&id)
            .map(|e| e.container.clone())
            .ok_or(Error::ContainerNotFound(id))
    }

    /// All container ids, sorted
    pub fn container_ids(&self) -> Result<Vec<ContainerId>> {
        let entries = read_lock(&self.entries, "container store")?;
        let mut ids: Vec<ContainerId> = entries.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(read_lock(&self.entries, "container store")?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn update_state(&self, id: ContainerId, state: ContainerState) -> Result<()> {
        let mut entries = write_lock(&self.entries, "container store")?;
        let entry = entries.get_mut(&id).ok_or(Error::ContainerNotFound(id))?;
        tracing::debug!(container = %id, from = %entry.container.state, to = %state, "container state change");
        entry.container.state = state;
        Ok(())
    }

    /// Advance the authoritative sequence; it never moves backwards
    pub fn update_sequence(&self, id: ContainerId, sequence: u64) -> Result<()> {
        let mut entries = write_lock(&self.entries, "container store")?;
        let entry = entries.get_mut(&id).ok_or(Error::ContainerNotFound(id))?;
        if sequence < entry.container.sequence {
            return Err(Error::InvalidReport {
                container: id,
                reason: format!(
                    "container sequence regressed from {} to {}",
                    entry.container.sequence, sequence
                ),
            });
        }
        entry.container.sequence = sequence;
        Ok(())
    }

    pub fn remove_container(&self, id: ContainerId) -> Result<Container> {
        let mut entries = write_lock(&self.entries, "container store")?;
        entries
            .remove(&id)
            .map(|e| e.container)
            .ok_or(Error::ContainerNotFound(id))
    }

    // === Replica operations ===

    /// Apply a node's report. Sequence regressions and origin changes are
    /// rejected and leave the stored record untouched.
    pub fn report_replica(&self, report: ReplicaReport) -> Result<()> {
        let mut entries = write_lock(&self.entries, "container store")?;
        let entry = entries
            .get_mut(&report.container)
            .ok_or(Error::ContainerNotFound(report.container))?;

        if let Some(existing) = entry.replicas.get(&report.node) {
            if let (Some(old), Some(new)) = (existing.sequence, report.sequence) {
                if new < old {
                    tracing::warn!(
                        container = %report.container,
                        node = %report.node,
                        old,
                        new,
                        "rejecting replica report with regressed sequence"
                    );
                    return Err(Error::InvalidReport {
                        container: report.container,
                        reason: format!("sequence on {} regressed from {} to {}", report.node, old, new),
                    });
                }
            }
            if let (Some(old), Some(new)) = (&existing.origin, &report.origin) {
                if old != new {
                    tracing::warn!(
                        container = %report.container,
                        node = %report.node,
                        %old,
                        %new,
                        "rejecting replica report with changed origin"
                    );
                    return Err(Error::InvalidReport {
                        container: report.container,
                        reason: format!("origin on {} changed from {} to {}", report.node, old, new),
                    });
                }
            }
        }

        let previous = entry.replicas.get(&report.node);
        let malformed = report.sequence.is_none() || report.origin.is_none();
        if malformed {
            tracing::warn!(
                container = %report.container,
                node = %report.node,
                "replica report missing sequence or origin; treating as unhealthy"
            );
        }
        let record = ReplicaRecord {
            state: report.state,
            sequence: report
                .sequence
                .or_else(|| previous.and_then(|p| p.sequence)),
            origin: report
                .origin
                .or_else(|| previous.and_then(|p| p.origin.clone())),
            is_empty: report.is_empty,
            malformed,
            reported_at: Utc::now(),
        };
        entry.replicas.insert(report.node, record);
        Ok(())
    }

    pub fn remove_replica(&self, id: ContainerId, node: &NodeId) -> Result<()> {
        let mut entries = write_lock(&self.entries, "container store")?;
        let entry = entries.get_mut(&id).ok_or(Error::ContainerNotFound(id))?;
        entry
            .replicas
            .remove(node)
            .map(|_| ())
            .ok_or_else(|| Error::ReplicaNotFound {
                container: id,
                node: node.clone(),
            })
    }

    /// Drop every replica hosted on a node; returns the affected containers
    pub fn evict_node(&self, node: &NodeId) -> Result<Vec<ContainerId>> {
        let mut entries = write_lock(&self.entries, "container store")?;
        let mut affected: Vec<ContainerId> = entries
            .iter_mut()
            .filter_map(|(id, entry)| entry.replicas.remove(node).map(|_| *id))
            .collect();
        affected.sort();
        Ok(affected)
    }

    /// When the node last reported this replica
    pub fn last_report(&self, id: ContainerId, node: &NodeId) -> Result<DateTime<Utc>> {
        let entries = read_lock(&self.entries, "container store")?;
        let entry = entries.get(&id).ok_or(Error::ContainerNotFound(id))?;
        entry
            .replicas
            .get(node)
            .map(|r| r.reported_at)
            .ok_or_else(|| Error::ReplicaNotFound {
                container: id,
                node: node.clone(),
            })
    }

    /// Consistent view of one container and its live replicas
    pub fn snapshot(&self, id: ContainerId) -> Result<ReplicaSet> {
        let entries = read_lock(&self.entries, "container store")?;
        let entry = entries.get(&id).ok_or(Error::ContainerNotFound(id))?;
        let replicas = entry
            .replicas
            .iter()
            .map(|(node, record)| record.to_replica(node));
        Ok(ReplicaSet::new(entry.container.clone(), replicas))
    }
}

/// Serializable description of a cluster: nodes, containers and replica reports
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterImage {
    #[serde(default)]
    pub nodes: Vec<NodeInfo>,
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub replicas: Vec<ReplicaReport>,
}

impl ClusterImage {
    /// Read a JSON image from disk
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Build the store and registry, including the node→container mapping.
    /// Replicas on nodes missing from the image are still stored; their
    /// directives are withheld at evaluation time.
    pub fn into_parts(self) -> Result<(ContainerStore, InMemoryNodeRegistry)> {
        let registry = InMemoryNodeRegistry::new();
        for node in self.nodes {
            registry.add_node(node)?;
        }

        let store = ContainerStore::new();
        for container in self.containers {
            store.add_container(container)?;
        }

        for report in self.replicas {
            let (container, node) = (report.container, report.node.clone());
            store.report_replica(report)?;
            match registry.add_container(&node, container) {
                Ok(()) => {}
                Err(Error::NodeNotFound(_)) => {
                    tracing::warn!(%node, %container, "replica reported by unregistered node");
                }
                Err(e) => return Err(e),
            }
        }

        Ok((store, registry))
    }
}
