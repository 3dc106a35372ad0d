//! Node registry
//!
//! Tracks each storage node's operational and health state, plus the set of
//! containers it hosts. The reconciliation core only reads it, through the
//! [`NodeRegistry`] trait; heartbeat processing writes through
//! [`InMemoryNodeRegistry`]'s own methods.

use crate::common::utils::{read_lock, write_lock};
use crate::common::{ContainerId, Error, NodeHealth, NodeId, NodeOperationalState, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

/// Combined operational and health state of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub operational: NodeOperationalState,
    pub health: NodeHealth,
    /// When a maintenance or decommission state lapses on its own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op_state_expiry: Option<DateTime<Utc>>,
}

impl NodeStatus {
    pub fn new(operational: NodeOperationalState, health: NodeHealth) -> Self {
        Self {
            operational,
            health,
            op_state_expiry: None,
        }
    }

    pub fn in_service_healthy() -> Self {
        Self::new(NodeOperationalState::InService, NodeHealth::Healthy)
    }

    pub fn is_op_state_expired(&self, now: DateTime<Utc>) -> bool {
        self.op_state_expiry.is_some_and(|expiry| expiry <= now)
    }

    /// Status as it stands at `now`: a lapsed maintenance or decommission
    /// state reads as IN_SERVICE.
    pub fn effective(&self, now: DateTime<Utc>) -> NodeStatus {
        if self.is_op_state_expired(now) {
            NodeStatus::new(NodeOperationalState::InService, self.health)
        } else {
            self.clone()
        }
    }

    /// May act as the data source of a replicate directive
    pub fn can_source_replica(&self) -> bool {
        self.health != NodeHealth::Dead
            && self.operational != NodeOperationalState::Decommissioned
    }

    /// Will act on a close or delete directive
    pub fn can_receive_commands(&self) -> bool {
        self.health != NodeHealth::Dead
    }
}

/// Node details as registered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    #[serde(default)]
    pub address: String,
    pub status: NodeStatus,
}

impl NodeInfo {
    pub fn new(id: impl Into<NodeId>, status: NodeStatus) -> Self {
        Self {
            id: id.into(),
            address: String::new(),
            status,
        }
    }
}

/// Filter over node status; `None` fields match anything
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeFilter {
    pub operational: Option<NodeOperationalState>,
    pub health: Option<NodeHealth>,
}

impl NodeFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn operational(state: NodeOperationalState) -> Self {
        Self {
            operational: Some(state),
            health: None,
        }
    }

    pub fn health(health: NodeHealth) -> Self {
        Self {
            operational: None,
            health: Some(health),
        }
    }

    pub fn with_health(mut self, health: NodeHealth) -> Self {
        self.health = Some(health);
        self
    }

    pub fn matches(&self, status: &NodeStatus) -> bool {
        self.operational.map_or(true, |s| s == status.operational)
            && self.health.map_or(true, |h| h == status.health)
    }
}

/// Read-only view of node state consumed by the reconciliation core
pub trait NodeRegistry: Send + Sync {
    /// Current status of one node
    fn lookup(&self, node: &NodeId) -> Result<NodeStatus>;

    /// Nodes whose status matches the filter, sorted by id
    fn list_by_state(&self, filter: NodeFilter) -> Result<Vec<NodeId>>;
}

#[derive(Debug, Default)]
struct RegistryState {
    nodes: HashMap<NodeId, NodeInfo>,
    containers: HashMap<NodeId, BTreeSet<ContainerId>>,
}

impl RegistryState {
    fn node_mut(&mut self, id: &NodeId) -> Result<&mut NodeInfo> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| Error::NodeNotFound(id.clone()))
    }

    fn containers_mut(&mut self, id: &NodeId) -> Result<&mut BTreeSet<ContainerId>> {
        self.containers
            .get_mut(id)
            .ok_or_else(|| Error::NodeNotFound(id.clone()))
    }

    fn containers(&self, id: &NodeId) -> Result<&BTreeSet<ContainerId>> {
        self.containers
            .get(id)
            .ok_or_else(|| Error::NodeNotFound(id.clone()))
    }
}

/// In-memory registry guarded by a single reader-writer lock
#[derive(Debug, Default)]
pub struct InMemoryNodeRegistry {
    state: RwLock<RegistryState>,
}

impl InMemoryNodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, RegistryState>> {
        read_lock(&self.state, "node registry")
            .map_err(|e| Error::RegistryUnavailable(e.to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, RegistryState>> {
        write_lock(&self.state, "node registry")
            .map_err(|e| Error::RegistryUnavailable(e.to_string()))
    }

    /// Register a new node
    pub fn add_node(&self, info: NodeInfo) -> Result<()> {
        let mut state = self.write()?;
        if state.nodes.contains_key(&info.id) {
            return Err(Error::NodeAlreadyExists(info.id));
        }
        state.containers.insert(info.id.clone(), BTreeSet::new());
        state.nodes.insert(info.id.clone(), info);
        Ok(())
    }

    /// Forget a node and its container set
    pub fn remove_node(&self, id: &NodeId) -> Result<()> {
        let mut state = self.write()?;
        state.nodes.remove(id);
        state.containers.remove(id);
        Ok(())
    }

    /// Replace a registered node's details and status
    pub fn update_node(&self, info: NodeInfo) -> Result<()> {
        let mut state = self.write()?;
        let node = state.node_mut(&info.id)?;
        *node = info;
        Ok(())
    }

    /// Change health, keeping the operational state
    pub fn update_health(&self, id: &NodeId, health: NodeHealth) -> Result<NodeStatus> {
        let mut state = self.write()?;
        let node = state.node_mut(id)?;
        node.status.health = health;
        Ok(node.status.clone())
    }

    /// Change operational state, keeping health
    pub fn update_operational_state(
        &self,
        id: &NodeId,
        operational: NodeOperationalState,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<NodeStatus> {
        let mut state = self.write()?;
        let node = state.node_mut(id)?;
        node.status.operational = operational;
        node.status.op_state_expiry = expiry;
        Ok(node.status.clone())
    }

    pub fn node_info(&self, id: &NodeId) -> Result<NodeInfo> {
        let state = self.read()?;
        state
            .nodes
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NodeNotFound(id.clone()))
    }

    pub fn node_status(&self, id: &NodeId) -> Result<NodeStatus> {
        self.node_info(id).map(|info| info.status)
    }

    /// All registered node ids, sorted
    pub fn all_nodes(&self) -> Result<Vec<NodeId>> {
        self.list_by_state(NodeFilter::any())
    }

    pub fn node_count(&self, filter: NodeFilter) -> Result<usize> {
        let state = self.read()?;
        Ok(state
            .nodes
            .values()
            .filter(|n| filter.matches(&n.status))
            .count())
    }

    pub fn total_node_count(&self) -> Result<usize> {
        Ok(self.read()?.nodes.len())
    }

    // === Container tracking ===

    pub fn add_container(&self, id: &NodeId, container: ContainerId) -> Result<()> {
        self.write()?.containers_mut(id)?.insert(container);
        Ok(())
    }

    pub fn set_containers(&self, id: &NodeId, containers: BTreeSet<ContainerId>) -> Result<()> {
        *self.write()?.containers_mut(id)? = containers;
        Ok(())
    }

    pub fn containers(&self, id: &NodeId) -> Result<BTreeSet<ContainerId>> {
        Ok(self.read()?.containers(id)?.clone())
    }

    pub fn container_count(&self, id: &NodeId) -> Result<usize> {
        Ok(self.read()?.containers(id)?.len())
    }

    pub fn remove_container(&self, id: &NodeId, container: ContainerId) -> Result<()> {
        self.write()?.containers_mut(id)?.remove(&container);
        Ok(())
    }
}

impl NodeRegistry for InMemoryNodeRegistry {
    fn lookup(&self, node: &NodeId) -> Result<NodeStatus> {
        let state = self.read()?;
        state
            .nodes
            .get(node)
            .map(|n| n.status.effective(Utc::now()))
            .ok_or_else(|| Error::NodeNotFound(node.clone()))
    }

    fn list_by_state(&self, filter: NodeFilter) -> Result<Vec<NodeId>> {
        let state = self.read()?;
        let now = Utc::now();
        let mut ids: Vec<NodeId> = state
            .nodes
            .values()
            .filter(|n| filter.matches(&n.status.effective(now)))
            .map(|n| n.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn registry_with(nodes: &[(&str, NodeOperationalState, NodeHealth)]) -> InMemoryNodeRegistry {
        let registry = InMemoryNodeRegistry::new();
        for (id, op, health) in nodes {
            registry
                .add_node(NodeInfo::new(*id, NodeStatus::new(*op, *health)))
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_add_and_lookup() {
        let registry = registry_with(&[("dn-1", NodeOperationalState::InService, NodeHealth::Healthy)]);

        let status = registry.lookup(&NodeId::from("dn-1")).unwrap();
        assert_eq!(status, NodeStatus::in_service_healthy());

        let dup = registry.add_node(NodeInfo::new("dn-1", NodeStatus::in_service_healthy()));
        assert!(matches!(dup, Err(Error::NodeAlreadyExists(_))));

        let missing = registry.lookup(&NodeId::from("dn-9"));
        assert!(matches!(missing, Err(Error::NodeNotFound(_))));
    }

    #[test]
    fn test_list_by_state() {
        let registry = registry_with(&[
            ("dn-3", NodeOperationalState::InService, NodeHealth::Dead),
            ("dn-1", NodeOperationalState::InService, NodeHealth::Healthy),
            ("dn-2", NodeOperationalState::Decommissioning, NodeHealth::Healthy),
        ]);

        let healthy = registry.list_by_state(NodeFilter::health(NodeHealth::Healthy)).unwrap();
        assert_eq!(healthy, vec![NodeId::from("dn-1"), NodeId::from("dn-2")]);

        let in_service_healthy = registry
            .list_by_state(
                NodeFilter::operational(NodeOperationalState::InService)
                    .with_health(NodeHealth::Healthy),
            )
            .unwrap();
        assert_eq!(in_service_healthy, vec![NodeId::from("dn-1")]);

        assert_eq!(registry.all_nodes().unwrap().len(), 3);
        assert_eq!(registry.node_count(NodeFilter::health(NodeHealth::Dead)).unwrap(), 1);
        assert_eq!(registry.total_node_count().unwrap(), 3);
    }

    #[test]
    fn test_partial_status_updates() {
        let registry = registry_with(&[("dn-1", NodeOperationalState::InService, NodeHealth::Healthy)]);
        let id = NodeId::from("dn-1");

        let status = registry.update_health(&id, NodeHealth::Stale).unwrap();
        assert_eq!(status.operational, NodeOperationalState::InService);
        assert_eq!(status.health, NodeHealth::Stale);

        let expiry = Utc::now() + Duration::hours(1);
        let status = registry
            .update_operational_state(&id, NodeOperationalState::InMaintenance, Some(expiry))
            .unwrap();
        assert_eq!(status.health, NodeHealth::Stale);
        assert!(!status.is_op_state_expired(Utc::now()));
        assert!(status.is_op_state_expired(expiry + Duration::seconds(1)));

        let missing = registry.update_health(&NodeId::from("dn-2"), NodeHealth::Dead);
        assert!(matches!(missing, Err(Error::NodeNotFound(_))));
    }

    #[test]
    fn test_lapsed_op_state_reads_in_service() {
        let registry = registry_with(&[
            ("dn-1", NodeOperationalState::InService, NodeHealth::Healthy),
            ("dn-2", NodeOperationalState::InService, NodeHealth::Stale),
        ]);
        let lapsed = NodeId::from("dn-1");
        let pending = NodeId::from("dn-2");
        registry
            .update_operational_state(
                &lapsed,
                NodeOperationalState::Decommissioning,
                Some(Utc::now() - Duration::minutes(5)),
            )
            .unwrap();
        registry
            .update_operational_state(
                &pending,
                NodeOperationalState::InMaintenance,
                Some(Utc::now() + Duration::hours(1)),
            )
            .unwrap();

        let status = registry.lookup(&lapsed).unwrap();
        assert_eq!(status, NodeStatus::in_service_healthy());
        assert_eq!(
            registry.lookup(&pending).unwrap().operational,
            NodeOperationalState::InMaintenance
        );

        let in_service = registry
            .list_by_state(NodeFilter::operational(NodeOperationalState::InService))
            .unwrap();
        assert_eq!(in_service, vec![lapsed.clone()]);
        let decommissioning = registry
            .list_by_state(NodeFilter::operational(NodeOperationalState::Decommissioning))
            .unwrap();
        assert!(decommissioning.is_empty());

        // the stored record is untouched until heartbeat processing rewrites it
        assert_eq!(
            registry.node_info(&lapsed).unwrap().status.operational,
            NodeOperationalState::Decommissioning
        );
    }

    #[test]
    fn test_container_tracking() {
        let registry = registry_with(&[("dn-1", NodeOperationalState::InService, NodeHealth::Healthy)]);
        let id = NodeId::from("dn-1");

        registry.add_container(&id, ContainerId::new(1)).unwrap();
        registry.add_container(&id, ContainerId::new(2)).unwrap();
        registry.add_container(&id, ContainerId::new(2)).unwrap();
        assert_eq!(registry.container_count(&id).unwrap(), 2);

        registry.remove_container(&id, ContainerId::new(1)).unwrap();
        assert_eq!(
            registry.containers(&id).unwrap().into_iter().collect::<Vec<_>>(),
            vec![ContainerId::new(2)]
        );

        registry
            .set_containers(&id, [ContainerId::new(5), ContainerId::new(6)].into())
            .unwrap();
        assert_eq!(registry.container_count(&id).unwrap(), 2);

        registry.remove_node(&id).unwrap();
        assert!(registry.containers(&id).is_err());
        assert!(registry.add_container(&id, ContainerId::new(1)).is_err());
    }

    #[test]
    fn test_node_validity_rules() {
        let dead = NodeStatus::new(NodeOperationalState::InService, NodeHealth::Dead);
        assert!(!dead.can_source_replica());
        assert!(!dead.can_receive_commands());

        let decommissioned = NodeStatus::new(NodeOperationalState::Decommissioned, NodeHealth::Healthy);
        assert!(!decommissioned.can_source_replica());
        assert!(decommissioned.can_receive_commands());

        let stale = NodeStatus::new(NodeOperationalState::Decommissioning, NodeHealth::Stale);
        assert!(stale.can_source_replica());
    }
}
