//! Verify cluster replica health

use crate::common::{ContainerId, NodeHealth, NodeOperationalState, Result};
use crate::coordinator::{Evaluator, NodeFilter, NodeRegistry};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// A quasi-closed container that cannot be finalized yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StuckContainer {
    pub container: ContainerId,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    pub containers: usize,
    pub healthy: usize,
    pub under_replicated: usize,
    pub over_replicated: usize,
    pub stuck: Vec<StuckContainer>,
    pub finalizable: usize,
    /// Node counts keyed by `operational/health`
    pub nodes: BTreeMap<String, usize>,
    pub errors: Vec<String>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.healthy == self.containers && self.errors.is_empty()
    }
}

pub async fn verify_cluster(path: impl AsRef<Path>) -> Result<VerifyReport> {
    tracing::info!("Starting cluster verification");
    let (store, registry) = super::load_cluster(path.as_ref()).await?;

    let mut report = VerifyReport::default();
    for operational in [
        NodeOperationalState::InService,
        NodeOperationalState::Decommissioning,
        NodeOperationalState::Decommissioned,
        NodeOperationalState::EnteringMaintenance,
        NodeOperationalState::InMaintenance,
    ] {
        for health in [NodeHealth::Healthy, NodeHealth::Stale, NodeHealth::Dead] {
            let count = registry
                .list_by_state(NodeFilter::operational(operational).with_health(health))?
                .len();
            if count > 0 {
                report.nodes.insert(format!("{}/{}", operational, health), count);
            }
        }
    }

    let evaluator = Evaluator::new(&store, &registry);
    for id in store.container_ids()? {
        report.containers += 1;
        let evaluation = match evaluator.evaluate(id) {
            Ok(evaluation) => evaluation,
            Err(e) => {
                report.errors.push(format!("{}: {}", id, e));
                continue;
            }
        };

        if evaluation.health.is_under_replicated() {
            report.under_replicated += 1;
        }
        if evaluation.health.is_over_replicated() {
            report.over_replicated += 1;
        }
        if evaluation.is_finalizable() {
            report.finalizable += 1;
        }
        if let Some(verdict) = evaluation.verdict.as_ref().filter(|v| v.stuck) {
            report.stuck.push(StuckContainer {
                container: id,
                reason: verdict.reason().to_string(),
            });
        } else if evaluation.health.is_healthy() {
            report.healthy += 1;
        }
    }

    tracing::info!(
        containers = report.containers,
        healthy = report.healthy,
        stuck = report.stuck.len(),
        "Verification complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_verify_counts() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "nodes": [
                    {{"id": "dn-1", "status": {{"operational": "in_service", "health": "healthy"}}}},
                    {{"id": "dn-2", "status": {{"operational": "in_service", "health": "healthy"}}}},
                    {{"id": "dn-3", "status": {{"operational": "in_maintenance", "health": "stale"}}}}
                ],
                "containers": [
                    {{"id": 1, "state": "CLOSED", "replication_factor": 3, "sequence": 5}},
                    {{"id": 2, "state": "QUASI_CLOSED", "replication_factor": 3, "sequence": 5}}
                ],
                "replicas": [
                    {{"container": 1, "node": "dn-1", "state": "CLOSED", "sequence": 5, "origin": "dn-1"}},
                    {{"container": 1, "node": "dn-2", "state": "CLOSED", "sequence": 5, "origin": "dn-2"}},
                    {{"container": 1, "node": "dn-3", "state": "CLOSED", "sequence": 5, "origin": "dn-3"}},
                    {{"container": 2, "node": "dn-1", "state": "QUASI_CLOSED", "sequence": 5, "origin": "dn-1"}},
                    {{"container": 2, "node": "dn-2", "state": "QUASI_CLOSED", "sequence": 5, "origin": "dn-2"}}
                ]
            }}"#
        )
        .unwrap();

        let report = verify_cluster(file.path()).await.unwrap();
        assert_eq!(report.containers, 2);
        assert_eq!(report.healthy, 1);
        assert_eq!(report.under_replicated, 1);
        assert_eq!(report.stuck.len(), 1);
        assert_eq!(report.stuck[0].reason, "missing replica reports");
        assert_eq!(report.nodes["in_service/healthy"], 2);
        assert_eq!(report.nodes["in_maintenance/stale"], 1);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_verify_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = verify_cluster(dir.path().join("absent.json")).await;
        assert!(matches!(result, Err(crate::Error::Io(_))));
    }
}
