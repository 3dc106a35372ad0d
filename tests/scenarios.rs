//! Reconciliation scenarios for a quasi-closed container with factor 3

use replicon::common::{ContainerId, ContainerState, NodeId, ReplicaState};
use replicon::coordinator::{
    Container, ContainerStore, DirectiveKind, Evaluation, Evaluator, InMemoryNodeRegistry,
    NodeInfo, NodeStatus, ReplicaReport,
};
use ReplicaState::{Closed, Open, QuasiClosed, Unhealthy};

const FACTOR: usize = 3;

struct Cluster {
    store: ContainerStore,
    registry: InMemoryNodeRegistry,
}

impl Cluster {
    fn new(state: ContainerState, replicas: &[(&str, ReplicaState, u64, &str)]) -> Self {
        let store = ContainerStore::new();
        let registry = InMemoryNodeRegistry::new();
        for node in ["dn-1", "dn-2", "dn-3", "dn-4"] {
            registry
                .add_node(NodeInfo::new(node, NodeStatus::in_service_healthy()))
                .unwrap();
        }
        store
            .add_container(Container::new(ContainerId::new(1), state, FACTOR))
            .unwrap();
        for (node, replica_state, seq, origin) in replicas {
            store
                .report_replica(ReplicaReport::new(
                    ContainerId::new(1),
                    *node,
                    *replica_state,
                    *seq,
                    *origin,
                ))
                .unwrap();
        }
        Self { store, registry }
    }

    fn quasi_closed(replicas: &[(&str, ReplicaState, u64, &str)]) -> Self {
        Self::new(ContainerState::QuasiClosed, replicas)
    }

    fn evaluate(&self) -> Evaluation {
        Evaluator::new(&self.store, &self.registry)
            .evaluate(ContainerId::new(1))
            .unwrap()
    }
}

fn close_targets(evaluation: &Evaluation) -> Vec<String> {
    evaluation
        .of_kind(DirectiveKind::Close)
        .filter_map(|d| d.target.as_ref().map(|t| t.to_string()))
        .collect()
}

fn replicate_sources(evaluation: &Evaluation) -> Vec<Option<NodeId>> {
    evaluation
        .of_kind(DirectiveKind::Replicate)
        .map(|d| d.source.clone())
        .collect()
}

fn stuck(evaluation: &Evaluation) -> bool {
    evaluation.verdict.as_ref().map(|v| v.stuck).unwrap()
}

#[test]
fn test_open_replica_is_nudged() {
    let e = Cluster::quasi_closed(&[
        ("dn-1", QuasiClosed, 12, "o1"),
        ("dn-2", QuasiClosed, 12, "o2"),
        ("dn-3", Open, 12, "o3"),
    ])
    .evaluate();

    assert!(stuck(&e));
    assert_eq!(close_targets(&e), vec!["dn-3"]);
    assert_eq!(e.count(DirectiveKind::Replicate), 0);
    assert_eq!(e.directives.len(), 1);
}

#[test]
fn test_missing_report_waits_and_replicates() {
    let e = Cluster::quasi_closed(&[
        ("dn-1", QuasiClosed, 12, "o1"),
        ("dn-2", QuasiClosed, 12, "o2"),
    ])
    .evaluate();

    assert!(stuck(&e));
    assert!(e.health.is_under_replicated());
    assert!(close_targets(&e).is_empty());
    assert_eq!(replicate_sources(&e), vec![None]);
}

#[test]
fn test_duplicate_origin_emits_nothing() {
    let e = Cluster::quasi_closed(&[
        ("dn-1", QuasiClosed, 12, "o1"),
        ("dn-2", QuasiClosed, 12, "o2"),
        ("dn-3", QuasiClosed, 12, "o2"),
    ])
    .evaluate();

    assert!(stuck(&e));
    assert_eq!(e.health.good, FACTOR);
    assert!(e.directives.is_empty());
}

#[test]
fn test_distinct_origins_finalize() {
    let e = Cluster::quasi_closed(&[
        ("dn-1", QuasiClosed, 12, "o1"),
        ("dn-2", QuasiClosed, 12, "o2"),
        ("dn-3", QuasiClosed, 12, "o3"),
    ])
    .evaluate();

    assert!(!stuck(&e));
    assert_eq!(close_targets(&e), vec!["dn-1", "dn-2", "dn-3"]);
    assert_eq!(e.directives.len(), 3);
}

#[test]
fn test_lagging_replica_untouched() {
    let e = Cluster::quasi_closed(&[
        ("dn-1", QuasiClosed, 12, "o1"),
        ("dn-2", QuasiClosed, 12, "o2"),
        ("dn-3", QuasiClosed, 11, "o3"),
    ])
    .evaluate();

    assert!(!stuck(&e));
    assert_eq!(close_targets(&e), vec!["dn-1", "dn-2"]);
    assert_eq!(e.directives.len(), 2);
}

#[test]
fn test_unhealthy_member_replaced() {
    let e = Cluster::quasi_closed(&[
        ("dn-1", QuasiClosed, 10, "o1"),
        ("dn-2", QuasiClosed, 10, "o2"),
        ("dn-3", Unhealthy, 10, "o3"),
    ])
    .evaluate();

    assert!(!stuck(&e));
    assert!(e.health.is_under_replicated());
    assert_eq!(close_targets(&e), vec!["dn-1", "dn-2"]);
    assert_eq!(replicate_sources(&e), vec![None]);
}

#[test]
fn test_report_without_sequence_or_origin_is_unhealthy() {
    let cluster = Cluster::quasi_closed(&[
        ("dn-1", QuasiClosed, 10, "o1"),
        ("dn-2", QuasiClosed, 10, "o2"),
        ("dn-3", Open, 10, "o3"),
    ]);
    let mut report = ReplicaReport::new(ContainerId::new(1), "dn-3", QuasiClosed, 10, "o3");
    report.sequence = None;
    report.origin = None;
    cluster.store.report_replica(report).unwrap();

    let e = cluster.evaluate();
    let dn3 = cluster
        .store
        .snapshot(ContainerId::new(1))
        .unwrap()
        .replicas()
        .iter()
        .find(|r| r.node.as_str() == "dn-3")
        .cloned()
        .unwrap();
    assert_eq!(dn3.state, Unhealthy);
    assert_eq!(dn3.sequence, 0);

    assert!(!stuck(&e));
    assert_eq!(close_targets(&e), vec!["dn-1", "dn-2"]);
    assert_eq!(replicate_sources(&e), vec![None]);
}

#[test]
fn test_single_good_replica_is_pinned_source() {
    let e = Cluster::quasi_closed(&[
        ("dn-1", QuasiClosed, 10, "o1"),
        ("dn-2", Unhealthy, 10, "o2"),
        ("dn-3", Unhealthy, 10, "o3"),
    ])
    .evaluate();

    assert!(!stuck(&e));
    assert_eq!(close_targets(&e), vec!["dn-1"]);
    let source = Some(NodeId::from("dn-1"));
    assert_eq!(replicate_sources(&e), vec![source.clone(), source]);
}

#[test]
fn test_latest_write_only_on_unhealthy() {
    let e = Cluster::quasi_closed(&[
        ("dn-1", QuasiClosed, 10, "o1"),
        ("dn-2", QuasiClosed, 10, "o2"),
        ("dn-3", Unhealthy, 11, "o3"),
    ])
    .evaluate();

    assert!(stuck(&e));
    assert!(e.health.is_under_replicated());
    assert!(close_targets(&e).is_empty());
    assert_eq!(e.count(DirectiveKind::Replicate), 1);
    assert_eq!(e.directives.len(), 1);
}

#[test]
fn test_duplicate_origin_with_unhealthy_leader() {
    let e = Cluster::quasi_closed(&[
        ("dn-1", QuasiClosed, 10, "o1"),
        ("dn-2", QuasiClosed, 10, "o2"),
        ("dn-3", QuasiClosed, 10, "o2"),
        ("dn-4", Unhealthy, 11, "o3"),
    ])
    .evaluate();

    assert!(stuck(&e));
    assert!(!e.health.is_under_replicated());
    assert!(!e.health.is_over_replicated());
    assert!(e.directives.is_empty());
}

#[test]
fn test_repeated_evaluation_is_identical() {
    let cluster = Cluster::quasi_closed(&[
        ("dn-1", QuasiClosed, 10, "o1"),
        ("dn-2", Closed, 10, "o2"),
        ("dn-3", Unhealthy, 11, "o3"),
        ("dn-4", QuasiClosed, 9, "o4"),
    ]);
    let first = cluster.evaluate();
    for _ in 0..5 {
        assert_eq!(cluster.evaluate(), first);
    }
}

#[test]
fn test_capacity_and_safety_properties() {
    let states = [Open, QuasiClosed, Closed, Unhealthy];
    for a in states {
        for b in states {
            for c in states {
                for seq_c in [7, 8] {
                    let cluster = Cluster::quasi_closed(&[
                        ("dn-1", a, 8, "o1"),
                        ("dn-2", b, 8, "o2"),
                        ("dn-3", c, seq_c, "o3"),
                    ]);
                    let e = cluster.evaluate();
                    let health = e.health;
                    let verdict = e.verdict.clone().unwrap();

                    assert_eq!(health.good + health.unhealthy, health.total);

                    let withheld_replicates = e
                        .withheld
                        .iter()
                        .filter(|w| w.kind == DirectiveKind::Replicate)
                        .count();
                    assert_eq!(
                        e.count(DirectiveKind::Replicate) + withheld_replicates,
                        FACTOR.saturating_sub(health.good)
                    );

                    if verdict.no_eligible() || verdict.origins.is_ambiguous() {
                        assert!(verdict.stuck);
                    }
                    if !verdict.blocking_open {
                        for target in close_targets(&e) {
                            assert!(verdict.eligible.contains(&NodeId::from(target.as_str())));
                        }
                    }
                }
            }
        }
    }
}

#[test]
fn test_over_replicated_keeps_origins_and_latest() {
    let cluster = Cluster::new(
        ContainerState::Closed,
        &[
            ("dn-1", Closed, 10, "o1"),
            ("dn-2", Closed, 9, "o1"),
            ("dn-3", Closed, 10, "o2"),
            ("dn-4", Closed, 8, "o3"),
        ],
    );
    let e = cluster.evaluate();
    assert!(e.health.is_over_replicated());

    let deletes: Vec<_> = e
        .of_kind(DirectiveKind::Delete)
        .filter_map(|d| d.target.clone())
        .collect();
    assert_eq!(deletes, vec![NodeId::from("dn-2")]);
}
