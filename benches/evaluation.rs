//! Evaluation pass benchmarks
//!
//! Measures one full evaluation (snapshot, classify, resolve, generate) at
//! growing replica counts, plus the resolver alone.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use replicon::common::{ContainerId, ContainerState, ReplicaState};
use replicon::coordinator::{
    Container, ContainerStore, Evaluator, InMemoryNodeRegistry, NodeInfo, NodeStatus,
    QuorumResolver, ReplicaReport,
};

/// Replicas per container
const SIZES: &[usize] = &[3, 9, 27, 81];

fn cluster(replicas: usize) -> (ContainerStore, InMemoryNodeRegistry) {
    let store = ContainerStore::new();
    let registry = InMemoryNodeRegistry::new();
    let id = ContainerId::new(1);
    store
        .add_container(Container::new(id, ContainerState::QuasiClosed, 3))
        .unwrap();

    for n in 0..replicas {
        let node = format!("dn-{:03}", n);
        registry
            .add_node(NodeInfo::new(node.as_str(), NodeStatus::in_service_healthy()))
            .unwrap();
        let state = if n % 5 == 4 {
            ReplicaState::Unhealthy
        } else {
            ReplicaState::QuasiClosed
        };
        store
            .report_replica(ReplicaReport::new(id, node.as_str(), state, 100 + (n % 3) as u64, node.as_str()))
            .unwrap();
    }
    (store, registry)
}

fn bench_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate");

    for size in SIZES {
        group.throughput(Throughput::Elements(*size as u64));
        let (store, registry) = cluster(*size);
        let evaluator = Evaluator::new(&store, &registry);

        group.bench_with_input(BenchmarkId::new("container", size), size, |b, _| {
            b.iter(|| black_box(evaluator.evaluate(ContainerId::new(1)).unwrap()))
        });
    }

    group.finish();
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");

    for size in SIZES {
        group.throughput(Throughput::Elements(*size as u64));
        let (store, _registry) = cluster(*size);
        let set = store.snapshot(ContainerId::new(1)).unwrap();

        group.bench_with_input(BenchmarkId::new("quasi_closed", size), &set, |b, set| {
            b.iter(|| black_box(QuorumResolver::resolve(set)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_evaluate, bench_resolve);
criterion_main!(benches);
