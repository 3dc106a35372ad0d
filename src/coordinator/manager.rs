//! Replication manager
//!
//! Runs evaluation passes over every container, keeps the reconciliation
//! queues in line with their health, and pushes directives into a bounded
//! outbound channel owned by the dispatcher.
//!
//! Close directives go out on every pass. Repairs go out only for the
//! containers drained from the queues, at most `max_repairs_per_cycle` per
//! cycle, minus repairs still in flight from earlier cycles.
//!
//! Callers must not evaluate the same container from two tasks at once.
//! [`ReplicationManager::run_cycle`] evaluates each container exactly once.

use crate::common::{ContainerId, Error, NodeId, ReconcilerConfig, ReconcilerMetrics, ReplicaState, Result};
use crate::coordinator::commands::{Directive, DirectiveKind};
use crate::coordinator::evaluator::{Evaluation, Evaluator};
use crate::coordinator::health::HealthClassifier;
use crate::coordinator::metadata::{ContainerStore, ReplicaReport};
use crate::coordinator::node_registry::InMemoryNodeRegistry;
use crate::coordinator::queue::ReconciliationQueues;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Summary of one reconciliation cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub evaluated: usize,
    pub failed: usize,
    pub stuck: usize,
    pub finalizable: usize,
    pub under_replicated: usize,
    pub over_replicated: usize,
    pub closes: usize,
    pub replicates: usize,
    pub deletes: usize,
    pub withheld: usize,
    /// Dropped because the outbound channel was full or closed
    pub dropped: usize,
    /// Not re-issued because an earlier copy is still in flight
    pub inflight_suppressed: usize,
}

impl CycleReport {
    pub fn dispatched(&self) -> usize {
        self.closes + self.replicates + self.deletes
    }

    fn record_sent(&mut self, kind: DirectiveKind) {
        match kind {
            DirectiveKind::Close => self.closes += 1,
            DirectiveKind::Replicate => self.replicates += 1,
            DirectiveKind::Delete => self.deletes += 1,
        }
    }
}

pub struct ReplicationManager {
    config: ReconcilerConfig,
    store: Arc<ContainerStore>,
    registry: Arc<InMemoryNodeRegistry>,
    queues: Arc<ReconciliationQueues>,
    metrics: Arc<ReconcilerMetrics>,
    directives: mpsc::Sender<Directive>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ReplicationManager {
    /// Build a manager and the receiving end of its directive channel
    pub fn new(
        config: ReconcilerConfig,
        store: Arc<ContainerStore>,
        registry: Arc<InMemoryNodeRegistry>,
    ) -> (Self, mpsc::Receiver<Directive>) {
        let (directives, rx) = mpsc::channel(config.directive_channel_capacity.max(1));
        let (shutdown_tx, _) = broadcast::channel(1);
        let manager = Self {
            config,
            store,
            registry,
            queues: Arc::new(ReconciliationQueues::new()),
            metrics: Arc::new(ReconcilerMetrics::new()),
            directives,
            shutdown_tx,
        };
        (manager, rx)
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn store(&self) -> &ContainerStore {
        &self.store
    }

    pub fn registry(&self) -> &InMemoryNodeRegistry {
        &self.registry
    }

    pub fn queues(&self) -> &ReconciliationQueues {
        &self.queues
    }

    pub fn metrics(&self) -> &ReconcilerMetrics {
        &self.metrics
    }

    // === Triggered operations ===

    /// Evaluate one container and update its queue membership.
    /// Nothing is dispatched; an unknown container leaves the queues alone.
    pub fn evaluate(&self, id: ContainerId) -> Result<Evaluation> {
        let started = Instant::now();
        let result = Evaluator::new(&self.store, self.registry.as_ref()).evaluate(id);
        self.metrics.record_evaluation(started.elapsed(), result.is_ok());
        let evaluation = result?;
        self.apply(&evaluation)?;
        Ok(evaluation)
    }

    /// Record a node's replica report and keep the node→container map current
    pub fn ingest_report(&self, report: ReplicaReport) -> Result<()> {
        let (container, node, state) = (report.container, report.node.clone(), report.state);
        self.store.report_replica(report)?;

        let tracked = if state == ReplicaState::Deleted {
            self.registry.remove_container(&node, container)
        } else {
            self.registry.add_container(&node, container)
        };
        match tracked {
            Ok(()) => Ok(()),
            Err(Error::NodeNotFound(_)) => {
                warn!(%node, %container, "report from unregistered node");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Re-evaluate every container hosted on a node after its status changed,
    /// dispatching the resulting close directives
    pub fn handle_node_change(&self, node: &NodeId) -> Result<Vec<Evaluation>> {
        let containers = self.registry.containers(node)?;
        debug!(%node, containers = containers.len(), "node status changed");

        let mut report = CycleReport::default();
        let mut evaluations = Vec::with_capacity(containers.len());
        for id in containers {
            match self.evaluate(id) {
                Ok(evaluation) => {
                    for close in evaluation.of_kind(DirectiveKind::Close) {
                        self.dispatch(close.clone(), &mut report);
                    }
                    evaluations.push(evaluation);
                }
                Err(e) if e.is_not_found() => {
                    debug!(%node, container = %id, "tracked container no longer exists");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(evaluations)
    }

    /// Permanently remove a node: drop its replicas and re-evaluate what it hosted
    pub fn evict_node(&self, node: &NodeId) -> Result<Vec<Evaluation>> {
        let affected = self.store.evict_node(node)?;
        self.registry.remove_node(node)?;
        info!(%node, containers = affected.len(), "node evicted");

        affected
            .into_iter()
            .filter_map(|id| match self.evaluate(id) {
                Err(e) if e.is_not_found() => None,
                other => Some(other),
            })
            .collect()
    }

    // === Periodic cycle ===

    /// Evaluate every container, then dispatch closes and a batch of repairs
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let ids = self.store.container_ids()?;
        let mut report = CycleReport::default();

        let mut tasks = JoinSet::new();
        for id in ids {
            let store = Arc::clone(&self.store);
            let registry = Arc::clone(&self.registry);
            let metrics = Arc::clone(&self.metrics);
            tasks.spawn_blocking(move || {
                let started = Instant::now();
                let result = Evaluator::new(&store, registry.as_ref()).evaluate(id);
                metrics.record_evaluation(started.elapsed(), result.is_ok());
                (id, result)
            });
        }

        let mut evaluations = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, Ok(evaluation))) => {
                    evaluations.insert(id, evaluation);
                }
                Ok((id, Err(e))) if e.is_not_found() => {
                    debug!(container = %id, "container removed during cycle");
                }
                Ok((id, Err(e))) => {
                    error!(container = %id, error = %e, "evaluation failed");
                    report.failed += 1;
                }
                Err(e) => {
                    error!(error = %e, "evaluation task failed");
                    report.failed += 1;
                }
            }
        }

        for evaluation in evaluations.values() {
            if let Err(e) = self.apply(evaluation) {
                error!(container = %evaluation.id(), error = %e, "queue update failed");
                report.failed += 1;
            }
            report.evaluated += 1;
            report.stuck += usize::from(evaluation.is_stuck());
            report.finalizable += usize::from(evaluation.is_finalizable());
            report.under_replicated += usize::from(evaluation.health.is_under_replicated());
            report.over_replicated += usize::from(evaluation.health.is_over_replicated());
            report.withheld += evaluation.withheld_count();

            for close in evaluation.of_kind(DirectiveKind::Close) {
                self.dispatch(close.clone(), &mut report);
            }
        }

        self.dispatch_repairs(&evaluations, &mut report)?;

        self.metrics.withheld_directives.add(report.withheld as u64);
        self.metrics.stuck_containers.set(report.stuck as u64);
        self.metrics.under_replicated.set(report.under_replicated as u64);
        self.metrics.over_replicated.set(report.over_replicated as u64);
        Ok(report)
    }

    /// Drain one batch from the queues and send the repairs still needed
    fn dispatch_repairs(
        &self,
        evaluations: &BTreeMap<ContainerId, Evaluation>,
        report: &mut CycleReport,
    ) -> Result<()> {
        let now = Instant::now();
        let batch = self.queues.dequeue_batch(self.config.max_repairs_per_cycle)?;
        for entry in batch {
            let Some(evaluation) = evaluations.get(&entry.container) else {
                continue;
            };
            let kind = entry.reason.repair_kind();
            let wanted: Vec<&Directive> = evaluation.of_kind(kind).collect();
            let inflight = self.queues.inflight(entry.container, kind, now)?;
            let suppressed = inflight.min(wanted.len());
            if suppressed > 0 {
                debug!(container = %entry.container, %kind, suppressed, "repairs already in flight");
                report.inflight_suppressed += suppressed;
                self.metrics.inflight_suppressed.add(suppressed as u64);
            }

            // Earlier copies went to the front of the same ordering.
            let mut sent = 0;
            for directive in wanted.into_iter().skip(suppressed) {
                if self.dispatch(directive.clone(), report) {
                    sent += 1;
                }
            }
            self.queues
                .record_inflight(entry.container, kind, sent, now, self.config.inflight_timeout)?;
        }
        Ok(())
    }

    /// Queue membership and in-flight bookkeeping for one evaluation
    fn apply(&self, evaluation: &Evaluation) -> Result<()> {
        let id = evaluation.id();
        if evaluation.container.state.is_being_deleted() {
            return self.queues.forget(id);
        }
        HealthClassifier::update_queues(&evaluation.health, evaluation.is_repairable(), &self.queues)?;
        // Withheld repairs are still needed; only a changed replica count
        // means earlier ones landed.
        let (missing, excess) = if evaluation.is_repairable() {
            (evaluation.health.missing(), evaluation.health.excess())
        } else {
            (0, 0)
        };
        self.queues.trim_inflight(id, DirectiveKind::Replicate, missing)?;
        self.queues.trim_inflight(id, DirectiveKind::Delete, excess)?;
        Ok(())
    }

    /// Fire-and-forget send; returns whether the directive was accepted
    fn dispatch(&self, directive: Directive, report: &mut CycleReport) -> bool {
        let kind = directive.kind;
        match self.directives.try_send(directive) {
            Ok(()) => {
                self.metrics.record_dispatched(kind);
                report.record_sent(kind);
                true
            }
            Err(TrySendError::Full(directive)) => {
                warn!(%directive, "directive channel full; dropping");
                self.metrics.dropped_directives.inc();
                report.dropped += 1;
                false
            }
            Err(TrySendError::Closed(directive)) => {
                warn!(%directive, "directive channel closed; dropping");
                self.metrics.dropped_directives.inc();
                report.dropped += 1;
                false
            }
        }
    }

    // === Lifecycle ===

    /// Start the periodic loop. The queues are closed when it exits.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!(
            interval = %crate::common::format_duration(self.config.interval),
            max_repairs_per_cycle = self.config.max_repairs_per_cycle,
            "starting replication manager"
        );

        tokio::spawn(async move {
            let mut ticker = interval(manager.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => match manager.run_cycle().await {
                        Ok(report) if report.dispatched() > 0 || report.failed > 0 => {
                            info!(
                                evaluated = report.evaluated,
                                failed = report.failed,
                                closes = report.closes,
                                replicates = report.replicates,
                                deletes = report.deletes,
                                stuck = report.stuck,
                                "reconciliation cycle complete"
                            );
                        }
                        Ok(report) => {
                            debug!(evaluated = report.evaluated, "reconciliation cycle complete, nothing to do");
                        }
                        Err(e) => error!(error = %e, "reconciliation cycle failed"),
                    },
                    _ = shutdown_rx.recv() => {
                        debug!("replication manager received shutdown signal");
                        break;
                    }
                }
            }

            if let Err(e) = manager.queues.close() {
                warn!(error = %e, "failed to close reconciliation queues");
            }
            info!("replication manager stopped");
        })
    }

    /// Signal the periodic loop to stop
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
