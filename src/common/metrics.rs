//! Reconciliation metrics
//!
//! Lock-free counters, gauges and a latency histogram, rendered in the
//! Prometheus text format.

use crate::coordinator::commands::DirectiveKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Histogram bucket boundaries for evaluation latency (in microseconds)
const EVALUATION_BUCKETS: [f64; 10] = [
    5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0, 25000.0,
];

/// A simple histogram implementation for latency tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Create a new histogram with the evaluation latency buckets
    pub fn new() -> Self {
        Self::with_buckets(&EVALUATION_BUCKETS)
    }

    /// Create a histogram with custom bucket boundaries
    pub fn with_buckets(boundaries: &[f64]) -> Self {
        let buckets = (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            boundaries: boundaries.to_vec(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value in the histogram
    pub fn observe(&self, value: f64) {
        let bucket_idx = self
            .boundaries
            .iter()
            .position(|&boundary| value <= boundary)
            .unwrap_or(self.boundaries.len());

        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative bucket counts, ending with the +Inf bucket
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.boundaries.len() + 1);

        for (i, &boundary) in self.boundaries.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            result.push((boundary, cumulative));
        }

        cumulative += self.buckets[self.boundaries.len()].load(Ordering::Relaxed);
        result.push((f64::INFINITY, cumulative));

        result
    }

    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge for tracking current values
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Metrics owned by one reconciliation manager
#[derive(Debug)]
pub struct ReconcilerMetrics {
    pub evaluations_total: Counter,
    pub evaluation_failures: Counter,
    pub close_directives: Counter,
    pub replicate_directives: Counter,
    pub delete_directives: Counter,
    pub withheld_directives: Counter,
    pub dropped_directives: Counter,
    pub inflight_suppressed: Counter,

    pub stuck_containers: Gauge,
    pub under_replicated: Gauge,
    pub over_replicated: Gauge,

    pub evaluation_latency: Histogram,

    start_time: Instant,
}

impl ReconcilerMetrics {
    pub fn new() -> Self {
        Self {
            evaluations_total: Counter::new(),
            evaluation_failures: Counter::new(),
            close_directives: Counter::new(),
            replicate_directives: Counter::new(),
            delete_directives: Counter::new(),
            withheld_directives: Counter::new(),
            dropped_directives: Counter::new(),
            inflight_suppressed: Counter::new(),
            stuck_containers: Gauge::new(),
            under_replicated: Gauge::new(),
            over_replicated: Gauge::new(),
            evaluation_latency: Histogram::new(),
            start_time: Instant::now(),
        }
    }

    /// Record one finished evaluation
    pub fn record_evaluation(&self, duration: Duration, success: bool) {
        self.evaluations_total.inc();
        self.evaluation_latency
            .observe(duration.as_secs_f64() * 1_000_000.0);
        if !success {
            self.evaluation_failures.inc();
        }
    }

    /// Record a directive handed to the dispatcher
    pub fn record_dispatched(&self, kind: DirectiveKind) {
        match kind {
            DirectiveKind::Close => self.close_directives.inc(),
            DirectiveKind::Replicate => self.replicate_directives.inc(),
            DirectiveKind::Delete => self.delete_directives.inc(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();

        let counters = [
            ("replicon_evaluations_total", "Container evaluations run", self.evaluations_total.get()),
            ("replicon_evaluation_failures_total", "Evaluations aborted with an error", self.evaluation_failures.get()),
            ("replicon_directives_withheld_total", "Directives withheld by node checks", self.withheld_directives.get()),
            ("replicon_directives_dropped_total", "Directives dropped on a full channel", self.dropped_directives.get()),
            ("replicon_inflight_suppressed_total", "Repairs skipped because one is in flight", self.inflight_suppressed.get()),
        ];
        for (name, help, value) in counters {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} counter", name);
            let _ = writeln!(out, "{} {}", name, value);
        }

        out.push_str("# HELP replicon_directives_total Directives dispatched by kind\n");
        out.push_str("# TYPE replicon_directives_total counter\n");
        for (kind, counter) in [
            (DirectiveKind::Close, &self.close_directives),
            (DirectiveKind::Replicate, &self.replicate_directives),
            (DirectiveKind::Delete, &self.delete_directives),
        ] {
            let _ = writeln!(
                out,
                "replicon_directives_total{{kind=\"{}\"}} {}",
                kind,
                counter.get()
            );
        }

        let gauges = [
            ("replicon_stuck_containers", "Quasi-closed containers that cannot be finalized yet", self.stuck_containers.get()),
            ("replicon_under_replicated_containers", "Containers below their replica factor", self.under_replicated.get()),
            ("replicon_over_replicated_containers", "Containers above their replica factor", self.over_replicated.get()),
            ("replicon_uptime_seconds", "Manager uptime in seconds", self.uptime_seconds()),
        ];
        for (name, help, value) in gauges {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} gauge", name);
            let _ = writeln!(out, "{} {}", name, value);
        }

        out.push_str("# HELP replicon_evaluation_duration_us Evaluation duration in microseconds\n");
        out.push_str("# TYPE replicon_evaluation_duration_us histogram\n");
        for (le, count) in self.evaluation_latency.get_buckets() {
            if le.is_infinite() {
                let _ = writeln!(out, "replicon_evaluation_duration_us_bucket{{le=\"+Inf\"}} {}", count);
            } else {
                let _ = writeln!(out, "replicon_evaluation_duration_us_bucket{{le=\"{}\"}} {}", le, count);
            }
        }
        let _ = writeln!(out, "replicon_evaluation_duration_us_sum {}", self.evaluation_latency.sum());
        let _ = writeln!(out, "replicon_evaluation_duration_us_count {}", self.evaluation_latency.count());

        out
    }
}

impl Default for ReconcilerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
