// Metrics
//
// Counters, gauges and histograms for:
// - Execution outcomes (completed, faulted, timed out, rejected, host fault)
// - Forced kills and cleanup failures
// - Admission pressure (active sandboxes, busy rejections)
// - Worker start latency and end-to-end duration
//
// Exported in Prometheus text format on /metrics.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::types::ExecutionOutcome;

/// Counter metric (monotonically increasing)
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

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge metric (can go up or down)
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        // Saturate at zero instead of wrapping.
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Histogram bucket for latency tracking
#[derive(Debug)]
pub struct HistogramBucket {
    pub le: f64, // upper bound in seconds
    pub count: AtomicU64,
}

/// Histogram metric for latency/duration tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<HistogramBucket>,
    sum: AtomicU64, // microseconds
    count: AtomicU64,
}

impl Histogram {
    /// Create histogram with standard latency buckets (in seconds)
    pub fn new_latency() -> Self {
        let buckets = [
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]
        .into_iter()
        .map(|le| HistogramBucket {
            le,
            count: AtomicU64::new(0),
        })
        .collect();

        Self {
            buckets,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: Duration) {
        let seconds = value.as_secs_f64();
        self.sum
            .fetch_add(value.as_micros() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        for bucket in &self.buckets {
            if seconds <= bucket.le {
                bucket.count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn get_sum_micros(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn get_bucket_count(&self, le: f64) -> u64 {
        self.buckets
            .iter()
            .find(|b| (b.le - le).abs() < 0.0001)
            .map(|b| b.count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn export(&self, out: &mut String, name: &str, help: &str) {
        let _ = writeln!(out, "# HELP {} {}", name, help);
        let _ = writeln!(out, "# TYPE {} histogram", name);
        for bucket in &self.buckets {
            let _ = writeln!(
                out,
                "{}_bucket{{le=\"{}\"}} {}",
                name,
                bucket.le,
                bucket.count.load(Ordering::Relaxed)
            );
        }
        let _ = writeln!(out, "{}_bucket{{le=\"+Inf\"}} {}", name, self.get_count());
        let _ = writeln!(
            out,
            "{}_sum {}",
            name,
            self.get_sum_micros() as f64 / 1_000_000.0
        );
        let _ = writeln!(out, "{}_count {}", name, self.get_count());
    }
}

/// Global metrics registry
#[derive(Debug)]
pub struct MetricsRegistry {
    // Execution outcomes
    pub executions_total: Counter,
    pub executions_completed: Counter,
    pub executions_faulted: Counter,
    pub executions_timed_out: Counter,
    pub executions_rejected: Counter,
    pub host_faults: Counter,

    // Admission
    pub rejected_busy: Counter,
    pub active_sandboxes: Gauge,

    // Termination and cleanup
    pub forced_kills: Counter,
    pub cleanup_failures: Counter,
    pub resource_aborts: Counter,

    // Control degradation
    pub control_degraded: Counter,
    pub capability_denials: Counter,

    // Latency histograms
    pub worker_start_latency: Histogram,
    pub execution_duration: Histogram,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            executions_total: Counter::new(),
            executions_completed: Counter::new(),
            executions_faulted: Counter::new(),
            executions_timed_out: Counter::new(),
            executions_rejected: Counter::new(),
            host_faults: Counter::new(),
            rejected_busy: Counter::new(),
            active_sandboxes: Gauge::new(),
            forced_kills: Counter::new(),
            cleanup_failures: Counter::new(),
            resource_aborts: Counter::new(),
            control_degraded: Counter::new(),
            capability_denials: Counter::new(),
            worker_start_latency: Histogram::new_latency(),
            execution_duration: Histogram::new_latency(),
        }
    }

    /// Record execution outcome
    pub fn record_outcome(&self, outcome: &ExecutionOutcome) {
        self.executions_total.inc();
        match outcome {
            ExecutionOutcome::Completed { .. } => self.executions_completed.inc(),
            ExecutionOutcome::Faulted { .. } => self.executions_faulted.inc(),
            ExecutionOutcome::TimedOut {} => self.executions_timed_out.inc(),
            ExecutionOutcome::Rejected { .. } => self.executions_rejected.inc(),
        }
    }

    pub fn record_host_fault(&self) {
        self.executions_total.inc();
        self.host_faults.inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "# HELP snipbox_executions_total Total number of execution requests");
        let _ = writeln!(out, "# TYPE snipbox_executions_total counter");
        let _ = writeln!(out, "snipbox_executions_total {}", self.executions_total.get());

        let _ = writeln!(out, "# HELP snipbox_executions_by_outcome Executions by outcome");
        let _ = writeln!(out, "# TYPE snipbox_executions_by_outcome counter");
        for (label, counter) in [
            ("completed", &self.executions_completed),
            ("faulted", &self.executions_faulted),
            ("timed_out", &self.executions_timed_out),
            ("rejected", &self.executions_rejected),
            ("host_fault", &self.host_faults),
        ] {
            let _ = writeln!(
                out,
                "snipbox_executions_by_outcome{{outcome=\"{}\"}} {}",
                label,
                counter.get()
            );
        }

        for (name, help, counter) in [
            ("snipbox_rejected_busy_total", "Requests refused at admission", &self.rejected_busy),
            ("snipbox_forced_kills_total", "Workers killed on the deadline", &self.forced_kills),
            ("snipbox_cleanup_failures_total", "Workers handed to the background reaper", &self.cleanup_failures),
            ("snipbox_resource_aborts_total", "Workers ended by a kernel signal", &self.resource_aborts),
            ("snipbox_control_degraded_total", "Runs with a missing kernel control", &self.control_degraded),
            ("snipbox_capability_denials_total", "Snippets that referenced a host global", &self.capability_denials),
        ] {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} counter", name);
            let _ = writeln!(out, "{} {}", name, counter.get());
        }

        let _ = writeln!(out, "# HELP snipbox_active_sandboxes Currently running sandboxes");
        let _ = writeln!(out, "# TYPE snipbox_active_sandboxes gauge");
        let _ = writeln!(out, "snipbox_active_sandboxes {}", self.active_sandboxes.get());

        self.worker_start_latency.export(
            &mut out,
            "snipbox_worker_start_latency_seconds",
            "Time to spawn a worker and hand it the request",
        );
        self.execution_duration.export(
            &mut out,
            "snipbox_execution_duration_seconds",
            "Wall time of supervised runs",
        );

        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
static METRICS: once_cell::sync::Lazy<Arc<MetricsRegistry>> =
    once_cell::sync::Lazy::new(|| Arc::new(MetricsRegistry::new()));

/// Get global metrics registry
pub fn get_metrics() -> Arc<MetricsRegistry> {
    Arc::clone(&METRICS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::RejectReason;

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        counter.inc();
        counter.inc();
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn test_gauge_saturates() {
        let gauge = Gauge::new();
        gauge.inc();
        gauge.dec();
        gauge.dec();
        assert_eq!(gauge.get(), 0);
    }

    #[test]
    fn test_histogram() {
        let hist = Histogram::new_latency();
        hist.observe(Duration::from_millis(3));
        hist.observe(Duration::from_millis(700));
        assert_eq!(hist.get_count(), 2);
        assert_eq!(hist.get_bucket_count(0.005), 1);
        assert_eq!(hist.get_bucket_count(1.0), 2);
        assert_eq!(hist.get_sum_micros(), 703_000);
    }

    #[test]
    fn test_record_outcome() {
        let metrics = MetricsRegistry::new();
        metrics.record_outcome(&ExecutionOutcome::TimedOut {});
        metrics.record_outcome(&ExecutionOutcome::Rejected {
            reason: RejectReason::Empty,
        });
        metrics.record_host_fault();
        assert_eq!(metrics.executions_total.get(), 3);
        assert_eq!(metrics.executions_timed_out.get(), 1);
        assert_eq!(metrics.executions_rejected.get(), 1);
        assert_eq!(metrics.host_faults.get(), 1);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = MetricsRegistry::new();
        metrics.record_outcome(&ExecutionOutcome::Completed {
            output: "2".into(),
        });
        let text = metrics.export_prometheus();
        assert!(text.contains("snipbox_executions_total 1"));
        assert!(text.contains("snipbox_executions_by_outcome{outcome=\"completed\"} 1"));
        assert!(text.contains("# TYPE snipbox_execution_duration_seconds histogram"));
        assert!(text.contains("snipbox_execution_duration_seconds_bucket{le=\"+Inf\"} 0"));
    }

    #[test]
    fn test_global_metrics() {
        let a = get_metrics();
        let b = get_metrics();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
