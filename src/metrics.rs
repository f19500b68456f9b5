use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Runtime counters for one orchestrator and its collectors.
///
/// Purpose:
/// - Track cycle throughput and failures
/// - Track persisted records and record-level errors
/// - Track alert delivery
///
/// Design:
/// - Lock-free (Atomics)
/// - Cheap to update
/// - Owned by the orchestrator and shared via `Arc`, never global
#[derive(Default, Debug)]
pub struct RuntimeMetrics {
    // Cycles
    pub cycles_completed: AtomicU64,
    pub cycles_failed: AtomicU64,
    pub fetch_timeouts: AtomicU64,

    // Records
    pub records_persisted: AtomicU64,
    pub record_errors: AtomicU64,

    // Alerts
    pub alerts_raised: AtomicU64,
    pub alert_failures: AtomicU64,
}

impl RuntimeMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            fetch_timeouts: self.fetch_timeouts.load(Ordering::Relaxed),
            records_persisted: self.records_persisted.load(Ordering::Relaxed),
            record_errors: self.record_errors.load(Ordering::Relaxed),
            alerts_raised: self.alerts_raised.load(Ordering::Relaxed),
            alert_failures: self.alert_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of `RuntimeMetrics`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub fetch_timeouts: u64,
    pub records_persisted: u64,
    pub record_errors: u64,
    pub alerts_raised: u64,
    pub alert_failures: u64,
}

/// Per-collector line of a metrics report.
#[derive(Debug, Clone, Serialize)]
pub struct CollectorMetrics {
    pub name: String,
    pub records_processed: u64,
    pub cycles_completed: u64,
    pub recent_errors: usize,
}

/// Result of `Orchestrator::get_metrics(window_hours)`.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub window_hours: u64,

    /// Writes seen by the persistence backend inside the window.
    /// `None` when the backend could not answer.
    pub records_in_window: Option<u64>,

    pub collectors_running: usize,
    pub collectors_errored: usize,
    pub collectors_stopped: usize,

    pub counters: CounterSnapshot,
    pub collectors: Vec<CollectorMetrics>,
}

impl MetricsReport {
    /// One compact line for the periodic reporter.
    pub fn log_line(&self) -> String {
        format!(
            "[METRICS] running={} errored={} stopped={} window_records={} cycles={} failed_cycles={} timeouts={} persisted={} record_err={} alerts={} alert_err={}",
            self.collectors_running,
            self.collectors_errored,
            self.collectors_stopped,
            self.records_in_window
                .map_or_else(|| "n/a".to_string(), |n| n.to_string()),
            self.counters.cycles_completed,
            self.counters.cycles_failed,
            self.counters.fetch_timeouts,
            self.counters.records_persisted,
            self.counters.record_errors,
            self.counters.alerts_raised,
            self.counters.alert_failures,
        )
    }
}
