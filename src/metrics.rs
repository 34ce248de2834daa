#![allow(dead_code)]

//! Prometheus metrics (spec.md §C "ambient Prometheus counters/histograms").
//!
//! Tracks pipeline throughput, script errors, and intercept-queue depth — scoped
//! to Marasi's own concerns, not the fault-injection metrics this module
//! originally carried.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};

lazy_static! {
    /// Total transactions the pipeline has finished processing.
    pub static ref TRANSACTIONS_TOTAL: CounterVec = register_counter_vec!(
        "marasi_transactions_total",
        "Total number of transactions processed by the pipeline",
        &["outcome"] // forwarded|intercepted|dropped|error
    )
    .unwrap();

    /// Pipeline end-to-end duration, request-received to response-emitted.
    pub static ref PIPELINE_DURATION_MS: HistogramVec = register_histogram_vec!(
        "marasi_pipeline_duration_ms",
        "Pipeline duration from request received to response emitted",
        &["outcome"],
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap();

    /// Extension runtime errors (compile or callback failures).
    pub static ref SCRIPT_ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "marasi_script_errors_total",
        "Total number of extension script errors",
        &["extension_id", "stage"] // stage: compile|startup|intercept|process
    )
    .unwrap();

    /// Current number of transactions paused in the Interception Queue.
    pub static ref INTERCEPT_QUEUE_DEPTH: Gauge = register_gauge!(
        "marasi_intercept_queue_depth",
        "Number of transactions currently paused awaiting operator release"
    )
    .unwrap();

    /// Outbound dial failures reported as synthesized 502s.
    pub static ref UPSTREAM_DIAL_FAILURES_TOTAL: CounterVec = register_counter_vec!(
        "marasi_upstream_dial_failures_total",
        "Total number of upstream dial failures synthesized into a 502",
        &["host"]
    )
    .unwrap();
}

/// Collect and return all metrics in Prometheus text format.
pub fn collect_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

pub fn record_transaction(outcome: &str, duration_ms: f64) {
    TRANSACTIONS_TOTAL.with_label_values(&[outcome]).inc();
    PIPELINE_DURATION_MS
        .with_label_values(&[outcome])
        .observe(duration_ms);
}

pub fn record_script_error(extension_id: &str, stage: &str) {
    SCRIPT_ERRORS_TOTAL
        .with_label_values(&[extension_id, stage])
        .inc();
}

pub fn set_intercept_queue_depth(depth: usize) {
    INTERCEPT_QUEUE_DEPTH.set(depth as f64);
}

pub fn record_upstream_dial_failure(host: &str) {
    UPSTREAM_DIAL_FAILURES_TOTAL.with_label_values(&[host]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_transaction_outcome_and_duration() {
        record_transaction("forwarded", 12.5);
        let metrics = collect_metrics();
        assert!(metrics.contains("marasi_transactions_total"));
        assert!(metrics.contains("marasi_pipeline_duration_ms"));
    }

    #[test]
    fn records_script_errors_by_stage() {
        record_script_error("ext-1", "compile");
        record_script_error("ext-1", "process");
        let metrics = collect_metrics();
        assert!(metrics.contains("marasi_script_errors_total"));
    }

    #[test]
    fn tracks_intercept_queue_depth() {
        set_intercept_queue_depth(3);
        let metrics = collect_metrics();
        assert!(metrics.contains("marasi_intercept_queue_depth"));
    }

    #[test]
    fn records_upstream_dial_failures() {
        record_upstream_dial_failure("example.invalid");
        let metrics = collect_metrics();
        assert!(metrics.contains("marasi_upstream_dial_failures_total"));
    }
}
