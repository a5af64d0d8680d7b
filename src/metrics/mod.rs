//! Metrics Collector (component A)
//!
//! Prometheus-compatible counters for incoming/success/failure pickups and a
//! per-request duration histogram, both labelled by bus topic. Best-effort:
//! an `observe_end` with no matching `observe_start` is a silent no-op.

use std::collections::HashMap;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use parking_lot::Mutex;

pub mod names {
    pub const INCOMING_TOTAL: &str = "pickup_incoming_total";
    pub const SUCCESS_TOTAL: &str = "pickup_success_total";
    pub const FAILURE_TOTAL: &str = "pickup_failure_total";
    pub const REQUEST_DURATION_MICROS: &str = "pickup_request_duration_microseconds";
}

pub mod labels {
    pub const TOPIC: &str = "topic";
}

/// Initialize the Prometheus exporter and configure histogram buckets.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(names::REQUEST_DURATION_MICROS.to_string()),
            &[
                100.0, 500.0, 1_000.0, 5_000.0, 10_000.0, 50_000.0, 100_000.0, 500_000.0,
                1_000_000.0,
            ],
        )
        .expect("valid histogram buckets")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Tracks in-flight correlation ids so `observe_end` can compute a duration.
#[derive(Default)]
pub struct MetricsCollector {
    inflight: Mutex<HashMap<String, Instant>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the start of a pickup and increments the incoming counter.
    pub fn observe_start(&self, correlation_id: &str, topic: &str) {
        self.inflight
            .lock()
            .insert(correlation_id.to_string(), Instant::now());

        counter!(names::INCOMING_TOTAL, labels::TOPIC => topic.to_string()).increment(1);
    }

    /// Records the end of a pickup: increments success/failure and observes
    /// the duration histogram. No-op if `correlation_id` was never started.
    pub fn observe_end(&self, correlation_id: &str, topic: &str, success: bool) {
        let started_at = self.inflight.lock().remove(correlation_id);
        let Some(started_at) = started_at else {
            return;
        };

        let micros = started_at.elapsed().as_micros() as f64;

        if success {
            counter!(names::SUCCESS_TOTAL, labels::TOPIC => topic.to_string()).increment(1);
        } else {
            counter!(names::FAILURE_TOTAL, labels::TOPIC => topic.to_string()).increment(1);
        }

        histogram!(names::REQUEST_DURATION_MICROS, labels::TOPIC => topic.to_string())
            .record(micros);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_end_without_start_is_noop() {
        let collector = MetricsCollector::new();
        // Must not panic even though "missing" was never started.
        collector.observe_end("missing", "ENGINE", true);
    }

    #[test]
    fn observe_start_then_end_clears_inflight() {
        let collector = MetricsCollector::new();
        collector.observe_start("corr-1", "ENGINE");
        assert!(collector.inflight.lock().contains_key("corr-1"));
        collector.observe_end("corr-1", "ENGINE", true);
        assert!(!collector.inflight.lock().contains_key("corr-1"));
    }
}
