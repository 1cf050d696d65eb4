//! Application metrics for Prometheus monitoring.
//!
//! This module provides:
//! - Prometheus metrics recorder initialization
//! - Metric descriptions for jobs, upstream traffic and the push hub
//! - Helper functions for recording metrics

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// This should be called once at application startup, before any metrics are recorded.
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();

    tracing::info!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    // Jobs
    describe_counter!("bulkpull_jobs_started_total", "Jobs admitted past the running-job gate");
    describe_counter!(
        "bulkpull_jobs_finished_total",
        "Jobs that reached a terminal state, by status"
    );
    describe_gauge!("bulkpull_jobs_running", "Jobs currently holding a running slot");

    // Upstream and storage
    describe_counter!("bulkpull_pages_fetched_total", "Upstream pages fetched successfully");
    describe_counter!(
        "bulkpull_upstream_retries_total",
        "Retried upstream fetches and storage writes"
    );
    describe_counter!("bulkpull_records_written_total", "Records written to table storage");

    // Push hub
    describe_gauge!("bulkpull_push_connections", "Authenticated push connections");
    describe_counter!(
        "bulkpull_push_dropped_total",
        "Push messages dropped because a connection queue was full"
    );
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

pub fn record_job_started() {
    counter!("bulkpull_jobs_started_total").increment(1);
    gauge!("bulkpull_jobs_running").increment(1.0);
}

/// Release the running slot; `status` is the terminal status, if one was reached.
pub fn record_job_released(status: Option<&'static str>) {
    gauge!("bulkpull_jobs_running").decrement(1.0);
    if let Some(status) = status {
        record_job_finished(status);
    }
}

pub fn record_job_finished(status: &'static str) {
    counter!("bulkpull_jobs_finished_total", "status" => status).increment(1);
}

pub fn record_page_fetched() {
    counter!("bulkpull_pages_fetched_total").increment(1);
}

/// `stage` is `fetch` or `write`.
pub fn record_retry(stage: &'static str) {
    counter!("bulkpull_upstream_retries_total", "stage" => stage).increment(1);
}

pub fn record_records_written(count: u64) {
    counter!("bulkpull_records_written_total").increment(count);
}

pub fn set_push_connections(count: usize) {
    gauge!("bulkpull_push_connections").set(count as f64);
}

pub fn record_push_dropped() {
    counter!("bulkpull_push_dropped_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_harmless() {
        record_job_started();
        record_page_fetched();
        record_retry("fetch");
        record_records_written(100);
        record_job_released(Some("completed"));
        set_push_connections(2);
        record_push_dropped();
    }

    #[test]
    fn test_render_after_init() {
        init_metrics();
        record_job_finished("failed");
        let output = render_metrics().expect("metrics initialized");
        assert!(output.contains("bulkpull_jobs_finished_total"));
    }
}
