//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use ingest_models::{JobOutcome, PipelineStage};

/// Install the Prometheus recorder and serve it on `addr`.
///
/// Without a recorder every `record_*` call is a no-op.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()
}

/// Metric names as constants for consistency.
pub mod names {
    // Job metrics
    pub const JOBS_TOTAL: &str = "ingest_jobs_total";
    pub const JOB_DURATION_SECONDS: &str = "ingest_job_duration_seconds";
    pub const STAGE_DURATION_SECONDS: &str = "ingest_stage_duration_seconds";

    // Transform metrics
    pub const TRANSFORM_DURATION_SECONDS: &str = "ingest_transform_duration_seconds";
    pub const TRANSFORMS_IN_FLIGHT: &str = "ingest_transforms_in_flight";

    // Queue metrics
    pub const DELIVERIES_TOTAL: &str = "ingest_deliveries_total";
    pub const RESOLUTION_FAILURES_TOTAL: &str = "ingest_resolution_failures_total";
    pub const PIPELINE_PANICS_TOTAL: &str = "ingest_pipeline_panics_total";
    pub const QUEUE_LENGTH: &str = "ingest_queue_length";
    pub const QUEUE_PENDING: &str = "ingest_queue_pending";
    pub const QUEUE_DLQ_LENGTH: &str = "ingest_queue_dlq_length";
}

/// Record a finished pipeline run.
pub fn record_job(outcome: &JobOutcome, duration_secs: f64) {
    let stage = outcome
        .failed_stage()
        .map(|s| s.as_str())
        .unwrap_or("none");
    let labels = [
        ("outcome", outcome.as_str().to_string()),
        ("stage", stage.to_string()),
    ];

    counter!(names::JOBS_TOTAL, &labels).increment(1);
    histogram!(names::JOB_DURATION_SECONDS).record(duration_secs);
}

/// Record time spent in one stage.
pub fn record_stage_duration(stage: PipelineStage, duration_secs: f64) {
    let labels = [("stage", stage.as_str().to_string())];
    histogram!(names::STAGE_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record transform duration.
pub fn record_transform_duration(duration_secs: f64) {
    histogram!(names::TRANSFORM_DURATION_SECONDS).record(duration_secs);
}

/// Record a delivery handed to the dispatcher. `source` is `new` or `claimed`.
pub fn record_delivery(source: &'static str) {
    counter!(names::DELIVERIES_TOTAL, "source" => source).increment(1);
}

/// Record a failed ack or nack.
pub fn record_resolution_failure(action: &'static str) {
    counter!(names::RESOLUTION_FAILURES_TOTAL, "action" => action).increment(1);
}

pub fn record_pipeline_panic() {
    counter!(names::PIPELINE_PANICS_TOTAL).increment(1);
}

/// Update queue gauges.
pub fn set_queue_stats(length: u64, pending: u64, dlq_length: u64) {
    gauge!(names::QUEUE_LENGTH).set(length as f64);
    gauge!(names::QUEUE_PENDING).set(pending as f64);
    gauge!(names::QUEUE_DLQ_LENGTH).set(dlq_length as f64);
}

/// Counts a running transform until dropped, including when the run is cancelled.
pub struct TransformInFlight(());

impl TransformInFlight {
    pub fn start() -> Self {
        gauge!(names::TRANSFORMS_IN_FLIGHT).increment(1.0);
        Self(())
    }
}

impl Drop for TransformInFlight {
    fn drop(&mut self) {
        gauge!(names::TRANSFORMS_IN_FLIGHT).decrement(1.0);
    }
}
