//! Prometheus metrics for the job queue
//!
//! Provides observability into queue traffic, retries and dead-lettering.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::info;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder.
///
/// Call this once at startup. Subsequent calls are no-ops.
pub fn init_metrics() -> Result<(), BuildError> {
    PROMETHEUS_HANDLE
        .get_or_try_init(|| {
            let handle = PrometheusBuilder::new().install_recorder()?;
            info!("Prometheus metrics initialized");
            Ok(handle)
        })
        .map(|_| ())
}

/// Get the Prometheus handle for rendering metrics
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    prometheus_handle()
        .map(|h| h.render())
        .unwrap_or_default()
}

/// Queue metrics helper, labelled by namespace
#[derive(Debug, Clone)]
pub struct QueueMetrics {
    namespace: String,
}

impl QueueMetrics {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn job_enqueued(&self, queue: &str) {
        counter!(
            "job_queue_enqueued_total",
            "namespace" => self.namespace.clone(),
            "queue" => queue.to_string()
        )
        .increment(1);
    }

    pub fn job_dequeued(&self, queue: &str) {
        counter!(
            "job_queue_dequeued_total",
            "namespace" => self.namespace.clone(),
            "queue" => queue.to_string()
        )
        .increment(1);
    }

    /// A popped job was not yet eligible and went back to the head.
    pub fn job_not_ready(&self, queue: &str) {
        counter!(
            "job_queue_not_ready_total",
            "namespace" => self.namespace.clone(),
            "queue" => queue.to_string()
        )
        .increment(1);
    }

    pub fn job_requeued(&self, queue: &str) {
        counter!(
            "job_queue_requeued_total",
            "namespace" => self.namespace.clone(),
            "queue" => queue.to_string()
        )
        .increment(1);
    }

    pub fn job_dead_lettered(&self, origin_queue: &str) {
        counter!(
            "job_queue_dead_lettered_total",
            "namespace" => self.namespace.clone(),
            "queue" => origin_queue.to_string()
        )
        .increment(1);
    }

    pub fn operation_failed(&self, operation: &'static str, kind: &'static str) {
        counter!(
            "job_queue_errors_total",
            "namespace" => self.namespace.clone(),
            "op" => operation,
            "kind" => kind
        )
        .increment(1);
    }

    pub fn queue_depth(&self, queue: &str, depth: u64) {
        gauge!(
            "job_queue_depth",
            "namespace" => self.namespace.clone(),
            "queue" => queue.to_string()
        )
        .set(depth as f64);
    }

    /// Record a worker finishing a job.
    pub fn job_processed(&self, queue: &str, processor: &'static str, duration: Duration, success: bool) {
        let status = if success { "success" } else { "failed" };

        counter!(
            "job_queue_processed_total",
            "namespace" => self.namespace.clone(),
            "queue" => queue.to_string(),
            "processor" => processor,
            "status" => status
        )
        .increment(1);

        histogram!(
            "job_queue_job_duration_seconds",
            "namespace" => self.namespace.clone(),
            "queue" => queue.to_string(),
            "processor" => processor
        )
        .record(duration.as_secs_f64());
    }
}
