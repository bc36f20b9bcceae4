use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// GET /metrics: pipeline counters in Prometheus text format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for the moderation metrics.
pub fn describe() {
    metrics::describe_counter!(
        "moderation_tasks_submitted_total",
        "Moderation tasks created by async submissions"
    );
    metrics::describe_counter!(
        "moderation_tasks_deduplicated_total",
        "Async submissions answered with an existing pending task"
    );
    metrics::describe_counter!(
        "moderation_publish_failures_total",
        "Work messages that could not be published"
    );
    metrics::describe_counter!(
        "moderation_tasks_completed_total",
        "Moderation tasks classified by the worker"
    );
    metrics::describe_counter!(
        "moderation_tasks_failed_total",
        "Moderation tasks that exhausted their retry budget"
    );
    metrics::describe_counter!(
        "moderation_dlq_messages_total",
        "Messages written to the dead-letter topic"
    );
    metrics::describe_counter!("moderation_cache_hits_total", "Cached predictions served");
    metrics::describe_counter!(
        "moderation_cache_misses_total",
        "Predictions computed after a cache miss"
    );
    metrics::describe_histogram!(
        "moderation_processing_seconds",
        "Time from first attempt to completion of a moderation task"
    );
}
