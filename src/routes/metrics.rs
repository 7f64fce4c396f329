use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Register descriptions for the worker's metrics.
pub fn describe_metrics() {
    metrics::describe_counter!("listing_jobs_claimed_total", "Listing jobs claimed by this worker");
    metrics::describe_counter!("listing_jobs_completed_total", "Listing jobs published to every platform");
    metrics::describe_counter!(
        "listing_jobs_failed_total",
        "Listing jobs that ended failed, including partial successes"
    );
    metrics::describe_gauge!("listing_jobs_in_flight", "Listing jobs currently running");
    metrics::describe_counter!("listing_platform_runs_total", "Platform runs by platform and outcome");
    metrics::describe_histogram!("listing_platform_run_seconds", "Duration of one platform run");
    metrics::describe_histogram!("listing_job_duration_seconds", "Duration of a whole listing job");
    metrics::describe_counter!("browser_engine_launches_total", "Browser engine launches");
}

/// GET /metrics in the Prometheus text exposition format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}
