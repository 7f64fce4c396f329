pub mod health;
pub mod metrics;

use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use health::HealthState;

/// Health and scrape endpoints served alongside the worker loop.
pub fn router(state: HealthState, prometheus_handle: Arc<PrometheusHandle>) -> Router {
    Router::new()
        .route("/health", get(health::health_check).with_state(state))
        .route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
}
