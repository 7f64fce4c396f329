use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;

use crate::browser::manager::BrowserManager;
use crate::services::worker::Worker;

#[derive(Clone)]
pub struct HealthState {
    pub db: PgPool,
    pub browsers: Arc<BrowserManager>,
    pub worker: Arc<Worker>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub in_flight_jobs: usize,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub database: ComponentHealth,
    pub browser: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

impl ComponentHealth {
    fn ok(latency_ms: Option<u64>) -> Self {
        Self {
            status: "ok".to_string(),
            latency_ms,
        }
    }

    fn error() -> Self {
        Self {
            status: "error".to_string(),
            latency_ms: None,
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// GET /health: database reachability, browser engine liveness and in-flight job count.
pub async fn health_check(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let start = std::time::Instant::now();
    let database = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => ComponentHealth::ok(Some(start.elapsed().as_millis() as u64)),
        Err(_) => ComponentHealth::error(),
    };

    let browser = if state.browsers.is_running().await {
        ComponentHealth::ok(None)
    } else {
        ComponentHealth::error()
    };

    let all_healthy = database.is_ok() && browser.is_ok();
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        in_flight_jobs: state.worker.in_flight_count(),
        checks: HealthChecks { database, browser },
    };

    (status_code, Json(response))
}
