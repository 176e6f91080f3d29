//! Health, liveness, readiness and metrics endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

use super::AppState;
use crate::network::HealthState;

/// Reports store connectivity plus server state.
///
/// 200 with `"status": "healthy"` when the store answers a ping, otherwise
/// 503 with `"status": "unhealthy"`.
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let (code, status) = match state.lifecycle.store().ping().await {
        Ok(()) => (StatusCode::OK, "healthy"),
        Err(e) => {
            warn!(error = %e, "Health check: store ping failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
        }
    };

    let body = json!({
        "status": status,
        "state": state.shutdown.health_state().as_str(),
        "store": state.lifecycle.store().backend_name(),
        "in_flight_requests": state.shutdown.in_flight_count(),
        "background_tasks": state.lifecycle.in_flight(),
        "running_tasks": state.lifecycle.running(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    });
    (code, Json(body))
}

/// Liveness probe: 200 while the process is responsive.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe: 200 only in the `Ready` state.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Prometheus text exposition, or 404 when no recorder is installed.
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
