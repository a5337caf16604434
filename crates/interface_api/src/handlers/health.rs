//! Health check handlers

use axum::{extract::State, http::StatusCode, Json};

use crate::dto::health::{HealthResponse, ReadinessResponse};
use crate::AppState;

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check (includes storage)
pub async fn readiness_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let result = state.storage_health.health_check().await;
    let ready = result.is_healthy();

    let body = ReadinessResponse {
        status: if ready { "ready" } else { "not_ready" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        storage: result.status,
        latency_ms: result.latency_ms,
        message: result.message,
    };
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(body))
}
