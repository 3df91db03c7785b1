use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use rent_shared::types::api::{HealthCheck, HealthResponse, HealthStatus};

use crate::routes::run_blocking;
use crate::AppState;

/// GET /health - storage ping plus message bus state
pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let backend = state.engine.store().backend();
    let storage = match run_blocking(&state, |engine| engine.store().ping()).await {
        Ok(()) => HealthCheck::healthy(backend),
        Err(e) => HealthCheck::unhealthy(backend, e.to_string()),
    };

    let mut checks = vec![storage];
    if let Some(rabbitmq) = &state.rabbitmq {
        checks.push(if rabbitmq.is_connected() {
            HealthCheck::healthy("rabbitmq")
        } else {
            HealthCheck {
                name: "rabbitmq".into(),
                status: HealthStatus::Degraded,
                message: Some("channel closed, events are not being published".into()),
            }
        });
    }

    let response = HealthResponse::healthy("rent-matching", env!("CARGO_PKG_VERSION")).with_checks(checks);
    let status = if response.status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(response))
}

/// GET /metrics - Prometheus exposition
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, String::from("metrics recorder not installed")),
    }
}
