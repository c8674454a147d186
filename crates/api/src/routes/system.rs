//! Health, client list and metrics routes

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::service::{ClientsResponse, ServiceHealth};
use crate::AppState;

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub uptime_seconds: u64,
    #[serde(flatten)]
    pub service: ServiceHealth,
}

/// Health check
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let service = state.service.health().await;
    let status = if service.store == "ok" { "healthy" } else { "degraded" };

    Json(HealthResponse {
        status: status.to_string(),
        timestamp: Utc::now(),
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        service,
    })
}

/// Clients with live runtime state
pub async fn clients(State(state): State<Arc<AppState>>) -> Json<ClientsResponse> {
    Json(state.service.list_clients().await)
}

/// Prometheus exposition
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed".to_string()),
    }
}
