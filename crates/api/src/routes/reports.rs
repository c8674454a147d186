//! Report and violation query routes

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use storage::{SessionReport, ViolationRecord};

use crate::routes::sessions::ClientQuery;
use crate::service::SummaryResponse;
use crate::{ApiError, AppState};

/// Query parameters for the violations endpoint
#[derive(Debug, Deserialize)]
pub struct ViolationQuery {
    /// Filter by violation type
    pub v_type: Option<String>,
}

/// Response for the violations endpoint
#[derive(Debug, Serialize)]
pub struct ViolationsResponse {
    pub client_id: String,
    pub count: usize,
    pub violations: Vec<ViolationRecord>,
}

pub async fn report(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> Result<Json<SessionReport>, ApiError> {
    Ok(Json(state.service.report(&client_id).await?))
}

pub async fn violations(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    Query(q): Query<ViolationQuery>,
) -> Result<Json<ViolationsResponse>, ApiError> {
    let violations = state
        .service
        .violations(&client_id, q.v_type.as_deref())
        .await?;
    Ok(Json(ViolationsResponse {
        client_id,
        count: violations.len(),
        violations,
    }))
}

pub async fn summary(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ClientQuery>,
) -> Result<Json<SummaryResponse>, ApiError> {
    Ok(Json(state.service.summary(&q.client_id).await?))
}
