//! Session lifecycle routes

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::service::{EndResponse, RebindResponse, StartResponse, TabSwitchResponse};
use crate::{ApiError, AppState};

/// Query parameters naming a client
#[derive(Debug, Deserialize)]
pub struct ClientQuery {
    pub client_id: String,
}

/// Query parameters for rebind
#[derive(Debug, Deserialize)]
pub struct RebindQuery {
    /// New identifier
    pub client_id: String,
    /// Identifier the runtime state is currently held under
    pub old_client_id: Option<String>,
}

/// Tab visibility change
#[derive(Debug, Deserialize)]
pub struct TabSwitchRequest {
    pub client_id: String,
    pub state: String,
}

fn require_id(client_id: &str) -> Result<(), ApiError> {
    if client_id.trim().is_empty() {
        return Err(ApiError::BadRequest("client_id must not be empty".into()));
    }
    Ok(())
}

pub async fn start(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ClientQuery>,
) -> Result<Json<StartResponse>, ApiError> {
    require_id(&q.client_id)?;
    Ok(Json(state.service.start_session(&q.client_id).await?))
}

pub async fn end(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ClientQuery>,
) -> Result<Json<EndResponse>, ApiError> {
    require_id(&q.client_id)?;
    Ok(Json(state.service.end_session(&q.client_id).await?))
}

pub async fn rebind(
    State(state): State<Arc<AppState>>,
    Query(q): Query<RebindQuery>,
) -> Result<Json<RebindResponse>, ApiError> {
    require_id(&q.client_id)?;
    let old = q.old_client_id.as_deref().filter(|s| !s.is_empty());
    Ok(Json(state.service.rebind(old, &q.client_id).await?))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service.delete_session(&client_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn tab_switch(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TabSwitchRequest>,
) -> Result<Json<TabSwitchResponse>, ApiError> {
    require_id(&req.client_id)?;
    Ok(Json(state.service.tab_switch(&req.client_id, &req.state).await?))
}
