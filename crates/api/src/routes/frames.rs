//! Single-frame upload route

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;

use crate::service::FrameResponse;
use crate::{ApiError, AppState};

/// Analyze one uploaded frame (JPEG or PNG body)
pub async fn upload(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    body: Bytes,
) -> Result<Json<FrameResponse>, ApiError> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("empty frame body".into()));
    }
    Ok(Json(
        state
            .service
            .process_single_shot(&client_id, body.to_vec())
            .await?,
    ))
}
