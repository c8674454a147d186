//! WebSocket streaming endpoint
//!
//! One socket per client. Binary messages are encoded frames; text messages
//! are JSON [`ClientMessage`]s. Every message gets one JSON reply. The socket
//! closes after the reply that ends the session.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use session_policy::{ConfigOverride, SessionConfig};
use tracing::{debug, info, warn};

use crate::service::{FrameResponse, RebindResponse, TabSwitchResponse, TabSwitchStatus};
use crate::{ApiError, AppState};

/// Messages sent by the client
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Base64 frame, optionally as a `data:` URI
    FrameB64 { data: String },
    /// Move this socket's session to a new client id
    Register { client_id: String },
    Config { config: ConfigOverride },
    TabSwitch { state: String },
}

/// Replies sent to the client
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Analysis(FrameResponse),
    Registered(RebindResponse),
    ConfigUpdated { config: SessionConfig },
    TabSwitch(TabSwitchResponse),
    Error { detail: String },
}

impl ServerMessage {
    /// Whether this reply ends the session
    fn is_terminal(&self) -> bool {
        match self {
            ServerMessage::Analysis(r) => r.is_ended(),
            ServerMessage::TabSwitch(r) => r.status == TabSwitchStatus::SessionEnded,
            _ => false,
        }
    }
}

impl From<ApiError> for ServerMessage {
    fn from(e: ApiError) -> Self {
        ServerMessage::Error { detail: e.to_string() }
    }
}

/// Decode a base64 frame, stripping a `data:<mime>;base64,` header
pub fn decode_frame_b64(data: &str) -> Result<Vec<u8>, ApiError> {
    let payload = match data.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, b)| b).unwrap_or(rest),
        None => data,
    };
    STANDARD
        .decode(payload.trim())
        .map_err(|e| ApiError::BadRequest(format!("invalid base64 frame: {}", e)))
}

/// `GET /ws/:client_id`
pub async fn handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run(socket, state, client_id))
}

async fn run(mut socket: WebSocket, state: Arc<AppState>, mut client_id: String) {
    state.service.connect(&client_id).await;
    info!(client_id = %client_id, "WebSocket connected");

    while let Some(msg) = socket.recv().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                warn!(client_id = %client_id, "WebSocket receive failed: {}", e);
                break;
            }
        };

        let reply = match msg {
            Message::Binary(bytes) => frame_reply(&state, &client_id, bytes).await,
            Message::Text(text) => text_reply(&state, &mut client_id, &text).await,
            Message::Close(_) => break,
            _ => continue,
        };

        let payload = match serde_json::to_string(&reply) {
            Ok(p) => p,
            Err(e) => {
                warn!(client_id = %client_id, "Failed to encode reply: {}", e);
                continue;
            }
        };
        if socket.send(Message::Text(payload)).await.is_err() {
            debug!(client_id = %client_id, "Client went away");
            break;
        }
        if reply.is_terminal() {
            info!(client_id = %client_id, "Closing socket after session end");
            break;
        }
    }

    state.service.disconnect(&client_id).await;
    info!(client_id = %client_id, "WebSocket closed");
}

async fn frame_reply(state: &AppState, client_id: &str, bytes: Vec<u8>) -> ServerMessage {
    match state.service.process_frame(client_id, bytes).await {
        Ok(r) => ServerMessage::Analysis(r),
        Err(e) => {
            warn!(client_id = %client_id, "Frame rejected: {}", e);
            e.into()
        }
    }
}

async fn text_reply(state: &AppState, client_id: &mut String, text: &str) -> ServerMessage {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => return ApiError::BadRequest(format!("invalid message: {}", e)).into(),
    };

    match msg {
        ClientMessage::FrameB64 { data } => match decode_frame_b64(&data) {
            Ok(bytes) => frame_reply(state, client_id, bytes).await,
            Err(e) => e.into(),
        },
        ClientMessage::Register { client_id: new_id } => {
            let result = state.service.rebind(Some(client_id.as_str()), &new_id).await;
            match result {
                Ok(r) => {
                    *client_id = new_id;
                    ServerMessage::Registered(r)
                }
                Err(e) => e.into(),
            }
        }
        ClientMessage::Config { config } => match state.service.update_config(client_id, &config).await {
            Ok(config) => ServerMessage::ConfigUpdated { config },
            Err(e) => e.into(),
        },
        ClientMessage::TabSwitch { state: tab } => match state.service.tab_switch(client_id, &tab).await {
            Ok(r) => ServerMessage::TabSwitch(r),
            Err(e) => e.into(),
        },
    }
}
