//! Node API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::Value;

use crate::api::BridgeState;
use crate::error::AppError;

#[derive(Deserialize)]
pub struct PollIntervalRequest {
    pub seconds: u64,
}

/// GET /api/nodes - All nodes with their status
pub async fn list_nodes(State(state): State<BridgeState>) -> impl IntoResponse {
    Json(state.nodes.list().await)
}

/// GET /api/nodes/:name - Node status and last outbound event
pub async fn get_node(
    State(state): State<BridgeState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let detail = state
        .nodes
        .detail(&name)
        .await
        .ok_or_else(|| AppError::NotFound(format!("node {}", name)))?;

    Ok(Json(detail))
}

/// POST /api/nodes/:name/input - Deliver a message to a node
pub async fn deliver_input(
    State(state): State<BridgeState>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let msg = match body {
        Value::Object(map) => map,
        Value::Null => Default::default(),
        _ => return Err(AppError::BadRequest("message must be a JSON object".to_string())),
    };

    let msgid = state.nodes.deliver(&name, msg).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "_msgid": msgid })),
    ))
}

/// PUT /api/nodes/:name/poll-interval - Change polling; 0 stops it
pub async fn update_poll_interval(
    State(state): State<BridgeState>,
    Path(name): Path<String>,
    Json(req): Json<PollIntervalRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.nodes.set_poll_interval(&name, req.seconds).await?;
    Ok(StatusCode::NO_CONTENT)
}
