//! Device lookup used to populate node configuration dropdowns

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use crate::api::BridgeState;
use crate::error::AppError;

#[derive(Deserialize, Default)]
pub struct LookupQuery {
    pub lkup: Option<String>,
}

/// GET /sensibo?lkup=<type> - List pods of the account as `{value, label}`
pub async fn lookup(
    State(state): State<BridgeState>,
    Query(query): Query<LookupQuery>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!(
        "[Lookup] Type of data to retrieve is {}",
        query.lkup.as_deref().unwrap_or("pods")
    );

    if state.api_key.is_empty() {
        return Err(AppError::Unavailable("no Sensibo API key configured".to_string()));
    }

    let pods = state.sensibo.list_devices(&state.api_key).await.map_err(|e| {
        tracing::warn!("[Lookup] Sensibo lookup failed: {}", e);
        AppError::from(e)
    })?;

    Ok(Json(pods))
}
