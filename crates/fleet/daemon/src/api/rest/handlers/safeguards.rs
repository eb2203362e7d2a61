//! Safeguard policy handlers

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{extract::State, Json};
use fleet_types::SafeguardPolicy;

pub async fn get_safeguards(State(state): State<AppState>) -> Json<SafeguardPolicy> {
    Json(state.plane.safeguards().await.as_ref().clone())
}

/// Swap the whole policy. An invalid policy leaves the current one in place.
pub async fn reload_safeguards(
    State(state): State<AppState>,
    Json(policy): Json<SafeguardPolicy>,
) -> ApiResult<Json<SafeguardPolicy>> {
    state.plane.reload_safeguards(policy).await?;
    tracing::info!("Safeguards reloaded via API");
    Ok(Json(state.plane.safeguards().await.as_ref().clone()))
}
