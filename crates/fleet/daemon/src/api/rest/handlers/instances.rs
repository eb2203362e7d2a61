//! Instance management handlers

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use fleet_control::{CreateRequest, FleetError};
use fleet_types::{HealthSnapshot, InstanceId, InstanceSummary, ResourceLimits};
use serde::Deserialize;

/// Create instance request body
#[derive(Debug, Deserialize)]
pub struct CreateInstancePayload {
    pub name: String,

    /// Proxy URL to bind instead of allocating from the pool
    #[serde(default)]
    pub proxy: Option<String>,

    #[serde(default)]
    pub limits: Option<LimitsPayload>,
}

/// Human-readable resource limits, e.g. `{"memory": "512m", "cpu": "0.5"}`
#[derive(Debug, Deserialize)]
pub struct LimitsPayload {
    pub memory: String,
    pub cpu: String,
}

/// List instances
pub async fn list_instances(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<InstanceSummary>>> {
    Ok(Json(state.plane.list_instances().await?))
}

/// Create an instance bound to a proxy
pub async fn create_instance(
    State(state): State<AppState>,
    Json(payload): Json<CreateInstancePayload>,
) -> ApiResult<(StatusCode, Json<InstanceSummary>)> {
    let mut request = CreateRequest::new(payload.name);
    if let Some(proxy) = payload.proxy {
        request = request.with_proxy_spec(proxy);
    }
    if let Some(limits) = payload.limits {
        let limits =
            ResourceLimits::parse(&limits.memory, &limits.cpu).map_err(FleetError::from)?;
        request = request.with_limits(limits);
    }

    let instance = state.plane.create(request).await?;
    tracing::info!(instance_id = %instance.id, name = %instance.name, "Created instance via API");

    Ok((StatusCode::CREATED, Json(instance.summary())))
}

/// Get a specific instance
pub async fn get_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<InstanceSummary>> {
    let instance_id = parse_instance_id(&id)?;
    let instance = state.plane.get_instance(&instance_id).await?;
    Ok(Json(instance.summary()))
}

pub async fn stop_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<InstanceSummary>> {
    let instance_id = parse_instance_id(&id)?;
    Ok(Json(state.plane.stop_instance(&instance_id).await?))
}

pub async fn restart_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<InstanceSummary>> {
    let instance_id = parse_instance_id(&id)?;
    Ok(Json(state.plane.restart_instance(&instance_id).await?))
}

/// Remove an instance and release its proxy
pub async fn remove_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<InstanceSummary>> {
    let instance_id = parse_instance_id(&id)?;
    Ok(Json(state.plane.remove_instance(&instance_id).await?))
}

/// Latest health snapshot
pub async fn get_instance_health(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<HealthSnapshot>> {
    let instance_id = parse_instance_id(&id)?;
    Ok(Json(state.plane.get_instance_health(&instance_id).await?))
}

/// Accepts `instance:<uuid>` or a bare UUID
fn parse_instance_id(id: &str) -> ApiResult<InstanceId> {
    id.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid instance ID: {}", id)))
}
