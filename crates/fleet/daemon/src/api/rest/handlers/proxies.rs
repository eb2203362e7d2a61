//! Proxy pool handlers

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use fleet_proxy::PoolStats;
use fleet_types::{InstanceId, ProxyEndpoint, ProxyId, ProxyStatus};
use serde::{Deserialize, Serialize};

/// Proxy as shown to operators. The URL never carries the password.
#[derive(Debug, Serialize)]
pub struct ProxyView {
    pub id: ProxyId,
    pub url: String,
    pub status: ProxyStatus,
    pub consecutive_failures: u32,
    pub last_latency_ms: Option<u64>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub assigned_instance: Option<InstanceId>,
}

impl From<ProxyEndpoint> for ProxyView {
    fn from(endpoint: ProxyEndpoint) -> Self {
        Self {
            id: endpoint.id,
            url: endpoint.identity.to_string(),
            status: endpoint.status,
            consecutive_failures: endpoint.consecutive_failures,
            last_latency_ms: endpoint.last_latency_ms,
            last_checked_at: endpoint.last_checked_at,
            assigned_instance: endpoint.assigned_instance,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AddProxyPayload {
    pub url: String,
}

/// Outcome of one probe
#[derive(Debug, Serialize)]
pub struct ProbeView {
    pub proxy_id: ProxyId,
    pub success: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PruneResponse {
    pub pruned: Vec<ProxyId>,
}

pub async fn list_proxies(State(state): State<AppState>) -> Json<Vec<ProxyView>> {
    Json(
        state
            .plane
            .list_proxies()
            .into_iter()
            .map(ProxyView::from)
            .collect(),
    )
}

/// Add a proxy and probe it once
pub async fn add_proxy(
    State(state): State<AppState>,
    Json(payload): Json<AddProxyPayload>,
) -> ApiResult<(StatusCode, Json<ProxyView>)> {
    let endpoint = state.plane.add_proxy(&payload.url).await?;
    Ok((StatusCode::CREATED, Json(endpoint.into())))
}

pub async fn proxy_stats(State(state): State<AppState>) -> Json<PoolStats> {
    Json(state.plane.proxy_stats())
}

/// Probe every proxy now
pub async fn check_proxies(State(state): State<AppState>) -> Json<Vec<ProbeView>> {
    let outcomes = state.plane.check_proxies().await;
    Json(
        outcomes
            .into_iter()
            .map(|(proxy_id, outcome)| ProbeView {
                proxy_id,
                success: outcome.success,
                latency_ms: outcome.latency_ms(),
                error: outcome.error,
            })
            .collect(),
    )
}

/// Drop unassigned unhealthy proxies
pub async fn prune_proxies(State(state): State<AppState>) -> Json<PruneResponse> {
    Json(PruneResponse {
        pruned: state.plane.prune_proxies().await,
    })
}
