//! Error types for the proxy pool

use fleet_types::{InstanceId, ProxyId, ValidationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No healthy, unassigned endpoint exists
    #[error("no proxy available")]
    NoProxyAvailable,

    #[error("proxy not found: {0}")]
    ProxyNotFound(ProxyId),

    /// The named endpoint is banned, unhealthy or held by another instance
    #[error("proxy {id} unavailable: {reason}")]
    ProxyUnavailable { id: ProxyId, reason: String },

    #[error("proxy {id} already held by {holder}")]
    AlreadyAssigned { id: ProxyId, holder: InstanceId },
}

pub type PoolResult<T> = Result<T, PoolError>;
