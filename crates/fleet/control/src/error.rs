//! Error types for the control plane
//!
//! `FleetError` is the taxonomy operators see. Errors from the lower crates
//! convert into it so callers can branch on a small, stable set of codes.

use fleet_health::HealthError;
use fleet_policy::PolicyError;
use fleet_proxy::PoolError;
use fleet_registry::RegistryError;
use fleet_runtime::RuntimeError;
use fleet_types::{InstanceId, InstanceState, RejectReason, ValidationError};
use thiserror::Error;

/// Control plane error type
#[derive(Debug, Error)]
pub enum FleetError {
    /// Malformed input; retrying the same request will fail again
    #[error("Validation error: {0}")]
    Validation(String),

    /// A safeguard refused the request
    #[error("Policy rejected: {0}")]
    PolicyRejected(RejectReason),

    /// Runtime or probe timeouts; the request may succeed later
    #[error("Transient infrastructure error: {0}")]
    TransientInfra(String),

    /// The runtime reports the container spec as unsatisfiable
    #[error("Fatal: {0}")]
    Fatal(String),

    #[error("Invalid state transition for {id}: expected {expected}, found {actual}, target {target}")]
    InvalidStateTransition {
        id: InstanceId,
        expected: InstanceState,
        actual: InstanceState,
        target: InstanceState,
    },

    #[error("Not found: {0}")]
    NotFound(InstanceId),

    #[error("No proxy available")]
    NoProxyAvailable,

    /// A named proxy exists but cannot be assigned
    #[error("Proxy unavailable: {0}")]
    ProxyUnavailable(String),

    #[error("Container create error: {0}")]
    ContainerCreate(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for control plane operations
pub type FleetResult<T> = std::result::Result<T, FleetError>;

impl FleetError {
    /// Stable code rendered to API callers
    pub fn code(&self) -> String {
        match self {
            FleetError::Validation(_) => "VALIDATION_ERROR".to_string(),
            FleetError::PolicyRejected(reason) => format!("POLICY_REJECTED:{}", reason.code()),
            FleetError::TransientInfra(_) => "TRANSIENT_INFRA".to_string(),
            FleetError::Fatal(_) => "FATAL".to_string(),
            FleetError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION".to_string(),
            FleetError::NotFound(_) => "NOT_FOUND".to_string(),
            FleetError::NoProxyAvailable => "NO_PROXY_AVAILABLE".to_string(),
            FleetError::ProxyUnavailable(_) => "PROXY_UNAVAILABLE".to_string(),
            FleetError::ContainerCreate(_) => "CONTAINER_CREATE_ERROR".to_string(),
            FleetError::Internal(_) => "INTERNAL".to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, FleetError::TransientInfra(_))
    }

    pub fn is_state_race(&self) -> bool {
        matches!(self, FleetError::InvalidStateTransition { .. })
    }
}

impl From<ValidationError> for FleetError {
    fn from(err: ValidationError) -> Self {
        FleetError::Validation(err.to_string())
    }
}

impl From<PoolError> for FleetError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Validation(e) => e.into(),
            PoolError::NoProxyAvailable => FleetError::NoProxyAvailable,
            PoolError::ProxyNotFound(id) => FleetError::Validation(format!("unknown proxy {}", id)),
            e @ (PoolError::ProxyUnavailable { .. } | PoolError::AlreadyAssigned { .. }) => {
                FleetError::ProxyUnavailable(e.to_string())
            }
        }
    }
}

impl From<RegistryError> for FleetError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => FleetError::NotFound(id),
            RegistryError::InvalidStateTransition {
                id,
                expected,
                actual,
                target,
            } => FleetError::InvalidStateTransition {
                id,
                expected,
                actual,
                target,
            },
            e @ (RegistryError::AlreadyExists(_) | RegistryError::Storage(_)) => {
                FleetError::Internal(e.to_string())
            }
        }
    }
}

impl From<RuntimeError> for FleetError {
    fn from(err: RuntimeError) -> Self {
        match err {
            e @ RuntimeError::Timeout { .. } => FleetError::TransientInfra(e.to_string()),
            e @ RuntimeError::Unsatisfiable(_) => FleetError::Fatal(e.to_string()),
            e @ RuntimeError::Api(_) => FleetError::TransientInfra(e.to_string()),
            e @ (RuntimeError::NotFound(_) | RuntimeError::Unsupported(_)) => {
                FleetError::Internal(e.to_string())
            }
        }
    }
}

impl From<PolicyError> for FleetError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::InvalidPolicy(e) => e.into(),
            PolicyError::Classification(msg) => FleetError::TransientInfra(msg),
        }
    }
}

impl From<HealthError> for FleetError {
    fn from(err: HealthError) -> Self {
        match err {
            HealthError::InstanceNotFound(id) => FleetError::NotFound(id),
            HealthError::Registry(e) => e.into(),
            e => FleetError::Internal(e.to_string()),
        }
    }
}
