//! Error types for fleetd

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fleet_control::FleetError;
use serde::Serialize;
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server startup error
    #[error("Server error: {0}")]
    Server(String),

    /// Control plane error
    #[error("Control plane error: {0}")]
    Fleet(#[from] FleetError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// API-specific errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed path or body
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Control plane refused or failed the operation
    #[error(transparent)]
    Fleet(#[from] FleetError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Fleet(err) => match err {
                FleetError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                FleetError::PolicyRejected(_) => StatusCode::FORBIDDEN,
                FleetError::NotFound(_) => StatusCode::NOT_FOUND,
                FleetError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
                FleetError::NoProxyAvailable
                | FleetError::ProxyUnavailable(_)
                | FleetError::TransientInfra(_) => StatusCode::SERVICE_UNAVAILABLE,
                FleetError::Fatal(_) | FleetError::ContainerCreate(_) | FleetError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    pub fn code(&self) -> String {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST".to_string(),
            ApiError::Fleet(err) => err.code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, "Request failed");
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code(),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_types::{InstanceId, InstanceState, RejectReason};

    fn status_of(err: FleetError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(
            status_of(FleetError::Validation("bad name".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(FleetError::PolicyRejected(RejectReason::CountryNotAllowed)),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(FleetError::NotFound(InstanceId::generate())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(FleetError::InvalidStateTransition {
                id: InstanceId::generate(),
                expected: InstanceState::Running,
                actual: InstanceState::Stopped,
                target: InstanceState::Stopping,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(FleetError::NoProxyAvailable),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(FleetError::TransientInfra("timeout".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(FleetError::Fatal("no such image".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::BadRequest("x".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_policy_code_carries_reason() {
        let err = ApiError::from(FleetError::PolicyRejected(RejectReason::MaxInstancesExceeded));
        assert_eq!(err.code(), "POLICY_REJECTED:MAX_INSTANCES_EXCEEDED");
    }
}
