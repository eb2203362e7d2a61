//! Registry error types

use fleet_types::{InstanceId, InstanceState};
use thiserror::Error;

/// Registry errors
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("Instance not found: {0}")]
    NotFound(InstanceId),

    #[error("Instance already exists: {0}")]
    AlreadyExists(InstanceId),

    /// The stored state differs from `expected`, or the edge is not legal
    #[error("Invalid state transition for {id}: expected {expected}, found {actual}, target {target}")]
    InvalidStateTransition {
        id: InstanceId,
        expected: InstanceState,
        actual: InstanceState,
        target: InstanceState,
    },

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Result type for registry operations
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
