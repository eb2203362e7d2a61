//! Error types for fleet-health.

use fleet_registry::RegistryError;
use fleet_types::{InstanceId, InstanceState};
use thiserror::Error;

/// Errors that can occur while monitoring instances.
#[derive(Debug, Error)]
pub enum HealthError {
    #[error("instance not found: {0}")]
    InstanceNotFound(InstanceId),

    /// The instance is in a state the monitor does not poll.
    #[error("instance {id} is {state} and cannot be monitored")]
    NotMonitorable { id: InstanceId, state: InstanceState },

    #[error("instance {0} has no container")]
    NoContainer(InstanceId),

    /// `watch` after `shutdown`.
    #[error("health monitor is shut down")]
    ShutDown,

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Result type for health operations.
pub type HealthResult<T> = Result<T, HealthError>;
