//! Error types for fleet-policy

use fleet_types::ValidationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    /// A reloaded policy failed validation; the previous one stays active
    #[error("invalid policy: {0}")]
    InvalidPolicy(#[from] ValidationError),

    /// The geo/anonymity lookup could not be completed
    #[error("classification failed: {0}")]
    Classification(String),
}

pub type PolicyResult<T> = Result<T, PolicyError>;
