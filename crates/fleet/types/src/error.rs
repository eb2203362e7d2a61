//! Validation errors shared by every fleet crate

use thiserror::Error;

/// Input rejected before any allocation or side effect
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Malformed proxy '{input}': {reason}")]
    MalformedProxy { input: String, reason: String },

    #[error("Unsupported proxy scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Malformed resource spec '{input}': {reason}")]
    MalformedResource { input: String, reason: String },

    #[error("Invalid instance name: {0}")]
    InvalidName(String),

    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("Invalid safeguard policy: {0}")]
    InvalidPolicy(String),
}

impl ValidationError {
    pub fn malformed_proxy(input: &str, reason: impl Into<String>) -> Self {
        Self::MalformedProxy {
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    pub fn malformed_resource(input: &str, reason: impl Into<String>) -> Self {
        Self::MalformedResource {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}
