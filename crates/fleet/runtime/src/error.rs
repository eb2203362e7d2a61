//! Runtime error types

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// The call did not finish within its deadline
    #[error("runtime {operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("container not found: {0}")]
    NotFound(String),

    /// The runtime can never satisfy the request (unknown image, bad limits)
    #[error("container spec unsatisfiable: {0}")]
    Unsatisfiable(String),

    #[error("operation not supported by this runtime: {0}")]
    Unsupported(&'static str),

    #[error("runtime error: {0}")]
    Api(String),
}

impl RuntimeError {
    /// Errors that retrying the same request will not fix
    pub fn is_fatal(&self) -> bool {
        matches!(self, RuntimeError::Unsatisfiable(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RuntimeError::Timeout { .. })
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
