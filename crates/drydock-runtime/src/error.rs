//! Runtime error types.

use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors reported by a container runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// The image, container, or other object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request conflicts with existing state (e.g. duplicate name).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The runtime endpoint could not be reached.
    #[error("runtime unavailable: {0}")]
    Unavailable(String),

    #[error("runtime call failed: {0}")]
    Failed(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }
}
