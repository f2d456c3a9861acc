//! Assignment error types.

use thiserror::Error;

use edgegrid_state::StateError;

/// Result type alias for assignment operations.
pub type AssignResult<T> = Result<T, AssignError>;

#[derive(Debug, Error)]
pub enum AssignError {
    #[error("tenant not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("no eligible node for tenant {0}")]
    NoCapacity(String),

    #[error("state error: {0}")]
    State(StateError),
}

impl From<StateError> for AssignError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Conflict(msg) => AssignError::Conflict(msg),
            other => AssignError::State(other),
        }
    }
}
