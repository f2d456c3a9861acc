//! Registry error types.

use thiserror::Error;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("node not found: {0}")]
    NotFound(String),

    #[error("invalid report: {0}")]
    InvalidReport(String),

    #[error("state error: {0}")]
    State(#[from] edgegrid_state::StateError),
}
