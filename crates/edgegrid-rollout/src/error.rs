//! Rollout error types.

use thiserror::Error;

use edgegrid_control::ControlError;
use edgegrid_registry::RegistryError;
use edgegrid_state::StateError;

/// Result type alias for orchestrator operations.
pub type RolloutResult<T> = Result<T, RolloutError>;

#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("no previous config for node {0}")]
    NoPreviousConfig(String),

    #[error("restore deployment {deployment} failed: {detail}")]
    RestoreFailed { deployment: String, detail: String },

    #[error("node reports version {reported:?}, expected {expected}")]
    VersionMismatch {
        expected: String,
        reported: Option<String>,
    },

    /// The detached rollout task panicked or was cancelled by runtime shutdown.
    #[error("rollout task aborted: {0}")]
    Aborted(String),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error("registry error: {0}")]
    Registry(RegistryError),

    #[error("state error: {0}")]
    State(#[from] StateError),
}

impl From<RegistryError> for RolloutError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => RolloutError::NotFound(format!("node {id}")),
            RegistryError::State(e) => RolloutError::State(e),
            other => RolloutError::Registry(other),
        }
    }
}

impl RolloutError {
    /// Failures worth another push attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            RolloutError::Control(e) => e.is_retryable(),
            RolloutError::VersionMismatch { .. } => true,
            _ => false,
        }
    }

    /// Short machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            RolloutError::NotFound(_) => "not_found",
            RolloutError::Conflict(_) => "conflict",
            RolloutError::InvalidState(_) => "invalid_state",
            RolloutError::InvalidConfig(_) => "invalid_config",
            RolloutError::NoPreviousConfig(_) => "no_previous_config",
            RolloutError::RestoreFailed { .. } => "restore_failed",
            RolloutError::VersionMismatch { .. } => "version_mismatch",
            RolloutError::Aborted(_) => "aborted",
            RolloutError::Control(e) => e.kind(),
            RolloutError::Registry(_) => "registry",
            RolloutError::State(_) => "state",
        }
    }
}
