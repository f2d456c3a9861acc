//! Remote control error types.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for remote control calls.
pub type ControlResult<T> = Result<T, ControlError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ControlError {
    /// No connection could be made to the node.
    #[error("node {endpoint} unreachable: {detail}")]
    Unreachable { endpoint: String, detail: String },

    /// Connected, but the exchange broke before a reply arrived. The node
    /// may or may not have acted on the command.
    #[error("connection to node {endpoint} lost: {detail}")]
    Disconnected { endpoint: String, detail: String },

    /// The node answered and refused the command.
    #[error("node rejected {command}: {detail}")]
    Rejected { command: String, detail: String },

    /// The call exceeded its deadline.
    #[error("{command} to {endpoint} timed out after {after:?}")]
    Timeout {
        endpoint: String,
        command: String,
        after: Duration,
    },

    /// The node does not implement the command.
    #[error("node does not implement {command}")]
    Unimplemented { command: String },

    /// The node answered with something that is not a valid reply.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ControlError {
    /// Timeouts and connection failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ControlError::Timeout { .. }
                | ControlError::Unreachable { .. }
                | ControlError::Disconnected { .. }
        )
    }

    /// Short machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlError::Unreachable { .. } => "unreachable",
            ControlError::Disconnected { .. } => "disconnected",
            ControlError::Rejected { .. } => "rejected",
            ControlError::Timeout { .. } => "timeout",
            ControlError::Unimplemented { .. } => "unimplemented",
            ControlError::Protocol(_) => "protocol",
        }
    }
}
