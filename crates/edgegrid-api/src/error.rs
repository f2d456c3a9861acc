//! Maps domain errors onto HTTP status codes.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use edgegrid_assign::AssignError;
use edgegrid_control::ControlError;
use edgegrid_registry::RegistryError;
use edgegrid_rollout::RolloutError;
use edgegrid_state::StateError;

/// Response wrapper shared by every JSON endpoint.
#[derive(Serialize)]
pub(crate) struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub(crate) fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

/// A failed request: status plus message.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!(status = %self.status, error = %self.message, "request failed");
        }
        error_response(&self.message, self.status)
    }
}

fn control_status(err: &ControlError) -> StatusCode {
    match err {
        ControlError::Rejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ControlError::Unreachable { .. }
        | ControlError::Disconnected { .. }
        | ControlError::Protocol(_) => StatusCode::BAD_GATEWAY,
        ControlError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        ControlError::Unimplemented { .. } => StatusCode::NOT_IMPLEMENTED,
    }
}

impl From<StateError> for ApiError {
    fn from(err: StateError) -> Self {
        let status = match err {
            StateError::NotFound(_) => StatusCode::NOT_FOUND,
            StateError::Conflict(_) | StateError::InvalidTransition { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            RegistryError::InvalidReport(_) => Self::new(StatusCode::BAD_REQUEST, err.to_string()),
            RegistryError::State(e) => e.into(),
        }
    }
}

impl From<AssignError> for ApiError {
    fn from(err: AssignError) -> Self {
        let status = match &err {
            AssignError::NotFound(_) => StatusCode::NOT_FOUND,
            AssignError::Conflict(_) => StatusCode::CONFLICT,
            AssignError::NoCapacity(_) => StatusCode::SERVICE_UNAVAILABLE,
            AssignError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<RolloutError> for ApiError {
    fn from(err: RolloutError) -> Self {
        let status = match &err {
            RolloutError::NotFound(_) => StatusCode::NOT_FOUND,
            RolloutError::Conflict(_) | RolloutError::InvalidState(_) => StatusCode::CONFLICT,
            RolloutError::InvalidConfig(_) | RolloutError::NoPreviousConfig(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            RolloutError::RestoreFailed { .. } | RolloutError::VersionMismatch { .. } => {
                StatusCode::BAD_GATEWAY
            }
            RolloutError::Control(e) => control_status(e),
            RolloutError::Registry(RegistryError::InvalidReport(_)) => StatusCode::BAD_REQUEST,
            RolloutError::Registry(_) | RolloutError::State(_) | RolloutError::Aborted(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn control_errors_map_to_gateway_statuses() {
        let cases = [
            (
                ControlError::Rejected {
                    command: "push_config".into(),
                    detail: "bad".into(),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                ControlError::Unreachable {
                    endpoint: "h:1".into(),
                    detail: "refused".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                ControlError::Disconnected {
                    endpoint: "h:1".into(),
                    detail: "connection reset".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                ControlError::Timeout {
                    endpoint: "h:1".into(),
                    command: "get_status".into(),
                    after: Duration::from_secs(1),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                ControlError::Unimplemented {
                    command: "stop_service".into(),
                },
                StatusCode::NOT_IMPLEMENTED,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(RolloutError::Control(err)).status, status);
        }
    }

    #[test]
    fn domain_errors_map_to_statuses() {
        assert_eq!(
            ApiError::from(AssignError::NoCapacity("t1".into())).status,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(RolloutError::InvalidState("failed".into())).status,
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(RolloutError::NoPreviousConfig("n".into())).status,
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::from(RegistryError::NotFound("n".into())).status,
            StatusCode::NOT_FOUND
        );
    }
}
