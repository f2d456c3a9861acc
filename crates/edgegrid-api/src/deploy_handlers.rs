//! REST API handlers for deployments, rollbacks, and node commands.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use edgegrid_control::{NodeCommand, Transport};
use edgegrid_rollout::TunnelConfig;
use edgegrid_state::{Deployment, NodeId};

use crate::ApiState;
use crate::error::{ApiError, ApiResponse};

/// POST /api/v1/nodes/{id}/deployments
///
/// Runs the rollout to completion. The returned deployment is `success`
/// or `failed`; a failed push is still a created deployment.
pub async fn create_deployment<T: Transport>(
    State(state): State<ApiState<T>>,
    Path(node_id): Path<String>,
    Json(config): Json<TunnelConfig>,
) -> Result<impl IntoResponse, ApiError> {
    let deployment = state.orchestrator.rollout(&node_id, &config).await?;
    Ok((StatusCode::CREATED, ApiResponse::ok(deployment)))
}

/// GET /api/v1/nodes/{id}/deployments
pub async fn list_deployments<T: Transport>(
    State(state): State<ApiState<T>>,
    Path(node_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.orchestrator.list_deployments(&node_id)?))
}

/// GET /api/v1/deployments/{id}
pub async fn get_deployment<T: Transport>(
    State(state): State<ApiState<T>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.orchestrator.get_deployment(&id)?))
}

/// POST /api/v1/deployments/{id}/rollback
pub async fn rollback_deployment<T: Transport>(
    State(state): State<ApiState<T>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.orchestrator.rollback(&id).await?;
    Ok((StatusCode::CREATED, ApiResponse::ok(outcome)))
}

/// Request body for a fleet rollout.
#[derive(Debug, Deserialize)]
pub struct FleetRolloutRequest {
    pub node_ids: Vec<NodeId>,
    #[serde(default)]
    pub config: TunnelConfig,
}

/// One node's line in a fleet rollout response.
#[derive(Debug, Serialize)]
pub struct FleetRolloutResult {
    pub node_id: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment: Option<Deployment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// POST /api/v1/rollouts
pub async fn fleet_rollout<T: Transport>(
    State(state): State<ApiState<T>>,
    Json(req): Json<FleetRolloutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.node_ids.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "node_ids must not be empty",
        ));
    }
    req.config.validate()?;

    let results: Vec<FleetRolloutResult> = state
        .orchestrator
        .rollout_fleet(&req.node_ids, &req.config)
        .await
        .into_iter()
        .map(|entry| match entry.outcome {
            Ok(deployment) => FleetRolloutResult {
                node_id: entry.node_id,
                deployment: Some(deployment),
                error: None,
            },
            Err(e) => FleetRolloutResult {
                node_id: entry.node_id,
                deployment: None,
                error: Some(e.to_string()),
            },
        })
        .collect();
    Ok(ApiResponse::ok(results))
}

/// POST /api/v1/nodes/{id}/commands
pub async fn execute_command<T: Transport>(
    State(state): State<ApiState<T>>,
    Path(node_id): Path<String>,
    Json(command): Json<NodeCommand>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.orchestrator.execute(&node_id, command).await?))
}
