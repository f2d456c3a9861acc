//! Endpoints node agents call: registration and heartbeats.

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use tracing::{debug, warn};

use edgegrid_control::{
    HeartbeatReport, HeartbeatResponse, NodeDescriptor, RegisterResponse, Transport,
};

use crate::ApiState;
use crate::error::{ApiError, ApiResponse};

/// POST /api/v1/agent/register
///
/// Registers the node and, in the background, sends it the
/// registration acknowledgement over the control channel.
pub async fn register<T: Transport>(
    State(state): State<ApiState<T>>,
    Json(descriptor): Json<NodeDescriptor>,
) -> Result<impl IntoResponse, ApiError> {
    let node = state.registry.register(descriptor).await?;

    let orchestrator = state.orchestrator.clone();
    let interval = state.heartbeat_interval;
    let (node_id, address) = (node.id.clone(), node.address.clone());
    tokio::spawn(async move {
        match orchestrator
            .client()
            .acknowledge_registration(&address, &node_id, interval)
            .await
        {
            Ok(()) => debug!(%node_id, "registration acknowledged by node"),
            Err(e) => warn!(%node_id, error = %e, "registration acknowledgement failed"),
        }
    });

    Ok(ApiResponse::ok(RegisterResponse {
        accepted: true,
        assigned_id: node.id,
        heartbeat_interval_secs: state.heartbeat_interval.as_secs(),
    }))
}

/// POST /api/v1/agent/heartbeat
pub async fn heartbeat<T: Transport>(
    State(state): State<ApiState<T>>,
    Json(report): Json<HeartbeatReport>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.registry.record_heartbeat(report).await?;
    Ok(ApiResponse::ok(HeartbeatResponse {
        accepted: true,
        outcome,
    }))
}
