//! REST API handlers for nodes, tenants, and metrics.

use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;

use edgegrid_control::Transport;
use edgegrid_metrics::{NodeGauge, render_prometheus};
use edgegrid_registry::NodePatch;
use edgegrid_state::{NodeDescriptor, NodeStatus};

use crate::ApiState;
use crate::error::{ApiError, ApiResponse};

// ── Nodes ──────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ListNodesQuery {
    #[serde(default)]
    pub include_removed: bool,
}

/// GET /api/v1/nodes
pub async fn list_nodes<T: Transport>(
    State(state): State<ApiState<T>>,
    Query(q): Query<ListNodesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.registry.list(q.include_removed)?))
}

/// POST /api/v1/nodes
pub async fn create_node<T: Transport>(
    State(state): State<ApiState<T>>,
    Json(descriptor): Json<NodeDescriptor>,
) -> Result<impl IntoResponse, ApiError> {
    let node = state.registry.register(descriptor).await?;
    Ok((StatusCode::CREATED, ApiResponse::ok(node)))
}

/// GET /api/v1/nodes/{id}
pub async fn get_node<T: Transport>(
    State(state): State<ApiState<T>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.registry.get(&id)?))
}

/// PATCH /api/v1/nodes/{id}
pub async fn update_node<T: Transport>(
    State(state): State<ApiState<T>>,
    Path(id): Path<String>,
    Json(patch): Json<NodePatch>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.registry.update(&id, patch).await?))
}

/// DELETE /api/v1/nodes/{id}
pub async fn remove_node<T: Transport>(
    State(state): State<ApiState<T>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.registry.remove(&id).await?))
}

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: NodeStatus,
}

/// PUT /api/v1/nodes/{id}/status
pub async fn set_node_status<T: Transport>(
    State(state): State<ApiState<T>>,
    Path(id): Path<String>,
    Json(req): Json<SetStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.registry.set_status(&id, req.status).await?))
}

/// GET /api/v1/load
pub async fn load_by_node<T: Transport>(
    State(state): State<ApiState<T>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.assignments.load_by_node()?))
}

// ── Metrics ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    60
}

/// GET /api/v1/nodes/{id}/metrics
pub async fn node_metrics<T: Transport>(
    State(state): State<ApiState<T>>,
    Path(id): Path<String>,
    Query(q): Query<MetricsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state.registry.get(&id)?;
    Ok(ApiResponse::ok(state.metrics.recent(&id, q.limit)?))
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_window_secs() -> u64 {
    300
}

/// GET /api/v1/nodes/{id}/metrics/summary
///
/// `data` is null when the node sent no samples inside the window.
pub async fn node_metrics_summary<T: Transport>(
    State(state): State<ApiState<T>>,
    Path(id): Path<String>,
    Query(q): Query<SummaryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state.registry.get(&id)?;
    let summary = state
        .metrics
        .summary(&id, Duration::from_secs(q.window_secs))?;
    Ok(ApiResponse::ok(summary))
}

/// GET /metrics
///
/// Prometheus text exposition for every live node.
pub async fn prometheus_metrics<T: Transport>(
    State(state): State<ApiState<T>>,
) -> Result<impl IntoResponse, ApiError> {
    let nodes = state.registry.list(false)?;
    let counts = state.registry.store().active_assignment_counts()?;

    let mut gauges = Vec::with_capacity(nodes.len());
    for node in nodes {
        let latest = state.metrics.recent(&node.id, 1)?.into_iter().next();
        let active_tenants = counts.get(&node.id).copied().unwrap_or(0);
        gauges.push(NodeGauge {
            node,
            latest,
            active_tenants,
        });
    }

    let body = render_prometheus(&gauges);
    Ok((
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    ))
}

// ── Tenants ────────────────────────────────────────────────────

/// GET /api/v1/tenants/{id}/assignment
pub async fn get_assignment<T: Transport>(
    State(state): State<ApiState<T>>,
    Path(tenant): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.assignments.active(&tenant)? {
        Some(assignment) => Ok(ApiResponse::ok(assignment)),
        None => Err(ApiError::not_found(format!(
            "tenant {tenant} has no active assignment"
        ))),
    }
}

/// PUT /api/v1/tenants/{id}/assignment
///
/// Assigns an unplaced tenant (201) or moves a placed one (200).
pub async fn assign_tenant<T: Transport>(
    State(state): State<ApiState<T>>,
    Path(tenant): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.assignments.active(&tenant)?.is_some() {
        let assignment = state.assignments.reassign(&tenant).await?;
        return Ok((StatusCode::OK, ApiResponse::ok(assignment)));
    }
    let assignment = state.assignments.assign(&tenant).await?;
    Ok((StatusCode::CREATED, ApiResponse::ok(assignment)))
}

/// DELETE /api/v1/tenants/{id}/assignment
pub async fn unassign_tenant<T: Transport>(
    State(state): State<ApiState<T>>,
    Path(tenant): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.assignments.unassign(&tenant).await?))
}

/// GET /api/v1/tenants/{id}/assignments
pub async fn assignment_history<T: Transport>(
    State(state): State<ApiState<T>>,
    Path(tenant): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.assignments.history(&tenant)?))
}

/// GET /api/v1/tenants/unassigned
pub async fn list_unassigned<T: Transport>(
    State(state): State<ApiState<T>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(ApiResponse::ok(state.assignments.unassigned()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use edgegrid_assign::{AssignmentManager, status_listener};
    use edgegrid_control::{ControlClient, InMemoryNode, LoopbackTransport};
    use edgegrid_metrics::MetricsStore;
    use edgegrid_registry::{HeartbeatReport, NodeRegistry};
    use edgegrid_rollout::DeploymentOrchestrator;
    use edgegrid_state::{NodeAddress, NodeMetrics, StateStore};

    type Loopback = LoopbackTransport<InMemoryNode>;

    fn test_state() -> ApiState<Loopback> {
        let store = StateStore::open_in_memory().unwrap();
        let assignments = Arc::new(AssignmentManager::new(store.clone()));
        let registry = Arc::new(
            NodeRegistry::new(store.clone())
                .with_min_report_interval(Duration::ZERO)
                .with_listener(status_listener(assignments.clone())),
        );
        let orchestrator = Arc::new(DeploymentOrchestrator::new(
            registry.clone(),
            ControlClient::new(LoopbackTransport::new()),
        ));
        ApiState {
            registry,
            assignments,
            orchestrator,
            metrics: MetricsStore::new(store, Duration::from_secs(3600)),
            heartbeat_interval: Duration::from_secs(30),
        }
    }

    fn descriptor(host: &str) -> NodeDescriptor {
        NodeDescriptor::new(NodeAddress::new(host, 7000))
    }

    #[tokio::test]
    async fn list_nodes_empty() {
        let state = test_state();
        let resp = list_nodes(State(state), Query(ListNodesQuery::default()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_and_get_node() {
        let state = test_state();
        let resp = create_node(State(state.clone()), Json(descriptor("10.0.0.1")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let id = NodeAddress::new("10.0.0.1", 7000).node_id();
        let resp = get_node(State(state), Path(id)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_nonexistent_node() {
        let state = test_state();
        let resp = get_node(State(state), Path("node-nope".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn removed_node_hidden_from_default_listing() {
        let state = test_state();
        let node = state.registry.register(descriptor("10.0.0.1")).await.unwrap();
        remove_node(State(state.clone()), Path(node.id.clone()))
            .await
            .into_response();

        assert!(state.registry.list(false).unwrap().is_empty());
        assert_eq!(state.registry.list(true).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn assign_without_nodes_is_503() {
        let state = test_state();
        let resp = assign_tenant(State(state), Path("t1".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn assign_then_reassign() {
        let state = test_state();
        state.registry.register(descriptor("10.0.0.1")).await.unwrap();
        state.registry.register(descriptor("10.0.0.2")).await.unwrap();

        let resp = assign_tenant(State(state.clone()), Path("t1".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = assign_tenant(State(state.clone()), Path("t1".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.assignments.history("t1").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_assignment_is_404() {
        let state = test_state();
        let resp = get_assignment(State(state), Path("ghost".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn prometheus_endpoint() {
        let state = test_state();
        let node = state.registry.register(descriptor("10.0.0.1")).await.unwrap();
        state
            .registry
            .record_heartbeat(HeartbeatReport {
                node_id: node.id.clone(),
                sent_at_ms: 1,
                metrics: NodeMetrics {
                    cpu_usage: 50.0,
                    ..Default::default()
                },
                version: None,
            })
            .await
            .unwrap();

        let resp = prometheus_metrics(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
    }

    #[tokio::test]
    async fn metrics_for_unknown_node_is_404() {
        let state = test_state();
        let resp = node_metrics(
            State(state),
            Path("node-nope".to_string()),
            Query(MetricsQuery { limit: 5 }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
