//! End-to-end fleet scenarios against the assembled subsystems.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use edgegrid_api::{ApiState, build_router};
use edgegrid_assign::{AssignError, AssignmentManager, status_listener};
use edgegrid_control::{
    ControlClient, InMemoryNode, LoopbackTransport, ScriptedFault, node_router,
};
use edgegrid_metrics::MetricsStore;
use edgegrid_registry::NodeRegistry;
use edgegrid_rollout::{DeploymentOrchestrator, RetryPolicy, RolloutError, TunnelConfig};
use edgegrid_state::{
    DeploymentStatus, NodeAddress, NodeDescriptor, NodeId, NodeStatus, StateStore, epoch_millis,
};

const WINDOW: Duration = Duration::from_secs(90);

struct Fleet {
    registry: Arc<NodeRegistry>,
    assignments: Arc<AssignmentManager>,
    orchestrator: Arc<DeploymentOrchestrator<LoopbackTransport<InMemoryNode>>>,
    metrics: MetricsStore,
}

fn fleet() -> Fleet {
    let store = StateStore::open_in_memory().unwrap();
    let assignments = Arc::new(AssignmentManager::new(store.clone()));
    let registry = Arc::new(
        NodeRegistry::new(store.clone())
            .with_liveness_window(WINDOW)
            .with_listener(status_listener(assignments.clone())),
    );
    let client =
        ControlClient::new(LoopbackTransport::new()).with_deadline(Duration::from_millis(50));
    let orchestrator = Arc::new(
        DeploymentOrchestrator::new(registry.clone(), client).with_policy(RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
        }),
    );
    Fleet {
        registry,
        assignments,
        orchestrator,
        metrics: MetricsStore::new(store, Duration::from_secs(3600)),
    }
}

impl Fleet {
    async fn node(&self, host: &str) -> (NodeId, Arc<InMemoryNode>) {
        let address = NodeAddress::new(host, 7000);
        let node = self
            .registry
            .register(NodeDescriptor::new(address.clone()))
            .await
            .unwrap();
        let handler = Arc::new(InMemoryNode::new());
        self.orchestrator
            .client()
            .transport()
            .attach(&address, handler.clone());
        (node.id, handler)
    }
}

fn config(port: u16) -> TunnelConfig {
    TunnelConfig {
        listen_port: port,
        ..Default::default()
    }
}

#[tokio::test]
async fn silent_node_goes_offline() {
    let fleet = fleet();
    let (n1, _) = fleet.node("10.0.0.1").await;
    assert_eq!(fleet.registry.get(&n1).unwrap().status, NodeStatus::Online);

    let later = epoch_millis() + WINDOW.as_millis() as u64 + 1_000;
    let changes = fleet.registry.sweep_stale_at(WINDOW, later).await;

    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].node_id, n1);
    assert_eq!(fleet.registry.get(&n1).unwrap().status, NodeStatus::Offline);
}

#[tokio::test]
async fn offline_sole_node_leaves_tenant_unassigned() {
    let fleet = fleet();
    let (n1, _) = fleet.node("10.0.0.1").await;

    let assignment = fleet.assignments.assign("t1").await.unwrap();
    assert_eq!(assignment.node_id, n1);
    assert!(assignment.is_active);

    let later = epoch_millis() + WINDOW.as_millis() as u64 + 1_000;
    fleet.registry.sweep_stale_at(WINDOW, later).await;

    assert!(fleet.assignments.active("t1").unwrap().is_none());
    let waiting = fleet.assignments.unassigned().unwrap();
    assert_eq!(waiting.len(), 1);
    assert_eq!(waiting[0].tenant_id, "t1");
    assert!(matches!(
        fleet.assignments.assign("t1").await,
        Err(AssignError::NoCapacity(_))
    ));

    // The previous assignment survives as history only.
    let history = fleet.assignments.history("t1").unwrap();
    assert_eq!(history.len(), 1);
    assert!(!history[0].is_active);
}

#[tokio::test]
async fn push_times_out_twice_then_succeeds() {
    let fleet = fleet();
    let (n1, node) = fleet.node("10.0.0.1").await;
    node.script("push_config", ScriptedFault::Delay(Duration::from_millis(500)));
    node.script("push_config", ScriptedFault::Delay(Duration::from_millis(500)));

    let started = epoch_millis();
    let d = fleet.orchestrator.rollout(&n1, &config(8443)).await.unwrap();

    assert_eq!(d.status, DeploymentStatus::Success);
    assert_eq!(d.retries.len(), 2);
    assert!(d.retries.iter().all(|r| r.kind == "timeout"));
    let deployed_at = d.deployed_at_ms.unwrap();
    assert!(deployed_at >= started);
    assert!(d.retries.iter().all(|r| r.at_ms <= deployed_at));
    assert_eq!(node.call_count("push_config"), 3);
    assert_eq!(node.active_version(), Some(config(8443).version()));
    assert_eq!(fleet.registry.get(&n1).unwrap().status, NodeStatus::Online);
}

#[tokio::test]
async fn rollback_requires_a_successful_deployment() {
    let fleet = fleet();
    let (n1, node) = fleet.node("10.0.0.1").await;

    let first = fleet.orchestrator.rollout(&n1, &config(8443)).await.unwrap();
    let second = fleet.orchestrator.rollout(&n1, &config(9443)).await.unwrap();
    assert_eq!(second.status, DeploymentStatus::Success);

    node.script("push_config", ScriptedFault::Reject("disk full".into()));
    let failed = fleet.orchestrator.rollout(&n1, &config(10443)).await.unwrap();
    assert_eq!(failed.status, DeploymentStatus::Failed);

    let err = fleet.orchestrator.rollback(&failed.id).await.unwrap_err();
    assert!(matches!(err, RolloutError::InvalidState(_)));

    let outcome = fleet.orchestrator.rollback(&second.id).await.unwrap();
    assert_eq!(outcome.original.id, second.id);
    assert_eq!(outcome.original.status, DeploymentStatus::RolledBack);
    assert!(outcome.original.rolled_back_at_ms.is_some());
    assert_ne!(outcome.restored.id, second.id);
    assert_eq!(outcome.restored.status, DeploymentStatus::Success);
    assert_eq!(outcome.restored.config_version, first.config_version);
    assert_eq!(outcome.restored.rollback_of.as_deref(), Some(second.id.as_str()));
    assert_eq!(node.active_version(), Some(first.config_version.clone()));

    let history = fleet.orchestrator.list_deployments(&n1).unwrap();
    assert_eq!(history.len(), 4);
}

#[tokio::test]
async fn control_client_reaches_node_over_http() {
    let node = Arc::new(InMemoryNode::new());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let app = node_router(node.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = ControlClient::http().with_deadline(Duration::from_secs(2));
    let endpoint = NodeAddress::new("127.0.0.1", port);
    let cfg = config(8443);
    let (version, document) = cfg.materialize().unwrap();

    client
        .push_config(&endpoint, &document, &version)
        .await
        .unwrap();
    client.reload_config(&endpoint).await.unwrap();
    let status = client.get_status(&endpoint).await.unwrap();

    assert!(status.running);
    assert_eq!(status.config_version.as_deref(), Some(version.as_str()));
    assert_eq!(node.active_version(), Some(version));
}

#[tokio::test]
async fn api_serves_fleet_state() {
    let fleet = fleet();
    let (n1, _) = fleet.node("10.0.0.1").await;
    let router = build_router(ApiState {
        registry: fleet.registry.clone(),
        assignments: fleet.assignments.clone(),
        orchestrator: fleet.orchestrator.clone(),
        metrics: fleet.metrics.clone(),
        heartbeat_interval: Duration::from_secs(30),
    });

    let req = Request::builder()
        .uri(format!("/api/v1/nodes/{n1}"))
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
