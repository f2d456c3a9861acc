//! edgegrid-api: REST API for the EdgeGrid control plane.
//!
//! Operator routes for nodes, tenants, and deployments, the agent
//! endpoints nodes call to register and heartbeat, and a Prometheus
//! scrape endpoint.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/nodes` | List nodes (`?include_removed=true`) |
//! | POST | `/api/v1/nodes` | Register a node |
//! | GET | `/api/v1/nodes/{id}` | Get node |
//! | PATCH | `/api/v1/nodes/{id}` | Update descriptive fields |
//! | DELETE | `/api/v1/nodes/{id}` | Soft-remove node |
//! | PUT | `/api/v1/nodes/{id}/status` | Set status |
//! | POST | `/api/v1/nodes/{id}/deployments` | Roll out a tunnel config |
//! | GET | `/api/v1/nodes/{id}/deployments` | List deployments |
//! | GET | `/api/v1/nodes/{id}/metrics` | Recent samples (`?limit=`) |
//! | GET | `/api/v1/nodes/{id}/metrics/summary` | Load summary (`?window_secs=`) |
//! | POST | `/api/v1/nodes/{id}/commands` | One-shot node command |
//! | GET | `/api/v1/load` | Active tenants per node |
//! | POST | `/api/v1/rollouts` | Fleet rollout |
//! | GET | `/api/v1/deployments/{id}` | Get deployment |
//! | POST | `/api/v1/deployments/{id}/rollback` | Roll back a deployment |
//! | GET | `/api/v1/tenants/{id}/assignment` | Active assignment |
//! | PUT | `/api/v1/tenants/{id}/assignment` | Assign, or reassign if active |
//! | DELETE | `/api/v1/tenants/{id}/assignment` | Unassign |
//! | GET | `/api/v1/tenants/{id}/assignments` | Assignment history |
//! | GET | `/api/v1/tenants/unassigned` | Tenants waiting for capacity |
//! | POST | `/api/v1/agent/register` | Agent registration |
//! | POST | `/api/v1/agent/heartbeat` | Agent heartbeat |
//! | GET | `/metrics` | Prometheus exposition |

pub mod agent_handlers;
pub mod deploy_handlers;
pub mod error;
pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post, put};

use edgegrid_assign::AssignmentManager;
use edgegrid_control::Transport;
use edgegrid_metrics::MetricsStore;
use edgegrid_registry::NodeRegistry;
use edgegrid_rollout::DeploymentOrchestrator;

pub use error::ApiError;

/// Shared state for API handlers.
pub struct ApiState<T> {
    pub registry: Arc<NodeRegistry>,
    pub assignments: Arc<AssignmentManager>,
    pub orchestrator: Arc<DeploymentOrchestrator<T>>,
    pub metrics: MetricsStore,
    /// Heartbeat cadence handed to registering agents.
    pub heartbeat_interval: Duration,
}

impl<T> Clone for ApiState<T> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            assignments: self.assignments.clone(),
            orchestrator: self.orchestrator.clone(),
            metrics: self.metrics.clone(),
            heartbeat_interval: self.heartbeat_interval,
        }
    }
}

/// Build the complete API router (REST + agent + metrics).
pub fn build_router<T: Transport>(state: ApiState<T>) -> Router {
    let api_routes = Router::new()
        .route(
            "/nodes",
            get(handlers::list_nodes::<T>).post(handlers::create_node::<T>),
        )
        .route(
            "/nodes/{id}",
            get(handlers::get_node::<T>)
                .patch(handlers::update_node::<T>)
                .delete(handlers::remove_node::<T>),
        )
        .route("/nodes/{id}/status", put(handlers::set_node_status::<T>))
        .route(
            "/nodes/{id}/deployments",
            get(deploy_handlers::list_deployments::<T>).post(deploy_handlers::create_deployment::<T>),
        )
        .route("/nodes/{id}/metrics", get(handlers::node_metrics::<T>))
        .route(
            "/nodes/{id}/metrics/summary",
            get(handlers::node_metrics_summary::<T>),
        )
        .route("/nodes/{id}/commands", post(deploy_handlers::execute_command::<T>))
        .route("/load", get(handlers::load_by_node::<T>))
        .route("/rollouts", post(deploy_handlers::fleet_rollout::<T>))
        .route("/deployments/{id}", get(deploy_handlers::get_deployment::<T>))
        .route(
            "/deployments/{id}/rollback",
            post(deploy_handlers::rollback_deployment::<T>),
        )
        .route(
            "/tenants/{id}/assignment",
            get(handlers::get_assignment::<T>)
                .put(handlers::assign_tenant::<T>)
                .delete(handlers::unassign_tenant::<T>),
        )
        .route("/tenants/{id}/assignments", get(handlers::assignment_history::<T>))
        .route("/tenants/unassigned", get(handlers::list_unassigned::<T>))
        .route("/agent/register", post(agent_handlers::register::<T>))
        .route("/agent/heartbeat", post(agent_handlers::heartbeat::<T>))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics::<T>).with_state(state))
}
