//! Control plane mode: wires the subsystems together and serves the API.
//!
//! In this mode, the daemon:
//! 1. Opens the redb state store
//! 2. Builds the registry with the assignment manager as its status listener
//! 3. Builds the deployment orchestrator over the HTTP control transport
//!    and fails deployments a previous run left unfinished
//! 4. Runs the staleness sweeper and metric retention in the background
//! 5. Serves the REST API until Ctrl-C, then stops the background tasks

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};

use edgegrid_api::{ApiState, build_router};
use edgegrid_assign::{AssignmentManager, status_listener};
use edgegrid_control::ControlClient;
use edgegrid_metrics::MetricsStore;
use edgegrid_registry::{NodeRegistry, run_sweeper};
use edgegrid_rollout::DeploymentOrchestrator;
use edgegrid_state::StateStore;

use crate::config::DaemonConfig;

pub async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    info!("EdgeGrid daemon starting");

    // ── State store ──────────────────────────────────────────────
    let data_dir = &config.server.data_dir;
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("create data dir {}", data_dir.display()))?;
    let db_path = data_dir.join("edgegrid.redb");
    let store = StateStore::open(&db_path).context("open state store")?;
    info!(path = ?db_path, "state store opened");

    // ── Subsystems ───────────────────────────────────────────────
    let assignments = Arc::new(AssignmentManager::new(store.clone()));
    let registry = Arc::new(
        NodeRegistry::new(store.clone())
            .with_liveness_window(config.liveness.window())
            .with_min_report_interval(Duration::from_secs(
                config.liveness.min_heartbeat_interval_secs,
            ))
            .with_listener(status_listener(assignments.clone())),
    );
    info!(window = ?config.liveness.window(), "node registry initialized");

    let client = ControlClient::http().with_deadline(config.rollout.rpc_timeout());
    let orchestrator = Arc::new(
        DeploymentOrchestrator::new(registry.clone(), client)
            .with_policy(config.rollout.retry_policy()),
    );
    info!(policy = ?orchestrator.policy(), "deployment orchestrator initialized");

    let interrupted = orchestrator
        .recover_interrupted()
        .context("recover interrupted deployments")?;
    if !interrupted.is_empty() {
        warn!(count = interrupted.len(), "deployments interrupted by restart marked failed");
    }

    let metrics = MetricsStore::new(
        store.clone(),
        Duration::from_secs(config.metrics.retention_secs),
    );

    // ── Shutdown signal ──────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Background tasks ─────────────────────────────────────────
    let sweeper_handle = tokio::spawn(run_sweeper(
        registry.clone(),
        config.liveness.sweep_interval(),
        shutdown_rx.clone(),
    ));

    let retention = metrics.clone();
    let prune_period = Duration::from_secs(config.metrics.prune_interval_secs);
    let retention_shutdown = shutdown_rx.clone();
    let retention_handle = tokio::spawn(async move {
        retention.run_retention(prune_period, retention_shutdown).await;
    });

    // ── API server ───────────────────────────────────────────────
    let router = build_router(ApiState {
        registry,
        assignments,
        orchestrator,
        metrics,
        heartbeat_interval: Duration::from_secs(config.liveness.heartbeat_interval_secs),
    });

    let listener = tokio::net::TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("bind {}", config.server.listen))?;
    info!(addr = %config.server.listen, "API server starting");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // Wait for background tasks.
    let _ = sweeper_handle.await;
    let _ = retention_handle.await;

    info!("EdgeGrid daemon stopped");
    Ok(())
}
