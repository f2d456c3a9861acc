//! Node simulator: an in-memory edge node for local testing.
//!
//! In this mode, the daemon:
//! 1. Serves the node command endpoint backed by an in-memory tunnel
//! 2. Registers with the orchestrator
//! 3. Sends heartbeats until Ctrl-C

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info};

use edgegrid_control::{AgentConfig, DEFAULT_AGENT_TIMEOUT, InMemoryNode, NodeAgent, node_router};
use edgegrid_state::{NodeAddress, NodeDescriptor, NodeMetrics};

pub async fn run(
    orchestrator_addr: String,
    listen: String,
    advertise_host: Option<String>,
    name: Option<String>,
) -> anyhow::Result<()> {
    info!("EdgeGrid node simulator starting");

    let listen_addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("invalid listen address {listen}"))?;
    let host = advertise_host.unwrap_or_else(|| listen_addr.ip().to_string());

    // ── Command endpoint ─────────────────────────────────────────
    let node = Arc::new(InMemoryNode::new());
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("bind {listen_addr}"))?;
    let port = listener.local_addr()?.port();
    let router = node_router(node.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut server_shutdown = shutdown_rx.clone();
    let server_handle = tokio::spawn(async move {
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = server_shutdown.changed().await;
        });
        if let Err(e) = server.await {
            error!(error = %e, "node command server error");
        }
    });
    info!(%host, port, "node command endpoint listening");

    // ── Register ─────────────────────────────────────────────────
    let mut descriptor = NodeDescriptor::new(NodeAddress::new(host, port));
    descriptor.name = name;
    descriptor.version = env!("CARGO_PKG_VERSION").to_string();
    let mut agent = NodeAgent::new(AgentConfig {
        orchestrator_addr,
        descriptor,
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
        request_timeout: DEFAULT_AGENT_TIMEOUT,
    });
    let node_id = agent.register().await?;
    info!(%node_id, "registered");

    // ── Heartbeat loop ───────────────────────────────────────────
    let sampled = node.clone();
    let heartbeat_shutdown = shutdown_rx.clone();
    let heartbeat_handle = tokio::spawn(async move {
        let sample = move || {
            let status_running = sampled.is_running();
            NodeMetrics {
                cpu_usage: if status_running { 5.0 } else { 0.5 },
                memory_usage: 10.0,
                ..Default::default()
            }
        };
        if let Err(e) = agent.run_heartbeat(sample, heartbeat_shutdown).await {
            error!(error = %e, "heartbeat loop error");
        }
    });

    // ── Wait for shutdown ────────────────────────────────────────
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
    }
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = heartbeat_handle.await;
    let _ = server_handle.await;

    info!("node simulator stopped");
    Ok(())
}
