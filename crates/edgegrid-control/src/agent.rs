//! Node agent: registers with the orchestrator and reports heartbeats.
//!
//! Runs next to the tunnel server on each edge node.

use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use edgegrid_registry::HeartbeatOutcome;
use edgegrid_state::{NodeDescriptor, NodeId, NodeMetrics, epoch_millis};

use crate::http::post_json;
use crate::protocol::{
    HEARTBEAT_PATH, HeartbeatReport, HeartbeatResponse, REGISTER_PATH, RegisterResponse,
};

/// Default deadline for each call to the orchestrator.
pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the node agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// `host:port` of the orchestrator's HTTP API.
    pub orchestrator_addr: String,
    /// What this node advertises about itself.
    pub descriptor: NodeDescriptor,
    /// Version string sent with each heartbeat.
    pub version: Option<String>,
    /// Deadline for each register or heartbeat call.
    pub request_timeout: Duration,
}

/// Response envelope used by the orchestrator API.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

pub struct NodeAgent {
    config: AgentConfig,
    /// Assigned node id (set after register).
    node_id: Option<NodeId>,
    /// Report cadence (set by the orchestrator).
    heartbeat_interval: Duration,
}

impl NodeAgent {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            node_id: None,
            heartbeat_interval: Duration::from_secs(30),
        }
    }

    pub fn node_id(&self) -> Option<&NodeId> {
        self.node_id.as_ref()
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    async fn call<B, R>(&self, path: &str, body: &B) -> anyhow::Result<R>
    where
        B: serde::Serialize,
        R: DeserializeOwned,
    {
        let body = serde_json::to_vec(body)?;
        let addr = &self.config.orchestrator_addr;
        let deadline = self.config.request_timeout;
        let (status, bytes) = tokio::time::timeout(deadline, post_json(addr, path, body))
            .await
            .map_err(|_| anyhow::anyhow!("{addr}: no reply to {path} within {deadline:?}"))?
            .map_err(|f| anyhow::anyhow!("{addr}: {}", f.detail()))?;
        let envelope: Envelope<R> = serde_json::from_slice(&bytes)
            .map_err(|e| anyhow::anyhow!("{status} from {path}: {e}"))?;
        match (envelope.success, envelope.data) {
            (true, Some(data)) => Ok(data),
            _ => anyhow::bail!(
                "{status} from {path}: {}",
                envelope.error.unwrap_or_else(|| "no data".into())
            ),
        }
    }

    /// Register this node and adopt the id and cadence the orchestrator
    /// hands back.
    pub async fn register(&mut self) -> anyhow::Result<NodeId> {
        let resp: RegisterResponse = self.call(REGISTER_PATH, &self.config.descriptor).await?;
        if !resp.accepted {
            anyhow::bail!("registration refused");
        }
        self.node_id = Some(resp.assigned_id.clone());
        self.heartbeat_interval = Duration::from_secs(resp.heartbeat_interval_secs.max(1));

        info!(
            node_id = %resp.assigned_id,
            heartbeat_interval = ?self.heartbeat_interval,
            "registered with orchestrator"
        );
        Ok(resp.assigned_id)
    }

    /// Send one heartbeat carrying `metrics`.
    pub async fn send_heartbeat(&self, metrics: NodeMetrics) -> anyhow::Result<HeartbeatOutcome> {
        let node_id = self
            .node_id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("not registered, call register() first"))?;
        let report = HeartbeatReport {
            node_id,
            sent_at_ms: epoch_millis(),
            metrics,
            version: self.config.version.clone(),
        };
        let resp: HeartbeatResponse = self.call(HEARTBEAT_PATH, &report).await?;
        Ok(resp.outcome)
    }

    /// Heartbeat every interval until `shutdown` flips. `sample` is asked
    /// for fresh metrics before each report. Failures are logged and the
    /// loop carries on.
    pub async fn run_heartbeat<F>(
        &self,
        sample: F,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()>
    where
        F: Fn() -> NodeMetrics,
    {
        let node_id = self
            .node_id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("not registered, call register() first"))?;

        info!(%node_id, interval = ?self.heartbeat_interval, "heartbeat loop started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.heartbeat_interval) => {
                    match self.send_heartbeat(sample()).await {
                        Ok(outcome) => debug!(%node_id, ?outcome, "heartbeat sent"),
                        Err(e) => warn!(%node_id, error = %e, "heartbeat failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!(%node_id, "heartbeat loop shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}
