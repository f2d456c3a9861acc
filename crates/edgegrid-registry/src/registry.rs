//! Node registry: status state machine and heartbeat ingest.
//!
//! Each node's row is written under its own lock, so heartbeats, sweeps,
//! and orchestrator status writes for one node never interleave while
//! different nodes proceed in parallel.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use edgegrid_state::*;

use crate::error::{RegistryError, RegistryResult};

/// Boxed future returned by status listeners.
pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Consumer of status-change events. Awaited inline by the registry.
pub type StatusListener = Arc<dyn Fn(StatusChange) -> BoxFuture + Send + Sync>;

/// A periodic liveness and metrics report from a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatReport {
    pub node_id: NodeId,
    /// Node clock (ms) when the report was produced. Orders reports.
    pub sent_at_ms: u64,
    #[serde(default)]
    pub metrics: NodeMetrics,
    /// Software version, when the node reports one.
    #[serde(default)]
    pub version: Option<String>,
}

/// How a heartbeat was handled. All three are acknowledgements.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatOutcome {
    /// Liveness updated and a metric sample appended.
    Applied,
    /// Same or older timestamp than the last applied report; ignored.
    Stale,
    /// Arrived sooner than the per-node minimum interval; ignored.
    Throttled,
}

/// Operator edits to a node's descriptive fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodePatch {
    pub name: Option<String>,
    pub location: Option<String>,
    pub country: Option<String>,
    pub version: Option<String>,
    pub capabilities: Option<HashMap<String, String>>,
    pub metadata: Option<HashMap<String, String>>,
}

/// Authoritative store and status state machine for fleet nodes.
pub struct NodeRegistry {
    store: StateStore,
    locks: KeyedLocks,
    listener: Option<StatusListener>,
    liveness_window: Duration,
    min_report_interval: Duration,
}

impl NodeRegistry {
    /// Create a registry over the given store.
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
            listener: None,
            liveness_window: Duration::from_secs(90),
            min_report_interval: Duration::from_secs(5),
        }
    }

    /// Maximum gap between heartbeats before a node is considered dead.
    pub fn with_liveness_window(mut self, window: Duration) -> Self {
        self.liveness_window = window;
        self
    }

    /// Reports from one node arriving closer together than this are throttled.
    pub fn with_min_report_interval(mut self, interval: Duration) -> Self {
        self.min_report_interval = interval;
        self
    }

    /// Set the consumer of status-change events.
    pub fn with_listener(mut self, listener: StatusListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn liveness_window(&self) -> Duration {
        self.liveness_window
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Register a node, upserting by address.
    ///
    /// The node becomes `Online` with a fresh heartbeat. A node the operator
    /// put in `Maintenance` stays there. Re-registering a soft-removed node
    /// restores it.
    pub async fn register(&self, descriptor: NodeDescriptor) -> RegistryResult<Node> {
        let node_id = descriptor.address.node_id();
        let _guard = self.locks.lock(&node_id).await;
        let now = epoch_millis();

        let mut node = match self.store.get_node(&node_id)? {
            Some(mut existing) => {
                if let Some(name) = descriptor.name {
                    existing.name = name;
                }
                existing.location = descriptor.location.or(existing.location);
                existing.country = descriptor.country.or(existing.country);
                if !descriptor.version.is_empty() {
                    existing.version = descriptor.version;
                }
                existing.capabilities = descriptor.capabilities;
                existing.metadata.extend(descriptor.metadata);
                existing.removed_at_ms = None;
                existing
            }
            None => Node::from_descriptor(descriptor, now),
        };

        let from = node.status;
        if from != NodeStatus::Maintenance {
            node.status = NodeStatus::Online;
        }
        node.last_heartbeat_ms = now;
        // A new session restarts report ordering.
        node.last_report_ms = 0;
        self.store.put_node(&node)?;
        info!(
            node_id = %node.id,
            address = %node.address,
            version = %node.version,
            "node registered"
        );

        self.publish_if_crossing(&node.id, from, node.status, now).await;
        Ok(node)
    }

    /// Apply a heartbeat report from a node.
    ///
    /// Fails with `NotFound` for unknown or removed nodes. Duplicate,
    /// out-of-order, and too-frequent reports are acknowledged without
    /// effect and never regress status.
    pub async fn record_heartbeat(
        &self,
        report: HeartbeatReport,
    ) -> RegistryResult<HeartbeatOutcome> {
        validate_metrics(&report.metrics)?;
        let _guard = self.locks.lock(&report.node_id).await;
        let now = epoch_millis();
        let mut node = self.load_live(&report.node_id)?;

        if report.sent_at_ms <= node.last_report_ms {
            debug!(
                node_id = %node.id,
                sent_at_ms = report.sent_at_ms,
                last_report_ms = node.last_report_ms,
                "stale heartbeat ignored"
            );
            return Ok(HeartbeatOutcome::Stale);
        }
        let min_interval = self.min_report_interval.as_millis() as u64;
        if node.last_report_ms != 0 && now.saturating_sub(node.last_heartbeat_ms) < min_interval {
            debug!(node_id = %node.id, "heartbeat throttled");
            return Ok(HeartbeatOutcome::Throttled);
        }

        let from = node.status;
        node.last_heartbeat_ms = now;
        node.last_report_ms = report.sent_at_ms;
        if let Some(version) = report.version {
            node.version = version;
        }
        if matches!(from, NodeStatus::Offline | NodeStatus::Error) {
            node.status = NodeStatus::Online;
        }
        self.store.put_node(&node)?;
        self.store.append_metric_sample(&MetricSample {
            node_id: node.id.clone(),
            metrics: report.metrics,
            recorded_at_ms: now,
        })?;
        debug!(node_id = %node.id, status = %node.status, "heartbeat applied");

        self.publish_if_crossing(&node.id, from, node.status, now).await;
        Ok(HeartbeatOutcome::Applied)
    }

    /// Mark every `Online` node whose heartbeat is older than `window` as
    /// `Offline`. Returns the transitions made.
    pub async fn sweep_stale(&self, window: Duration) -> Vec<StatusChange> {
        self.sweep_stale_at(window, epoch_millis()).await
    }

    /// [`sweep_stale`](Self::sweep_stale) evaluated at an explicit time.
    pub async fn sweep_stale_at(&self, window: Duration, now_ms: u64) -> Vec<StatusChange> {
        let window_ms = window.as_millis() as u64;
        let nodes = match self.store.list_nodes() {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(error = %e, "liveness sweep could not list nodes");
                return Vec::new();
            }
        };

        // Snapshot of candidates, oldest heartbeat first.
        let mut stale: Vec<Node> = nodes
            .into_iter()
            .filter(|n| n.status == NodeStatus::Online && n.is_stale(window_ms, now_ms))
            .collect();
        stale.sort_by_key(|n| n.last_heartbeat_ms);

        let mut changes = Vec::new();
        for candidate in stale {
            match self.demote_if_stale(&candidate.id, window_ms, now_ms).await {
                Ok(Some(change)) => changes.push(change),
                Ok(None) => {}
                Err(e) => warn!(node_id = %candidate.id, error = %e, "liveness sweep skipped node"),
            }
        }
        changes
    }

    async fn demote_if_stale(
        &self,
        node_id: &str,
        window_ms: u64,
        now_ms: u64,
    ) -> RegistryResult<Option<StatusChange>> {
        let _guard = self.locks.lock(node_id).await;
        // A heartbeat may have landed since the snapshot.
        let Some(mut node) = self.store.get_node(node_id)? else {
            return Ok(None);
        };
        if node.status != NodeStatus::Online || !node.is_stale(window_ms, now_ms) {
            return Ok(None);
        }
        node.status = NodeStatus::Offline;
        self.store.put_node(&node)?;
        warn!(
            node_id = %node.id,
            silent_ms = now_ms.saturating_sub(node.last_heartbeat_ms),
            "node missed liveness window, marked offline"
        );

        let change = StatusChange {
            node_id: node.id,
            from: NodeStatus::Online,
            to: NodeStatus::Offline,
            at_ms: now_ms,
        };
        self.publish(change.clone()).await;
        Ok(Some(change))
    }

    /// Explicitly set a node's status. Always permitted.
    pub async fn set_status(&self, node_id: &str, status: NodeStatus) -> RegistryResult<Node> {
        let _guard = self.locks.lock(node_id).await;
        let now = epoch_millis();
        let mut node = self.load_live(node_id)?;
        let from = node.status;
        node.status = status;
        self.store.put_node(&node)?;
        info!(%node_id, %from, to = %status, "node status set");

        self.publish_if_crossing(node_id, from, status, now).await;
        Ok(node)
    }

    /// Update descriptive fields. Address and status are not editable here.
    pub async fn update(&self, node_id: &str, patch: NodePatch) -> RegistryResult<Node> {
        let _guard = self.locks.lock(node_id).await;
        let mut node = self.load_live(node_id)?;
        if let Some(name) = patch.name {
            node.name = name;
        }
        if let Some(location) = patch.location {
            node.location = Some(location);
        }
        if let Some(country) = patch.country {
            node.country = Some(country);
        }
        if let Some(version) = patch.version {
            node.version = version;
        }
        if let Some(capabilities) = patch.capabilities {
            node.capabilities = capabilities;
        }
        if let Some(metadata) = patch.metadata {
            node.metadata = metadata;
        }
        self.store.put_node(&node)?;
        info!(%node_id, "node updated");
        Ok(node)
    }

    /// Soft-remove a node: it goes `Offline`, stops accepting heartbeats,
    /// and drops out of listings. The record is kept.
    pub async fn remove(&self, node_id: &str) -> RegistryResult<Node> {
        let _guard = self.locks.lock(node_id).await;
        let now = epoch_millis();
        let mut node = self.load_live(node_id)?;
        let from = node.status;
        node.status = NodeStatus::Offline;
        node.removed_at_ms = Some(now);
        self.store.put_node(&node)?;
        info!(%node_id, %from, "node removed");

        self.publish_if_crossing(node_id, from, NodeStatus::Offline, now).await;
        Ok(node)
    }

    /// Fetch a node, including soft-removed ones.
    pub fn get(&self, node_id: &str) -> RegistryResult<Node> {
        self.store
            .get_node(node_id)?
            .ok_or_else(|| RegistryError::NotFound(node_id.to_string()))
    }

    /// List nodes ordered by id.
    pub fn list(&self, include_removed: bool) -> RegistryResult<Vec<Node>> {
        Ok(self
            .store
            .list_nodes()?
            .into_iter()
            .filter(|n| include_removed || !n.is_removed())
            .collect())
    }

    fn load_live(&self, node_id: &str) -> RegistryResult<Node> {
        match self.store.get_node(node_id)? {
            Some(node) if !node.is_removed() => Ok(node),
            _ => Err(RegistryError::NotFound(node_id.to_string())),
        }
    }

    async fn publish_if_crossing(&self, node_id: &str, from: NodeStatus, to: NodeStatus, at_ms: u64) {
        if from == to || (from != NodeStatus::Online && to != NodeStatus::Online) {
            return;
        }
        self.publish(StatusChange {
            node_id: node_id.to_string(),
            from,
            to,
            at_ms,
        })
        .await;
    }

    async fn publish(&self, change: StatusChange) {
        debug!(node_id = %change.node_id, from = %change.from, to = %change.to, "publishing status change");
        if let Some(listener) = &self.listener {
            listener(change).await;
        }
    }
}

fn validate_metrics(metrics: &NodeMetrics) -> RegistryResult<()> {
    for (name, value) in [("cpu_usage", metrics.cpu_usage), ("memory_usage", metrics.memory_usage)] {
        if !value.is_finite() || !(0.0..=100.0).contains(&value) {
            return Err(RegistryError::InvalidReport(format!(
                "{name} must be within 0..=100, got {value}"
            )));
        }
    }
    Ok(())
}
