//! Domain types for the EdgeGrid state store.
//!
//! These types represent the persisted state of fleet nodes, tenant
//! assignments, configuration deployments, rendered configs, and metric
//! samples. All types are serializable to/from JSON for storage in redb
//! tables.

use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{StateError, StateResult};

/// Unique identifier for a node in the fleet.
pub type NodeId = String;

/// Opaque identifier of a tenant served by the fleet.
pub type TenantId = String;

/// Unique identifier for a deployment attempt.
pub type DeploymentId = String;

/// Hash-derived identifier of a rendered tunnel config.
pub type ConfigVersion = String;

/// Capability key limiting how many tenants a node accepts.
pub const MAX_TENANTS_CAPABILITY: &str = "max_tenants";

/// Current Unix time in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ── Node ──────────────────────────────────────────────────────────

/// Operational status of a node.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Offline,
    Online,
    Maintenance,
    Error,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Offline => "offline",
            NodeStatus::Online => "online",
            NodeStatus::Maintenance => "maintenance",
            NodeStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Where a node's control endpoint listens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NodeAddress {
    pub host: String,
    pub rpc_port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, rpc_port: u16) -> Self {
        Self {
            host: host.into(),
            rpc_port,
        }
    }

    /// Stable node id derived from the address.
    ///
    /// Registration upserts by address, so the same address always maps to
    /// the same record.
    pub fn node_id(&self) -> NodeId {
        let digest = Sha256::digest(self.to_string().as_bytes());
        format!("node-{}", &hex::encode(digest)[..12])
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.rpc_port)
    }
}

/// What a node announces about itself when it registers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeDescriptor {
    pub address: NodeAddress,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub capabilities: HashMap<String, String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl NodeDescriptor {
    pub fn new(address: NodeAddress) -> Self {
        Self {
            address,
            name: None,
            location: None,
            country: None,
            version: String::new(),
            capabilities: HashMap::new(),
            metadata: HashMap::new(),
        }
    }
}

/// Identity and health record for one fleet member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub address: NodeAddress,
    pub location: Option<String>,
    pub country: Option<String>,
    pub version: String,
    pub capabilities: HashMap<String, String>,
    pub metadata: HashMap<String, String>,
    pub status: NodeStatus,
    /// Orchestrator clock (ms) when the last heartbeat was applied.
    pub last_heartbeat_ms: u64,
    /// Node clock (ms) carried by the last applied report.
    pub last_report_ms: u64,
    pub registered_at_ms: u64,
    /// Set when the node has been soft-removed.
    pub removed_at_ms: Option<u64>,
}

impl Node {
    /// Build a fresh record from a registration descriptor.
    pub fn from_descriptor(descriptor: NodeDescriptor, now_ms: u64) -> Self {
        let id = descriptor.address.node_id();
        let name = descriptor.name.unwrap_or_else(|| id.clone());
        Self {
            id,
            name,
            address: descriptor.address,
            location: descriptor.location,
            country: descriptor.country,
            version: descriptor.version,
            capabilities: descriptor.capabilities,
            metadata: descriptor.metadata,
            status: NodeStatus::Offline,
            last_heartbeat_ms: now_ms,
            last_report_ms: 0,
            registered_at_ms: now_ms,
            removed_at_ms: None,
        }
    }

    pub fn is_removed(&self) -> bool {
        self.removed_at_ms.is_some()
    }

    /// Tenant limit declared through the `max_tenants` capability, if any.
    pub fn max_tenants(&self) -> Option<usize> {
        self.capabilities
            .get(MAX_TENANTS_CAPABILITY)
            .and_then(|v| v.trim().parse().ok())
    }

    /// Whether the last heartbeat is older than `window_ms` at `now_ms`.
    pub fn is_stale(&self, window_ms: u64, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_heartbeat_ms) > window_ms
    }
}

/// Emitted whenever a node's status moves to or from `Online`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusChange {
    pub node_id: NodeId,
    pub from: NodeStatus,
    pub to: NodeStatus,
    pub at_ms: u64,
}

impl StatusChange {
    pub fn left_online(&self) -> bool {
        self.from == NodeStatus::Online && self.to != NodeStatus::Online
    }

    pub fn entered_online(&self) -> bool {
        self.from != NodeStatus::Online && self.to == NodeStatus::Online
    }
}

// ── Metrics ───────────────────────────────────────────────────────

/// Resource and traffic figures carried by a heartbeat.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NodeMetrics {
    /// CPU utilization, 0.0–100.0.
    pub cpu_usage: f64,
    /// Memory utilization, 0.0–100.0.
    pub memory_usage: f64,
    /// Upload rate in bytes per second.
    pub bandwidth_up: u64,
    /// Download rate in bytes per second.
    pub bandwidth_down: u64,
    pub active_connections: u32,
}

/// One recorded measurement for a node. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSample {
    pub node_id: NodeId,
    #[serde(flatten)]
    pub metrics: NodeMetrics,
    pub recorded_at_ms: u64,
}

// ── Assignment ────────────────────────────────────────────────────

/// Binding of a tenant to the node currently serving it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assignment {
    pub id: String,
    pub tenant_id: TenantId,
    pub node_id: NodeId,
    pub is_active: bool,
    pub assigned_at_ms: u64,
    pub deactivated_at_ms: Option<u64>,
}

/// Outcome of moving a tenant off its current assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum Reassignment {
    /// The tenant was placed on another node.
    Moved(Assignment),
    /// No node had capacity; the tenant waits.
    Unassigned(UnassignedTenant),
}

/// A tenant displaced from its node with nowhere to go.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnassignedTenant {
    pub tenant_id: TenantId,
    /// Node the tenant was moved off, if it had one.
    pub displaced_from: Option<NodeId>,
    pub reason: String,
    pub since_ms: u64,
}

// ── Deployment ────────────────────────────────────────────────────

/// Lifecycle of a configuration deployment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Deploying,
    Success,
    Failed,
    RolledBack,
}

impl DeploymentStatus {
    /// Whether the state machine permits `self -> next`.
    pub fn can_transition_to(self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        matches!(
            (self, next),
            (Pending, Deploying)
                | (Deploying, Success)
                | (Deploying, Failed)
                | (Success, RolledBack)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeploymentStatus::Success | DeploymentStatus::Failed | DeploymentStatus::RolledBack
        )
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::RolledBack => "rolled_back",
        };
        f.write_str(s)
    }
}

/// A failed, retryable push attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryRecord {
    pub attempt: u32,
    /// Error kind, e.g. `timeout` or `unreachable`.
    pub kind: String,
    pub detail: String,
    pub at_ms: u64,
}

/// One attempt to converge a node's configuration to a target version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deployment {
    pub id: DeploymentId,
    pub node_id: NodeId,
    pub config_version: ConfigVersion,
    pub status: DeploymentStatus,
    pub created_at_ms: u64,
    pub deployed_at_ms: Option<u64>,
    pub rolled_back_at_ms: Option<u64>,
    pub error: Option<String>,
    /// Deployment this one restores from, when created by a rollback.
    pub rollback_of: Option<DeploymentId>,
    #[serde(default)]
    pub retries: Vec<RetryRecord>,
    /// Store-assigned creation order. Breaks `created_at_ms` ties.
    #[serde(default)]
    pub seq: u64,
}

impl Deployment {
    pub fn new(
        id: DeploymentId,
        node_id: NodeId,
        config_version: ConfigVersion,
        now_ms: u64,
    ) -> Self {
        Self {
            id,
            node_id,
            config_version,
            status: DeploymentStatus::Pending,
            created_at_ms: now_ms,
            deployed_at_ms: None,
            rolled_back_at_ms: None,
            error: None,
            rollback_of: None,
            retries: Vec::new(),
            seq: 0,
        }
    }

    /// Move to `next`, stamping the matching timestamp.
    pub fn advance(&mut self, next: DeploymentStatus, now_ms: u64) -> StateResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(StateError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        match next {
            DeploymentStatus::Success => self.deployed_at_ms = Some(now_ms),
            DeploymentStatus::RolledBack => self.rolled_back_at_ms = Some(now_ms),
            _ => {}
        }
        self.status = next;
        Ok(())
    }
}

/// A rendered tunnel config, kept so a rollback can re-push it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigBlob {
    pub version: ConfigVersion,
    pub document: String,
    pub created_at_ms: u64,
}
