//! Wire types for the control protocol.
//!
//! Orchestrator to node: a [`NodeCommand`] posted to `/v1/command`,
//! answered by a [`CommandReply`]. Node to orchestrator: a
//! [`NodeDescriptor`] to register and a [`HeartbeatReport`] per interval.

use serde::{Deserialize, Serialize};

use edgegrid_registry::HeartbeatOutcome;
use edgegrid_state::{ConfigVersion, NodeId};

pub use edgegrid_registry::HeartbeatReport;
pub use edgegrid_state::NodeDescriptor;

/// Path the node-side router serves commands on.
pub const COMMAND_PATH: &str = "/v1/command";

/// Orchestrator endpoints a node agent calls.
pub const REGISTER_PATH: &str = "/api/v1/agent/register";
pub const HEARTBEAT_PATH: &str = "/api/v1/agent/heartbeat";

/// A command issued to one node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum NodeCommand {
    /// Confirms registration and tells the node its id and report cadence.
    AcknowledgeRegistration {
        node_id: NodeId,
        heartbeat_interval_secs: u64,
    },
    GetStatus,
    /// Stage a rendered tunnel config. Takes effect on reload.
    PushConfig {
        config: String,
        version: ConfigVersion,
    },
    ReloadConfig,
    StartService,
    StopService,
    SetPortHopping {
        start_port: u16,
        end_port: u16,
        interval_secs: u32,
    },
    SetObfuscation {
        password: String,
    },
    SetMasquerading {
        interface: String,
        enabled: bool,
    },
}

impl NodeCommand {
    /// Wire name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            NodeCommand::AcknowledgeRegistration { .. } => "acknowledge_registration",
            NodeCommand::GetStatus => "get_status",
            NodeCommand::PushConfig { .. } => "push_config",
            NodeCommand::ReloadConfig => "reload_config",
            NodeCommand::StartService => "start_service",
            NodeCommand::StopService => "stop_service",
            NodeCommand::SetPortHopping { .. } => "set_port_hopping",
            NodeCommand::SetObfuscation { .. } => "set_obfuscation",
            NodeCommand::SetMasquerading { .. } => "set_masquerading",
        }
    }

    /// Commands whose success shows the tunnel service is healthy again.
    pub fn is_remediation(&self) -> bool {
        matches!(
            self,
            NodeCommand::PushConfig { .. } | NodeCommand::ReloadConfig | NodeCommand::StartService
        )
    }
}

/// Runtime state a node reports for `GetStatus`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServiceStatus {
    pub running: bool,
    /// Version of the config the tunnel server is running, if any.
    pub config_version: Option<ConfigVersion>,
    pub active_connections: u32,
}

/// A node's answer to a command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandReply {
    Accepted {
        #[serde(default)]
        detail: Option<String>,
    },
    Rejected {
        detail: String,
    },
    Status(ServiceStatus),
    Unimplemented {
        command: String,
    },
}

impl CommandReply {
    pub fn accepted() -> Self {
        CommandReply::Accepted { detail: None }
    }

    pub fn rejected(detail: impl Into<String>) -> Self {
        CommandReply::Rejected {
            detail: detail.into(),
        }
    }
}

/// Orchestrator answer to a registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegisterResponse {
    pub accepted: bool,
    pub assigned_id: NodeId,
    pub heartbeat_interval_secs: u64,
}

/// Orchestrator answer to a heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatResponse {
    pub accepted: bool,
    pub outcome: HeartbeatOutcome,
}
