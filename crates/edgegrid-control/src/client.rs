//! Typed, deadline-bounded command client.
//!
//! Every call resolves to exactly one outcome. Timeouts and connection
//! failures come back as `Timeout` and `Unreachable`; a reachable node that
//! refuses comes back as `Rejected`. Retry policy belongs to the caller.

use std::time::Duration;

use tracing::debug;

use edgegrid_state::{NodeAddress, NodeId};

use crate::error::{ControlError, ControlResult};
use crate::protocol::{CommandReply, NodeCommand, ServiceStatus};
use crate::transport::{HttpTransport, Transport};

/// Default per-call deadline.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(10);

pub struct ControlClient<T = HttpTransport> {
    transport: T,
    deadline: Duration,
}

impl ControlClient<HttpTransport> {
    /// Client over the HTTP transport.
    pub fn http() -> Self {
        Self::new(HttpTransport::new())
    }
}

impl<T: Transport> ControlClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            deadline: DEFAULT_DEADLINE,
        }
    }

    /// Set the deadline applied to every call.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send any command and return the node's reply.
    ///
    /// `Rejected` and `Unimplemented` replies are turned into errors.
    pub async fn execute(
        &self,
        endpoint: &NodeAddress,
        command: &NodeCommand,
    ) -> ControlResult<CommandReply> {
        let name = command.name();
        debug!(%endpoint, command = name, "sending node command");
        let reply = tokio::time::timeout(self.deadline, self.transport.send(endpoint, command))
            .await
            .map_err(|_| ControlError::Timeout {
                endpoint: endpoint.to_string(),
                command: name.to_string(),
                after: self.deadline,
            })??;

        match reply {
            CommandReply::Rejected { detail } => Err(ControlError::Rejected {
                command: name.to_string(),
                detail,
            }),
            CommandReply::Unimplemented { command } => Err(ControlError::Unimplemented { command }),
            other => Ok(other),
        }
    }

    async fn expect_accepted(
        &self,
        endpoint: &NodeAddress,
        command: NodeCommand,
    ) -> ControlResult<Option<String>> {
        match self.execute(endpoint, &command).await? {
            CommandReply::Accepted { detail } => Ok(detail),
            other => Err(ControlError::Protocol(format!(
                "unexpected reply to {}: {other:?}",
                command.name()
            ))),
        }
    }

    /// Confirm a registration to the node.
    pub async fn acknowledge_registration(
        &self,
        endpoint: &NodeAddress,
        node_id: &NodeId,
        heartbeat_interval: Duration,
    ) -> ControlResult<()> {
        let command = NodeCommand::AcknowledgeRegistration {
            node_id: node_id.clone(),
            heartbeat_interval_secs: heartbeat_interval.as_secs(),
        };
        self.expect_accepted(endpoint, command).await.map(drop)
    }

    /// Fetch the node's runtime status.
    pub async fn get_status(&self, endpoint: &NodeAddress) -> ControlResult<ServiceStatus> {
        match self.execute(endpoint, &NodeCommand::GetStatus).await? {
            CommandReply::Status(status) => Ok(status),
            other => Err(ControlError::Protocol(format!(
                "unexpected reply to get_status: {other:?}"
            ))),
        }
    }

    /// Stage a rendered config on the node. Returns the node's detail text.
    pub async fn push_config(
        &self,
        endpoint: &NodeAddress,
        config: &str,
        version: &str,
    ) -> ControlResult<Option<String>> {
        let command = NodeCommand::PushConfig {
            config: config.to_string(),
            version: version.to_string(),
        };
        self.expect_accepted(endpoint, command).await
    }

    pub async fn reload_config(&self, endpoint: &NodeAddress) -> ControlResult<()> {
        self.expect_accepted(endpoint, NodeCommand::ReloadConfig)
            .await
            .map(drop)
    }

    pub async fn start_service(&self, endpoint: &NodeAddress) -> ControlResult<()> {
        self.expect_accepted(endpoint, NodeCommand::StartService)
            .await
            .map(drop)
    }

    pub async fn stop_service(&self, endpoint: &NodeAddress) -> ControlResult<()> {
        self.expect_accepted(endpoint, NodeCommand::StopService)
            .await
            .map(drop)
    }

    pub async fn set_port_hopping(
        &self,
        endpoint: &NodeAddress,
        start_port: u16,
        end_port: u16,
        interval_secs: u32,
    ) -> ControlResult<()> {
        let command = NodeCommand::SetPortHopping {
            start_port,
            end_port,
            interval_secs,
        };
        self.expect_accepted(endpoint, command).await.map(drop)
    }

    pub async fn set_obfuscation(&self, endpoint: &NodeAddress, password: &str) -> ControlResult<()> {
        let command = NodeCommand::SetObfuscation {
            password: password.to_string(),
        };
        self.expect_accepted(endpoint, command).await.map(drop)
    }

    pub async fn set_masquerading(
        &self,
        endpoint: &NodeAddress,
        interface: &str,
        enabled: bool,
    ) -> ControlResult<()> {
        let command = NodeCommand::SetMasquerading {
            interface: interface.to_string(),
            enabled,
        };
        self.expect_accepted(endpoint, command).await.map(drop)
    }
}
