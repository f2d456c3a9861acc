//! Transports carry one command to one node and bring back its reply.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use http::StatusCode;
use tracing::debug;

use edgegrid_state::NodeAddress;

use crate::error::{ControlError, ControlResult};
use crate::http::{HttpFailure, post_json};
use crate::node::NodeHandler;
use crate::protocol::{COMMAND_PATH, CommandReply, NodeCommand};

/// Delivery of a single command. Implementations do not retry and do not
/// enforce deadlines; [`ControlClient`](crate::ControlClient) does.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        endpoint: &NodeAddress,
        command: &NodeCommand,
    ) -> impl Future<Output = ControlResult<CommandReply>> + Send;
}

/// JSON over HTTP/1.1, one connection per command.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport;

impl HttpTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for HttpTransport {
    async fn send(
        &self,
        endpoint: &NodeAddress,
        command: &NodeCommand,
    ) -> ControlResult<CommandReply> {
        let authority = endpoint.to_string();
        let body =
            serde_json::to_vec(command).map_err(|e| ControlError::Protocol(e.to_string()))?;

        let (status, bytes) = post_json(&authority, COMMAND_PATH, body)
            .await
            .map_err(|failure| match failure {
                HttpFailure::Connect(detail) => ControlError::Unreachable {
                    endpoint: authority.clone(),
                    detail,
                },
                HttpFailure::Exchange(detail) => ControlError::Disconnected {
                    endpoint: authority.clone(),
                    detail,
                },
            })?;

        match serde_json::from_slice::<CommandReply>(&bytes) {
            Ok(reply) => Ok(reply),
            Err(_) if status == StatusCode::NOT_IMPLEMENTED => Ok(CommandReply::Unimplemented {
                command: command.name().to_string(),
            }),
            Err(e) => {
                debug!(%status, %authority, "undecodable reply");
                Err(ControlError::Protocol(format!(
                    "{status} from {authority}: {e}"
                )))
            }
        }
    }
}

/// In-process transport that hands commands straight to registered
/// handlers. Addresses with no handler are `Unreachable`.
pub struct LoopbackTransport<H> {
    nodes: RwLock<HashMap<String, Arc<H>>>,
}

impl<H: NodeHandler> LoopbackTransport<H> {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
        }
    }

    /// Route commands for `endpoint` to `handler`.
    pub fn attach(&self, endpoint: &NodeAddress, handler: Arc<H>) {
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(endpoint.to_string(), handler);
    }

    /// Make `endpoint` unreachable again.
    pub fn detach(&self, endpoint: &NodeAddress) -> Option<Arc<H>> {
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&endpoint.to_string())
    }
}

impl<H: NodeHandler> Default for LoopbackTransport<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: NodeHandler> Transport for LoopbackTransport<H> {
    async fn send(
        &self,
        endpoint: &NodeAddress,
        command: &NodeCommand,
    ) -> ControlResult<CommandReply> {
        let handler = self
            .nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&endpoint.to_string())
            .cloned();
        match handler {
            Some(handler) => Ok(handler.handle(command.clone()).await),
            None => Err(ControlError::Unreachable {
                endpoint: endpoint.to_string(),
                detail: "no node attached".to_string(),
            }),
        }
    }
}
