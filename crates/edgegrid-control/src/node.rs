//! Node side of the control protocol.
//!
//! [`node_router`] serves `POST /v1/command` and hands each decoded
//! command to a [`NodeHandler`]. [`InMemoryNode`] is a handler that keeps
//! tunnel state in memory; the daemon's node simulator and the test
//! suites run against it.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;
use tracing::{debug, info};

use edgegrid_state::{ConfigVersion, NodeId};

use crate::protocol::{COMMAND_PATH, CommandReply, NodeCommand, ServiceStatus};

/// Executes commands on a node.
pub trait NodeHandler: Send + Sync + 'static {
    fn handle(&self, command: NodeCommand) -> impl Future<Output = CommandReply> + Send;
}

/// Router serving the command endpoint for `handler`.
pub fn node_router<H: NodeHandler>(handler: Arc<H>) -> Router {
    Router::new()
        .route(COMMAND_PATH, post(dispatch::<H>))
        .with_state(handler)
}

async fn dispatch<H: NodeHandler>(
    State(handler): State<Arc<H>>,
    Json(command): Json<NodeCommand>,
) -> impl IntoResponse {
    let name = command.name();
    let reply = handler.handle(command).await;
    debug!(command = name, ?reply, "command handled");
    let status = match reply {
        CommandReply::Unimplemented { .. } => StatusCode::NOT_IMPLEMENTED,
        _ => StatusCode::OK,
    };
    (status, Json(reply))
}

/// A fault injected into the next call of one command.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedFault {
    /// Sleep before handling the command normally.
    Delay(Duration),
    Reject(String),
    Unimplemented,
}

#[derive(Debug, Clone, PartialEq)]
struct LoadedConfig {
    version: ConfigVersion,
    document: String,
}

#[derive(Debug, Default)]
struct TunnelState {
    registered_as: Option<NodeId>,
    running: bool,
    staged: Option<LoadedConfig>,
    active: Option<LoadedConfig>,
    port_hopping: Option<(u16, u16, u32)>,
    obfuscation: Option<String>,
    masquerading: HashMap<String, bool>,
    active_connections: u32,
}

/// In-memory tunnel node.
///
/// `PushConfig` stages a document; `ReloadConfig` makes it active and
/// starts the service. Faults queued with [`script`](Self::script) are
/// consumed one per call, in order.
#[derive(Debug, Default)]
pub struct InMemoryNode {
    state: Mutex<TunnelState>,
    faults: Mutex<HashMap<&'static str, VecDeque<ScriptedFault>>>,
    calls: Mutex<Vec<&'static str>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fault for the next call of `command` (a wire name such as
    /// `"push_config"`).
    pub fn script(&self, command: &'static str, fault: ScriptedFault) {
        lock(&self.faults)
            .entry(command)
            .or_default()
            .push_back(fault);
    }

    /// Command names received so far, faulted calls included.
    pub fn calls(&self) -> Vec<&'static str> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, command: &str) -> usize {
        lock(&self.calls).iter().filter(|c| **c == command).count()
    }

    pub fn active_version(&self) -> Option<ConfigVersion> {
        lock(&self.state).active.as_ref().map(|c| c.version.clone())
    }

    pub fn active_document(&self) -> Option<String> {
        lock(&self.state).active.as_ref().map(|c| c.document.clone())
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    pub fn registered_as(&self) -> Option<NodeId> {
        lock(&self.state).registered_as.clone()
    }

    pub fn set_active_connections(&self, n: u32) {
        lock(&self.state).active_connections = n;
    }

    fn apply(&self, command: NodeCommand) -> CommandReply {
        let mut state = lock(&self.state);
        match command {
            NodeCommand::AcknowledgeRegistration { node_id, .. } => {
                info!(%node_id, "registration acknowledged");
                state.registered_as = Some(node_id);
                CommandReply::accepted()
            }
            NodeCommand::GetStatus => CommandReply::Status(ServiceStatus {
                running: state.running,
                config_version: state.active.as_ref().map(|c| c.version.clone()),
                active_connections: state.active_connections,
            }),
            NodeCommand::PushConfig { config, version } => {
                if serde_json::from_str::<serde_json::Value>(&config).is_err() {
                    return CommandReply::rejected("config is not valid JSON");
                }
                let detail = format!("staged {version}");
                state.staged = Some(LoadedConfig {
                    version,
                    document: config,
                });
                CommandReply::Accepted {
                    detail: Some(detail),
                }
            }
            NodeCommand::ReloadConfig => {
                if let Some(staged) = state.staged.take() {
                    state.active = Some(staged);
                } else if state.active.is_none() {
                    return CommandReply::rejected("no config to load");
                }
                state.running = true;
                CommandReply::accepted()
            }
            NodeCommand::StartService => {
                if state.active.is_none() {
                    return CommandReply::rejected("no config loaded");
                }
                state.running = true;
                CommandReply::accepted()
            }
            NodeCommand::StopService => {
                state.running = false;
                state.active_connections = 0;
                CommandReply::accepted()
            }
            NodeCommand::SetPortHopping {
                start_port,
                end_port,
                interval_secs,
            } => {
                if start_port == 0 || start_port > end_port || interval_secs == 0 {
                    return CommandReply::rejected(format!(
                        "invalid hop range {start_port}-{end_port} every {interval_secs}s"
                    ));
                }
                state.port_hopping = Some((start_port, end_port, interval_secs));
                CommandReply::accepted()
            }
            NodeCommand::SetObfuscation { password } => {
                if password.is_empty() {
                    return CommandReply::rejected("obfuscation password is empty");
                }
                state.obfuscation = Some(password);
                CommandReply::accepted()
            }
            NodeCommand::SetMasquerading { interface, enabled } => {
                if interface.is_empty() {
                    return CommandReply::rejected("interface is empty");
                }
                state.masquerading.insert(interface, enabled);
                CommandReply::accepted()
            }
        }
    }
}

impl NodeHandler for InMemoryNode {
    async fn handle(&self, command: NodeCommand) -> CommandReply {
        let name = command.name();
        lock(&self.calls).push(name);
        let fault = lock(&self.faults)
            .get_mut(name)
            .and_then(VecDeque::pop_front);

        match fault {
            Some(ScriptedFault::Delay(d)) => tokio::time::sleep(d).await,
            Some(ScriptedFault::Reject(detail)) => return CommandReply::Rejected { detail },
            Some(ScriptedFault::Unimplemented) => {
                return CommandReply::Unimplemented {
                    command: name.to_string(),
                };
            }
            None => {}
        }
        self.apply(command)
    }
}
