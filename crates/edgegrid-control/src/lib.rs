//! edgegrid-control: the orchestrator to node control protocol.
//!
//! Commands form one closed enum, [`NodeCommand`], answered by a
//! [`CommandReply`]. The orchestrator side wraps a [`Transport`] in a
//! [`ControlClient`] that bounds every call by a deadline and never
//! retries. The node side serves [`node_router`], dispatching each command
//! to a [`NodeHandler`].
//!
//! # Architecture
//!
//! ```text
//! ControlClient<T: Transport>        node_router(H: NodeHandler)
//!   ├── deadline (Timeout)             POST /v1/command
//!   └── HttpTransport ── JSON/HTTP ──►   └── H::handle(NodeCommand)
//!        (Unreachable on connect)
//!
//! NodeAgent ── POST /api/v1/agent/{register,heartbeat} ──► orchestrator
//! ```

pub mod agent;
pub mod client;
pub mod error;
mod http;
pub mod node;
pub mod protocol;
pub mod transport;

pub use agent::{AgentConfig, DEFAULT_AGENT_TIMEOUT, NodeAgent};
pub use client::ControlClient;
pub use error::{ControlError, ControlResult};
pub use node::{InMemoryNode, NodeHandler, ScriptedFault, node_router};
pub use protocol::*;
pub use transport::{HttpTransport, LoopbackTransport, Transport};
