//! edgegrid-registry: the authoritative record of fleet nodes.
//!
//! Owns the node status state machine (`Offline`, `Online`, `Maintenance`,
//! `Error`), translates node heartbeats into registry updates, and demotes
//! nodes whose heartbeats stop arriving.
//!
//! Every status change to or from `Online` is published to a single
//! [`StatusListener`], which is awaited before the triggering call returns.

pub mod error;
pub mod registry;
pub mod sweeper;

pub use error::{RegistryError, RegistryResult};
pub use registry::{
    BoxFuture, HeartbeatOutcome, HeartbeatReport, NodePatch, NodeRegistry, StatusListener,
};
pub use sweeper::run_sweeper;
