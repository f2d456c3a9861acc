//! edgegrid-rollout: drives tunnel config rollouts to edge nodes.
//!
//! A rollout renders a [`TunnelConfig`], pushes it to one node through the
//! control client, reloads, and verifies the node reports the new version.
//! Retryable failures back off exponentially per [`RetryPolicy`]; a final
//! failure marks the node `Error`. Successful deployments can be rolled
//! back to the node's previous config.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod retry;

pub use config::{AuthConfig, BandwidthConfig, PortHopping, TlsConfig, TunnelConfig};
pub use error::{RolloutError, RolloutResult};
pub use orchestrator::{DeploymentOrchestrator, FleetEntry, RollbackOutcome};
pub use retry::RetryPolicy;
