//! redb table definitions for the EdgeGrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Node records keyed by `{node_id}`.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Assignment rows (active and historical) keyed by `{assignment_id}`.
pub const ASSIGNMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("assignments");

/// Index of the single active assignment per tenant: `{tenant_id}` -> `{assignment_id}`.
pub const ACTIVE_ASSIGNMENTS: TableDefinition<&str, &str> =
    TableDefinition::new("active_assignments");

/// Tenants waiting for capacity, keyed by `{tenant_id}`.
pub const UNASSIGNED: TableDefinition<&str, &[u8]> = TableDefinition::new("unassigned");

/// Deployment records keyed by `{deployment_id}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Rendered tunnel configs keyed by `{config_version}`.
pub const CONFIGS: TableDefinition<&str, &[u8]> = TableDefinition::new("configs");

/// Metric samples keyed by `{node_id}:{recorded_at_ms:020}:{seq:020}`.
pub const METRICS: TableDefinition<&str, &[u8]> = TableDefinition::new("metrics");
