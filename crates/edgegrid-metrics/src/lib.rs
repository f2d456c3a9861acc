//! edgegrid-metrics: observability for EdgeGrid nodes.
//!
//! Queries the per-node metric samples appended by heartbeat ingest,
//! summarizes recent load, prunes samples past the retention window, and
//! renders Prometheus-compatible text exposition.
//!
//! # Architecture
//!
//! ```text
//! MetricsStore
//!   ├── recent() / since() ← operator queries
//!   ├── summary()          → LoadSummary over a window
//!   ├── prune()            → age-based deletion
//!   └── run_retention()    → periodic prune loop
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod prometheus;
pub mod store;

pub use prometheus::{NodeGauge, render_prometheus};
pub use store::{LoadSummary, MetricsStore};
