//! edgegrid-state: embedded state store for EdgeGrid.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state management for nodes, tenant assignments, deployments, rendered
//! configs, and metric samples.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{node_id}:{recorded_at}:{seq}`) enable prefix and range
//! scans for related records.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks. Writers that must not interleave
//! per key (one node row, one tenant) serialize through [`KeyedLocks`].

pub mod error;
pub mod locks;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use locks::KeyedLocks;
pub use store::StateStore;
pub use types::*;
