//! edgegrid-assign: maps tenants to the nodes serving them.
//!
//! Placement is capacity-counting: the eligible node with the fewest
//! active assignments wins, ties broken by node id. The manager subscribes
//! to registry status changes and moves tenants off nodes that leave
//! `Online`, parking them as unassigned when nothing has room.

pub mod error;
pub mod manager;
pub mod policy;

pub use error::{AssignError, AssignResult};
pub use manager::{AssignmentManager, NodeLoad, ReassignReport, status_listener};
pub use policy::select_node;
