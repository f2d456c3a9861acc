//! Assignment manager: owns tenant to node bindings.
//!
//! Every placement decision (count load, pick node, write) runs under one
//! placement mutex so load counts and `max_tenants` limits stay exact. It
//! does not cover heartbeats or rollouts, which never touch assignments.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use edgegrid_registry::{BoxFuture, StatusListener};
use edgegrid_state::*;

use crate::error::{AssignError, AssignResult};
use crate::policy::select_node;

/// What happened to the tenants touched by one status change.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReassignReport {
    pub moved: Vec<Assignment>,
    pub unassigned: Vec<TenantId>,
}

/// Active tenant count for one node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeLoad {
    pub node_id: NodeId,
    pub status: NodeStatus,
    pub active_tenants: usize,
    pub max_tenants: Option<usize>,
}

pub struct AssignmentManager {
    store: StateStore,
    placement: Mutex<()>,
}

impl AssignmentManager {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            placement: Mutex::new(()),
        }
    }

    /// Bind a tenant to the least-loaded eligible node.
    ///
    /// Fails with `Conflict` if the tenant is already assigned and with
    /// `NoCapacity` if no node is eligible.
    pub async fn assign(&self, tenant_id: &str) -> AssignResult<Assignment> {
        let _placement = self.placement.lock().await;
        if let Some(existing) = self.store.get_active_assignment(tenant_id)? {
            return Err(AssignError::Conflict(format!(
                "tenant {tenant_id} already assigned to {}",
                existing.node_id
            )));
        }
        let assignment = self.choose(tenant_id, None)?;
        self.store.activate_assignment(&assignment)?;
        info!(tenant = %tenant_id, node_id = %assignment.node_id, "tenant assigned");
        Ok(assignment)
    }

    /// Deactivate the tenant's current assignment and assign it again.
    ///
    /// On `NoCapacity` the tenant is left unassigned and recorded as waiting.
    pub async fn reassign(&self, tenant_id: &str) -> AssignResult<Assignment> {
        let _placement = self.placement.lock().await;
        let current = self.store.get_active_assignment(tenant_id)?;
        let displaced_from = current.as_ref().map(|a| a.node_id.clone());
        self.reassign_locked(tenant_id, displaced_from.as_deref())
    }

    /// Deactivate the tenant's assignment without placing it again.
    ///
    /// Also drops a waiting entry. Returns the deactivated row, or `None`
    /// when the tenant was only waiting.
    pub async fn unassign(&self, tenant_id: &str) -> AssignResult<Option<Assignment>> {
        let _placement = self.placement.lock().await;
        let waiting = self.store.get_unassigned(tenant_id)?;
        let previous = self.store.deactivate_assignment(tenant_id, epoch_millis())?;
        match (&previous, waiting) {
            (Some(previous), _) => {
                info!(tenant = %tenant_id, node_id = %previous.node_id, "tenant unassigned");
            }
            (None, Some(_)) => info!(tenant = %tenant_id, "waiting tenant dropped"),
            (None, None) => return Err(AssignError::NotFound(tenant_id.to_string())),
        }
        Ok(previous)
    }

    /// React to a registry status change.
    ///
    /// Tenants on a node leaving `Online` are moved elsewhere or parked.
    /// A node entering `Online` gives waiting tenants another chance.
    pub async fn handle_status_change(&self, change: &StatusChange) -> AssignResult<ReassignReport> {
        if change.left_online() {
            self.evacuate(&change.node_id).await
        } else if change.entered_online() {
            self.place_waiting().await
        } else {
            Ok(ReassignReport::default())
        }
    }

    /// Move every tenant off `node_id`.
    pub async fn evacuate(&self, node_id: &str) -> AssignResult<ReassignReport> {
        let _placement = self.placement.lock().await;
        let mut report = ReassignReport::default();
        for assignment in self.store.list_active_assignments_for_node(node_id)? {
            match self.reassign_locked(&assignment.tenant_id, Some(node_id)) {
                Ok(moved) => report.moved.push(moved),
                Err(AssignError::NoCapacity(tenant)) => report.unassigned.push(tenant),
                Err(e) => return Err(e),
            }
        }
        if !report.moved.is_empty() || !report.unassigned.is_empty() {
            info!(
                %node_id,
                moved = report.moved.len(),
                unassigned = report.unassigned.len(),
                "tenants evacuated"
            );
        }
        Ok(report)
    }

    /// Try to place every waiting tenant. Stops at the first `NoCapacity`.
    pub async fn place_waiting(&self) -> AssignResult<ReassignReport> {
        let _placement = self.placement.lock().await;
        let mut report = ReassignReport::default();
        for waiting in self.store.list_unassigned()? {
            match self.choose(&waiting.tenant_id, None) {
                Ok(assignment) => {
                    self.store.activate_assignment(&assignment)?;
                    info!(
                        tenant = %assignment.tenant_id,
                        node_id = %assignment.node_id,
                        "waiting tenant placed"
                    );
                    report.moved.push(assignment);
                }
                Err(AssignError::NoCapacity(_)) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    fn reassign_locked(
        &self,
        tenant_id: &str,
        displaced_from: Option<&str>,
    ) -> AssignResult<Assignment> {
        let now = epoch_millis();
        match self.choose(tenant_id, displaced_from) {
            Ok(next) => {
                self.store
                    .reassign_tenant(tenant_id, &Reassignment::Moved(next.clone()), now)?;
                info!(
                    tenant = %tenant_id,
                    from = displaced_from.unwrap_or("-"),
                    to = %next.node_id,
                    "tenant reassigned"
                );
                Ok(next)
            }
            Err(AssignError::NoCapacity(_)) => {
                let waiting = UnassignedTenant {
                    tenant_id: tenant_id.to_string(),
                    displaced_from: displaced_from.map(str::to_string),
                    reason: "no eligible node".to_string(),
                    since_ms: now,
                };
                self.store
                    .reassign_tenant(tenant_id, &Reassignment::Unassigned(waiting), now)?;
                warn!(
                    tenant = %tenant_id,
                    from = displaced_from.unwrap_or("-"),
                    "no capacity, tenant left unassigned"
                );
                Err(AssignError::NoCapacity(tenant_id.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Build the next assignment for `tenant_id`. The tenant's own current
    /// assignment on `releasing` does not count toward that node's load.
    fn choose(&self, tenant_id: &str, releasing: Option<&str>) -> AssignResult<Assignment> {
        let nodes = self.store.list_nodes()?;
        let mut load = self.store.active_assignment_counts()?;
        if let Some(count) = releasing.and_then(|node_id| load.get_mut(node_id)) {
            *count = count.saturating_sub(1);
        }
        let node = select_node(&nodes, &load)
            .ok_or_else(|| AssignError::NoCapacity(tenant_id.to_string()))?;
        debug!(
            tenant = %tenant_id,
            node_id = %node.id,
            load = load.get(&node.id).copied().unwrap_or(0),
            "node selected"
        );
        Ok(Assignment {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            node_id: node.id.clone(),
            is_active: true,
            assigned_at_ms: epoch_millis(),
            deactivated_at_ms: None,
        })
    }

    pub fn active(&self, tenant_id: &str) -> AssignResult<Option<Assignment>> {
        Ok(self.store.get_active_assignment(tenant_id)?)
    }

    /// Full assignment history for a tenant, oldest first.
    pub fn history(&self, tenant_id: &str) -> AssignResult<Vec<Assignment>> {
        Ok(self.store.list_assignments_for_tenant(tenant_id)?)
    }

    pub fn unassigned(&self) -> AssignResult<Vec<UnassignedTenant>> {
        Ok(self.store.list_unassigned()?)
    }

    /// Tenant counts for every live node.
    pub fn load_by_node(&self) -> AssignResult<Vec<NodeLoad>> {
        let counts: HashMap<NodeId, usize> = self.store.active_assignment_counts()?;
        Ok(self
            .store
            .list_nodes()?
            .into_iter()
            .filter(|n| !n.is_removed())
            .map(|n| NodeLoad {
                active_tenants: counts.get(&n.id).copied().unwrap_or(0),
                max_tenants: n.max_tenants(),
                status: n.status,
                node_id: n.id,
            })
            .collect())
    }
}

/// Registry listener that runs the manager's status-change handling.
///
/// Errors are logged; the registry transition itself always completes.
pub fn status_listener(manager: Arc<AssignmentManager>) -> StatusListener {
    Arc::new(move |change: StatusChange| -> BoxFuture {
        let manager = manager.clone();
        Box::pin(async move {
            if let Err(e) = manager.handle_status_change(&change).await {
                warn!(node_id = %change.node_id, error = %e, "status change handling failed");
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use edgegrid_registry::NodeRegistry;

    struct Fleet {
        registry: NodeRegistry,
        manager: Arc<AssignmentManager>,
    }

    fn fleet() -> Fleet {
        let store = StateStore::open_in_memory().unwrap();
        let manager = Arc::new(AssignmentManager::new(store.clone()));
        let registry = NodeRegistry::new(store)
            .with_min_report_interval(Duration::ZERO)
            .with_listener(status_listener(manager.clone()));
        Fleet { registry, manager }
    }

    async fn online(fleet: &Fleet, host: &str) -> Node {
        fleet
            .registry
            .register(NodeDescriptor::new(NodeAddress::new(host, 50051)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn assign_without_nodes_is_no_capacity() {
        let fleet = fleet();
        let err = fleet.manager.assign("t1").await.unwrap_err();
        assert!(matches!(err, AssignError::NoCapacity(_)));
        assert!(fleet.manager.unassigned().unwrap().is_empty());
    }

    #[tokio::test]
    async fn assign_spreads_by_load() {
        let fleet = fleet();
        let a = online(&fleet, "10.0.0.1").await;
        let b = online(&fleet, "10.0.0.2").await;

        let mut per_node: HashMap<String, usize> = HashMap::new();
        for i in 0..4 {
            let assignment = fleet.manager.assign(&format!("t{i}")).await.unwrap();
            *per_node.entry(assignment.node_id).or_default() += 1;
        }
        assert_eq!(per_node.get(&a.id), Some(&2));
        assert_eq!(per_node.get(&b.id), Some(&2));
    }

    #[tokio::test]
    async fn second_assign_conflicts() {
        let fleet = fleet();
        online(&fleet, "10.0.0.1").await;
        fleet.manager.assign("t1").await.unwrap();
        let err = fleet.manager.assign("t1").await.unwrap_err();
        assert!(matches!(err, AssignError::Conflict(_)));
    }

    #[tokio::test]
    async fn maintenance_moves_tenants_to_other_node() {
        let fleet = fleet();
        let a = online(&fleet, "10.0.0.1").await;
        let b = online(&fleet, "10.0.0.2").await;
        let first = fleet.manager.assign("t1").await.unwrap();
        let (from, to) = if first.node_id == a.id { (&a, &b) } else { (&b, &a) };

        fleet
            .registry
            .set_status(&from.id, NodeStatus::Maintenance)
            .await
            .unwrap();

        let active = fleet.manager.active("t1").unwrap().unwrap();
        assert_eq!(active.node_id, to.id);
        assert_eq!(fleet.manager.history("t1").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn offline_without_capacity_parks_tenant() {
        let fleet = fleet();
        let n1 = online(&fleet, "10.0.0.1").await;
        fleet.manager.assign("t1").await.unwrap();

        fleet.registry.set_status(&n1.id, NodeStatus::Offline).await.unwrap();

        assert!(fleet.manager.active("t1").unwrap().is_none());
        let waiting = fleet.manager.unassigned().unwrap();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].displaced_from.as_deref(), Some(n1.id.as_str()));
    }

    #[tokio::test]
    async fn waiting_tenants_return_when_capacity_does() {
        let fleet = fleet();
        let n1 = online(&fleet, "10.0.0.1").await;
        fleet.manager.assign("t1").await.unwrap();
        fleet.registry.set_status(&n1.id, NodeStatus::Offline).await.unwrap();
        assert!(fleet.manager.active("t1").unwrap().is_none());

        let n2 = online(&fleet, "10.0.0.2").await;
        let active = fleet.manager.active("t1").unwrap().unwrap();
        assert_eq!(active.node_id, n2.id);
        assert!(fleet.manager.unassigned().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reassign_no_capacity_records_waiting() {
        let fleet = fleet();
        let n1 = online(&fleet, "10.0.0.1").await;
        let mut desc = NodeDescriptor::new(NodeAddress::new("10.0.0.1", 50051));
        desc.capabilities.insert(MAX_TENANTS_CAPABILITY.into(), "1".into());
        fleet.registry.register(desc).await.unwrap();
        fleet.manager.assign("t1").await.unwrap();

        // The tenant's own slot is released before choosing, so it lands back on n1.
        let again = fleet.manager.reassign("t1").await.unwrap();
        assert_eq!(again.node_id, n1.id);

        fleet.registry.set_status(&n1.id, NodeStatus::Maintenance).await.unwrap();
        assert!(fleet.manager.active("t1").unwrap().is_none());
        let err = fleet.manager.reassign("t1").await.unwrap_err();
        assert!(matches!(err, AssignError::NoCapacity(_)));
        assert_eq!(fleet.manager.unassigned().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unassign_deactivates_and_keeps_history() {
        let fleet = fleet();
        online(&fleet, "10.0.0.1").await;
        fleet.manager.assign("t1").await.unwrap();

        let previous = fleet.manager.unassign("t1").await.unwrap().unwrap();
        assert!(!previous.is_active);
        assert!(fleet.manager.active("t1").unwrap().is_none());
        assert_eq!(fleet.manager.history("t1").unwrap().len(), 1);

        let err = fleet.manager.unassign("t1").await.unwrap_err();
        assert!(matches!(err, AssignError::NotFound(_)));
    }

    #[tokio::test]
    async fn unassign_drops_waiting_tenant() {
        let fleet = fleet();
        let n1 = online(&fleet, "10.0.0.1").await;
        fleet.manager.assign("t1").await.unwrap();
        fleet.registry.set_status(&n1.id, NodeStatus::Offline).await.unwrap();
        assert_eq!(fleet.manager.unassigned().unwrap().len(), 1);

        assert!(fleet.manager.unassign("t1").await.unwrap().is_none());
        assert!(fleet.manager.unassigned().unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_assign_keeps_one_active_per_tenant() {
        let fleet = fleet();
        online(&fleet, "10.0.0.1").await;
        online(&fleet, "10.0.0.2").await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = fleet.manager.clone();
            handles.push(tokio::spawn(async move { manager.assign("t1").await }));
        }
        for _ in 0..8 {
            let manager = fleet.manager.clone();
            handles.push(tokio::spawn(async move { manager.reassign("t1").await }));
        }
        for h in handles {
            let _ = h.await.unwrap();
        }

        let history = fleet.manager.history("t1").unwrap();
        assert_eq!(history.iter().filter(|a| a.is_active).count(), 1);
    }

    #[tokio::test]
    async fn load_by_node_counts_active() {
        let fleet = fleet();
        let n1 = online(&fleet, "10.0.0.1").await;
        fleet.manager.assign("t1").await.unwrap();
        let load = fleet.manager.load_by_node().unwrap();
        assert_eq!(load.len(), 1);
        assert_eq!(load[0].node_id, n1.id);
        assert_eq!(load[0].active_tenants, 1);
    }
}
