//! StateStore: redb-backed state persistence for EdgeGrid.
//!
//! Provides typed operations over nodes, assignments, deployments, rendered
//! configs, and metric samples. All values are JSON-serialized into redb's
//! `&[u8]` value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing).
//!
//! Assignment writes that must hold the one-active-per-tenant invariant run
//! inside a single write transaction.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(raw: &[u8]) -> StateResult<T> {
    serde_json::from_slice(raw).map_err(map_err!(Deserialize))
}

/// Key bounds covering every metric sample of one node.
fn metric_range(node_id: &str) -> (String, String) {
    // ';' sorts directly after ':'.
    (format!("{node_id}:"), format!("{node_id};"))
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    /// Disambiguates metric samples recorded in the same millisecond.
    seq: Arc<AtomicU64>,
    /// Last deployment sequence handed out. Seeded from disk on open.
    deployment_seq: Arc<AtomicU64>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_db(db);
        store.ensure_tables()?;
        store.seed_deployment_seq()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_db(db);
        store.ensure_tables()?;
        store.seed_deployment_seq()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn from_db(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            seq: Arc::new(AtomicU64::new(0)),
            deployment_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    fn seed_deployment_seq(&self) -> StateResult<()> {
        let last = self
            .scan_json::<Deployment>(DEPLOYMENTS)?
            .iter()
            .map(|d| d.seq)
            .max()
            .unwrap_or(0);
        self.deployment_seq.store(last, Ordering::Relaxed);
        Ok(())
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(NODES).map_err(map_err!(Table))?;
        txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
        txn.open_table(ACTIVE_ASSIGNMENTS).map_err(map_err!(Table))?;
        txn.open_table(UNASSIGNED).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(CONFIGS).map_err(map_err!(Table))?;
        txn.open_table(METRICS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn put_json<T: Serialize>(&self, def: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let value = encode(value)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    fn scan_json<T: DeserializeOwned>(&self, def: JsonTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Insert or update a node record.
    pub fn put_node(&self, node: &Node) -> StateResult<()> {
        self.put_json(NODES, &node.id, node)?;
        debug!(node_id = %node.id, status = %node.status, "node stored");
        Ok(())
    }

    /// Get a node by ID.
    pub fn get_node(&self, node_id: &str) -> StateResult<Option<Node>> {
        self.get_json(NODES, node_id)
    }

    /// List all nodes, including soft-removed ones, ordered by id.
    pub fn list_nodes(&self) -> StateResult<Vec<Node>> {
        self.scan_json(NODES)
    }

    // ── Assignments ────────────────────────────────────────────────

    /// Record a new active assignment.
    ///
    /// Fails with [`StateError::Conflict`] when the tenant already has one.
    /// Clears any waiting entry for the tenant.
    pub fn activate_assignment(&self, assignment: &Assignment) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        Self::activate_in(&txn, assignment)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            tenant = %assignment.tenant_id,
            node_id = %assignment.node_id,
            "assignment activated"
        );
        Ok(())
    }

    /// Deactivate the tenant's active assignment, if any, and drop any
    /// waiting entry. Returns the deactivated row.
    pub fn deactivate_assignment(
        &self,
        tenant_id: &str,
        now_ms: u64,
    ) -> StateResult<Option<Assignment>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let previous = Self::deactivate_in(&txn, tenant_id, now_ms)?;
        {
            let mut waiting = txn.open_table(UNASSIGNED).map_err(map_err!(Table))?;
            waiting.remove(tenant_id).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(tenant = %tenant_id, had_active = previous.is_some(), "assignment deactivated");
        Ok(previous)
    }

    /// Atomically deactivate the tenant's current assignment and either
    /// activate a replacement or park the tenant as unassigned.
    pub fn reassign_tenant(
        &self,
        tenant_id: &str,
        next: &Reassignment,
        now_ms: u64,
    ) -> StateResult<Option<Assignment>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let previous = Self::deactivate_in(&txn, tenant_id, now_ms)?;
        match next {
            Reassignment::Moved(assignment) => Self::activate_in(&txn, assignment)?,
            Reassignment::Unassigned(waiting) => {
                let value = encode(waiting)?;
                let mut table = txn.open_table(UNASSIGNED).map_err(map_err!(Table))?;
                table
                    .insert(tenant_id, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(previous)
    }

    fn activate_in(txn: &WriteTransaction, assignment: &Assignment) -> StateResult<()> {
        let tenant = assignment.tenant_id.as_str();
        let value = encode(assignment)?;
        let mut active = txn.open_table(ACTIVE_ASSIGNMENTS).map_err(map_err!(Table))?;
        if let Some(existing) = active.get(tenant).map_err(map_err!(Read))? {
            return Err(StateError::Conflict(format!(
                "tenant {tenant} already has active assignment {}",
                existing.value()
            )));
        }
        active
            .insert(tenant, assignment.id.as_str())
            .map_err(map_err!(Write))?;

        let mut rows = txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
        rows.insert(assignment.id.as_str(), value.as_slice())
            .map_err(map_err!(Write))?;

        let mut waiting = txn.open_table(UNASSIGNED).map_err(map_err!(Table))?;
        waiting.remove(tenant).map_err(map_err!(Write))?;
        Ok(())
    }

    fn deactivate_in(
        txn: &WriteTransaction,
        tenant_id: &str,
        now_ms: u64,
    ) -> StateResult<Option<Assignment>> {
        let mut active = txn.open_table(ACTIVE_ASSIGNMENTS).map_err(map_err!(Table))?;
        let Some(id) = active
            .remove(tenant_id)
            .map_err(map_err!(Write))?
            .map(|guard| guard.value().to_string())
        else {
            return Ok(None);
        };

        let mut rows = txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
        let raw = rows
            .get(id.as_str())
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_vec())
            .ok_or_else(|| StateError::NotFound(format!("assignment {id}")))?;
        let mut assignment: Assignment = decode(&raw)?;
        assignment.is_active = false;
        assignment.deactivated_at_ms = Some(now_ms);
        let value = encode(&assignment)?;
        rows.insert(id.as_str(), value.as_slice())
            .map_err(map_err!(Write))?;
        Ok(Some(assignment))
    }

    /// The tenant's active assignment, if any.
    pub fn get_active_assignment(&self, tenant_id: &str) -> StateResult<Option<Assignment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let active = txn.open_table(ACTIVE_ASSIGNMENTS).map_err(map_err!(Table))?;
        let Some(id) = active
            .get(tenant_id)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_string())
        else {
            return Ok(None);
        };
        let rows = txn.open_table(ASSIGNMENTS).map_err(map_err!(Table))?;
        match rows.get(id.as_str()).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Err(StateError::NotFound(format!("assignment {id}"))),
        }
    }

    /// Every assignment row ever written for a tenant, oldest first.
    pub fn list_assignments_for_tenant(&self, tenant_id: &str) -> StateResult<Vec<Assignment>> {
        let mut rows: Vec<Assignment> = self
            .scan_json::<Assignment>(ASSIGNMENTS)?
            .into_iter()
            .filter(|a| a.tenant_id == tenant_id)
            .collect();
        rows.sort_by(|a, b| a.assigned_at_ms.cmp(&b.assigned_at_ms).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    /// All active assignments.
    pub fn list_active_assignments(&self) -> StateResult<Vec<Assignment>> {
        Ok(self
            .scan_json::<Assignment>(ASSIGNMENTS)?
            .into_iter()
            .filter(|a| a.is_active)
            .collect())
    }

    /// Active assignments pointing at one node.
    pub fn list_active_assignments_for_node(&self, node_id: &str) -> StateResult<Vec<Assignment>> {
        Ok(self
            .list_active_assignments()?
            .into_iter()
            .filter(|a| a.node_id == node_id)
            .collect())
    }

    /// Number of active assignments per node. Nodes with none are absent.
    pub fn active_assignment_counts(&self) -> StateResult<HashMap<NodeId, usize>> {
        let mut counts = HashMap::new();
        for assignment in self.list_active_assignments()? {
            *counts.entry(assignment.node_id).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Tenants waiting for capacity, ordered by tenant id.
    pub fn list_unassigned(&self) -> StateResult<Vec<UnassignedTenant>> {
        self.scan_json(UNASSIGNED)
    }

    pub fn get_unassigned(&self, tenant_id: &str) -> StateResult<Option<UnassignedTenant>> {
        self.get_json(UNASSIGNED, tenant_id)
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Insert or update a deployment record.
    pub fn put_deployment(&self, deployment: &Deployment) -> StateResult<()> {
        self.put_json(DEPLOYMENTS, &deployment.id, deployment)?;
        debug!(
            deployment = %deployment.id,
            node_id = %deployment.node_id,
            status = %deployment.status,
            "deployment stored"
        );
        Ok(())
    }

    pub fn get_deployment(&self, id: &str) -> StateResult<Option<Deployment>> {
        self.get_json(DEPLOYMENTS, id)
    }

    /// Next deployment sequence number. Strictly increasing, also across
    /// reopens of the same database.
    pub fn next_deployment_seq(&self) -> u64 {
        self.deployment_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Every deployment still `Pending` or `Deploying`.
    pub fn list_unfinished_deployments(&self) -> StateResult<Vec<Deployment>> {
        Ok(self
            .scan_json::<Deployment>(DEPLOYMENTS)?
            .into_iter()
            .filter(|d| !d.status.is_terminal())
            .collect())
    }

    /// Deployments for one node, oldest first.
    pub fn list_deployments_for_node(&self, node_id: &str) -> StateResult<Vec<Deployment>> {
        let mut rows: Vec<Deployment> = self
            .scan_json::<Deployment>(DEPLOYMENTS)?
            .into_iter()
            .filter(|d| d.node_id == node_id)
            .collect();
        rows.sort_by(|a, b| {
            a.created_at_ms
                .cmp(&b.created_at_ms)
                .then(a.seq.cmp(&b.seq))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(rows)
    }

    // ── Configs ────────────────────────────────────────────────────

    /// Store a rendered config. Versions are content hashes, so rewriting
    /// an existing version is harmless.
    pub fn put_config_blob(&self, blob: &ConfigBlob) -> StateResult<()> {
        self.put_json(CONFIGS, &blob.version, blob)
    }

    pub fn get_config_blob(&self, version: &str) -> StateResult<Option<ConfigBlob>> {
        self.get_json(CONFIGS, version)
    }

    // ── Metrics ────────────────────────────────────────────────────

    /// Append a metric sample.
    pub fn append_metric_sample(&self, sample: &MetricSample) -> StateResult<()> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let key = format!("{}:{:020}:{seq:020}", sample.node_id, sample.recorded_at_ms);
        self.put_json(METRICS, &key, sample)
    }

    /// Most recent samples for a node, newest first.
    pub fn list_recent_metric_samples(
        &self,
        node_id: &str,
        limit: usize,
    ) -> StateResult<Vec<MetricSample>> {
        let (start, end) = metric_range(node_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(METRICS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table
            .range(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?
            .rev()
            .take(limit)
        {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// Samples for a node recorded at or after `since_ms`, oldest first.
    pub fn list_metric_samples_since(
        &self,
        node_id: &str,
        since_ms: u64,
    ) -> StateResult<Vec<MetricSample>> {
        let (_, end) = metric_range(node_id);
        let start = format!("{node_id}:{since_ms:020}");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(METRICS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table
            .range(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?
        {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// Delete every sample recorded before `cutoff_ms`. Returns number deleted.
    pub fn prune_metric_samples(&self, cutoff_ms: u64) -> StateResult<u32> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count;
        {
            let mut table = txn.open_table(METRICS).map_err(map_err!(Table))?;
            let mut expired = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let sample: MetricSample = decode(value.value())?;
                if sample.recorded_at_ms < cutoff_ms {
                    expired.push(key.value().to_string());
                }
            }
            count = expired.len() as u32;
            for key in &expired {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(cutoff_ms, count, "metric samples pruned");
        Ok(count)
    }
}
