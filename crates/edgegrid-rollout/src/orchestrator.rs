//! Deployment orchestrator: drives one rollout per node to a terminal state.
//!
//! A rollout moves its Deployment through `Pending → Deploying` and then to
//! `Success` or `Failed`. Each attempt pushes the config, reloads, and
//! checks the node reports the new version. Timeouts, unreachable nodes,
//! and version mismatches are retried with backoff; rejections are final.
//!
//! Rollouts and rollbacks run on their own task holding the node's
//! in-flight claim, so a dropped caller never strands a `Deploying` row.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use edgegrid_control::{CommandReply, ControlClient, HttpTransport, NodeCommand, Transport};
use edgegrid_registry::{NodeRegistry, RegistryError};
use edgegrid_state::*;

use crate::config::TunnelConfig;
use crate::error::{RolloutError, RolloutResult};
use crate::retry::RetryPolicy;

/// Result of a successful rollback.
#[derive(Debug, Clone, Serialize)]
pub struct RollbackOutcome {
    /// The rolled-back deployment, now `RolledBack`.
    pub original: Deployment,
    /// The deployment that restored the previous config.
    pub restored: Deployment,
}

/// One node's result within a fleet rollout.
#[derive(Debug)]
pub struct FleetEntry {
    pub node_id: NodeId,
    pub outcome: RolloutResult<Deployment>,
}

type InFlightSet = Arc<Mutex<HashSet<NodeId>>>;

/// Marks a node as having a rollout in flight until dropped.
struct InFlight {
    set: InFlightSet,
    node_id: NodeId,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.node_id);
    }
}

pub struct DeploymentOrchestrator<T = HttpTransport> {
    store: StateStore,
    registry: Arc<NodeRegistry>,
    client: ControlClient<T>,
    policy: RetryPolicy,
    in_flight: InFlightSet,
}

impl<T: Transport> DeploymentOrchestrator<T> {
    pub fn new(registry: Arc<NodeRegistry>, client: ControlClient<T>) -> Self {
        Self {
            store: registry.store().clone(),
            registry,
            client,
            policy: RetryPolicy::default(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn client(&self) -> &ControlClient<T> {
        &self.client
    }

    /// Whether a rollout or rollback is running against `node_id`.
    pub fn is_in_flight(&self, node_id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(node_id)
    }

    fn claim(&self, node_id: &str) -> RolloutResult<InFlight> {
        let mut set = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(node_id.to_string()) {
            return Err(RolloutError::Conflict(format!(
                "rollout already in flight for node {node_id}"
            )));
        }
        Ok(InFlight {
            set: Arc::clone(&self.in_flight),
            node_id: node_id.to_string(),
        })
    }

    fn live_node(&self, node_id: &str) -> RolloutResult<Node> {
        let node = self.registry.get(node_id)?;
        if node.is_removed() {
            return Err(RolloutError::NotFound(format!("node {node_id}")));
        }
        Ok(node)
    }

    // ── Rollout ────────────────────────────────────────────────────

    /// Roll `config` out to one node.
    ///
    /// Returns the terminal Deployment, `Success` or `Failed`. Errors are
    /// reserved for requests that never produced a deployment (unknown
    /// node, invalid config, rollout already in flight) and storage
    /// failures.
    pub async fn rollout(
        self: &Arc<Self>,
        node_id: &str,
        config: &TunnelConfig,
    ) -> RolloutResult<Deployment> {
        let (version, document) = config.materialize()?;
        let node = self.live_node(node_id)?;
        let guard = self.claim(node_id)?;

        self.store.put_config_blob(&ConfigBlob {
            version: version.clone(),
            document: document.clone(),
            created_at_ms: epoch_millis(),
        })?;
        let this = Arc::clone(self);
        detach(async move {
            let _guard = guard;
            this.deploy(&node, version, &document, None).await
        })
        .await
    }

    /// Roll `config` out to each node in turn. Every node gets its own
    /// deployment and result; one node's failure does not stop the rest.
    pub async fn rollout_fleet(
        self: &Arc<Self>,
        node_ids: &[NodeId],
        config: &TunnelConfig,
    ) -> Vec<FleetEntry> {
        let mut entries = Vec::with_capacity(node_ids.len());
        for node_id in node_ids {
            let outcome = self.rollout(node_id, config).await;
            if let Err(e) = &outcome {
                warn!(%node_id, error = %e, "fleet rollout skipped node");
            }
            entries.push(FleetEntry {
                node_id: node_id.clone(),
                outcome,
            });
        }
        info!(nodes = entries.len(), "fleet rollout finished");
        entries
    }

    async fn deploy(
        &self,
        node: &Node,
        version: ConfigVersion,
        document: &str,
        rollback_of: Option<DeploymentId>,
    ) -> RolloutResult<Deployment> {
        let mut deployment = Deployment::new(
            Uuid::new_v4().to_string(),
            node.id.clone(),
            version,
            epoch_millis(),
        );
        deployment.rollback_of = rollback_of;
        deployment.seq = self.store.next_deployment_seq();
        self.store.put_deployment(&deployment)?;
        info!(
            deployment = %deployment.id,
            node_id = %node.id,
            version = %deployment.config_version,
            rollback_of = ?deployment.rollback_of,
            "deployment created"
        );

        deployment.advance(DeploymentStatus::Deploying, epoch_millis())?;
        self.store.put_deployment(&deployment)?;

        match self.push_with_retries(node, document, &mut deployment).await {
            Ok(()) => {
                deployment.advance(DeploymentStatus::Success, epoch_millis())?;
                self.store.put_deployment(&deployment)?;
                info!(
                    deployment = %deployment.id,
                    node_id = %node.id,
                    retries = deployment.retries.len(),
                    "deployment succeeded"
                );
                if let Err(e) = self.remediate(&node.id).await {
                    warn!(node_id = %node.id, error = %e, "could not remediate node after deployment");
                }
            }
            Err(RolloutError::State(e)) => return Err(RolloutError::State(e)),
            Err(e) => {
                deployment.error = Some(e.to_string());
                deployment.advance(DeploymentStatus::Failed, epoch_millis())?;
                self.store.put_deployment(&deployment)?;
                warn!(
                    deployment = %deployment.id,
                    node_id = %node.id,
                    kind = e.kind(),
                    error = %e,
                    "deployment failed"
                );
                self.mark_node_error(&node.id).await;
            }
        }
        Ok(deployment)
    }

    async fn push_with_retries(
        &self,
        node: &Node,
        document: &str,
        deployment: &mut Deployment,
    ) -> RolloutResult<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.attempt(node, document, &deployment.config_version).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            if !err.is_retryable() || !self.policy.allows_retry_after(attempt) {
                return Err(err);
            }

            let backoff = self.policy.backoff(attempt);
            deployment.retries.push(RetryRecord {
                attempt,
                kind: err.kind().to_string(),
                detail: err.to_string(),
                at_ms: epoch_millis(),
            });
            self.store.put_deployment(deployment)?;
            warn!(
                deployment = %deployment.id,
                node_id = %node.id,
                attempt,
                kind = err.kind(),
                error = %err,
                ?backoff,
                "push attempt failed, retrying"
            );
            tokio::time::sleep(backoff).await;
        }
    }

    async fn attempt(&self, node: &Node, document: &str, version: &str) -> RolloutResult<()> {
        let endpoint = &node.address;
        self.client.push_config(endpoint, document, version).await?;
        self.client.reload_config(endpoint).await?;
        let status = self.client.get_status(endpoint).await?;
        if !status.running || status.config_version.as_deref() != Some(version) {
            return Err(RolloutError::VersionMismatch {
                expected: version.to_string(),
                reported: status.config_version,
            });
        }
        debug!(node_id = %node.id, %version, "node confirmed config");
        Ok(())
    }

    /// Put a node whose deployment failed into `Error`. The deployment is
    /// already stored, so failures here are logged only.
    async fn mark_node_error(&self, node_id: &str) {
        match self.registry.set_status(node_id, NodeStatus::Error).await {
            Ok(_) => {}
            Err(RegistryError::NotFound(_)) => {
                warn!(%node_id, "node removed during deployment, status left unchanged");
            }
            Err(e) => warn!(%node_id, error = %e, "could not mark node as error"),
        }
    }

    /// Return an `Error` node to `Online` after a command succeeded.
    async fn remediate(&self, node_id: &str) -> RolloutResult<()> {
        let node = self.registry.get(node_id)?;
        if node.status == NodeStatus::Error && !node.is_removed() {
            self.registry.set_status(node_id, NodeStatus::Online).await?;
            info!(%node_id, "node remediated");
        }
        Ok(())
    }

    // ── Rollback ───────────────────────────────────────────────────

    /// Restore the config that preceded a `Success` deployment.
    ///
    /// Only the node's latest successful deployment can be rolled back.
    /// The previous config is the newest earlier successful deployment
    /// with a different version. On success the original becomes
    /// `RolledBack`; if the restore fails the original is left as is.
    pub async fn rollback(self: &Arc<Self>, deployment_id: &str) -> RolloutResult<RollbackOutcome> {
        let original = self.get_deployment(deployment_id)?;
        let node = self.live_node(&original.node_id)?;
        let guard = self.claim(&node.id)?;

        let this = Arc::clone(self);
        let deployment_id = deployment_id.to_string();
        detach(async move {
            let _guard = guard;
            this.rollback_claimed(&deployment_id, node).await
        })
        .await
    }

    async fn rollback_claimed(
        &self,
        deployment_id: &str,
        node: Node,
    ) -> RolloutResult<RollbackOutcome> {
        // Re-read under the claim; a concurrent rollback may have moved it.
        let original = self.get_deployment(deployment_id)?;
        if original.status != DeploymentStatus::Success {
            return Err(RolloutError::InvalidState(format!(
                "deployment {deployment_id} is {}, only success can be rolled back",
                original.status
            )));
        }

        let history = self.store.list_deployments_for_node(&node.id)?;
        let successes: Vec<&Deployment> = history
            .iter()
            .filter(|d| d.status == DeploymentStatus::Success)
            .collect();
        if successes.last().map(|d| d.id.as_str()) != Some(original.id.as_str()) {
            return Err(RolloutError::InvalidState(format!(
                "deployment {deployment_id} is not the current deployment of node {}",
                node.id
            )));
        }
        let previous = successes
            .iter()
            .rev()
            .skip(1)
            .find(|d| d.config_version != original.config_version)
            .ok_or_else(|| RolloutError::NoPreviousConfig(node.id.clone()))?;
        let blob = self
            .store
            .get_config_blob(&previous.config_version)?
            .ok_or_else(|| RolloutError::NoPreviousConfig(node.id.clone()))?;

        info!(
            deployment = %original.id,
            node_id = %node.id,
            from = %original.config_version,
            to = %blob.version,
            "rolling back"
        );
        let restored = self
            .deploy(&node, blob.version, &blob.document, Some(original.id.clone()))
            .await?;
        if restored.status != DeploymentStatus::Success {
            return Err(RolloutError::RestoreFailed {
                deployment: restored.id,
                detail: restored.error.unwrap_or_default(),
            });
        }

        let mut original = original;
        original.advance(DeploymentStatus::RolledBack, epoch_millis())?;
        self.store.put_deployment(&original)?;
        info!(deployment = %original.id, restored = %restored.id, "deployment rolled back");
        Ok(RollbackOutcome { original, restored })
    }

    // ── Recovery ───────────────────────────────────────────────────

    /// Fail every deployment a previous process left `Pending` or
    /// `Deploying`. Meant for startup; deployments of nodes with a rollout
    /// in flight are skipped.
    pub fn recover_interrupted(&self) -> RolloutResult<Vec<Deployment>> {
        let mut recovered = Vec::new();
        for mut deployment in self.store.list_unfinished_deployments()? {
            if self.is_in_flight(&deployment.node_id) {
                continue;
            }
            let now = epoch_millis();
            if deployment.status == DeploymentStatus::Pending {
                deployment.advance(DeploymentStatus::Deploying, now)?;
            }
            deployment.error = Some("interrupted before completion".to_string());
            deployment.advance(DeploymentStatus::Failed, now)?;
            self.store.put_deployment(&deployment)?;
            warn!(
                deployment = %deployment.id,
                node_id = %deployment.node_id,
                "unfinished deployment marked failed"
            );
            recovered.push(deployment);
        }
        Ok(recovered)
    }

    // ── One-shot commands ──────────────────────────────────────────

    /// Send one command to a node with no retries. A successful
    /// remediation command returns an `Error` node to `Online`.
    pub async fn execute(&self, node_id: &str, command: NodeCommand) -> RolloutResult<CommandReply> {
        let node = self.live_node(node_id)?;
        let reply = self.client.execute(&node.address, &command).await?;
        info!(%node_id, command = command.name(), "command executed");
        if command.is_remediation() {
            self.remediate(node_id).await?;
        }
        Ok(reply)
    }

    // ── Reads ──────────────────────────────────────────────────────

    pub fn get_deployment(&self, deployment_id: &str) -> RolloutResult<Deployment> {
        self.store
            .get_deployment(deployment_id)?
            .ok_or_else(|| RolloutError::NotFound(format!("deployment {deployment_id}")))
    }

    /// A node's deployments, oldest first.
    pub fn list_deployments(&self, node_id: &str) -> RolloutResult<Vec<Deployment>> {
        self.registry.get(node_id)?;
        Ok(self.store.list_deployments_for_node(node_id)?)
    }
}

/// Run `work` on its own task and wait for it. Dropping the caller does
/// not cancel the task.
async fn detach<R, F>(work: F) -> RolloutResult<R>
where
    F: Future<Output = RolloutResult<R>> + Send + 'static,
    R: Send + 'static,
{
    match tokio::spawn(work).await {
        Ok(result) => result,
        Err(e) => Err(RolloutError::Aborted(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use edgegrid_control::{ControlError, InMemoryNode, LoopbackTransport, ScriptedFault};
    use edgegrid_state::{NodeAddress, NodeDescriptor};

    struct Bench {
        registry: Arc<NodeRegistry>,
        orchestrator: Arc<DeploymentOrchestrator<LoopbackTransport<InMemoryNode>>>,
    }

    fn bench() -> Bench {
        let registry = Arc::new(NodeRegistry::new(StateStore::open_in_memory().unwrap()));
        let client = ControlClient::new(LoopbackTransport::new())
            .with_deadline(Duration::from_millis(50));
        let orchestrator = DeploymentOrchestrator::new(registry.clone(), client).with_policy(
            RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(5),
                max_backoff: Duration::from_millis(20),
            },
        );
        Bench {
            registry,
            orchestrator: Arc::new(orchestrator),
        }
    }

    impl Bench {
        async fn node(&self, host: &str) -> (NodeId, Arc<InMemoryNode>) {
            let address = NodeAddress::new(host, 7000);
            let node = self
                .registry
                .register(NodeDescriptor::new(address.clone()))
                .await
                .unwrap();
            let handler = Arc::new(InMemoryNode::new());
            self.orchestrator
                .client()
                .transport()
                .attach(&address, handler.clone());
            (node.id, handler)
        }
    }

    fn config(port: u16) -> TunnelConfig {
        TunnelConfig {
            listen_port: port,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn rollout_success_sets_deployed_at() {
        let b = bench();
        let (id, node) = b.node("10.0.0.1").await;

        let d = b.orchestrator.rollout(&id, &config(8443)).await.unwrap();
        assert_eq!(d.status, DeploymentStatus::Success);
        assert!(d.deployed_at_ms.is_some());
        assert!(d.retries.is_empty());
        assert_eq!(node.active_version(), Some(config(8443).version()));
        assert!(!b.orchestrator.is_in_flight(&id));
    }

    #[tokio::test]
    async fn timeouts_retry_then_succeed() {
        let b = bench();
        let (id, node) = b.node("10.0.0.1").await;
        node.script("push_config", ScriptedFault::Delay(Duration::from_millis(500)));
        node.script("push_config", ScriptedFault::Delay(Duration::from_millis(500)));

        let d = b.orchestrator.rollout(&id, &config(8443)).await.unwrap();
        assert_eq!(d.status, DeploymentStatus::Success);
        assert_eq!(d.retries.len(), 2);
        assert!(d.retries.iter().all(|r| r.kind == "timeout"));
        assert_eq!(d.retries[0].attempt, 1);
        assert_eq!(d.retries[1].attempt, 2);
        assert_eq!(node.call_count("push_config"), 3);
    }

    #[tokio::test]
    async fn rejection_fails_without_retry_and_marks_node_error() {
        let b = bench();
        let (id, node) = b.node("10.0.0.1").await;
        node.script("push_config", ScriptedFault::Reject("disk full".into()));

        let d = b.orchestrator.rollout(&id, &config(8443)).await.unwrap();
        assert_eq!(d.status, DeploymentStatus::Failed);
        assert!(d.deployed_at_ms.is_none());
        assert!(d.retries.is_empty());
        assert!(d.error.as_deref().unwrap().contains("disk full"));
        assert_eq!(node.call_count("push_config"), 1);
        assert_eq!(b.registry.get(&id).unwrap().status, NodeStatus::Error);
    }

    #[tokio::test]
    async fn unreachable_exhausts_attempts() {
        let b = bench();
        let (id, _) = b.node("10.0.0.1").await;
        b.orchestrator
            .client()
            .transport()
            .detach(&NodeAddress::new("10.0.0.1", 7000));

        let d = b.orchestrator.rollout(&id, &config(8443)).await.unwrap();
        assert_eq!(d.status, DeploymentStatus::Failed);
        assert_eq!(d.retries.len(), 2);
        assert!(d.retries.iter().all(|r| r.kind == "unreachable"));
        assert_eq!(b.registry.get(&id).unwrap().status, NodeStatus::Error);
    }

    #[tokio::test]
    async fn unimplemented_is_not_retried() {
        let b = bench();
        let (id, node) = b.node("10.0.0.1").await;
        node.script("reload_config", ScriptedFault::Unimplemented);

        let d = b.orchestrator.rollout(&id, &config(8443)).await.unwrap();
        assert_eq!(d.status, DeploymentStatus::Failed);
        assert!(d.retries.is_empty());
        assert_eq!(node.call_count("reload_config"), 1);
    }

    #[tokio::test]
    async fn success_remediates_error_node() {
        let b = bench();
        let (id, _) = b.node("10.0.0.1").await;
        b.registry.set_status(&id, NodeStatus::Error).await.unwrap();

        b.orchestrator.rollout(&id, &config(8443)).await.unwrap();
        assert_eq!(b.registry.get(&id).unwrap().status, NodeStatus::Online);
    }

    #[tokio::test]
    async fn second_rollout_to_same_node_conflicts() {
        let b = bench();
        let (id, node) = b.node("10.0.0.1").await;
        node.script("push_config", ScriptedFault::Delay(Duration::from_millis(30)));

        let orch = b.orchestrator.clone();
        let first_id = id.clone();
        let first = tokio::spawn(async move { orch.rollout(&first_id, &config(8443)).await });
        while !b.orchestrator.is_in_flight(&id) {
            tokio::task::yield_now().await;
        }

        let err = b.orchestrator.rollout(&id, &config(9443)).await.unwrap_err();
        assert!(matches!(err, RolloutError::Conflict(_)));

        let d = first.await.unwrap().unwrap();
        assert_eq!(d.status, DeploymentStatus::Success);
        assert!(b.orchestrator.rollout(&id, &config(9443)).await.is_ok());
    }

    #[tokio::test]
    async fn different_nodes_roll_out_in_parallel() {
        let b = bench();
        let (a, na) = b.node("10.0.0.1").await;
        let (c, _) = b.node("10.0.0.2").await;
        na.script("push_config", ScriptedFault::Delay(Duration::from_millis(30)));

        let orch = b.orchestrator.clone();
        let slow_id = a.clone();
        let slow = tokio::spawn(async move { orch.rollout(&slow_id, &config(8443)).await });
        while !b.orchestrator.is_in_flight(&a) {
            tokio::task::yield_now().await;
        }
        let fast = b.orchestrator.rollout(&c, &config(8443)).await.unwrap();
        assert_eq!(fast.status, DeploymentStatus::Success);
        assert_eq!(slow.await.unwrap().unwrap().status, DeploymentStatus::Success);
    }

    #[tokio::test]
    async fn dropped_caller_does_not_strand_deployment() {
        let b = bench();
        let (id, node) = b.node("10.0.0.1").await;
        node.script("push_config", ScriptedFault::Delay(Duration::from_millis(40)));

        let orch = b.orchestrator.clone();
        let caller_id = id.clone();
        let caller = tokio::spawn(async move { orch.rollout(&caller_id, &config(8443)).await });
        while !b.orchestrator.is_in_flight(&id) {
            tokio::task::yield_now().await;
        }
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        // The rollout itself keeps running and holds the claim until done.
        assert!(b.orchestrator.is_in_flight(&id));
        while b.orchestrator.is_in_flight(&id) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let history = b.orchestrator.list_deployments(&id).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history.iter().all(|d| d.status.is_terminal()));
        assert_eq!(history[0].status, DeploymentStatus::Success);
    }

    #[tokio::test]
    async fn node_removed_mid_rollout_still_returns_deployment() {
        let b = bench();
        let (id, node) = b.node("10.0.0.1").await;
        for _ in 0..3 {
            node.script("push_config", ScriptedFault::Delay(Duration::from_millis(200)));
        }

        let orch = b.orchestrator.clone();
        let rollout_id = id.clone();
        let rollout = tokio::spawn(async move { orch.rollout(&rollout_id, &config(8443)).await });
        while !b.orchestrator.is_in_flight(&id) {
            tokio::task::yield_now().await;
        }
        b.registry.remove(&id).await.unwrap();

        let d = rollout.await.unwrap().unwrap();
        assert_eq!(d.status, DeploymentStatus::Failed);
        assert_eq!(b.orchestrator.get_deployment(&d.id).unwrap().status, DeploymentStatus::Failed);
        assert!(b.registry.get(&id).unwrap().is_removed());
    }

    #[tokio::test]
    async fn unfinished_deployments_fail_on_recovery() {
        let b = bench();
        let (id, _) = b.node("10.0.0.1").await;
        let store = b.registry.store();

        let pending = Deployment::new("d-pending".into(), id.clone(), "v1".into(), 10);
        let mut deploying = Deployment::new("d-deploying".into(), id.clone(), "v2".into(), 11);
        deploying.advance(DeploymentStatus::Deploying, 12).unwrap();
        store.put_deployment(&pending).unwrap();
        store.put_deployment(&deploying).unwrap();
        let done = b.orchestrator.rollout(&id, &config(8443)).await.unwrap();

        let recovered = b.orchestrator.recover_interrupted().unwrap();
        assert_eq!(recovered.len(), 2);
        for d in b.orchestrator.list_deployments(&id).unwrap() {
            assert!(d.status.is_terminal(), "{} left {}", d.id, d.status);
        }
        let failed = b.orchestrator.get_deployment("d-pending").unwrap();
        assert_eq!(failed.status, DeploymentStatus::Failed);
        assert!(failed.error.is_some());
        assert_eq!(
            b.orchestrator.get_deployment(&done.id).unwrap().status,
            DeploymentStatus::Success
        );
        assert!(b.orchestrator.recover_interrupted().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_config_and_unknown_node_create_nothing() {
        let b = bench();
        let (id, _) = b.node("10.0.0.1").await;

        let err = b.orchestrator.rollout(&id, &config(0)).await.unwrap_err();
        assert!(matches!(err, RolloutError::InvalidConfig(_)));
        let err = b.orchestrator.rollout("node-missing", &config(8443)).await.unwrap_err();
        assert!(matches!(err, RolloutError::NotFound(_)));
        assert!(b.orchestrator.list_deployments(&id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn rollback_restores_previous_version() {
        let b = bench();
        let (id, node) = b.node("10.0.0.1").await;
        let first = b.orchestrator.rollout(&id, &config(8443)).await.unwrap();
        let second = b.orchestrator.rollout(&id, &config(9443)).await.unwrap();

        let out = b.orchestrator.rollback(&second.id).await.unwrap();
        assert_eq!(out.original.status, DeploymentStatus::RolledBack);
        assert!(out.original.rolled_back_at_ms.is_some());
        assert_eq!(out.restored.status, DeploymentStatus::Success);
        assert_eq!(out.restored.config_version, first.config_version);
        assert_eq!(out.restored.rollback_of.as_deref(), Some(second.id.as_str()));
        assert_eq!(node.active_version(), Some(first.config_version.clone()));

        let stored = b.orchestrator.get_deployment(&second.id).unwrap();
        assert_eq!(stored.status, DeploymentStatus::RolledBack);
        assert_eq!(b.orchestrator.list_deployments(&id).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn rollback_of_failed_deployment_is_invalid_state() {
        let b = bench();
        let (id, node) = b.node("10.0.0.1").await;
        node.script("push_config", ScriptedFault::Reject("nope".into()));
        let failed = b.orchestrator.rollout(&id, &config(8443)).await.unwrap();

        let err = b.orchestrator.rollback(&failed.id).await.unwrap_err();
        assert!(matches!(err, RolloutError::InvalidState(_)));
        assert_eq!(
            b.orchestrator.get_deployment(&failed.id).unwrap().status,
            DeploymentStatus::Failed
        );
    }

    #[tokio::test]
    async fn rollback_without_history_has_no_previous_config() {
        let b = bench();
        let (id, _) = b.node("10.0.0.1").await;
        let only = b.orchestrator.rollout(&id, &config(8443)).await.unwrap();

        let err = b.orchestrator.rollback(&only.id).await.unwrap_err();
        assert!(matches!(err, RolloutError::NoPreviousConfig(_)));
        assert_eq!(
            b.orchestrator.get_deployment(&only.id).unwrap().status,
            DeploymentStatus::Success
        );
    }

    #[tokio::test]
    async fn superseded_deployment_cannot_be_rolled_back() {
        let b = bench();
        let (id, _) = b.node("10.0.0.1").await;
        let first = b.orchestrator.rollout(&id, &config(8443)).await.unwrap();
        b.orchestrator.rollout(&id, &config(9443)).await.unwrap();

        let err = b.orchestrator.rollback(&first.id).await.unwrap_err();
        assert!(matches!(err, RolloutError::InvalidState(_)));
    }

    #[tokio::test]
    async fn failed_restore_leaves_original_success() {
        let b = bench();
        let (id, node) = b.node("10.0.0.1").await;
        b.orchestrator.rollout(&id, &config(8443)).await.unwrap();
        let second = b.orchestrator.rollout(&id, &config(9443)).await.unwrap();
        node.script("push_config", ScriptedFault::Reject("locked".into()));

        let err = b.orchestrator.rollback(&second.id).await.unwrap_err();
        assert!(matches!(err, RolloutError::RestoreFailed { .. }));
        assert_eq!(
            b.orchestrator.get_deployment(&second.id).unwrap().status,
            DeploymentStatus::Success
        );
        let history = b.orchestrator.list_deployments(&id).unwrap();
        let restore = history.last().unwrap();
        assert_eq!(restore.status, DeploymentStatus::Failed);
        assert_eq!(restore.rollback_of.as_deref(), Some(second.id.as_str()));
    }

    #[tokio::test]
    async fn fleet_rollout_reports_each_node() {
        let b = bench();
        let (a, _) = b.node("10.0.0.1").await;
        let (c, nc) = b.node("10.0.0.2").await;
        nc.script("push_config", ScriptedFault::Reject("no".into()));

        let ids = vec![a.clone(), c.clone(), "node-ghost".to_string()];
        let entries = b.orchestrator.rollout_fleet(&ids, &config(8443)).await;
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries[0].outcome.as_ref().unwrap().status,
            DeploymentStatus::Success
        );
        assert_eq!(
            entries[1].outcome.as_ref().unwrap().status,
            DeploymentStatus::Failed
        );
        assert!(matches!(entries[2].outcome, Err(RolloutError::NotFound(_))));
    }

    #[tokio::test]
    async fn execute_passes_through_and_remediates() {
        let b = bench();
        let (id, node) = b.node("10.0.0.1").await;
        b.orchestrator.rollout(&id, &config(8443)).await.unwrap();
        b.registry.set_status(&id, NodeStatus::Error).await.unwrap();

        b.orchestrator.execute(&id, NodeCommand::StopService).await.unwrap();
        assert_eq!(b.registry.get(&id).unwrap().status, NodeStatus::Error);

        b.orchestrator.execute(&id, NodeCommand::StartService).await.unwrap();
        assert!(node.is_running());
        assert_eq!(b.registry.get(&id).unwrap().status, NodeStatus::Online);
    }

    #[tokio::test]
    async fn execute_surfaces_unimplemented() {
        let b = bench();
        let (id, node) = b.node("10.0.0.1").await;
        node.script("set_masquerading", ScriptedFault::Unimplemented);

        let err = b
            .orchestrator
            .execute(
                &id,
                NodeCommand::SetMasquerading {
                    interface: "eth0".into(),
                    enabled: true,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RolloutError::Control(ControlError::Unimplemented { .. })
        ));
        assert_eq!(node.call_count("set_masquerading"), 1);
    }
}
