//! Metrics store: read side and retention for node metric samples.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use edgegrid_state::{MetricSample, StateResult, StateStore, epoch_millis};

/// Aggregate load for one node over a time window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoadSummary {
    pub node_id: String,
    pub samples: usize,
    pub avg_cpu_usage: f64,
    pub avg_memory_usage: f64,
    pub peak_active_connections: u32,
    pub avg_bandwidth_up: u64,
    pub avg_bandwidth_down: u64,
    /// Newest sample's timestamp.
    pub latest_at_ms: u64,
}

impl LoadSummary {
    /// Summarize samples. Returns `None` for an empty slice.
    pub fn from_samples(node_id: &str, samples: &[MetricSample]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let n = samples.len();
        let mut cpu = 0.0;
        let mut memory = 0.0;
        let mut up: u128 = 0;
        let mut down: u128 = 0;
        let mut peak = 0;
        let mut latest = 0;
        for s in samples {
            cpu += s.metrics.cpu_usage;
            memory += s.metrics.memory_usage;
            up += u128::from(s.metrics.bandwidth_up);
            down += u128::from(s.metrics.bandwidth_down);
            peak = peak.max(s.metrics.active_connections);
            latest = latest.max(s.recorded_at_ms);
        }
        Some(Self {
            node_id: node_id.to_string(),
            samples: n,
            avg_cpu_usage: cpu / n as f64,
            avg_memory_usage: memory / n as f64,
            peak_active_connections: peak,
            avg_bandwidth_up: (up / n as u128) as u64,
            avg_bandwidth_down: (down / n as u128) as u64,
            latest_at_ms: latest,
        })
    }
}

/// Query and retention front for metric samples.
#[derive(Clone)]
pub struct MetricsStore {
    state: StateStore,
    retention: Duration,
}

impl MetricsStore {
    /// Create a metrics store keeping samples for `retention`.
    pub fn new(state: StateStore, retention: Duration) -> Self {
        Self { state, retention }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Most recent samples for a node, newest first.
    pub fn recent(&self, node_id: &str, limit: usize) -> StateResult<Vec<MetricSample>> {
        self.state.list_recent_metric_samples(node_id, limit)
    }

    /// Samples recorded within the last `window`, oldest first.
    pub fn since(&self, node_id: &str, window: Duration) -> StateResult<Vec<MetricSample>> {
        let from = epoch_millis().saturating_sub(window.as_millis() as u64);
        self.state.list_metric_samples_since(node_id, from)
    }

    /// Load summary over the last `window`, or `None` without samples.
    pub fn summary(&self, node_id: &str, window: Duration) -> StateResult<Option<LoadSummary>> {
        let samples = self.since(node_id, window)?;
        Ok(LoadSummary::from_samples(node_id, &samples))
    }

    /// Delete samples older than the retention window.
    pub fn prune(&self) -> StateResult<u32> {
        self.prune_at(epoch_millis())
    }

    /// [`prune`](Self::prune) evaluated at an explicit time.
    pub fn prune_at(&self, now_ms: u64) -> StateResult<u32> {
        let cutoff = now_ms.saturating_sub(self.retention.as_millis() as u64);
        self.state.prune_metric_samples(cutoff)
    }

    /// Run the retention loop until `shutdown` flips.
    pub async fn run_retention(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            period_secs = period.as_secs(),
            retention_secs = self.retention.as_secs(),
            "metric retention started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {
                    match self.prune() {
                        Ok(0) => debug!("no metric samples past retention"),
                        Ok(count) => info!(count, "pruned metric samples"),
                        Err(e) => warn!(error = %e, "metric retention pass failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("metric retention shutting down");
                    break;
                }
            }
        }
    }
}
