//! Background liveness sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::registry::NodeRegistry;

/// Run `SweepStale` every `period` until `shutdown` flips.
///
/// Sweeps never fail; storage errors are logged per node inside the sweep.
pub async fn run_sweeper(
    registry: Arc<NodeRegistry>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let window = registry.liveness_window();
    info!(?period, ?window, "liveness sweeper started");
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let demoted = registry.sweep_stale(window).await;
                if demoted.is_empty() {
                    debug!("sweep found no stale nodes");
                } else {
                    info!(count = demoted.len(), "stale nodes marked offline");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    info!("liveness sweeper stopped");
}
