//! edgegridd.toml configuration.
//!
//! Every field has a default, so an empty file (or no file) is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use edgegrid_rollout::{RetryPolicy, TunnelConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    pub liveness: LivenessConfig,
    pub rollout: RolloutConfig,
    pub metrics: MetricsConfig,
    pub log: LogConfig,
    /// Tunnel config rendered by `render-config`.
    pub tunnel: TunnelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8443".to_string(),
            data_dir: PathBuf::from("/var/lib/edgegrid"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// A node with no heartbeat for this long is swept `Offline`.
    pub window_secs: u64,
    /// Sweep period. Half the window when unset.
    pub sweep_interval_secs: Option<u64>,
    /// Heartbeats closer together than this are acknowledged but ignored.
    pub min_heartbeat_interval_secs: u64,
    /// Cadence advertised to agents at registration.
    pub heartbeat_interval_secs: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            window_secs: 90,
            sweep_interval_secs: None,
            min_heartbeat_interval_secs: 5,
            heartbeat_interval_secs: 30,
        }
    }
}

impl LivenessConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        match self.sweep_interval_secs {
            Some(secs) => Duration::from_secs(secs),
            None => self.window() / 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Deadline for each command sent to a node.
    pub rpc_timeout_ms: u64,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
            rpc_timeout_ms: 10_000,
        }
    }
}

impl RolloutConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub retention_secs: u64,
    pub prune_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            retention_secs: 7 * 24 * 3600,
            prune_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directives, used when `RUST_LOG` is unset.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info,edgegridd=debug".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config: DaemonConfig =
            toml::from_str(&content).with_context(|| format!("parse config {}", path.display()))?;
        Ok(config)
    }

    /// Load `path` if given, otherwise defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let l = &self.liveness;
        if l.window_secs == 0 {
            anyhow::bail!("liveness.window_secs must be positive");
        }
        if l.heartbeat_interval_secs == 0 || l.heartbeat_interval_secs >= l.window_secs {
            anyhow::bail!(
                "liveness.heartbeat_interval_secs ({}) must be between 1 and window_secs ({})",
                l.heartbeat_interval_secs,
                l.window_secs
            );
        }
        if l.sweep_interval().is_zero() {
            anyhow::bail!("liveness sweep interval must be positive");
        }
        let r = &self.rollout;
        if r.max_attempts == 0 {
            anyhow::bail!("rollout.max_attempts must be at least 1");
        }
        if r.initial_backoff_ms > r.max_backoff_ms {
            anyhow::bail!("rollout.initial_backoff_ms exceeds max_backoff_ms");
        }
        if r.rpc_timeout_ms == 0 {
            anyhow::bail!("rollout.rpc_timeout_ms must be positive");
        }
        if self.metrics.prune_interval_secs == 0 {
            anyhow::bail!("metrics.prune_interval_secs must be positive");
        }
        self.tunnel.validate().context("tunnel")?;
        Ok(())
    }
}
