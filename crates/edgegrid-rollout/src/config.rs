//! Tunnel server configuration and its rendered JSON document.

use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use edgegrid_state::ConfigVersion;

use crate::error::{RolloutError, RolloutResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TlsConfig {
    pub cert: String,
    pub key: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert: "/etc/hysteria/cert.pem".to_string(),
            key: "/etc/hysteria/key.pem".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    /// Auth scheme, `password` unless the node is set up otherwise.
    pub kind: String,
    pub password: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            kind: "password".to_string(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BandwidthConfig {
    pub up_mbps: u32,
    pub down_mbps: u32,
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        Self {
            up_mbps: 100,
            down_mbps: 100,
        }
    }
}

/// UDP port hopping range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PortHopping {
    pub start_port: u16,
    pub end_port: u16,
    pub interval_secs: u32,
}

impl Default for PortHopping {
    fn default() -> Self {
        Self {
            start_port: 10000,
            end_port: 20000,
            interval_secs: 30,
        }
    }
}

/// Everything needed to render one node's tunnel server config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TunnelConfig {
    pub listen_port: u16,
    pub tls: TlsConfig,
    pub auth: AuthConfig,
    pub bandwidth: BandwidthConfig,
    /// Salamander obfuscation password. `None` disables obfuscation.
    pub obfuscation: Option<String>,
    pub port_hopping: Option<PortHopping>,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            listen_port: 8080,
            tls: TlsConfig::default(),
            auth: AuthConfig::default(),
            bandwidth: BandwidthConfig::default(),
            obfuscation: None,
            port_hopping: None,
        }
    }
}

impl TunnelConfig {
    pub fn validate(&self) -> RolloutResult<()> {
        if self.listen_port == 0 {
            return Err(RolloutError::InvalidConfig("listen port is 0".into()));
        }
        if let Some(hop) = &self.port_hopping {
            if hop.start_port > hop.end_port {
                return Err(RolloutError::InvalidConfig(format!(
                    "hopping range {}-{} is inverted",
                    hop.start_port, hop.end_port
                )));
            }
            if hop.interval_secs == 0 {
                return Err(RolloutError::InvalidConfig(
                    "hopping interval is 0".into(),
                ));
            }
        }
        if self.obfuscation.as_deref() == Some("") {
            return Err(RolloutError::InvalidConfig(
                "obfuscation password is empty".into(),
            ));
        }
        Ok(())
    }

    /// The tunnel server's JSON document.
    pub fn render(&self) -> String {
        let mut doc = json!({
            "listen": format!(":{}", self.listen_port),
            "tls": {
                "cert": self.tls.cert,
                "key": self.tls.key,
            },
            "auth": {
                "type": self.auth.kind,
                "password": self.auth.password,
            },
            "bandwidth": {
                "up": format!("{} mbps", self.bandwidth.up_mbps),
                "down": format!("{} mbps", self.bandwidth.down_mbps),
            },
        });
        if let Some(password) = &self.obfuscation {
            doc["obfs"] = json!({ "type": "salamander", "password": password });
        }
        if let Some(hop) = &self.port_hopping {
            doc["hopping"] = json!({
                "interval": hop.interval_secs,
                "start": hop.start_port,
                "end": hop.end_port,
            });
        }
        format!("{doc:#}")
    }

    /// Content version: first 16 hex chars of the document's SHA-256.
    pub fn version(&self) -> ConfigVersion {
        version_of(&self.render())
    }

    /// Validate, then return the version and document together.
    pub fn materialize(&self) -> RolloutResult<(ConfigVersion, String)> {
        self.validate()?;
        let document = self.render();
        Ok((version_of(&document), document))
    }
}

fn version_of(document: &str) -> ConfigVersion {
    let digest = Sha256::digest(document.as_bytes());
    hex::encode(digest)[..16].to_string()
}
