//! Configuration types for remproc-node.
//! Parsed from ~/.remproc/config.toml.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub client: ClientSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Upper bound on a single `remote_ip_dial` connect.
    #[serde(default = "default_dial_timeout_secs")]
    pub dial_timeout_secs: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            dial_timeout_secs: default_dial_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSection {
    #[serde(default = "default_agent_addr")]
    pub agent_addr: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            agent_addr: default_agent_addr(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl AgentSection {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }
}

impl ClientSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// Default value functions
fn default_listen_addr() -> String {
    "127.0.0.1:9480".into()
}
fn default_agent_addr() -> String {
    "127.0.0.1:9480".into()
}
fn default_dial_timeout_secs() -> u64 {
    10
}
fn default_request_timeout_secs() -> u64 {
    30
}

impl NodeConfig {
    /// Load config from file, or fall back to defaults if missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: NodeConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }
}
