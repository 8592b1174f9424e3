//! Client configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Session defaults, loadable from TOML or JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Wall-clock budget for one wire transaction, in seconds.
    pub wait_timeout_secs: u64,
    /// Background connectivity check period, in seconds.
    pub check_timeout_secs: u64,
    /// Number of stalled transactions tolerated before a state is reset.
    pub stall_count: u64,
    /// Default replication groups for new sessions.
    pub groups: Vec<u32>,
    /// Default namespace for new sessions.
    pub namespace: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            wait_timeout_secs: 5,
            check_timeout_secs: 60,
            stall_count: 5,
            groups: Vec::new(),
            namespace: None,
        }
    }
}

impl ClientConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: ClientConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: ClientConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }
}
