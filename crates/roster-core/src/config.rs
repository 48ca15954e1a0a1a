//! roster.toml configuration parser.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::types::ServerDescriptor;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RosterConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    /// Descriptors grouped by server type: `[[servers.chat]]`.
    #[serde(default)]
    pub servers: BTreeMap<String, Vec<ServerDescriptor>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's server id, when running as a monitor.
    pub id: Option<String>,
    /// Transport target name of the master's watcher module.
    #[serde(default = "default_master")]
    pub master: String,
}

/// Subscribe policy for the monitor watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Seconds to wait for the subscribe reply. 0 waits forever.
    #[serde(default = "default_subscribe_timeout")]
    pub subscribe_timeout_secs: u64,
    /// Extra attempts after the first failed subscribe.
    #[serde(default)]
    pub subscribe_retries: u32,
    /// Delay before the first retry; doubles on every further attempt.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

fn default_master() -> String {
    "__masterwatcher__".to_string()
}

fn default_subscribe_timeout() -> u64 {
    30
}

fn default_retry_backoff() -> u64 {
    500
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: None,
            master: default_master(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            subscribe_timeout_secs: default_subscribe_timeout(),
            subscribe_retries: 0,
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}

impl WatcherConfig {
    pub fn subscribe_timeout(&self) -> Option<Duration> {
        (self.subscribe_timeout_secs > 0).then(|| Duration::from_secs(self.subscribe_timeout_secs))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl RosterConfig {
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> CoreResult<Self> {
        let config: RosterConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// All descriptors, with `server_type` taken from their section key.
    pub fn descriptors(&self) -> Vec<ServerDescriptor> {
        self.servers
            .iter()
            .flat_map(|(server_type, list)| {
                list.iter().cloned().map(move |mut desc| {
                    desc.server_type = server_type.clone();
                    desc
                })
            })
            .collect()
    }
}
