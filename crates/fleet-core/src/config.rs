//! fleetd.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::HumanDuration;
use crate::error::CoreResult;
use crate::types::{LogicalId, SelfUpdatePolicy};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DaemonConfig {
    pub controller: ControllerOptions,
    pub log: LogConfig,
}

/// Options shared by every group the controller manages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControllerOptions {
    /// How often supervisors and rolling updates poll the instance plugin.
    pub poll_interval: HumanDuration,
    /// Cap on concurrent create/destroy calls per convergence pass (0 = no cap).
    pub max_parallel_num: usize,
    /// Logical ID of the node running this controller, if it is a group member.
    pub self_id: Option<LogicalId>,
    pub self_update: SelfUpdatePolicy,
    /// Retry interval when connecting to a remote group plugin (0 = no retry).
    pub lazy_retry: HumanDuration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            poll_interval: HumanDuration::from_secs(10),
            max_parallel_num: 0,
            self_id: None,
            self_update: SelfUpdatePolicy::Never,
            lazy_retry: HumanDuration::from_secs(5),
        }
    }
}

impl ControllerOptions {
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval.as_duration()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub filter: String,
    /// "text" or "json".
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info,fleetd=debug,fleetgrid=debug".to_string(),
            format: "text".to_string(),
        }
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DaemonConfig = toml::from_str(&content)?;
        Ok(config)
    }
}
