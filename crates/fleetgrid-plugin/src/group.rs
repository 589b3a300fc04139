//! Group plugin interface, as exposed to CLIs and RPC layers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use fleet_core::{GroupSpec, InstanceDescription, InstanceId};

use crate::error::PluginResult;

/// Observed state of a group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct GroupDescription {
    pub instances: Vec<InstanceDescription>,
    /// No update is in flight.
    pub converged: bool,
}

#[async_trait]
pub trait GroupPlugin: Send + Sync {
    /// Create or update a group. Returns a human-readable plan.
    ///
    /// With `pretend`, the plan is computed but nothing changes.
    async fn commit_group(&self, spec: GroupSpec, pretend: bool) -> PluginResult<String>;

    /// Stop managing a group, leaving its instances running.
    async fn free_group(&self, id: &str) -> PluginResult<()>;

    async fn describe_group(&self, id: &str) -> PluginResult<GroupDescription>;

    /// Stop managing a group and destroy all of its instances.
    async fn destroy_group(&self, id: &str) -> PluginResult<()>;

    async fn inspect_groups(&self) -> PluginResult<Vec<GroupSpec>>;

    /// Destroy specific instances and shrink the group accordingly.
    async fn destroy_instances(&self, id: &str, instances: &[InstanceId]) -> PluginResult<()>;

    async fn size(&self, id: &str) -> PluginResult<u32>;

    async fn set_size(&self, id: &str, size: u32) -> PluginResult<()>;
}
