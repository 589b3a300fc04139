//! Flavor plugin interface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use fleet_core::{Allocation, GroupId, Health, InstanceDescription};

use crate::error::PluginResult;
use crate::instance::InstanceSpec;

/// Position of an instance being created within its group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Index {
    pub group: GroupId,
    pub sequence: u32,
}

/// Gives instances a role: boot configuration, health, and drain.
#[async_trait]
pub trait FlavorPlugin: Send + Sync {
    /// Check the flavor properties against the group's allocation.
    async fn validate(&self, properties: &Value, allocation: &Allocation) -> PluginResult<()>;

    /// Adjust an instance spec before it is provisioned.
    async fn prepare(
        &self,
        properties: &Value,
        spec: InstanceSpec,
        allocation: &Allocation,
        index: Index,
    ) -> PluginResult<InstanceSpec>;

    async fn healthy(
        &self,
        properties: &Value,
        instance: &InstanceDescription,
    ) -> PluginResult<Health>;

    /// Gracefully take an instance out of service ahead of destruction.
    async fn drain(&self, properties: &Value, instance: &InstanceDescription) -> PluginResult<()>;
}
