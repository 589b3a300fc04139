//! Instance plugin interface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use fleet_core::{DestroyContext, InstanceDescription, InstanceId, LogicalId, Tags};

use crate::error::PluginResult;

/// Everything an instance plugin needs to provision one instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceSpec {
    #[serde(default)]
    pub properties: Value,
    #[serde(default)]
    pub tags: Tags,
    #[serde(rename = "LogicalID", default, skip_serializing_if = "Option::is_none")]
    pub logical_id: Option<LogicalId>,
    /// Boot script, typically filled in by the flavor plugin.
    #[serde(default)]
    pub init: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

/// A resource (volume, NIC, ...) attached to an instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Attachment {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Type")]
    pub kind: String,
}

/// Provisions and manages raw instances.
#[async_trait]
pub trait InstancePlugin: Send + Sync {
    /// Check the instance properties of a group document.
    async fn validate(&self, properties: &Value) -> PluginResult<()>;

    /// Create an instance and return its ID.
    async fn provision(&self, spec: InstanceSpec) -> PluginResult<InstanceId>;

    /// Merge `labels` into an instance's tags.
    async fn label(&self, id: &str, labels: &Tags) -> PluginResult<()>;

    async fn destroy(&self, id: &str, context: DestroyContext) -> PluginResult<()>;

    /// List instances carrying every tag in `tags`.
    async fn describe_instances(
        &self,
        tags: &Tags,
        properties: bool,
    ) -> PluginResult<Vec<InstanceDescription>>;
}
