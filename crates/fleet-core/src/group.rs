//! Group documents.
//!
//! A `GroupSpec` is what callers submit: an ID plus an opaque properties
//! document. The properties decode into a `GroupConfig`:
//!
//! ```json
//! {
//!   "Allocation": { "Size": 3 },
//!   "Instance":   { "Plugin": "aws",   "Properties": { ... } },
//!   "Flavor":     { "Plugin": "swarm", "Properties": { ... } },
//!   "Updating":   { "Count": 2, "SkipBeforeInstanceDestroy": "drain" }
//! }
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::duration::HumanDuration;
use crate::error::{CoreError, CoreResult};
use crate::hash::InstanceHash;
use crate::types::{GroupId, LogicalId};

/// A group as submitted by a caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct GroupSpec {
    #[serde(rename = "ID")]
    pub id: GroupId,
    #[serde(default)]
    pub properties: Value,
}

impl GroupSpec {
    /// Build a spec by encoding a config as the properties document.
    pub fn new(id: impl Into<GroupId>, config: &GroupConfig) -> CoreResult<Self> {
        Ok(Self {
            id: id.into(),
            properties: serde_json::to_value(config)?,
        })
    }

    /// Decode the properties document into a `GroupConfig`.
    pub fn config(&self) -> CoreResult<GroupConfig> {
        Ok(GroupConfig::deserialize(&self.properties)?)
    }
}

/// Reference to a plugin plus the opaque properties handed to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct PluginSpec {
    #[serde(alias = "PluginName")]
    pub plugin: String,
    #[serde(default)]
    pub properties: Value,
}

/// Decoded group configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct GroupConfig {
    pub instance: PluginSpec,
    pub flavor: PluginSpec,
    #[serde(default)]
    pub allocation: Allocation,
    #[serde(default)]
    pub updating: Updating,
}

/// How many instances a group holds: a count, or a fixed set of identities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct Allocation {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub size: u32,
    #[serde(rename = "LogicalIDs", default, skip_serializing_if = "Vec::is_empty")]
    pub logical_ids: Vec<LogicalId>,
}

impl Allocation {
    pub fn with_size(size: u32) -> Self {
        Self {
            size,
            logical_ids: Vec::new(),
        }
    }

    pub fn with_logical_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<LogicalId>,
    {
        Self {
            size: 0,
            logical_ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether this allocation is a quorum of logical IDs.
    pub fn uses_logical_ids(&self) -> bool {
        !self.logical_ids.is_empty()
    }

    /// Number of instances the allocation asks for.
    pub fn desired_size(&self) -> u32 {
        if self.uses_logical_ids() {
            self.logical_ids.len() as u32
        } else {
            self.size
        }
    }
}

/// Stabilization policy for rolling updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct Updating {
    /// Continuous time the new instances must stay healthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<HumanDuration>,
    /// Consecutive healthy polls required.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_before_instance_destroy: Option<SkipBeforeInstanceDestroy>,
}

impl Updating {
    /// The duration threshold, treating "0s" as unset.
    pub fn stable_for(&self) -> Option<std::time::Duration> {
        self.duration
            .filter(|d| !d.is_zero())
            .map(|d| d.as_duration())
    }

    /// Whether rolling-update destroys should skip the flavor drain.
    pub fn skips_drain(&self) -> bool {
        self.skip_before_instance_destroy == Some(SkipBeforeInstanceDestroy::Drain)
    }
}

/// Steps that may be skipped before an instance is destroyed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SkipBeforeInstanceDestroy {
    Drain,
}

impl GroupConfig {
    /// Check the structural invariants of the document.
    pub fn validate(&self) -> CoreResult<()> {
        if self.instance.plugin.is_empty() {
            return Err(CoreError::validation("Instance plugin must be specified"));
        }
        if self.flavor.plugin.is_empty() {
            return Err(CoreError::validation("Flavor plugin must be specified"));
        }

        let alloc = &self.allocation;
        if alloc.size == 0 && alloc.logical_ids.is_empty() {
            return Err(CoreError::validation("Allocation must not be blank"));
        }
        if alloc.size > 0 && !alloc.logical_ids.is_empty() {
            return Err(CoreError::validation("Only one Allocation method may be used"));
        }

        let mut seen = HashSet::new();
        for id in &alloc.logical_ids {
            if id.is_empty() {
                return Err(CoreError::validation("Logical IDs must not be empty"));
            }
            if !seen.insert(id.as_str()) {
                return Err(CoreError::validation(format!(
                    "Logical ID '{id}' appears more than once"
                )));
            }
        }

        if self.updating.count > 0 && self.updating.stable_for().is_some() {
            return Err(CoreError::validation("Only one Updating method may be used"));
        }

        Ok(())
    }

    /// Fingerprint of the Instance and Flavor sections.
    pub fn instance_hash(&self) -> InstanceHash {
        InstanceHash::compute(&self.instance, &self.flavor)
    }
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}
