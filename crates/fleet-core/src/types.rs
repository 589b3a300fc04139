//! Identifiers, well-known tags, and instance descriptions.
//!
//! Instance plugins report what they manage as `InstanceDescription`s. The
//! controller recognises its own instances purely through tags: a group
//! membership tag, the config fingerprint the instance was created from,
//! and (for quorum groups) the logical identity it fills.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Identifier of a group.
pub type GroupId = String;

/// Identifier assigned to an instance by its instance plugin.
pub type InstanceId = String;

/// Stable identity of one member of a quorum group (e.g. a fixed IP).
pub type LogicalId = String;

/// Tag key/value pairs attached to instances.
pub type Tags = BTreeMap<String, String>;

// ── Well-known tags ───────────────────────────────────────────────

/// Tag identifying the group an instance belongs to.
pub const GROUP_TAG: &str = "fleet.group";

/// Tag holding the `InstanceHash` of the config an instance was created from.
pub const CONFIG_HASH_TAG: &str = "fleet.config.hash";

/// Tag holding the logical ID an instance fills.
pub const LOGICAL_ID_TAG: &str = "fleet.logical_id";

/// Placeholder config hash carried by instances created out-of-band
/// (e.g. the bootstrap node) before the group was being watched.
pub const BOOTSTRAP_CONFIG_HASH: &str = "bootstrap";

// ── Instances ─────────────────────────────────────────────────────

/// An instance as reported by an instance plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceDescription {
    #[serde(rename = "ID")]
    pub id: InstanceId,
    #[serde(rename = "LogicalID", default, skip_serializing_if = "Option::is_none")]
    pub logical_id: Option<LogicalId>,
    #[serde(default)]
    pub tags: Tags,
}

impl InstanceDescription {
    pub fn new(id: impl Into<InstanceId>) -> Self {
        Self {
            id: id.into(),
            logical_id: None,
            tags: Tags::new(),
        }
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_logical_id(mut self, logical_id: &str) -> Self {
        self.logical_id = Some(logical_id.to_string());
        self
    }

    /// The logical ID, from the structured field or else the logical-id tag.
    pub fn effective_logical_id(&self) -> Option<&str> {
        self.logical_id
            .as_deref()
            .or_else(|| self.tags.get(LOGICAL_ID_TAG).map(String::as_str))
    }

    /// The config fingerprint this instance was created from, if tagged.
    pub fn config_hash(&self) -> Option<&str> {
        self.tags.get(CONFIG_HASH_TAG).map(String::as_str)
    }

    /// Whether the instance still carries the bootstrap placeholder hash.
    pub fn needs_label(&self) -> bool {
        self.config_hash() == Some(BOOTSTRAP_CONFIG_HASH)
    }
}

/// Health of an instance as judged by its flavor plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    Unhealthy,
    Unknown,
}

/// Why an instance is being destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestroyContext {
    /// Replaced because it no longer matches the desired config.
    RollingUpdate,
    /// Removed because the group shrank or is being destroyed.
    Termination,
}

impl std::fmt::Display for DestroyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RollingUpdate => f.write_str("rolling_update"),
            Self::Termination => f.write_str("termination"),
        }
    }
}

/// Whether a rolling update may replace the instance running the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelfUpdatePolicy {
    /// Self is skipped; the update ends once every peer is replaced.
    #[default]
    Never,
    /// Self is replaced as the final step of the update.
    Last,
}
