//! Config fingerprints.
//!
//! An `InstanceHash` is the single source of truth for "does this running
//! instance match the desired configuration". It covers only the
//! `Instance` and `Flavor` sections of a group config, so allocation and
//! update-policy changes never trigger a rolling update.
//!
//! ```text
//! canonical_json(Instance) ++ canonical_json(Flavor) → SHA1 → base32 → lowercase
//! ```

use serde_json::Value;
use sha1::{Digest, Sha1};

use crate::group::PluginSpec;

/// Stable digest of a group's Instance + Flavor configuration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceHash(String);

impl InstanceHash {
    /// Fingerprint an instance/flavor pair.
    pub fn compute(instance: &PluginSpec, flavor: &PluginSpec) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(canonical_json(&plugin_document(instance)).as_bytes());
        hasher.update(canonical_json(&plugin_document(flavor)).as_bytes());
        let digest = hasher.finalize();
        Self(data_encoding::BASE32_NOPAD.encode(&digest).to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether an instance tagged with `hash` matches this fingerprint.
    pub fn matches(&self, hash: Option<&str>) -> bool {
        hash == Some(self.0.as_str())
    }
}

impl std::fmt::Display for InstanceHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn plugin_document(spec: &PluginSpec) -> Value {
    serde_json::json!({
        "Plugin": spec.plugin,
        "Properties": spec.properties,
    })
}

/// Serialize with object keys sorted at every level and no whitespace.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            let inner: Vec<String> = pairs
                .iter()
                .map(|(k, v)| format!("{}:{}", Value::String((*k).clone()), canonical_json(v)))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        other => other.to_string(),
    }
}
