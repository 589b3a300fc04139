//! In-memory instance plugin.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use fleet_core::{DestroyContext, InstanceDescription, InstanceId, Tags};
use fleetgrid_plugin::{InstancePlugin, InstanceSpec, PluginError, PluginResult};

#[derive(Default)]
struct State {
    next_id: u64,
    instances: BTreeMap<InstanceId, InstanceDescription>,
    provisioned: Vec<InstanceSpec>,
    destroyed: Vec<(InstanceId, DestroyContext)>,
    fail_provision: bool,
    provision_delay: Duration,
    fail_destroy: HashSet<InstanceId>,
    hide_logical_ids: bool,
    invalid: Option<String>,
}

/// Instance plugin backed by a map. IDs are `instance-0001`, `instance-0002`,
/// ... so lexical order is creation order.
#[derive(Default)]
pub struct FakeInstances {
    state: Mutex<State>,
}

impl FakeInstances {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an instance as if it had been created out-of-band.
    pub fn insert(&self, desc: InstanceDescription) {
        let mut state = self.state.lock().expect("fake instances lock");
        state.instances.insert(desc.id.clone(), desc);
    }

    /// Current instances, ordered by ID.
    pub fn instances(&self) -> Vec<InstanceDescription> {
        let state = self.state.lock().expect("fake instances lock");
        state.instances.values().cloned().collect()
    }

    /// Every spec passed to `provision`, in call order.
    pub fn provisioned(&self) -> Vec<InstanceSpec> {
        let state = self.state.lock().expect("fake instances lock");
        state.provisioned.clone()
    }

    /// Every successful `destroy`, in call order.
    pub fn destroyed(&self) -> Vec<(InstanceId, DestroyContext)> {
        let state = self.state.lock().expect("fake instances lock");
        state.destroyed.clone()
    }

    pub fn fail_provision(&self, fail: bool) {
        self.state.lock().expect("fake instances lock").fail_provision = fail;
    }

    /// Make every `provision` take `delay` before the instance appears.
    pub fn provision_delay(&self, delay: Duration) {
        self.state.lock().expect("fake instances lock").provision_delay = delay;
    }

    /// Make `destroy` fail for one instance.
    pub fn fail_destroy(&self, id: &str) {
        let mut state = self.state.lock().expect("fake instances lock");
        state.fail_destroy.insert(id.to_string());
    }

    /// Report logical IDs only through tags, like plugins that cannot
    /// round-trip the structured field.
    pub fn hide_logical_ids(&self, hide: bool) {
        self.state.lock().expect("fake instances lock").hide_logical_ids = hide;
    }

    /// Make `validate` reject every document with `reason`.
    pub fn reject_properties(&self, reason: &str) {
        self.state.lock().expect("fake instances lock").invalid = Some(reason.to_string());
    }
}

#[async_trait]
impl InstancePlugin for FakeInstances {
    async fn validate(&self, _properties: &Value) -> PluginResult<()> {
        let state = self.state.lock().expect("fake instances lock");
        match &state.invalid {
            Some(reason) => Err(PluginError::InvalidProperties(reason.clone())),
            None => Ok(()),
        }
    }

    async fn provision(&self, spec: InstanceSpec) -> PluginResult<InstanceId> {
        let delay = self.state.lock().expect("fake instances lock").provision_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().expect("fake instances lock");
        if state.fail_provision {
            return Err(PluginError::failed("provision refused"));
        }

        state.next_id += 1;
        let id = format!("instance-{:04}", state.next_id);
        let desc = InstanceDescription {
            id: id.clone(),
            logical_id: spec.logical_id.clone(),
            tags: spec.tags.clone(),
        };
        state.instances.insert(id.clone(), desc);
        state.provisioned.push(spec);
        debug!(instance = %id, "fake instance provisioned");
        Ok(id)
    }

    async fn label(&self, id: &str, labels: &Tags) -> PluginResult<()> {
        let mut state = self.state.lock().expect("fake instances lock");
        let desc = state
            .instances
            .get_mut(id)
            .ok_or_else(|| PluginError::failed(format!("no such instance: {id}")))?;
        desc.tags
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn destroy(&self, id: &str, context: DestroyContext) -> PluginResult<()> {
        let mut state = self.state.lock().expect("fake instances lock");
        if state.fail_destroy.contains(id) {
            return Err(PluginError::failed(format!("destroy refused: {id}")));
        }
        if state.instances.remove(id).is_none() {
            return Err(PluginError::failed(format!("no such instance: {id}")));
        }
        state.destroyed.push((id.to_string(), context));
        debug!(instance = %id, %context, "fake instance destroyed");
        Ok(())
    }

    async fn describe_instances(
        &self,
        tags: &Tags,
        _properties: bool,
    ) -> PluginResult<Vec<InstanceDescription>> {
        let state = self.state.lock().expect("fake instances lock");
        Ok(state
            .instances
            .values()
            .filter(|desc| tags.iter().all(|(k, v)| desc.tags.get(k) == Some(v)))
            .cloned()
            .map(|mut desc| {
                if state.hide_logical_ids {
                    desc.logical_id = None;
                }
                desc
            })
            .collect())
    }
}
