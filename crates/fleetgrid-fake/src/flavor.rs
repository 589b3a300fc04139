//! In-memory flavor plugin.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use fleet_core::{Allocation, Health, InstanceDescription, InstanceId};
use fleetgrid_plugin::{FlavorPlugin, Index, InstanceSpec, PluginError, PluginResult};

struct State {
    default_health: Health,
    health: HashMap<InstanceId, Health>,
    prepared: Vec<Index>,
    drained: Vec<InstanceId>,
    fail_drain: bool,
    fail_health: bool,
    invalid: Option<String>,
}

/// Flavor plugin whose health answers are set by the test.
pub struct FakeFlavor {
    state: Mutex<State>,
}

impl Default for FakeFlavor {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeFlavor {
    /// Every instance reports healthy until told otherwise.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                default_health: Health::Healthy,
                health: HashMap::new(),
                prepared: Vec::new(),
                drained: Vec::new(),
                fail_drain: false,
                fail_health: false,
                invalid: None,
            }),
        }
    }

    /// Health reported for instances without an explicit override.
    pub fn set_default_health(&self, health: Health) {
        self.state.lock().expect("fake flavor lock").default_health = health;
    }

    pub fn set_health(&self, id: &str, health: Health) {
        let mut state = self.state.lock().expect("fake flavor lock");
        state.health.insert(id.to_string(), health);
    }

    pub fn fail_drain(&self, fail: bool) {
        self.state.lock().expect("fake flavor lock").fail_drain = fail;
    }

    /// Make `healthy` return an error instead of an answer.
    pub fn fail_health(&self, fail: bool) {
        self.state.lock().expect("fake flavor lock").fail_health = fail;
    }

    /// Make `validate` reject every document with `reason`.
    pub fn reject_properties(&self, reason: &str) {
        self.state.lock().expect("fake flavor lock").invalid = Some(reason.to_string());
    }

    /// Indexes passed to `prepare`, in call order.
    pub fn prepared(&self) -> Vec<Index> {
        self.state.lock().expect("fake flavor lock").prepared.clone()
    }

    /// Instances passed to `drain`, in call order (including failed drains).
    pub fn drained(&self) -> Vec<InstanceId> {
        self.state.lock().expect("fake flavor lock").drained.clone()
    }
}

#[async_trait]
impl FlavorPlugin for FakeFlavor {
    async fn validate(&self, _properties: &Value, _allocation: &Allocation) -> PluginResult<()> {
        let state = self.state.lock().expect("fake flavor lock");
        match &state.invalid {
            Some(reason) => Err(PluginError::InvalidProperties(reason.clone())),
            None => Ok(()),
        }
    }

    async fn prepare(
        &self,
        _properties: &Value,
        mut spec: InstanceSpec,
        _allocation: &Allocation,
        index: Index,
    ) -> PluginResult<InstanceSpec> {
        let mut state = self.state.lock().expect("fake flavor lock");
        spec.init = format!("join {} #{}", index.group, index.sequence);
        state.prepared.push(index);
        Ok(spec)
    }

    async fn healthy(
        &self,
        _properties: &Value,
        instance: &InstanceDescription,
    ) -> PluginResult<Health> {
        let state = self.state.lock().expect("fake flavor lock");
        if state.fail_health {
            return Err(PluginError::Connect("flavor unreachable".to_string()));
        }
        Ok(state
            .health
            .get(&instance.id)
            .copied()
            .unwrap_or(state.default_health))
    }

    async fn drain(&self, _properties: &Value, instance: &InstanceDescription) -> PluginResult<()> {
        let mut state = self.state.lock().expect("fake flavor lock");
        state.drained.push(instance.id.clone());
        if state.fail_drain {
            return Err(PluginError::failed(format!("drain refused: {}", instance.id)));
        }
        Ok(())
    }
}
