//! Plugin lookup by name.
//!
//! The controller receives lookups as plain functions so that callers can
//! back them with anything (a static map, a discovery directory, RPC
//! clients). `PluginSet` is the in-process map used by `fleetd` and tests.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::{PluginError, PluginResult};
use crate::flavor::FlavorPlugin;
use crate::instance::InstancePlugin;

/// Resolves an instance plugin by name.
pub type InstanceLookup =
    Arc<dyn Fn(&str) -> PluginResult<Arc<dyn InstancePlugin>> + Send + Sync>;

/// Resolves a flavor plugin by name.
pub type FlavorLookup = Arc<dyn Fn(&str) -> PluginResult<Arc<dyn FlavorPlugin>> + Send + Sync>;

/// Named instance and flavor plugins.
#[derive(Clone, Default)]
pub struct PluginSet {
    instances: Arc<RwLock<HashMap<String, Arc<dyn InstancePlugin>>>>,
    flavors: Arc<RwLock<HashMap<String, Arc<dyn FlavorPlugin>>>>,
}

impl PluginSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an instance plugin.
    pub fn register_instance(&self, name: &str, plugin: Arc<dyn InstancePlugin>) {
        let mut instances = self.instances.write().expect("instances lock");
        debug!(plugin = name, "registered instance plugin");
        instances.insert(name.to_string(), plugin);
    }

    /// Register (or replace) a flavor plugin.
    pub fn register_flavor(&self, name: &str, plugin: Arc<dyn FlavorPlugin>) {
        let mut flavors = self.flavors.write().expect("flavors lock");
        debug!(plugin = name, "registered flavor plugin");
        flavors.insert(name.to_string(), plugin);
    }

    pub fn instance(&self, name: &str) -> PluginResult<Arc<dyn InstancePlugin>> {
        let instances = self.instances.read().expect("instances lock");
        instances
            .get(name)
            .cloned()
            .ok_or_else(|| PluginError::NotFound(name.to_string()))
    }

    pub fn flavor(&self, name: &str) -> PluginResult<Arc<dyn FlavorPlugin>> {
        let flavors = self.flavors.read().expect("flavors lock");
        flavors
            .get(name)
            .cloned()
            .ok_or_else(|| PluginError::NotFound(name.to_string()))
    }

    pub fn instance_lookup(&self) -> InstanceLookup {
        let set = self.clone();
        Arc::new(move |name| set.instance(name))
    }

    pub fn flavor_lookup(&self) -> FlavorLookup {
        let set = self.clone();
        Arc::new(move |name| set.flavor(name))
    }
}
