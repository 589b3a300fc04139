//! Shared fixtures for unit tests.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use fleet_core::{Allocation, ControllerOptions, GroupConfig, HumanDuration, PluginSpec};
use fleetgrid_fake::{FakeFlavor, FakeInstances};
use fleetgrid_plugin::PluginSet;

use crate::settings::GroupSettings;

pub(crate) struct Plugins {
    pub set: PluginSet,
    pub instances: Arc<FakeInstances>,
    pub flavor: Arc<FakeFlavor>,
}

/// Fake plugins registered as "fake" under both kinds.
pub(crate) fn plugins() -> Plugins {
    let set = PluginSet::new();
    let instances = Arc::new(FakeInstances::new());
    let flavor = Arc::new(FakeFlavor::new());
    set.register_instance("fake", instances.clone());
    set.register_flavor("fake", flavor.clone());
    Plugins {
        set,
        instances,
        flavor,
    }
}

pub(crate) fn config(allocation: Allocation) -> GroupConfig {
    GroupConfig {
        instance: PluginSpec {
            plugin: "fake".to_string(),
            properties: json!({"image": "v1"}),
        },
        flavor: PluginSpec {
            plugin: "fake".to_string(),
            properties: json!({"role": "worker"}),
        },
        allocation,
        updating: Default::default(),
    }
}

pub(crate) fn options() -> ControllerOptions {
    ControllerOptions {
        poll_interval: HumanDuration::from_millis(5),
        ..Default::default()
    }
}

pub(crate) fn settings(p: &Plugins, config: GroupConfig, options: ControllerOptions) -> GroupSettings {
    GroupSettings {
        self_id: options.self_id.clone(),
        instance_plugin: p.instances.clone(),
        flavor_plugin: p.flavor.clone(),
        config,
        options,
    }
}

/// Poll `cond` until it holds, failing the test after two seconds.
pub(crate) async fn eventually(what: &str, cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
