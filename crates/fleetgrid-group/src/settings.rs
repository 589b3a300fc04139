//! Group settings resolution.
//!
//! Turns a submitted `GroupSpec` into `GroupSettings`: the decoded config
//! plus the live plugins it names. Nothing is returned unless every check
//! passes.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use fleet_core::{
    ControllerOptions, GroupConfig, GroupSpec, InstanceDescription, InstanceHash, LogicalId,
};
use fleetgrid_plugin::{FlavorLookup, FlavorPlugin, InstanceLookup, InstancePlugin};

use crate::error::{GroupError, GroupResult};

/// Everything needed to act on one group, rebuilt on every commit.
#[derive(Clone)]
pub struct GroupSettings {
    /// Logical ID of the node running this controller.
    pub self_id: Option<LogicalId>,
    pub instance_plugin: Arc<dyn InstancePlugin>,
    pub flavor_plugin: Arc<dyn FlavorPlugin>,
    pub config: GroupConfig,
    pub options: ControllerOptions,
}

impl fmt::Debug for GroupSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupSettings")
            .field("self_id", &self.self_id)
            .field("config", &self.config)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl GroupSettings {
    pub fn instance_hash(&self) -> InstanceHash {
        self.config.instance_hash()
    }

    /// Whether `instance` is the node running this controller.
    pub fn is_self(&self, instance: &InstanceDescription) -> bool {
        match &self.self_id {
            Some(id) => instance.effective_logical_id() == Some(id.as_str()),
            None => false,
        }
    }

    /// Sort by instance ID, with self always last.
    pub fn sort_self_last(&self, instances: &mut [InstanceDescription]) {
        instances.sort_by(|a, b| match (self.is_self(a), self.is_self(b)) {
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            _ => a.id.cmp(&b.id),
        });
    }
}

/// Validates group specs and resolves their plugins.
#[derive(Clone)]
pub struct Resolver {
    instances: InstanceLookup,
    flavors: FlavorLookup,
    options: ControllerOptions,
}

impl Resolver {
    pub fn new(instances: InstanceLookup, flavors: FlavorLookup, options: ControllerOptions) -> Self {
        Self {
            instances,
            flavors,
            options,
        }
    }

    pub async fn validate(&self, spec: &GroupSpec) -> GroupResult<GroupSettings> {
        if spec.id.is_empty() {
            return Err(GroupError::BlankId);
        }

        let config = spec.config()?;
        config.validate()?;

        let flavor = (self.flavors)(&config.flavor.plugin)?;
        flavor
            .validate(&config.flavor.properties, &config.allocation)
            .await?;

        let instance = (self.instances)(&config.instance.plugin)?;
        instance.validate(&config.instance.properties).await?;

        Ok(GroupSettings {
            self_id: self.options.self_id.clone(),
            instance_plugin: instance,
            flavor_plugin: flavor,
            config,
            options: self.options.clone(),
        })
    }
}
