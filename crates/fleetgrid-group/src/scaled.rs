//! The scaled group adapter.
//!
//! `ScaledGroup` puts one instance plugin and one flavor plugin behind the
//! handful of operations the supervisors and rolling updates need. Every
//! operation reads the latest settings snapshot when it is called, so a
//! running supervisor picks up a new commit without restarting. The
//! settings lock is never held across a plugin call.

use std::sync::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use fleet_core::{
    CONFIG_HASH_TAG, DestroyContext, GROUP_TAG, GroupId, Health, InstanceDescription,
    InstanceHash, LOGICAL_ID_TAG, LogicalId, SelfUpdatePolicy, Tags,
};
use fleetgrid_plugin::{Index, InstanceSpec};

use crate::error::GroupResult;
use crate::settings::GroupSettings;

pub struct ScaledGroup {
    id: GroupId,
    settings: RwLock<GroupSettings>,
    member_tags: Tags,
    /// Size the supervisor is converging to. Used as the sequence of new
    /// instances.
    target: AtomicU32,
    membership: Mutex<()>,
}

impl ScaledGroup {
    pub fn new(id: impl Into<GroupId>, settings: GroupSettings) -> Self {
        let id = id.into();
        let member_tags = Tags::from([(GROUP_TAG.to_string(), id.clone())]);
        let target = AtomicU32::new(settings.config.allocation.desired_size());
        Self {
            id,
            settings: RwLock::new(settings),
            member_tags,
            target,
            membership: Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Snapshot of the current settings.
    pub fn settings(&self) -> GroupSettings {
        self.settings.read().expect("settings lock").clone()
    }

    pub fn update_settings(&self, settings: GroupSettings) {
        *self.settings.write().expect("settings lock") = settings;
    }

    pub fn target_size(&self) -> u32 {
        self.target.load(Ordering::SeqCst)
    }

    pub fn set_target_size(&self, size: u32) {
        self.target.store(size, Ordering::SeqCst);
    }

    /// Held for a whole convergence pass or explicit removal so the two
    /// never act on the same membership at once.
    pub async fn lock_membership(&self) -> MutexGuard<'_, ()> {
        self.membership.lock().await
    }

    /// Create one instance. Failures are logged, not returned: the next
    /// convergence pass tries again.
    pub async fn create_one(&self, logical_id: Option<LogicalId>) {
        let settings = self.settings();
        let config = &settings.config;

        let mut tags = self.member_tags.clone();
        tags.insert(
            CONFIG_HASH_TAG.to_string(),
            settings.instance_hash().to_string(),
        );
        if let Some(lid) = &logical_id {
            tags.insert(LOGICAL_ID_TAG.to_string(), lid.clone());
        }

        let spec = InstanceSpec {
            properties: config.instance.properties.clone(),
            tags: tags.clone(),
            logical_id: logical_id.clone(),
            ..Default::default()
        };
        let index = Index {
            group: self.id.clone(),
            sequence: self.target_size(),
        };

        let mut spec = match settings
            .flavor_plugin
            .prepare(&config.flavor.properties, spec, &config.allocation, index)
            .await
        {
            Ok(spec) => spec,
            Err(e) => {
                error!(group = %self.id, error = %e, "failed to prepare instance");
                return;
            }
        };
        // The flavor may rewrite tags but must not drop membership.
        spec.tags.extend(tags);

        match settings.instance_plugin.provision(spec).await {
            Ok(instance) => info!(
                group = %self.id,
                instance = %instance,
                logical_id = logical_id.as_deref().unwrap_or(""),
                "created instance"
            ),
            Err(e) => error!(group = %self.id, error = %e, "failed to provision instance"),
        }
    }

    /// Health according to the flavor. A failed check is `Unknown`.
    pub async fn health(&self, instance: &InstanceDescription) -> Health {
        let settings = self.settings();
        match settings
            .flavor_plugin
            .healthy(&settings.config.flavor.properties, instance)
            .await
        {
            Ok(health) => health,
            Err(e) => {
                warn!(group = %self.id, instance = %instance.id, error = %e, "health check failed");
                Health::Unknown
            }
        }
    }

    /// Drain (unless skipped) and destroy one instance.
    ///
    /// A rolling update leaves self alone under `SelfUpdatePolicy::Never`.
    /// A drain failure stops a rolling update but not a termination.
    pub async fn destroy(
        &self,
        instance: &InstanceDescription,
        context: DestroyContext,
    ) -> GroupResult<()> {
        let settings = self.settings();
        let rolling = context == DestroyContext::RollingUpdate;

        if rolling
            && settings.is_self(instance)
            && settings.options.self_update == SelfUpdatePolicy::Never
        {
            info!(group = %self.id, instance = %instance.id, "not destroying self during rolling update");
            return Ok(());
        }

        if rolling && settings.config.updating.skips_drain() {
            debug!(group = %self.id, instance = %instance.id, "skipping drain");
        } else if let Err(e) = settings
            .flavor_plugin
            .drain(&settings.config.flavor.properties, instance)
            .await
        {
            if rolling {
                error!(group = %self.id, instance = %instance.id, error = %e, "drain failed, aborting destroy");
                return Err(e.into());
            }
            warn!(group = %self.id, instance = %instance.id, error = %e, "drain failed, destroying anyway");
        }

        settings
            .instance_plugin
            .destroy(&instance.id, context)
            .await?;
        info!(group = %self.id, instance = %instance.id, %context, "destroyed instance");
        Ok(())
    }

    /// Instances carrying this group's membership tag.
    pub async fn list(&self) -> GroupResult<Vec<InstanceDescription>> {
        let settings = self.settings();
        let mut instances = settings
            .instance_plugin
            .describe_instances(&self.member_tags, true)
            .await?;
        for instance in &mut instances {
            if instance.logical_id.is_none() {
                instance.logical_id = instance.tags.get(LOGICAL_ID_TAG).cloned();
            }
        }
        Ok(instances)
    }

    /// Replace the bootstrap placeholder hash with the current one.
    pub async fn label(&self) -> GroupResult<()> {
        let settings = self.settings();
        let labels = Tags::from([(
            CONFIG_HASH_TAG.to_string(),
            settings.instance_hash().to_string(),
        )]);

        for instance in self.list().await? {
            if instance.needs_label() {
                settings.instance_plugin.label(&instance.id, &labels).await?;
                info!(group = %self.id, instance = %instance.id, "labelled bootstrap instance");
            }
        }
        Ok(())
    }

    /// `list`, relabelling first if any instance still carries the
    /// bootstrap hash.
    pub async fn label_and_list(&self) -> GroupResult<Vec<InstanceDescription>> {
        let instances = self.list().await?;
        if !instances.iter().any(InstanceDescription::needs_label) {
            return Ok(instances);
        }
        self.label().await?;
        self.list().await
    }
}

/// Partition into (matching `hash`, not matching `hash`).
pub fn split_by_hash(
    instances: Vec<InstanceDescription>,
    hash: &InstanceHash,
) -> (Vec<InstanceDescription>, Vec<InstanceDescription>) {
    instances
        .into_iter()
        .partition(|instance| hash.matches(instance.config_hash()))
}
