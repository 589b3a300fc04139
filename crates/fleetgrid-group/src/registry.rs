//! Group registry: the commit protocol and the `GroupPlugin` surface.
//!
//! Every mutation (commit, free, destroy, resize) runs under one
//! registry-wide lock. Each watched group gets a `GroupContext` holding its
//! settings, its supervisor, and the update currently in flight.
//!
//! ```text
//! commit(spec) ──► resolve ──► new group? ──yes──► spawn supervisor.run()
//!                                  │no                 "Managing N instances"
//!                                  ▼
//!                    supervisor.plan_update(old, new)
//!                                  │
//!              stop old update, install settings, spawn plan.run()
//!                                  │
//!                              explain()
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tracing::{error, info};

use fleet_core::{ControllerOptions, DestroyContext, GroupId, GroupSpec, InstanceId};
use fleetgrid_plugin::{
    FlavorLookup, GroupDescription, GroupPlugin, InstanceLookup, PluginResult,
};

use crate::error::{GroupError, GroupResult};
use crate::plan::UpdatePlan;
use crate::scaled::ScaledGroup;
use crate::settings::{GroupSettings, Resolver};
use crate::supervisor::Supervisor;

struct GroupContext {
    settings: RwLock<GroupSettings>,
    supervisor: Supervisor,
    scaled: Arc<ScaledGroup>,
    update: Mutex<Option<Arc<UpdatePlan>>>,
}

impl GroupContext {
    fn settings(&self) -> GroupSettings {
        self.settings.read().expect("settings lock").clone()
    }

    fn install(&self, settings: GroupSettings) {
        *self.settings.write().expect("settings lock") = settings.clone();
        self.scaled.update_settings(settings);
    }

    fn updating(&self) -> bool {
        self.update.lock().expect("update lock").is_some()
    }

    fn set_update(&self, plan: Arc<UpdatePlan>) {
        *self.update.lock().expect("update lock") = Some(plan);
    }

    fn stop_update(&self) {
        if let Some(plan) = self.update.lock().expect("update lock").take() {
            plan.stop();
        }
    }

    /// Clear the in-flight update if it is still `plan`.
    fn finish_update(&self, plan: &Arc<UpdatePlan>) {
        let mut update = self.update.lock().expect("update lock");
        if update.as_ref().is_some_and(|current| Arc::ptr_eq(current, plan)) {
            *update = None;
        }
    }

    fn stop(&self) {
        self.stop_update();
        self.supervisor.stop();
    }
}

/// The group controller.
pub struct GroupRegistry {
    resolver: Resolver,
    mutation: tokio::sync::Mutex<()>,
    groups: RwLock<HashMap<GroupId, Arc<GroupContext>>>,
}

impl GroupRegistry {
    pub fn new(instances: InstanceLookup, flavors: FlavorLookup, options: ControllerOptions) -> Self {
        Self {
            resolver: Resolver::new(instances, flavors, options),
            mutation: tokio::sync::Mutex::new(()),
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Create or update a group and return what will be done.
    ///
    /// Returns as soon as the work is started; progress shows up in
    /// `describe_group`. With `pretend`, nothing is changed.
    pub async fn commit_group(&self, spec: GroupSpec, pretend: bool) -> GroupResult<String> {
        let _guard = self.mutation.lock().await;
        self.commit(spec, pretend).await
    }

    /// Stop watching a group. Its instances keep running.
    pub async fn free_group(&self, id: &str) -> GroupResult<()> {
        let _guard = self.mutation.lock().await;
        let context = self.unregister(id)?;
        context.stop();
        info!(group = id, "stopped watching group");
        Ok(())
    }

    /// Stop watching a group and destroy its instances, self last.
    ///
    /// Stops at the first instance that fails to be destroyed.
    pub async fn destroy_group(&self, id: &str) -> GroupResult<()> {
        let _guard = self.mutation.lock().await;
        let context = self.unregister(id)?;
        context.stop();

        // Wait out a convergence pass that may still be provisioning.
        let _membership = context.scaled.lock_membership().await;
        let settings = context.settings();
        let mut instances = context.scaled.list().await?;
        settings.sort_self_last(&mut instances);
        info!(group = id, count = instances.len(), "destroying group");
        for instance in &instances {
            context
                .scaled
                .destroy(instance, DestroyContext::Termination)
                .await?;
        }
        Ok(())
    }

    pub async fn describe_group(&self, id: &str) -> GroupResult<GroupDescription> {
        let context = self.context(id)?;
        let instances = context.scaled.list().await?;
        Ok(GroupDescription {
            instances,
            converged: !context.updating(),
        })
    }

    /// Specs of every watched group, ordered by ID.
    pub async fn inspect_groups(&self) -> GroupResult<Vec<GroupSpec>> {
        let contexts: Vec<(GroupId, Arc<GroupContext>)> = {
            let groups = self.groups.read().expect("groups lock");
            groups.iter().map(|(id, c)| (id.clone(), c.clone())).collect()
        };

        let mut specs = contexts
            .into_iter()
            .map(|(id, context)| GroupSpec::new(id, &context.settings().config))
            .collect::<Result<Vec<_>, _>>()?;
        specs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(specs)
    }

    /// Instance count the group is configured for.
    pub async fn size(&self, id: &str) -> GroupResult<u32> {
        let context = self.context(id)?;
        Ok(context.settings().config.allocation.desired_size())
    }

    /// Recommit the group with a new size.
    pub async fn set_size(&self, id: &str, size: u32) -> GroupResult<()> {
        let _guard = self.mutation.lock().await;
        let context = self.context(id)?;
        let mut config = context.settings().config;
        if config.allocation.uses_logical_ids() {
            return Err(GroupError::Unsupported(format!(
                "Group '{id}' is allocated by logical ID and cannot be resized"
            )));
        }

        config.allocation.size = size;
        let explanation = self.commit(GroupSpec::new(id, &config)?, false).await?;
        info!(group = id, size, plan = %explanation, "resized group");
        Ok(())
    }

    /// Destroy specific members and shrink the group by as many.
    pub async fn destroy_instances(&self, id: &str, instances: &[InstanceId]) -> GroupResult<()> {
        let _guard = self.mutation.lock().await;
        let context = self.context(id)?;
        let mut config = context.settings().config;
        if config.allocation.uses_logical_ids() {
            return Err(GroupError::Unsupported(format!(
                "Group '{id}' is allocated by logical ID; instances cannot be removed"
            )));
        }

        let doomed: HashSet<&str> = instances.iter().map(InstanceId::as_str).collect();
        let size = config.allocation.size.saturating_sub(doomed.len() as u32);
        {
            let _membership = context.scaled.lock_membership().await;
            let members = context.scaled.list().await?;
            let member_ids: HashSet<&str> = members.iter().map(|m| m.id.as_str()).collect();
            if let Some(stranger) = doomed.iter().find(|i| !member_ids.contains(*i)) {
                return Err(GroupError::NotMember {
                    group: id.to_string(),
                    instance: stranger.to_string(),
                });
            }

            // Lower the target first so the supervisor does not replace them.
            let previous = context.scaled.target_size();
            context.scaled.set_target_size(size);
            for member in members.iter().filter(|m| doomed.contains(m.id.as_str())) {
                if let Err(e) = context
                    .scaled
                    .destroy(member, DestroyContext::Termination)
                    .await
                {
                    context.scaled.set_target_size(previous);
                    return Err(e);
                }
            }
        }

        config.allocation.size = size;
        self.commit(GroupSpec::new(id, &config)?, false).await?;
        Ok(())
    }

    /// Commit with the mutation lock already held.
    async fn commit(&self, spec: GroupSpec, pretend: bool) -> GroupResult<String> {
        let settings = self.resolver.validate(&spec).await?;
        let id = spec.id;

        let Some(context) = self.lookup(&id) else {
            let size = settings.config.allocation.desired_size();
            if !pretend {
                let scaled = Arc::new(ScaledGroup::new(id.clone(), settings.clone()));
                let supervisor = Supervisor::new(scaled.clone(), &settings);
                self.register(
                    &id,
                    Arc::new(GroupContext {
                        settings: RwLock::new(settings),
                        supervisor: supervisor.clone(),
                        scaled,
                        update: Mutex::new(None),
                    }),
                );
                tokio::spawn(async move { supervisor.run().await });
                info!(group = %id, size, "watching group");
            }
            return Ok(format!("Managing {size} instances"));
        };

        let plan = context
            .supervisor
            .plan_update(&context.settings(), &settings)
            .await?;
        let explanation = plan.explain();
        info!(group = %id, pretend, plan = %explanation, "computed update plan");
        if pretend {
            return Ok(explanation);
        }

        context.stop_update();
        context.install(settings);
        if !matches!(plan, UpdatePlan::Noop) {
            let plan = Arc::new(plan);
            context.set_update(plan.clone());
            tokio::spawn(async move {
                match plan.run().await {
                    Ok(()) => info!(group = %id, "update complete"),
                    Err(e) => error!(group = %id, error = %e, "update failed"),
                }
                context.finish_update(&plan);
            });
        }
        Ok(explanation)
    }

    fn lookup(&self, id: &str) -> Option<Arc<GroupContext>> {
        self.groups.read().expect("groups lock").get(id).cloned()
    }

    fn context(&self, id: &str) -> GroupResult<Arc<GroupContext>> {
        self.lookup(id)
            .ok_or_else(|| GroupError::NotWatched(id.to_string()))
    }

    /// # Panics
    ///
    /// If `id` is already registered; callers hold the mutation lock and
    /// check first.
    fn register(&self, id: &str, context: Arc<GroupContext>) {
        let mut groups = self.groups.write().expect("groups lock");
        if groups.contains_key(id) {
            panic!("group '{id}' is already registered");
        }
        groups.insert(id.to_string(), context);
    }

    fn unregister(&self, id: &str) -> GroupResult<Arc<GroupContext>> {
        self.groups
            .write()
            .expect("groups lock")
            .remove(id)
            .ok_or_else(|| GroupError::NotWatched(id.to_string()))
    }
}

#[async_trait]
impl GroupPlugin for GroupRegistry {
    async fn commit_group(&self, spec: GroupSpec, pretend: bool) -> PluginResult<String> {
        Ok(GroupRegistry::commit_group(self, spec, pretend).await?)
    }

    async fn free_group(&self, id: &str) -> PluginResult<()> {
        Ok(GroupRegistry::free_group(self, id).await?)
    }

    async fn describe_group(&self, id: &str) -> PluginResult<GroupDescription> {
        Ok(GroupRegistry::describe_group(self, id).await?)
    }

    async fn destroy_group(&self, id: &str) -> PluginResult<()> {
        Ok(GroupRegistry::destroy_group(self, id).await?)
    }

    async fn inspect_groups(&self) -> PluginResult<Vec<GroupSpec>> {
        Ok(GroupRegistry::inspect_groups(self).await?)
    }

    async fn destroy_instances(&self, id: &str, instances: &[InstanceId]) -> PluginResult<()> {
        Ok(GroupRegistry::destroy_instances(self, id, instances).await?)
    }

    async fn size(&self, id: &str) -> PluginResult<u32> {
        Ok(GroupRegistry::size(self, id).await?)
    }

    async fn set_size(&self, id: &str, size: u32) -> PluginResult<()> {
        Ok(GroupRegistry::set_size(self, id, size).await?)
    }
}
