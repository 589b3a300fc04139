//! Quorum: keeps exactly one instance per logical ID.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use fleet_core::{DestroyContext, LogicalId};

use crate::error::{GroupError, GroupResult};
use crate::plan::UpdatePlan;
use crate::rolling::RollingUpdate;
use crate::scaled::{ScaledGroup, split_by_hash};
use crate::settings::GroupSettings;
use crate::supervisor::{fan_out, poll_loop};

pub struct Quorum {
    scaled: Arc<ScaledGroup>,
    logical_ids: Vec<LogicalId>,
    stop: watch::Sender<bool>,
}

impl Quorum {
    pub fn new(scaled: Arc<ScaledGroup>, logical_ids: Vec<LogicalId>) -> Self {
        let (stop, _) = watch::channel(false);
        scaled.set_target_size(logical_ids.len() as u32);
        Self {
            scaled,
            logical_ids,
            stop,
        }
    }

    pub fn id(&self) -> &str {
        self.scaled.id()
    }

    pub fn size(&self) -> u32 {
        self.logical_ids.len() as u32
    }

    pub async fn run(&self) {
        let poll = self.scaled.settings().options.poll_interval();
        poll_loop(self.id(), poll, self.stop.subscribe(), || self.converge()).await;
    }

    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// One convergence pass: destroy instances outside the ID set and
    /// create the IDs that have no instance.
    pub async fn converge(&self) {
        let group = self.id();
        let _membership = self.scaled.lock_membership().await;
        if *self.stop.borrow() {
            return;
        }
        let max_parallel = self.scaled.settings().options.max_parallel_num;

        let instances = match self.scaled.label_and_list().await {
            Ok(instances) => instances,
            Err(e) => {
                warn!(group, error = %e, "failed to list instances");
                return;
            }
        };

        let wanted: HashSet<&str> = self.logical_ids.iter().map(String::as_str).collect();
        let present: HashSet<&str> = instances
            .iter()
            .filter_map(|i| i.effective_logical_id())
            .collect();

        let missing: Vec<LogicalId> = self
            .logical_ids
            .iter()
            .filter(|id| !present.contains(id.as_str()))
            .cloned()
            .collect();
        let unknown: Vec<_> = instances
            .iter()
            .filter(|i| i.effective_logical_id().is_none_or(|id| !wanted.contains(id)))
            .cloned()
            .collect();

        if missing.is_empty() && unknown.is_empty() {
            debug!(group, size = instances.len(), "quorum is complete");
            return;
        }
        info!(
            group,
            missing = ?missing,
            unknown = unknown.len(),
            "reconciling quorum membership"
        );

        let destroyer = self.scaled.clone();
        let creator = self.scaled.clone();
        tokio::join!(
            fan_out(max_parallel, unknown, move |instance| {
                let scaled = destroyer.clone();
                async move {
                    if let Err(e) = scaled.destroy(&instance, DestroyContext::Termination).await {
                        warn!(group = scaled.id(), instance = %instance.id, error = %e, "failed to destroy instance");
                    }
                }
            }),
            fan_out(max_parallel, missing, move |logical_id| {
                let scaled = creator.clone();
                async move { scaled.create_one(Some(logical_id)).await }
            }),
        );
    }

    pub async fn plan_update(
        &self,
        old: &GroupSettings,
        new: &GroupSettings,
    ) -> GroupResult<UpdatePlan> {
        let new_ids = &new.config.allocation.logical_ids;
        if new_ids.is_empty() {
            return Err(GroupError::Unsupported(
                "Changing the allocation method of a group is not supported".to_string(),
            ));
        }

        let old_set: HashSet<&LogicalId> = old.config.allocation.logical_ids.iter().collect();
        let new_set: HashSet<&LogicalId> = new_ids.iter().collect();
        if old_set != new_set {
            return Err(GroupError::Unsupported(
                "Logical ID changes to a quorum is not currently supported".to_string(),
            ));
        }

        let instances = self.scaled.label_and_list().await?;
        let (_, undesired) = split_by_hash(instances, &new.instance_hash());
        if undesired.is_empty() {
            return Ok(UpdatePlan::Noop);
        }
        Ok(UpdatePlan::Rolling(RollingUpdate::new(
            self.scaled.clone(),
            new.clone(),
            undesired.len(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{Plugins, config, options, plugins, settings};
    use fleet_core::{Allocation, CONFIG_HASH_TAG, GROUP_TAG, InstanceDescription, LOGICAL_ID_TAG};
    use serde_json::json;

    fn quorum(p: &Plugins, ids: &[&str]) -> Quorum {
        let s = settings(p, config(Allocation::with_logical_ids(ids.iter().copied())), options());
        Quorum::new(
            Arc::new(ScaledGroup::new("managers", s)),
            ids.iter().map(|id| id.to_string()).collect(),
        )
    }

    fn member(id: &str, logical_id: &str, hash: &str) -> InstanceDescription {
        InstanceDescription::new(id)
            .with_tag(GROUP_TAG, "managers")
            .with_tag(CONFIG_HASH_TAG, hash)
            .with_tag(LOGICAL_ID_TAG, logical_id)
    }

    #[tokio::test]
    async fn converge_replaces_exactly_the_wrong_members() {
        let p = plugins();
        let quorum = quorum(&p, &["A", "B", "C"]);
        let hash = quorum.scaled.settings().instance_hash().to_string();
        for (id, lid) in [("i-a", "A"), ("i-b", "B"), ("i-d", "D")] {
            p.instances.insert(member(id, lid, &hash));
        }

        quorum.converge().await;

        let destroyed: Vec<_> = p.instances.destroyed().into_iter().map(|(id, _)| id).collect();
        assert_eq!(destroyed, ["i-d"]);
        let provisioned = p.instances.provisioned();
        assert_eq!(provisioned.len(), 1);
        assert_eq!(provisioned[0].logical_id.as_deref(), Some("C"));

        let mut lids: Vec<_> = p
            .instances
            .instances()
            .iter()
            .filter_map(|i| i.effective_logical_id().map(str::to_string))
            .collect();
        lids.sort();
        assert_eq!(lids, ["A", "B", "C"]);
    }

    #[tokio::test]
    async fn plan_rejects_id_changes() {
        let p = plugins();
        let quorum = quorum(&p, &["A", "B", "C"]);
        let old = quorum.scaled.settings();
        let new = settings(&p, config(Allocation::with_logical_ids(["A", "B", "D"])), options());

        let err = quorum.plan_update(&old, &new).await.err().unwrap();
        assert_eq!(err.to_string(), "Logical ID changes to a quorum is not currently supported");
    }

    #[tokio::test]
    async fn plan_rolls_on_config_change() {
        let p = plugins();
        let quorum = quorum(&p, &["A", "B"]);
        quorum.converge().await;
        let old = quorum.scaled.settings();

        // Reordered IDs are the same quorum.
        let same = settings(&p, config(Allocation::with_logical_ids(["B", "A"])), options());
        assert!(matches!(quorum.plan_update(&old, &same).await.unwrap(), UpdatePlan::Noop));

        let mut changed = config(Allocation::with_logical_ids(["A", "B"]));
        changed.instance.properties = json!({"image": "v2"});
        let new = settings(&p, changed, options());
        let plan = quorum.plan_update(&old, &new).await.unwrap();
        assert_eq!(plan.explain(), "Performing a rolling update on 2 instances");
    }
}
