//! Scaler: keeps a group at a target instance count.

use std::cmp::Ordering;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use fleet_core::DestroyContext;

use crate::error::{GroupError, GroupResult};
use crate::plan::{ScalerUpdatePlan, UpdatePlan};
use crate::rolling::RollingUpdate;
use crate::scaled::{ScaledGroup, split_by_hash};
use crate::settings::GroupSettings;
use crate::supervisor::{fan_out, poll_loop};

pub struct Scaler {
    scaled: Arc<ScaledGroup>,
    stop: watch::Sender<bool>,
}

impl Scaler {
    pub fn new(scaled: Arc<ScaledGroup>) -> Self {
        let (stop, _) = watch::channel(false);
        Self { scaled, stop }
    }

    pub fn id(&self) -> &str {
        self.scaled.id()
    }

    pub fn size(&self) -> u32 {
        self.scaled.target_size()
    }

    pub fn set_size(&self, size: u32) {
        info!(group = self.id(), size, "setting target group size");
        self.scaled.set_target_size(size);
    }

    pub async fn run(&self) {
        let poll = self.scaled.settings().options.poll_interval();
        poll_loop(self.id(), poll, self.stop.subscribe(), || self.converge()).await;
    }

    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// One convergence pass: destroy the surplus or create the deficit.
    pub async fn converge(&self) {
        let group = self.id();
        let _membership = self.scaled.lock_membership().await;
        if *self.stop.borrow() {
            return;
        }
        let settings = self.scaled.settings();
        let max_parallel = settings.options.max_parallel_num;

        let mut instances = match self.scaled.label_and_list().await {
            Ok(instances) => instances,
            Err(e) => {
                warn!(group, error = %e, "failed to list instances");
                return;
            }
        };
        let actual = instances.len();
        let desired = self.size() as usize;

        match actual.cmp(&desired) {
            Ordering::Equal => debug!(group, actual, "group has the desired number of instances"),
            Ordering::Greater => {
                let surplus = actual - desired;
                info!(group, actual, desired, "terminating {surplus} surplus instances");
                settings.sort_self_last(&mut instances);
                instances.truncate(surplus);

                let scaled = self.scaled.clone();
                fan_out(max_parallel, instances, move |instance| {
                    let scaled = scaled.clone();
                    async move {
                        if let Err(e) = scaled.destroy(&instance, DestroyContext::Termination).await {
                            warn!(group = scaled.id(), instance = %instance.id, error = %e, "failed to destroy instance");
                        }
                    }
                })
                .await;
            }
            Ordering::Less => {
                let deficit = desired - actual;
                info!(group, actual, desired, "creating {deficit} instances");

                let scaled = self.scaled.clone();
                fan_out(max_parallel, 0..deficit, move |_| {
                    let scaled = scaled.clone();
                    async move { scaled.create_one(None).await }
                })
                .await;
            }
        }
    }

    /// The size side of the plan starts from the live target rather than
    /// `old`, so a grow interrupted before its resize is planned again.
    pub async fn plan_update(
        &self,
        _old: &GroupSettings,
        new: &GroupSettings,
    ) -> GroupResult<UpdatePlan> {
        if new.config.allocation.uses_logical_ids() {
            return Err(GroupError::Unsupported(
                "Changing the allocation method of a group is not supported".to_string(),
            ));
        }

        let old_size = self.size();
        let new_size = new.config.allocation.size;

        let instances = self.scaled.label_and_list().await?;
        let (_, undesired) = split_by_hash(instances, &new.instance_hash());
        // Surplus instances are terminated, not replaced.
        let outdated = undesired.len().min(new_size as usize);
        let rolling = (outdated > 0)
            .then(|| RollingUpdate::new(self.scaled.clone(), new.clone(), outdated));

        Ok(match (new_size.cmp(&old_size), rolling) {
            (Ordering::Equal, None) => UpdatePlan::Noop,
            (Ordering::Equal, Some(rolling)) => UpdatePlan::Rolling(rolling),
            (_, rolling) => UpdatePlan::Scaler(ScalerUpdatePlan::new(
                self.scaled.clone(),
                old_size,
                new_size,
                rolling,
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{Plugins, config, options, plugins, settings};
    use fleet_core::{Allocation, ControllerOptions};
    use serde_json::json;

    fn scaler(p: &Plugins, size: u32, options: ControllerOptions) -> Scaler {
        let s = settings(p, config(Allocation::with_size(size)), options);
        Scaler::new(Arc::new(ScaledGroup::new("workers", s)))
    }

    #[tokio::test]
    async fn converge_creates_deficit() {
        let p = plugins();
        let scaler = scaler(&p, 3, options());

        scaler.converge().await;
        assert_eq!(p.instances.instances().len(), 3);

        scaler.converge().await;
        assert_eq!(p.instances.provisioned().len(), 3);
    }

    #[tokio::test]
    async fn converge_destroys_oldest_surplus_with_self_last() {
        let p = plugins();
        let opts = ControllerOptions {
            self_id: Some("me".to_string()),
            max_parallel_num: 1,
            ..options()
        };
        let scaler = scaler(&p, 3, opts);
        scaler.converge().await;
        // instance-0001 plays the controller's own node.
        p.instances.insert({
            let mut me = p.instances.instances().remove(0);
            me.logical_id = Some("me".to_string());
            me
        });

        scaler.set_size(1);
        scaler.converge().await;

        let mut destroyed: Vec<_> = p.instances.destroyed().into_iter().map(|(id, _)| id).collect();
        destroyed.sort();
        assert_eq!(destroyed, ["instance-0002", "instance-0003"]);
        assert_eq!(p.instances.instances()[0].id, "instance-0001");
    }

    #[tokio::test]
    async fn plan_explanations() {
        let p = plugins();
        let scaler = scaler(&p, 3, options());
        scaler.converge().await;
        let old = scaler.scaled.settings();

        let same = old.clone();
        assert!(matches!(scaler.plan_update(&old, &same).await.unwrap(), UpdatePlan::Noop));

        let grow = settings(&p, config(Allocation::with_size(8)), options());
        let plan = scaler.plan_update(&old, &grow).await.unwrap();
        assert_eq!(plan.explain(), "Adding 5 instances to increase the group size to 8");

        let shrink = settings(&p, config(Allocation::with_size(1)), options());
        let plan = scaler.plan_update(&old, &shrink).await.unwrap();
        assert_eq!(plan.explain(), "Terminating 2 instances to reduce the group size to 1");

        let mut changed = config(Allocation::with_size(3));
        changed.flavor.properties = json!({"role": "manager"});
        let rolled = settings(&p, changed.clone(), options());
        let plan = scaler.plan_update(&old, &rolled).await.unwrap();
        assert_eq!(plan.explain(), "Performing a rolling update on 3 instances");

        changed.allocation = Allocation::with_size(4);
        let both = settings(&p, changed, options());
        let plan = scaler.plan_update(&old, &both).await.unwrap();
        assert_eq!(
            plan.explain(),
            "Performing a rolling update on 3 instances, then adding 1 instances to increase the group size to 4"
        );
    }

    #[tokio::test]
    async fn shrink_rolls_only_the_survivors() {
        let p = plugins();
        let scaler = scaler(&p, 3, options());
        scaler.converge().await;
        let old = scaler.scaled.settings();

        let mut changed = config(Allocation::with_size(1));
        changed.flavor.properties = json!({"role": "manager"});
        let plan = scaler.plan_update(&old, &settings(&p, changed, options())).await.unwrap();
        assert_eq!(
            plan.explain(),
            "Terminating 2 instances to reduce the group size to 1, then performing a rolling update on 1 instances"
        );
    }

    #[tokio::test]
    async fn plan_rejects_switch_to_logical_ids() {
        let p = plugins();
        let scaler = scaler(&p, 1, options());
        let old = scaler.scaled.settings();
        let new = settings(&p, config(Allocation::with_logical_ids(["a"])), options());
        assert!(matches!(
            scaler.plan_update(&old, &new).await,
            Err(GroupError::Unsupported(_))
        ));
    }
}
