//! Rolling update: replaces instances one at a time.
//!
//! ```text
//!  ┌──────────────── wait until quiesced ◄───────────────┐
//!  │   (expected new instances healthy for the           │
//!  │    stabilization threshold; stop → Halted)          │
//!  ▼                                                     │
//! relist ── none undesired ──► done                      │
//!  │                                                     │
//!  ▼                                                     │
//! destroy first undesired (by ID, self last)             │
//!  │── error ──► abort                                   │
//!  │── was self ──► done                                 │
//!  └── expected += 1 ────────────────────────────────────┘
//! ```
//!
//! Replacements are created by the supervisor loop, not here: destroying
//! an outdated instance leaves a gap that the scaler or quorum fills with
//! the new config.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use fleet_core::{DestroyContext, Health, InstanceHash, Updating};

use crate::error::{GroupError, GroupResult};
use crate::scaled::{ScaledGroup, split_by_hash};
use crate::settings::GroupSettings;

pub struct RollingUpdate {
    scaled: Arc<ScaledGroup>,
    updating_to: GroupSettings,
    count: usize,
    stop: watch::Sender<bool>,
}

impl RollingUpdate {
    /// A rolling update of `count` outdated instances towards `updating_to`.
    pub fn new(scaled: Arc<ScaledGroup>, updating_to: GroupSettings, count: usize) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            scaled,
            updating_to,
            count,
            stop,
        }
    }

    pub fn explain(&self) -> String {
        format!("Performing a rolling update on {} instances", self.count)
    }

    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub async fn run(&self) -> GroupResult<()> {
        let group = self.scaled.id();
        let hash = self.updating_to.instance_hash();

        let (desired, _) = split_by_hash(self.scaled.label_and_list().await?, &hash);
        let mut expected = desired.len();

        loop {
            self.wait_until_quiesced(expected, &hash).await?;
            debug!(group, expected, "group has quiesced");

            let (_, mut undesired) = split_by_hash(self.scaled.list().await?, &hash);
            if undesired.is_empty() {
                break;
            }
            info!(group, remaining = undesired.len(), "replacing outdated instance");

            self.updating_to.sort_self_last(&mut undesired);
            let victim = &undesired[0];
            self.scaled
                .destroy(victim, DestroyContext::RollingUpdate)
                .await?;

            if self.updating_to.is_self(victim) {
                info!(group, instance = %victim.id, "reached self, ending rolling update");
                break;
            }
            expected += 1;
        }

        info!(group, "rolling update complete");
        Ok(())
    }

    /// Block until `min(expected, allocation size)` instances with the new
    /// config are healthy and have stayed so for the stabilization
    /// threshold.
    async fn wait_until_quiesced(&self, expected: usize, hash: &InstanceHash) -> GroupResult<()> {
        let group = self.scaled.id();
        let config = &self.updating_to.config;
        let target = expected.min(config.allocation.desired_size() as usize);
        let mut stabilization = Stabilization::new(&config.updating);

        let mut stop = self.stop.subscribe();
        let mut ticker = tokio::time::interval(poll_period(self.updating_to.options.poll_interval()));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *stop.borrow_and_update() {
                return Err(GroupError::Halted);
            }
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.changed() => return Err(GroupError::Halted),
            }

            let instances = match self.scaled.list().await {
                Ok(instances) => instances,
                Err(e) => {
                    warn!(group, error = %e, "failed to list instances");
                    continue;
                }
            };
            let (desired, _) = split_by_hash(instances, hash);

            let mut healthy = 0;
            for instance in &desired {
                match self.scaled.health(instance).await {
                    Health::Healthy => healthy += 1,
                    Health::Unhealthy => {
                        warn!(group, instance = %instance.id, "updated instance is unhealthy")
                    }
                    Health::Unknown => {
                        debug!(group, instance = %instance.id, "updated instance health unknown")
                    }
                }
            }

            if stabilization.observe(healthy >= target, Instant::now()) {
                return Ok(());
            }
            debug!(group, healthy, target, "waiting for updated instances");
        }
    }
}

/// Tokio intervals reject a zero period.
pub(crate) fn poll_period(interval: Duration) -> Duration {
    interval.max(Duration::from_millis(1))
}

/// Tracks how long the healthy target has held without interruption.
#[derive(Debug)]
struct Stabilization {
    required_polls: u32,
    required_duration: Option<Duration>,
    consecutive: u32,
    since: Option<Instant>,
}

impl Stabilization {
    fn new(updating: &Updating) -> Self {
        Self {
            required_polls: updating.count.max(1),
            required_duration: updating.stable_for(),
            consecutive: 0,
            since: None,
        }
    }

    /// Record one poll. Returns whether the threshold is met.
    fn observe(&mut self, satisfied: bool, now: Instant) -> bool {
        if !satisfied {
            self.consecutive = 0;
            self.since = None;
            return false;
        }

        self.consecutive += 1;
        let since = *self.since.get_or_insert(now);
        match self.required_duration {
            Some(duration) => now.duration_since(since) >= duration,
            None => self.consecutive >= self.required_polls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{Plugins, config, eventually, options, plugins, settings};
    use fleet_core::{Allocation, HumanDuration, InstanceDescription, CONFIG_HASH_TAG, GROUP_TAG};
    use serde_json::json;

    #[test]
    fn count_threshold_needs_consecutive_polls() {
        let updating = Updating {
            count: 3,
            ..Default::default()
        };
        let mut s = Stabilization::new(&updating);
        let now = Instant::now();

        assert!(!s.observe(true, now));
        assert!(!s.observe(true, now));
        assert!(!s.observe(false, now));
        assert!(!s.observe(true, now));
        assert!(!s.observe(true, now));
        assert!(s.observe(true, now));
    }

    #[test]
    fn duration_threshold_resets_on_drop() {
        let updating = Updating {
            duration: Some(HumanDuration::from_secs(10)),
            ..Default::default()
        };
        let mut s = Stabilization::new(&updating);
        let t0 = Instant::now();

        assert!(!s.observe(true, t0));
        assert!(!s.observe(true, t0 + Duration::from_secs(5)));
        assert!(!s.observe(false, t0 + Duration::from_secs(6)));
        assert!(!s.observe(true, t0 + Duration::from_secs(7)));
        assert!(!s.observe(true, t0 + Duration::from_secs(16)));
        assert!(s.observe(true, t0 + Duration::from_secs(17)));
    }

    #[test]
    fn default_threshold_is_one_poll() {
        let mut s = Stabilization::new(&Updating::default());
        assert!(s.observe(true, Instant::now()));
    }

    /// Group with `n` instances tagged with an outdated hash.
    fn outdated(p: &Plugins, n: usize) {
        for i in 0..n {
            p.instances.insert(
                InstanceDescription::new(format!("old-{i}"))
                    .with_tag(GROUP_TAG, "workers")
                    .with_tag(CONFIG_HASH_TAG, "stale"),
            );
        }
    }

    #[tokio::test]
    async fn replaces_outdated_instances_one_at_a_time() {
        let p = plugins();
        outdated(&p, 2);
        let mut cfg = config(Allocation::with_size(2));
        cfg.flavor.properties = json!({"role": "manager"});
        let scaled = Arc::new(ScaledGroup::new("workers", settings(&p, cfg, options())));
        let update = Arc::new(RollingUpdate::new(scaled.clone(), scaled.settings(), 2));
        assert_eq!(update.explain(), "Performing a rolling update on 2 instances");

        let task = {
            let update = update.clone();
            tokio::spawn(async move { update.run().await })
        };

        // Stand in for the supervisor: refill each gap with the new config.
        for expected_destroyed in 1..=2 {
            let instances = p.instances.clone();
            eventually("destroy", move || instances.destroyed().len() == expected_destroyed).await;
            scaled.create_one(None).await;
        }

        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("update should finish")
            .unwrap();
        result.unwrap();

        let destroyed: Vec<_> = p.instances.destroyed().into_iter().map(|(id, _)| id).collect();
        assert_eq!(destroyed, ["old-0", "old-1"]);
        let hash = scaled.settings().instance_hash();
        assert!(p.instances.instances().iter().all(|i| hash.matches(i.config_hash())));
    }

    #[tokio::test]
    async fn stop_halts_quiesce_wait() {
        let p = plugins();
        outdated(&p, 1);
        // Nothing with the new config ever becomes healthy.
        p.flavor.set_default_health(Health::Unknown);
        let scaled = Arc::new(ScaledGroup::new(
            "workers",
            settings(&p, config(Allocation::with_size(1)), options()),
        ));
        let update = Arc::new(RollingUpdate::new(scaled.clone(), scaled.settings(), 1));

        let task = {
            let update = update.clone();
            tokio::spawn(async move { update.run().await })
        };
        // First pass has an empty target; wait for the first replacement gap.
        let instances = p.instances.clone();
        eventually("first destroy", move || instances.destroyed().len() == 1).await;
        scaled.create_one(None).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        update.stop();

        let result = tokio::time::timeout(Duration::from_millis(100), task)
            .await
            .expect("stop should release the update")
            .unwrap();
        assert!(matches!(result, Err(GroupError::Halted)));
    }

    #[tokio::test]
    async fn unhealthy_replacement_holds_the_update() {
        let p = plugins();
        outdated(&p, 2);
        p.flavor.set_default_health(Health::Unhealthy);
        let mut cfg = config(Allocation::with_size(2));
        cfg.flavor.properties = json!({"role": "manager"});
        let scaled = Arc::new(ScaledGroup::new("workers", settings(&p, cfg, options())));
        let update = Arc::new(RollingUpdate::new(scaled.clone(), scaled.settings(), 2));

        let task = {
            let update = update.clone();
            tokio::spawn(async move { update.run().await })
        };
        let instances = p.instances.clone();
        eventually("first destroy", move || instances.destroyed().len() == 1).await;
        scaled.create_one(None).await;

        // Unhealthy keeps polling: no error, no further destroys.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());
        assert_eq!(p.instances.destroyed().len(), 1);

        p.flavor.set_default_health(Health::Healthy);
        let instances = p.instances.clone();
        eventually("second destroy", move || instances.destroyed().len() == 2).await;
        scaled.create_one(None).await;

        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("update should finish once healthy")
            .unwrap();
        result.unwrap();
    }

    #[tokio::test]
    async fn destroy_failure_aborts() {
        let p = plugins();
        outdated(&p, 1);
        p.instances.fail_destroy("old-0");
        let scaled = Arc::new(ScaledGroup::new(
            "workers",
            settings(&p, config(Allocation::with_size(1)), options()),
        ));
        let update = RollingUpdate::new(scaled.clone(), scaled.settings(), 1);

        let result = tokio::time::timeout(Duration::from_secs(1), update.run())
            .await
            .expect("update should fail promptly");
        assert!(matches!(result, Err(GroupError::Plugin(_))));
    }
}
