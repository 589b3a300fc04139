//! Update plans produced when a running group is recommitted.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::info;

use crate::error::GroupResult;
use crate::rolling::RollingUpdate;
use crate::scaled::ScaledGroup;

pub enum UpdatePlan {
    /// Nothing to change.
    Noop,
    Rolling(RollingUpdate),
    /// Size change, optionally with a rolling update.
    Scaler(ScalerUpdatePlan),
}

impl UpdatePlan {
    pub fn explain(&self) -> String {
        match self {
            Self::Noop => "Noop".to_string(),
            Self::Rolling(rolling) => rolling.explain(),
            Self::Scaler(plan) => plan.explain(),
        }
    }

    pub async fn run(&self) -> GroupResult<()> {
        match self {
            Self::Noop => Ok(()),
            Self::Rolling(rolling) => rolling.run().await,
            Self::Scaler(plan) => plan.run().await,
        }
    }

    pub fn stop(&self) {
        match self {
            Self::Noop => {}
            Self::Rolling(rolling) => rolling.stop(),
            Self::Scaler(plan) => plan.stop(),
        }
    }
}

/// Resizes a scaler group.
///
/// Shrinking lowers the size before rolling so that instances about to be
/// terminated are not replaced first. Growing rolls the existing instances
/// before adding new ones.
pub struct ScalerUpdatePlan {
    scaled: Arc<ScaledGroup>,
    old_size: u32,
    new_size: u32,
    rolling: Option<RollingUpdate>,
}

impl ScalerUpdatePlan {
    pub fn new(
        scaled: Arc<ScaledGroup>,
        old_size: u32,
        new_size: u32,
        rolling: Option<RollingUpdate>,
    ) -> Self {
        Self {
            scaled,
            old_size,
            new_size,
            rolling,
        }
    }

    pub fn explain(&self) -> String {
        let rolling = self.rolling.as_ref().map(RollingUpdate::explain);
        match self.new_size.cmp(&self.old_size) {
            Ordering::Less => {
                let resize = format!(
                    "Terminating {} instances to reduce the group size to {}",
                    self.old_size - self.new_size,
                    self.new_size
                );
                match rolling {
                    Some(rolling) => format!("{resize}, then {}", lower_first(&rolling)),
                    None => resize,
                }
            }
            _ => {
                let resize = format!(
                    "adding {} instances to increase the group size to {}",
                    self.new_size.saturating_sub(self.old_size),
                    self.new_size
                );
                match rolling {
                    Some(rolling) => format!("{rolling}, then {resize}"),
                    None => upper_first(&resize),
                }
            }
        }
    }

    pub async fn run(&self) -> GroupResult<()> {
        let shrinking = self.new_size < self.old_size;
        if shrinking {
            self.resize();
        }
        if let Some(rolling) = &self.rolling {
            rolling.run().await?;
        }
        if !shrinking {
            self.resize();
        }
        Ok(())
    }

    pub fn stop(&self) {
        if let Some(rolling) = &self.rolling {
            rolling.stop();
        }
    }

    fn resize(&self) {
        info!(group = self.scaled.id(), from = self.old_size, to = self.new_size, "resizing group");
        self.scaled.set_target_size(self.new_size);
    }
}

fn lower_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn upper_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{config, options, plugins, settings};
    use fleet_core::Allocation;

    fn scaled(size: u32) -> Arc<ScaledGroup> {
        let p = plugins();
        Arc::new(ScaledGroup::new(
            "workers",
            settings(&p, config(Allocation::with_size(size)), options()),
        ))
    }

    #[test]
    fn shrink_with_rolling_explains_both_phases() {
        let scaled = scaled(3);
        let rolling = RollingUpdate::new(scaled.clone(), scaled.settings(), 1);
        let plan = ScalerUpdatePlan::new(scaled, 3, 1, Some(rolling));
        assert_eq!(
            plan.explain(),
            "Terminating 2 instances to reduce the group size to 1, then performing a rolling update on 1 instances"
        );
    }

    #[test]
    fn noop_explains_itself() {
        assert_eq!(UpdatePlan::Noop.explain(), "Noop");
    }

    #[tokio::test]
    async fn resize_order_depends_on_direction() {
        let scaled = scaled(3);

        let grow = ScalerUpdatePlan::new(scaled.clone(), 3, 5, None);
        grow.run().await.unwrap();
        assert_eq!(scaled.target_size(), 5);

        let shrink = UpdatePlan::Scaler(ScalerUpdatePlan::new(scaled.clone(), 5, 2, None));
        shrink.run().await.unwrap();
        assert_eq!(scaled.target_size(), 2);
    }
}
