//! fleetgrid-group: the group controller.
//!
//! Keeps groups of instances at their declared size (or declared set of
//! logical IDs) and rolls them onto new configurations.
//!
//! # Architecture
//!
//! ```text
//! GroupRegistry (GroupPlugin)
//!   ├─ Resolver ─────────► GroupSettings (config + plugins)
//!   └─ GroupContext per group
//!        ├─ Supervisor: Scaler | Quorum ── poll loop ──┐
//!        ├─ UpdatePlan: Noop | Rolling | Scaler ───────┤
//!        └─ ScaledGroup ◄──────────────────────────────┘
//!              ├─ InstancePlugin (provision, destroy, describe)
//!              └─ FlavorPlugin   (prepare, healthy, drain)
//! ```
//!
//! Instances are matched to the desired config by the `InstanceHash`
//! carried in their tags. The supervisor loop keeps the count right; a
//! rolling update removes outdated instances one by one and lets the
//! supervisor replace them.

pub mod error;
pub mod plan;
pub mod quorum;
pub mod registry;
pub mod rolling;
pub mod scaled;
pub mod scaler;
pub mod settings;
pub mod supervisor;

#[cfg(test)]
mod testutil;

pub use error::{GroupError, GroupResult};
pub use plan::{ScalerUpdatePlan, UpdatePlan};
pub use quorum::Quorum;
pub use registry::GroupRegistry;
pub use rolling::RollingUpdate;
pub use scaled::{ScaledGroup, split_by_hash};
pub use scaler::Scaler;
pub use settings::{GroupSettings, Resolver};
pub use supervisor::Supervisor;
