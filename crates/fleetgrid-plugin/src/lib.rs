//! fleetgrid-plugin: the plugin boundary of the group controller.
//!
//! The controller never talks to infrastructure directly. It drives two
//! kinds of plugins, looked up by name:
//!
//! - **`InstancePlugin`**: provisions, labels, destroys, and lists raw
//!   instances (a cloud provider, a hypervisor, ...)
//! - **`FlavorPlugin`**: shapes an instance spec for a role, judges
//!   instance health, and drains instances before they are destroyed
//!
//! and exposes one:
//!
//! - **`GroupPlugin`**: commit/free/destroy/describe groups
//!
//! `LazyGroup` wraps a group plugin that may not be reachable yet behind
//! the same `GroupPlugin` interface.

pub mod error;
pub mod flavor;
pub mod group;
pub mod instance;
pub mod lazy;
pub mod lookup;

pub use error::{PluginError, PluginResult};
pub use flavor::{FlavorPlugin, Index};
pub use group::{GroupDescription, GroupPlugin};
pub use instance::{Attachment, InstancePlugin, InstanceSpec};
pub use lazy::{Finder, LazyGroup};
pub use lookup::{FlavorLookup, InstanceLookup, PluginSet};
