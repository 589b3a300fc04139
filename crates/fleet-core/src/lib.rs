//! fleet-core: shared types for the FleetGrid group controller.
//!
//! Everything in this crate is plain data: the group document submitted by
//! callers, the instance descriptions reported by instance plugins, the
//! configuration fingerprint used for change detection, and the daemon
//! configuration file.
//!
//! # Components
//!
//! - **`types`**: ids, well-known tags, instance descriptions, health
//! - **`group`**: `GroupSpec` / `GroupConfig` and their validation rules
//! - **`hash`**: `InstanceHash`, the stable fingerprint of a group config
//! - **`duration`**: human-readable durations for documents and config
//! - **`config`**: `fleetd.toml` and the controller options it carries

pub mod config;
pub mod duration;
pub mod error;
pub mod group;
pub mod hash;
pub mod types;

pub use config::{ControllerOptions, DaemonConfig};
pub use duration::HumanDuration;
pub use error::{CoreError, CoreResult};
pub use group::*;
pub use hash::InstanceHash;
pub use types::*;
