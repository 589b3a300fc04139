//! Error types for the group controller.

use thiserror::Error;

use fleet_core::{CoreError, GroupId};
use fleetgrid_plugin::PluginError;

/// Result type alias for controller operations.
pub type GroupResult<T> = Result<T, GroupError>;

#[derive(Debug, Error)]
pub enum GroupError {
    #[error("Group ID must not be blank")]
    BlankId,

    #[error(transparent)]
    Spec(#[from] CoreError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error("Group '{0}' is not being watched")]
    NotWatched(GroupId),

    /// A change the controller cannot carry out on a live group.
    #[error("{0}")]
    Unsupported(String),

    #[error("Instance {instance} is not a member of group {group}")]
    NotMember { group: GroupId, instance: String },

    /// A rolling update was stopped while waiting for instances to settle.
    #[error("Update halted by user")]
    Halted,
}

impl From<GroupError> for PluginError {
    fn from(err: GroupError) -> Self {
        match err {
            GroupError::Plugin(e) => e,
            GroupError::Spec(e) => PluginError::InvalidProperties(e.to_string()),
            other => PluginError::Failed(other.to_string()),
        }
    }
}
