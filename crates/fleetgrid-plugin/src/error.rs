//! Plugin error types.

use thiserror::Error;

/// Result type alias for plugin calls.
pub type PluginResult<T> = Result<T, PluginError>;

/// Errors crossing the plugin boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PluginError {
    #[error("plugin not found: {0}")]
    NotFound(String),

    #[error("invalid properties: {0}")]
    InvalidProperties(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

impl PluginError {
    pub fn failed(msg: impl std::fmt::Display) -> Self {
        Self::Failed(msg.to_string())
    }
}
