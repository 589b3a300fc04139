//! Error types for core parsing and validation.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while decoding or validating group documents and config.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid group spec: {0}")]
    Validation(String),

    #[error("failed to decode group properties: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid duration '{input}': {reason}")]
    Duration { input: String, reason: String },

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
}

impl CoreError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
