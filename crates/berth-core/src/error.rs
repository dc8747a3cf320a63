//! Configuration error types.

use thiserror::Error;

use crate::env::Target;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating a `berth.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required field `{field}` for target {target}")]
    Missing { field: String, target: Target },

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: String, reason: String },

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    pub(crate) fn missing(field: impl Into<String>, target: Target) -> Self {
        ConfigError::Missing {
            field: field.into(),
            target,
        }
    }

    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
