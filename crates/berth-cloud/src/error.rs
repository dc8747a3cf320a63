//! Provider error classification.

use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors surfaced by compute and edge providers, classified by status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("provider rejected credentials: {0}")]
    Unauthorized(String),

    #[error("provider rate limit hit: {0}")]
    RateLimited(String),

    #[error("provider API error ({status}): {message}")]
    Api { status: u16, message: String },
}

impl ProviderError {
    /// Classify an HTTP-like status code.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            404 => ProviderError::NotFound(message),
            401 | 403 => ProviderError::Unauthorized(message),
            429 => ProviderError::RateLimited(message),
            _ => ProviderError::Api { status, message },
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        ProviderError::NotFound(what.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }

    pub fn status(&self) -> u16 {
        match self {
            ProviderError::NotFound(_) => 404,
            ProviderError::Unauthorized(_) => 401,
            ProviderError::RateLimited(_) => 429,
            ProviderError::Api { status, .. } => *status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_statuses() {
        assert!(ProviderError::from_status(404, "server x").is_not_found());
        assert!(matches!(
            ProviderError::from_status(401, "bad token"),
            ProviderError::Unauthorized(_)
        ));
        assert!(matches!(
            ProviderError::from_status(403, "forbidden"),
            ProviderError::Unauthorized(_)
        ));
        assert!(matches!(
            ProviderError::from_status(429, "slow down"),
            ProviderError::RateLimited(_)
        ));
        let api = ProviderError::from_status(503, "unavailable");
        assert_eq!(api.status(), 503);
        assert_eq!(api.to_string(), "provider API error (503): unavailable");
    }
}
