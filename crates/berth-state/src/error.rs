//! Error types for the Berth state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors raised by the state store. Backend errors are flattened to strings
/// so callers never depend on redb's error types.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open state database: {0}")]
    Open(String),

    #[error("state transaction failed: {0}")]
    Transaction(String),

    #[error("cannot open table: {0}")]
    Table(String),

    #[error("state read failed: {0}")]
    Read(String),

    #[error("state write failed: {0}")]
    Write(String),

    #[error("cannot encode record: {0}")]
    Serialize(String),

    #[error("cannot decode record: {0}")]
    Deserialize(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("could not allocate a unique sandbox slug")]
    SlugExhausted,
}

impl StateError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StateError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}
