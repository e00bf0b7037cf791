use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vellum_core::CoreError;
use vellum_storage::StorageError;

/// Validation errors keyed by field path (`price`, `tags.2`).
pub type FieldErrors = IndexMap<String, String>;

/// Fatal or unexpected query failures.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl QueryError {
    /// Create a new InvalidInput error
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

/// Result type for query operations
pub type Result<T> = std::result::Result<T, QueryError>;

/// Outcome of a write.
///
/// Validation problems and store failures during the mutation are data, not errors:
/// `Invalid` carries the field errors, `Failed` the store's message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "camelCase")]
pub enum WriteOutcome<T, E = FieldErrors> {
    Success(T),
    Invalid(E),
    Failed(String),
}

impl<T, E> WriteOutcome<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn success(self) -> Option<T> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn errors(&self) -> Option<&E> {
        match self {
            Self::Invalid(errors) => Some(errors),
            _ => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Failed(message) => Some(message),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> WriteOutcome<U, E> {
        match self {
            Self::Success(value) => WriteOutcome::Success(f(value)),
            Self::Invalid(errors) => WriteOutcome::Invalid(errors),
            Self::Failed(message) => WriteOutcome::Failed(message),
        }
    }
}
