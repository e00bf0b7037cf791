//! Error types for the PostgreSQL store backend.

use sqlx_core::error::Error as SqlxError;
use vellum_storage::StorageError;

/// PostgreSQL error code for unique violations (23505).
pub const PG_UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL error code for undefined table (42P01).
pub const PG_UNDEFINED_TABLE: &str = "42P01";

/// PostgreSQL error code for syntax errors (42601).
pub const PG_SYNTAX_ERROR: &str = "42601";

/// Checks if a sqlx error has a specific PostgreSQL error code.
pub fn has_pg_error_code(err: &SqlxError, code: &str) -> bool {
    if let SqlxError::Database(db_err) = err {
        db_err.code().as_deref() == Some(code)
    } else {
        false
    }
}

/// Errors specific to the PostgreSQL store backend.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Error reported by the driver or the database.
    #[error("Database error: {0}")]
    Database(#[from] SqlxError),

    /// Table creation or index maintenance failed.
    #[error("Schema error: {message}")]
    Schema { message: String },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A row could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl PostgresError {
    #[must_use]
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Converts into a [`StorageError`], attributing constraint violations to `table`.
    pub fn into_storage(self, table: &str) -> StorageError {
        match self {
            Self::Database(e) if has_pg_error_code(&e, PG_UNIQUE_VIOLATION) => {
                StorageError::unique_violation(table, e.to_string())
            }
            Self::Database(e)
                if has_pg_error_code(&e, PG_UNDEFINED_TABLE)
                    || has_pg_error_code(&e, PG_SYNTAX_ERROR) =>
            {
                StorageError::invalid_query(e.to_string())
            }
            other => other.into(),
        }
    }
}

impl From<PostgresError> for StorageError {
    fn from(err: PostgresError) -> Self {
        match err {
            PostgresError::Database(
                e @ (SqlxError::PoolTimedOut | SqlxError::PoolClosed | SqlxError::Io(_)),
            ) => StorageError::connection_error(e.to_string()),
            PostgresError::Database(e) => StorageError::internal(e.to_string()),
            PostgresError::Schema { message } => {
                StorageError::internal(format!("Schema error: {message}"))
            }
            PostgresError::Config { message } => {
                StorageError::internal(format!("Configuration error: {message}"))
            }
            PostgresError::Decode(e) => StorageError::internal(format!("Decode error: {e}")),
        }
    }
}

/// Result type alias for PostgreSQL operations.
pub type Result<T> = std::result::Result<T, PostgresError>;
