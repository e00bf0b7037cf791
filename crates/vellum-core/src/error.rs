use thiserror::Error;

/// Core error types for schema and field-type operations
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Unknown field '{field}' in collection '{collection}'")]
    UnknownField { collection: String, field: String },

    #[error("Unknown field type '{field_type}' for field '{field}'")]
    UnknownFieldType { field: String, field_type: String },

    #[error("Collection '{collection}' is not a {expected} collection")]
    WrongMode {
        collection: String,
        expected: &'static str,
    },

    #[error("Failed to populate field '{field}': {message}")]
    Population { field: String, message: String },

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CoreError {
    /// Create a new UnknownCollection error
    pub fn unknown_collection(name: impl Into<String>) -> Self {
        Self::UnknownCollection(name.into())
    }

    /// Create a new UnknownField error
    pub fn unknown_field(collection: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField {
            collection: collection.into(),
            field: field.into(),
        }
    }

    /// Create a new UnknownFieldType error
    pub fn unknown_field_type(field: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self::UnknownFieldType {
            field: field.into(),
            field_type: field_type.into(),
        }
    }

    /// Create a new WrongMode error
    pub fn wrong_mode(collection: impl Into<String>, expected: &'static str) -> Self {
        Self::WrongMode {
            collection: collection.into(),
            expected,
        }
    }

    /// Create a new Population error
    pub fn population(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Population {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new Configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
