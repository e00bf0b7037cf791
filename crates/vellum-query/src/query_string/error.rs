use serde::Serialize;
use thiserror::Error;

/// A problem found while compiling a query string.
///
/// Compilation collects these instead of stopping at the first one, so a caller can report
/// every problem in one response.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum QueryStringError {
    #[error("the field '{field}' does not exist")]
    UnknownField { field: String },

    #[error("the field '{field}' cannot be queried")]
    ProtectedField { field: String },

    #[error("unknown operator '{operator}'")]
    UnknownOperator { operator: String },

    #[error("the operator '{operator}' cannot be used on the field '{field}'")]
    IncompatibleOperator { field: String, operator: String },

    #[error("invalid value '{value}' for the operator '{operator}' on the field '{field}'")]
    IncompatibleValue {
        field: String,
        operator: String,
        value: String,
    },

    #[error("invalid where expression near '{fragment}'")]
    InvalidWhere { fragment: String },

    #[error("malformed query: {message}")]
    MalformedToken { message: String },

    #[error("unknown sort direction '{direction}'")]
    UnknownDirection { direction: String },

    #[error("the search structure '{structure}' does not exist")]
    UnknownSearchStructure { structure: String },

    #[error("the collection '{collection}' is not searchable")]
    NotSearchable { collection: String },

    #[error("the parameter '{parameter}' must be a non-negative integer")]
    InvalidInteger { parameter: String, value: String },

    #[error("the parameter '{parameter}' must be a boolean")]
    InvalidBoolean { parameter: String, value: String },

    #[error("the parameters '{first}' and '{second}' cannot be used together")]
    ConflictingParameters { first: String, second: String },

    #[error("the parameter 'page' requires 'perPage' or 'limit'")]
    PageWithoutLimit,

    #[error("the language '{language}' is not supported")]
    UnsupportedLanguage { language: String },
}

impl QueryStringError {
    #[must_use]
    pub fn unknown_field(field: impl Into<String>) -> Self {
        Self::UnknownField {
            field: field.into(),
        }
    }

    #[must_use]
    pub fn protected_field(field: impl Into<String>) -> Self {
        Self::ProtectedField {
            field: field.into(),
        }
    }

    #[must_use]
    pub fn invalid_where(fragment: impl Into<String>) -> Self {
        Self::InvalidWhere {
            fragment: fragment.into(),
        }
    }

    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedToken {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_integer(parameter: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidInteger {
            parameter: parameter.into(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn conflicting(first: impl Into<String>, second: impl Into<String>) -> Self {
        Self::ConflictingParameters {
            first: first.into(),
            second: second.into(),
        }
    }
}
