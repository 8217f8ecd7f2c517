use thiserror::Error;

use super::field::ControllerOperation;
use crate::database::StoreError;

/// Problems with a schema definition. These are configuration errors, raised at startup.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Invalid definition at '{path}': {message}")]
    InvalidDefinition { path: String, message: String },

    #[error("Unknown bsonType '{bson_type}' at '{path}'")]
    UnknownType { path: String, bson_type: String },

    #[error("Invalid namespace: {0}")]
    InvalidNamespace(String),

    #[error("Invalid language configuration: {0}")]
    InvalidLanguages(String),

    #[error("Failed to parse schema file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Failed to read schema file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to enforce validator: {0}")]
    Store(#[from] StoreError),
}

impl SchemaError {
    pub fn invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        SchemaError::InvalidDefinition {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A candidate or query field that does not fit the schema. Client-facing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    #[error("Unknown field '{path}'")]
    UnknownField { path: String },

    #[error("Field '{path}' is not allowed for {operation}")]
    NotAllowed {
        path: String,
        operation: ControllerOperation,
    },

    #[error("Unsupported language '{language}' at '{path}'")]
    UnsupportedLanguage { path: String, language: String },

    #[error("Field '{path}' expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: String,
        found: String,
    },

    #[error("Field '{path}' has an invalid value: {message}")]
    InvalidValue { path: String, message: String },
}

impl FieldError {
    pub fn path(&self) -> &str {
        match self {
            FieldError::UnknownField { path }
            | FieldError::NotAllowed { path, .. }
            | FieldError::UnsupportedLanguage { path, .. }
            | FieldError::TypeMismatch { path, .. }
            | FieldError::InvalidValue { path, .. } => path,
        }
    }

    pub fn mismatch(path: &str, expected: impl Into<String>, found: impl Into<String>) -> Self {
        FieldError::TypeMismatch {
            path: path.to_string(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub fn invalid(path: &str, message: impl Into<String>) -> Self {
        FieldError::InvalidValue {
            path: path.to_string(),
            message: message.into(),
        }
    }
}
