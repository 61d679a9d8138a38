// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for Corvid operations
#[derive(Error, Debug, Diagnostic)]
pub enum CorvidError {
    /// Object key could not be parsed
    #[error("Invalid object key: {key}")]
    #[diagnostic(
        code(corvid::invalid_key),
        help("Object keys have the form 'namespace/name' or 'name' for cluster-scoped objects")
    )]
    InvalidKey {
        #[allow(unused)]
        key: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(corvid::serialization_error),
        help("Ensure the resource format is valid JSON or YAML")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result type alias for Corvid operations
pub type Result<T> = std::result::Result<T, CorvidError>;

impl CorvidError {
    /// Create an InvalidKey error
    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey { key: key.into() }
    }

    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }
}
