// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Errors returned by the remote store client
#[derive(Error, Debug, Diagnostic)]
pub enum ClientError {
    /// Object not found in the remote store
    #[error("{kind} not found: {key}")]
    #[diagnostic(
        code(corvid::client::not_found),
        help("The object may have been deleted since it was last observed")
    )]
    NotFound {
        #[allow(unused)]
        kind: String,
        #[allow(unused)]
        key: String,
    },

    /// Write rejected because of the current object state
    #[error("Conflict: {message}")]
    #[diagnostic(
        code(corvid::client::conflict),
        help("Re-read the object and retry against its latest state")
    )]
    Conflict {
        #[allow(unused)]
        message: String,
    },

    /// Request could not be delivered
    #[error("Transport error: {message}")]
    #[diagnostic(
        code(corvid::client::transport),
        help("Check that the API server is reachable at the configured URL")
    )]
    Transport {
        #[allow(unused)]
        message: String,
    },

    /// Server answered with a non-success status
    #[error("Request failed with status {status}: {message}")]
    #[diagnostic(
        code(corvid::client::status),
        help("Inspect the API server logs for the rejected request")
    )]
    Status {
        #[allow(unused)]
        status: u16,
        #[allow(unused)]
        message: String,
    },

    /// Response body could not be decoded
    #[error("Failed to decode response: {message}")]
    #[diagnostic(
        code(corvid::client::decode),
        help("The API server returned an unexpected payload")
    )]
    Decode {
        #[allow(unused)]
        message: String,
    },

    /// Core error
    #[error("Core error: {0}")]
    #[diagnostic(
        code(corvid::client::core_error),
        help("This is an internal error")
    )]
    CoreError(#[from] corvid_core::CorvidError),
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    /// Create a NotFound error
    pub fn not_found(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            key: key.into(),
        }
    }

    /// Create a Conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a Transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a Status error
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Create a Decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
