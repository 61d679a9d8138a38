// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Cache error type
#[derive(Error, Debug, Diagnostic)]
pub enum CacheError {
    /// Object has no usable identity
    #[error("Cannot compute key for object: {reason}")]
    #[diagnostic(
        code(cache::key_error),
        help("Every cached object needs metadata.name (and metadata.namespace when namespaced)")
    )]
    KeyError {
        #[allow(unused)]
        reason: String,
    },

    /// Remote store reported an error event on a watch
    #[error("Watch error: {message}")]
    #[diagnostic(
        code(cache::watch_error),
        help("The watch will be re-established after a fresh list")
    )]
    WatchError {
        #[allow(unused)]
        message: String,
    },

    /// Remote store call failed
    #[error("Client error: {0}")]
    #[diagnostic(
        code(cache::client_error),
        help("Check connectivity to the API server")
    )]
    ClientError(#[from] corvid_client::ClientError),

    /// Core error
    #[error("Core error: {0}")]
    #[diagnostic(
        code(cache::core_error),
        help("This is an internal error")
    )]
    CoreError(#[from] corvid_core::CorvidError),
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
    /// Create a KeyError
    pub fn key_error(reason: impl Into<String>) -> Self {
        Self::KeyError {
            reason: reason.into(),
        }
    }

    /// Create a WatchError
    pub fn watch_error(message: impl Into<String>) -> Self {
        Self::WatchError {
            message: message.into(),
        }
    }
}

impl From<corvid_core::ResourceError> for CacheError {
    fn from(e: corvid_core::ResourceError) -> Self {
        Self::key_error(e.to_string())
    }
}
