//! Corvid Client - Access to the authoritative remote store
//!
//! This crate provides:
//! - The `ClusterClient` trait (list, watch, get, bind)
//! - An HTTP implementation speaking to the API server
//! - An in-memory `FakeCluster` for tests and local runs
//! - Field selectors for filtered lists and watches

pub mod error;
pub mod fake;
pub mod http;
pub mod selector;
pub mod traits;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use fake::FakeCluster;
pub use http::HttpClusterClient;
pub use selector::{FieldSelector, POD_HOST_FIELD};
pub use traits::{ClusterClient, ObjectList, WatchStream};
