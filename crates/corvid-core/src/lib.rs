//! Corvid Core - Fundamental types shared by the Corvid scheduler crates
//!
//! This crate provides:
//! - Error types with miette diagnostics
//! - Object keys, resource kinds and label selectors
//! - Watch event wire types
//! - Resource helpers (quantities, pod assignment, node eligibility)

pub mod error;
pub mod events;
pub mod resources;
pub mod types;

// Re-export commonly used types
pub use error::{CorvidError, Result};
pub use events::{WatchEvent, WatchEventType};
pub use resources::{
    is_node_schedulable, is_pod_assigned, pod_host, pod_host_ports, Resource, ResourceError,
    ResourceQuantities,
};
pub use types::{LabelSelector, ObjectKey, ResourceKind, ResourceVersion};

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::core::v1::{Binding, Node, Pod, Service};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Serialize a resource to a JSON value
pub fn to_value<T: serde::Serialize>(resource: &T) -> Result<serde_json::Value> {
    serde_json::to_value(resource).map_err(|e| {
        CorvidError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a resource from a JSON value
pub fn from_value<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| {
        CorvidError::serialization_error(
            format!("Failed to deserialize from JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a resource from YAML
pub fn from_yaml<T: serde::de::DeserializeOwned>(data: &str) -> Result<T> {
    serde_yaml::from_str(data).map_err(|e| {
        CorvidError::serialization_error(
            format!("Failed to deserialize from YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a resource from JSON text
pub fn from_json<T: serde::de::DeserializeOwned>(data: &str) -> Result<T> {
    serde_json::from_str(data).map_err(|e| {
        CorvidError::serialization_error(
            format!("Failed to deserialize from JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}
