pub mod node;
pub mod pod;
pub mod quantities;

pub use node::{is_node_schedulable, node_condition_status};
pub use pod::{is_pod_assigned, pod_host, pod_host_ports};
pub use quantities::ResourceQuantities;

use crate::{ObjectKey, ResourceKind, ResourceVersion};
use k8s_openapi::api::core::v1::{Node, Pod, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Trait for the Kubernetes resources the scheduler caches
pub trait Resource: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The kind of this resource
    const KIND: ResourceKind;

    fn metadata(&self) -> &ObjectMeta;

    /// Get the ObjectKey (namespace/name) of this resource
    fn object_key(&self) -> Result<ObjectKey, ResourceError> {
        let metadata = self.metadata();
        let name = metadata
            .name
            .as_ref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ResourceError::MissingField("metadata.name".to_string()))?;

        if Self::KIND.is_namespaced() {
            let namespace = metadata.namespace.clone().unwrap_or_default();
            Ok(ObjectKey::new(namespace, name))
        } else {
            Ok(ObjectKey::cluster_scoped(name))
        }
    }

    /// Get the resource version
    fn resource_version(&self) -> Option<ResourceVersion> {
        self.metadata()
            .resource_version
            .as_ref()
            .map(ResourceVersion::new)
    }

    /// Name for log messages, "<unknown>" when unset
    fn name_any(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or("<unknown>")
    }
}

/// Resource-related errors
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("Missing required field: {0}")]
    MissingField(String),
}

macro_rules! impl_resource {
    ($($ty:ident => $kind:ident),* $(,)?) => {
        $(
            impl Resource for $ty {
                const KIND: ResourceKind = ResourceKind::$kind;

                fn metadata(&self) -> &ObjectMeta {
                    &self.metadata
                }
            }
        )*
    };
}

impl_resource!(Pod => Pod, Node => Node, Service => Service);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_object_key() {
        let mut pod = Pod::default();
        pod.metadata.name = Some("nginx".to_string());
        pod.metadata.namespace = Some("default".to_string());

        let key = pod.object_key().unwrap();
        assert_eq!(key.to_string(), "default/nginx");
    }

    #[test]
    fn test_node_object_key_ignores_namespace() {
        let mut node = Node::default();
        node.metadata.name = Some("node-1".to_string());
        node.metadata.namespace = Some("stray".to_string());

        assert_eq!(node.object_key().unwrap().to_string(), "node-1");
    }

    #[test]
    fn test_missing_name_is_an_error() {
        let pod = Pod::default();
        assert!(matches!(
            pod.object_key(),
            Err(ResourceError::MissingField(_))
        ));
        assert_eq!(pod.name_any(), "<unknown>");
    }
}
