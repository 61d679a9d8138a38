use crate::error::{ClientError, Result};
use crate::selector::FieldSelector;
use async_trait::async_trait;
use corvid_core::{Binding, Pod, ResourceKind, WatchEvent};
use futures_util::stream::BoxStream;
use serde_json::Value;

/// Stream of watch events for one kind, in delivery order
pub type WatchStream = BoxStream<'static, Result<WatchEvent<Value>>>;

/// A full listing of a collection at a single resource version
#[derive(Debug, Clone, Default)]
pub struct ObjectList {
    pub items: Vec<Value>,
    pub resource_version: String,
}

/// Trait for the authoritative remote store
///
/// Payloads are untyped JSON so the trait stays object safe; the cache layer
/// decodes them into typed resources.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List every object of `kind` matching `selector`
    async fn list(&self, kind: ResourceKind, selector: &FieldSelector) -> Result<ObjectList>;

    /// Watch changes to objects of `kind` matching `selector`, starting after `resource_version`
    async fn watch(
        &self,
        kind: ResourceKind,
        selector: &FieldSelector,
        resource_version: &str,
    ) -> Result<WatchStream>;

    /// Fetch a single object
    async fn get(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<Value>;

    /// Commit a pod-to-node binding
    async fn create_binding(&self, binding: &Binding) -> Result<()>;

    /// Fetch a single pod
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        let value = self.get(ResourceKind::Pod, namespace, name).await?;
        corvid_core::from_value(value).map_err(ClientError::from)
    }
}
