use crate::error::Result;
use async_trait::async_trait;
use corvid_client::ClusterClient;
use corvid_core::{Binding, ObjectMeta, Pod};
use k8s_openapi::api::core::v1::ObjectReference;
use std::sync::Arc;
use tracing::debug;

/// Records a placement decision with the cluster
#[async_trait]
pub trait Binder: Send + Sync {
    async fn bind(&self, binding: &Binding) -> Result<()>;
}

/// Binder that posts bindings through the cluster client
pub struct ClientBinder {
    client: Arc<dyn ClusterClient>,
}

impl ClientBinder {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Binder for ClientBinder {
    async fn bind(&self, binding: &Binding) -> Result<()> {
        debug!(
            "Binding {}/{} to {}",
            binding.metadata.namespace.as_deref().unwrap_or_default(),
            binding.metadata.name.as_deref().unwrap_or_default(),
            binding.target.name.as_deref().unwrap_or_default()
        );
        self.client.create_binding(binding).await?;
        Ok(())
    }
}

/// Binding of `pod` to the node named `host`
pub fn make_binding(pod: &Pod, host: &str) -> Binding {
    Binding {
        metadata: ObjectMeta {
            name: pod.metadata.name.clone(),
            namespace: pod.metadata.namespace.clone(),
            ..Default::default()
        },
        target: ObjectReference {
            api_version: Some("v1".to_string()),
            kind: Some("Node".to_string()),
            name: Some(host.to_string()),
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_client::FakeCluster;
    use corvid_core::is_pod_assigned;

    fn pending_pod(name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_make_binding() {
        let binding = make_binding(&pending_pod("web"), "node-1");
        assert_eq!(binding.metadata.name.as_deref(), Some("web"));
        assert_eq!(binding.metadata.namespace.as_deref(), Some("default"));
        assert_eq!(binding.target.kind.as_deref(), Some("Node"));
        assert_eq!(binding.target.name.as_deref(), Some("node-1"));
    }

    #[tokio::test]
    async fn test_client_binder_posts_binding() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_pod(&pending_pod("web")).unwrap();
        let binder = ClientBinder::new(cluster.clone());

        binder
            .bind(&make_binding(&pending_pod("web"), "node-1"))
            .await
            .unwrap();

        assert_eq!(cluster.bindings().len(), 1);
        let pod = cluster.get_pod("default", "web").await.unwrap();
        assert!(is_pod_assigned(&pod));
    }

    #[tokio::test]
    async fn test_bind_error_is_returned() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_pod(&pending_pod("web")).unwrap();
        cluster.fail_next_binds(1);
        let binder = ClientBinder::new(cluster.clone());

        let binding = make_binding(&pending_pod("web"), "node-1");
        assert!(binder.bind(&binding).await.is_err());
        assert!(binder.bind(&binding).await.is_ok());
    }
}
