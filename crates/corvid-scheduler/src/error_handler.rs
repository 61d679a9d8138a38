use crate::backoff::PodBackoff;
use crate::error::SchedulerError;
use corvid_cache::{Fifo, Store};
use corvid_client::ClusterClient;
use corvid_core::{is_pod_assigned, Pod, Resource};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Puts pods that failed to schedule back on the queue after their backoff
pub struct ErrorHandler {
    client: Arc<dyn ClusterClient>,
    backoff: Arc<PodBackoff>,
    queue: Arc<Fifo<Pod>>,
}

impl ErrorHandler {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        backoff: Arc<PodBackoff>,
        queue: Arc<Fifo<Pod>>,
    ) -> Self {
        Self {
            client,
            backoff,
            queue,
        }
    }

    /// Schedule a retry for `pod`
    ///
    /// Returns immediately. The retry task re-fetches the pod once the backoff
    /// has elapsed and only queues it again if it is still unassigned. A pod
    /// that can no longer be fetched is dropped.
    pub fn handle(&self, pod: &Pod, err: &SchedulerError) -> JoinHandle<()> {
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();
        let name = pod.name_any().to_string();
        let pod_id = format!("{}/{}", namespace, name);
        error!("Error scheduling {}: {}; retrying", pod_id, err);

        self.backoff.gc();

        let client = self.client.clone();
        let backoff = self.backoff.clone();
        let queue = self.queue.clone();

        tokio::spawn(async move {
            let retry = AssertUnwindSafe(async {
                backoff.wait(&pod_id).await;

                let pod = match client.get_pod(&namespace, &name).await {
                    Ok(pod) => pod,
                    Err(e) => {
                        warn!("Failed to get pod {} for retry: {}; abandoning", pod_id, e);
                        return;
                    }
                };

                if is_pod_assigned(&pod) {
                    debug!("Pod {} was assigned while backing off; not retrying", pod_id);
                    return;
                }

                match queue.add(pod) {
                    Ok(()) => info!("Requeued pod {}", pod_id),
                    Err(e) => warn!("Failed to requeue pod {}: {}", pod_id, e),
                }
            });

            if retry.catch_unwind().await.is_err() {
                error!("Retry task for pod {} panicked", pod_id);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffConfig;
    use async_trait::async_trait;
    use corvid_client::{
        FakeCluster, FieldSelector, ObjectList, Result as ClientResult, WatchStream,
    };
    use corvid_core::{Binding, ObjectMeta, ResourceKind};
    use serde_json::Value;
    use k8s_openapi::api::core::v1::PodSpec;
    use std::time::Duration;

    fn make_pod(name: &str, node: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: node.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn handler(cluster: Arc<FakeCluster>) -> (ErrorHandler, Arc<Fifo<Pod>>, Arc<PodBackoff>) {
        let queue = Arc::new(Fifo::<Pod>::new());
        let backoff = Arc::new(PodBackoff::new(BackoffConfig::default()));
        (
            ErrorHandler::new(cluster, backoff.clone(), queue.clone()),
            queue,
            backoff,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeues_after_backoff() {
        let cluster = Arc::new(FakeCluster::new());
        let pod = make_pod("web", None);
        cluster.add_pod(&pod).unwrap();
        let (handler, queue, backoff) = handler(cluster);

        let task = handler.handle(&pod, &SchedulerError::NoNodesAvailable);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(queue.is_empty());

        task.await.unwrap();
        assert!(queue.contains_key("default/web"));
        assert!(backoff.contains("default/web"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_assigned_pod_is_not_requeued() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_pod(&make_pod("web", Some("node-1"))).unwrap();
        let (handler, queue, _) = handler(cluster);

        handler
            .handle(&make_pod("web", None), &SchedulerError::NoNodesAvailable)
            .await
            .unwrap();
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleted_pod_is_abandoned() {
        let cluster = Arc::new(FakeCluster::new());
        let (handler, queue, _) = handler(cluster);

        handler
            .handle(&make_pod("gone", None), &SchedulerError::NoNodesAvailable)
            .await
            .unwrap();
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_failures_back_off_longer() {
        let cluster = Arc::new(FakeCluster::new());
        let pod = make_pod("web", None);
        cluster.add_pod(&pod).unwrap();
        let (handler, queue, _) = handler(cluster);

        let start = tokio::time::Instant::now();
        handler
            .handle(&pod, &SchedulerError::NoNodesAvailable)
            .await
            .unwrap();
        assert!(queue.try_pop().is_some());

        handler
            .handle(&pod, &SchedulerError::NoNodesAvailable)
            .await
            .unwrap();
        // 1s then 2s
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert!(queue.contains_key("default/web"));
    }

    /// Delegates to a fake cluster but panics when fetching one pod
    struct PanicsOnGet {
        inner: Arc<FakeCluster>,
        poisoned: &'static str,
    }

    #[async_trait]
    impl ClusterClient for PanicsOnGet {
        async fn list(
            &self,
            kind: ResourceKind,
            selector: &FieldSelector,
        ) -> ClientResult<ObjectList> {
            self.inner.list(kind, selector).await
        }

        async fn watch(
            &self,
            kind: ResourceKind,
            selector: &FieldSelector,
            resource_version: &str,
        ) -> ClientResult<WatchStream> {
            self.inner.watch(kind, selector, resource_version).await
        }

        async fn get(
            &self,
            kind: ResourceKind,
            namespace: &str,
            name: &str,
        ) -> ClientResult<Value> {
            if name == self.poisoned {
                panic!("lookup of {name} blew up");
            }
            self.inner.get(kind, namespace, name).await
        }

        async fn create_binding(&self, binding: &Binding) -> ClientResult<()> {
            self.inner.create_binding(binding).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_retry_does_not_affect_other_pods() {
        let cluster = Arc::new(FakeCluster::new());
        let broken = make_pod("broken", None);
        let healthy = make_pod("healthy", None);
        cluster.add_pod(&broken).unwrap();
        cluster.add_pod(&healthy).unwrap();

        let client: Arc<dyn ClusterClient> = Arc::new(PanicsOnGet {
            inner: cluster,
            poisoned: "broken",
        });
        let queue = Arc::new(Fifo::<Pod>::new());
        let backoff = Arc::new(PodBackoff::new(BackoffConfig::default()));
        let handler = ErrorHandler::new(client, backoff, queue.clone());

        let first = handler.handle(&broken, &SchedulerError::NoNodesAvailable);
        assert!(first.await.is_ok());
        assert!(queue.is_empty());

        handler
            .handle(&healthy, &SchedulerError::NoNodesAvailable)
            .await
            .unwrap();
        assert!(queue.contains_key("default/healthy"));
        assert!(!queue.contains_key("default/broken"));
    }
}
