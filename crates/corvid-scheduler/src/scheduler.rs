use crate::binder::make_binding;
use crate::factory::SchedulerConfig;
use corvid_core::{Pod, Resource};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Sequential scheduling loop
///
/// Takes one pod at a time from the queue, picks a node, binds the pod and
/// records the placement with the modeler. Failures go to the config's error
/// handler.
pub struct Scheduler {
    config: Arc<SchedulerConfig>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &Arc<SchedulerConfig> {
        &self.config
    }

    /// Run on a background task until the stop token is cancelled
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Schedule pods until the stop token is cancelled
    pub async fn run(&self) {
        info!("Starting scheduler");

        loop {
            tokio::select! {
                biased;
                _ = self.config.stop.cancelled() => break,
                pod = self.config.next_pod() => self.schedule_one(&pod).await,
            }
        }

        info!("Scheduler stopped");
    }

    /// Place a single pod
    pub async fn schedule_one(&self, pod: &Pod) {
        let config = &self.config;

        let dest = match config.algorithm.schedule(pod, config.node_lister.as_ref()) {
            Ok(dest) => dest,
            Err(e) => {
                config.error(pod, &e);
                return;
            }
        };

        let binding = make_binding(pod, &dest);
        if let Err(e) = config.binder.bind(&binding).await {
            debug!("Failed to bind pod {}: {}", pod.name_any(), e);
            config.error(pod, &e);
            return;
        }

        info!("Bound pod {} to node {}", pod.name_any(), dest);

        let mut assumed = pod.clone();
        assumed.spec.get_or_insert_with(Default::default).node_name = Some(dest);
        config.modeler.assume_pod(&assumed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::{Binder, ClientBinder};
    use crate::error::Result;
    use crate::factory::{ConfigFactory, FactoryConfig};
    use async_trait::async_trait;
    use corvid_client::{ClusterClient, FakeCluster};
    use corvid_core::{Binding, LabelSelector, Node, ObjectMeta};
    use k8s_openapi::api::core::v1::{NodeCondition, NodeStatus, PodSpec};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    fn ready_node(name: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: None,
            status: Some(NodeStatus {
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".to_string(),
                    status: "True".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        }
    }

    fn pending_pod(name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec::default()),
            ..Default::default()
        }
    }

    fn test_config() -> FactoryConfig {
        FactoryConfig {
            retry_period: Duration::from_millis(50),
            ..Default::default()
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    /// Records bind attempts and runs a hook before delegating
    struct RecordingBinder {
        inner: ClientBinder,
        attempts: Mutex<Vec<Instant>>,
        before_first: Box<dyn Fn() + Send + Sync>,
    }

    impl RecordingBinder {
        fn attempts(&self) -> Vec<Instant> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Binder for RecordingBinder {
        async fn bind(&self, binding: &Binding) -> Result<()> {
            let first = {
                let mut attempts = self.attempts.lock().unwrap();
                attempts.push(Instant::now());
                attempts.len() == 1
            };
            if first {
                (self.before_first)();
            }
            self.inner.bind(binding).await
        }
    }

    #[tokio::test]
    async fn test_schedules_pending_pod_once() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_node(&ready_node("node-1")).unwrap();
        cluster.add_pod(&pending_pod("web")).unwrap();

        let mut factory = ConfigFactory::new(cluster.clone(), test_config());
        let config = factory.create().unwrap();
        eventually(|| config.node_lister.list().map(|n| n.len() == 1).unwrap_or(false)).await;

        let scheduler = Scheduler::new(config);
        let config = scheduler.config().clone();
        let handle = scheduler.spawn();

        eventually(|| cluster.bindings().len() == 1).await;
        let bindings = cluster.bindings();
        assert_eq!(bindings[0].metadata.name.as_deref(), Some("web"));
        assert_eq!(bindings[0].target.name.as_deref(), Some("node-1"));

        // The assigned-pod watch confirms the placement
        eventually(|| factory.scheduled_pods().contains_key("default/web")).await;
        factory
            .modeler()
            .pod_lister()
            .list(&LabelSelector::everything())
            .unwrap();
        assert_eq!(factory.modeler().assumed_len(), 0);
        assert!(config.pod_queue().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(cluster.bindings().len(), 1);

        config.shutdown().await;
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_retries_after_backoff() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_node(&ready_node("node-1")).unwrap();
        cluster.add_pod(&pending_pod("web")).unwrap();
        cluster.fail_next_binds(1);

        let mut factory = ConfigFactory::new(cluster.clone(), test_config());
        let mut config = factory.create().unwrap();
        eventually(|| config.node_lister.list().map(|n| n.len() == 1).unwrap_or(false)).await;

        let binder = Arc::new(RecordingBinder {
            inner: ClientBinder::new(cluster.clone()),
            attempts: Mutex::new(Vec::new()),
            before_first: Box::new(|| {}),
        });
        config.binder = binder.clone() as Arc<dyn Binder>;

        let scheduler = Scheduler::new(config);
        let config = scheduler.config().clone();
        let handle = scheduler.spawn();

        eventually(|| cluster.bindings().len() == 1).await;
        let attempts = binder.attempts();
        assert_eq!(attempts.len(), 2);
        assert!(attempts[1] - attempts[0] >= Duration::from_secs(1));

        config.shutdown().await;
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_pod_assigned_during_backoff_is_not_retried() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_node(&ready_node("node-1")).unwrap();
        cluster.add_pod(&pending_pod("web")).unwrap();
        cluster.fail_next_binds(1);

        let mut factory = ConfigFactory::new(cluster.clone(), test_config());
        let mut config = factory.create().unwrap();
        eventually(|| config.node_lister.list().map(|n| n.len() == 1).unwrap_or(false)).await;

        // Someone else places the pod right after our first bind fails
        let other = cluster.clone();
        let binder = Arc::new(RecordingBinder {
            inner: ClientBinder::new(cluster.clone()),
            attempts: Mutex::new(Vec::new()),
            before_first: Box::new(move || {
                let mut placed = pending_pod("web");
                placed.spec = Some(PodSpec {
                    node_name: Some("node-2".to_string()),
                    ..Default::default()
                });
                // Lands after the injected failure is consumed
                let other = other.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    let _ = other.apply(&placed);
                });
            }),
        });
        config.binder = binder.clone() as Arc<dyn Binder>;

        let scheduler = Scheduler::new(config);
        let config = scheduler.config().clone();
        let handle = scheduler.spawn();

        eventually(|| binder.attempts().len() == 1).await;
        tokio::time::sleep(Duration::from_millis(1800)).await;

        assert_eq!(binder.attempts().len(), 1);
        assert!(cluster.bindings().is_empty());
        assert!(config.pod_queue().is_empty());
        let pod = cluster.get_pod("default", "web").await.unwrap();
        assert_eq!(
            pod.spec.and_then(|s| s.node_name).as_deref(),
            Some("node-2")
        );

        config.shutdown().await;
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_no_nodes_routes_to_error_handler() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_pod(&pending_pod("web")).unwrap();

        let mut factory = ConfigFactory::new(cluster.clone(), test_config());
        let config = factory.create().unwrap();
        eventually(|| factory.pod_queue().contains_key("default/web")).await;

        let scheduler = Scheduler::new(config);
        let pod = scheduler.config().next_pod().await;
        scheduler.schedule_one(&pod).await;
        assert!(cluster.bindings().is_empty());

        // A node shows up while the pod is backing off
        cluster.add_node(&ready_node("node-1")).unwrap();
        let config = scheduler.config().clone();
        let handle = scheduler.spawn();

        eventually(|| cluster.bindings().len() == 1).await;

        config.shutdown().await;
        handle.await.unwrap();
    }
}
