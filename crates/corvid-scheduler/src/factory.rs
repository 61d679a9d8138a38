//! Builds a ready-to-run scheduler configuration from a cluster client
//!
//! The factory owns the local caches: the queue of pods awaiting placement,
//! the store of assigned pods (with the modeler layered on top), and the node
//! and service stores. Creating a configuration resolves the requested
//! plugins first and only then starts the background tasks that fill those
//! caches, so a bad provider or policy never leaves watches running.

use crate::algorithm::{GenericScheduler, ScheduleAlgorithm};
use crate::backoff::{BackoffConfig, PodBackoff};
use crate::binder::{Binder, ClientBinder};
use crate::error::{Result, SchedulerError};
use crate::error_handler::ErrorHandler;
use crate::listers::{NodeLister, PodLister, StoreToNodeLister, StoreToServiceLister};
use crate::modeler::{SimpleModeler, SystemModeler};
use crate::plugins::{AlgorithmRegistry, PluginFactoryArgs, DEFAULT_PROVIDER};
use crate::policy::Policy;
use async_trait::async_trait;
use corvid_cache::{
    Enumerator, Fifo, Informer, ListWatch, ListerWatcher, PollSource, Poller, Reflector,
    ReflectorConfig, ResourceEventHandlerFuncs, ThreadSafeStore,
};
use corvid_client::{ClusterClient, FieldSelector};
use corvid_core::{is_node_schedulable, Node, Pod, Service};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Factory configuration
#[derive(Debug, Clone)]
pub struct FactoryConfig {
    /// Relist period for the node, service and scheduled-pod caches; zero
    /// disables resync. The work queue is never resynced.
    pub resync_period: Duration,
    /// Pause before a failed list/watch cycle is retried
    pub retry_period: Duration,
    /// Poll nodes this often instead of watching them; zero means watch
    pub node_poll_period: Duration,
    pub backoff: BackoffConfig,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            resync_period: Duration::ZERO,
            retry_period: Duration::from_secs(1),
            node_poll_period: Duration::ZERO,
            backoff: BackoffConfig::default(),
        }
    }
}

impl FactoryConfig {
    fn reflector_config(&self) -> ReflectorConfig {
        ReflectorConfig {
            resync_period: self.resync_period,
            retry_period: self.retry_period,
        }
    }
}

/// Snapshot of the nodes eligible for placement
#[derive(Debug, Clone, Default)]
pub struct NodeEnumerator {
    nodes: Vec<Node>,
}

impl NodeEnumerator {
    /// Keep only nodes that are Ready and not marked unschedulable
    pub fn from_nodes(nodes: Vec<Node>) -> Self {
        let nodes = nodes
            .into_iter()
            .filter(|node| {
                let schedulable = is_node_schedulable(node);
                if !schedulable {
                    debug!(
                        "Node {} is not available. Skipping",
                        node.metadata.name.as_deref().unwrap_or_default()
                    );
                }
                schedulable
            })
            .collect();
        Self { nodes }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }
}

impl Enumerator<Node> for NodeEnumerator {
    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn get(&self, index: usize) -> &Node {
        &self.nodes[index]
    }
}

impl NodeLister for NodeEnumerator {
    fn list(&self) -> Result<Vec<Arc<Node>>> {
        Ok(self.nodes.iter().cloned().map(Arc::new).collect())
    }
}

/// Polls the full node list for a `Poller`
pub struct NodePollSource {
    list_watch: ListWatch<Node>,
}

impl NodePollSource {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self {
            list_watch: ListWatch::everything(client),
        }
    }

    async fn enumerate(&self) -> corvid_cache::Result<NodeEnumerator> {
        let (nodes, _) = self.list_watch.list().await?;
        Ok(NodeEnumerator::from_nodes(nodes))
    }
}

#[async_trait]
impl PollSource<Node> for NodePollSource {
    async fn poll(&self) -> corvid_cache::Result<Box<dyn Enumerator<Node>>> {
        Ok(Box::new(self.enumerate().await?))
    }
}

/// Everything the scheduling loop needs
pub struct SchedulerConfig {
    pub modeler: Arc<dyn SystemModeler>,
    pub node_lister: Arc<dyn NodeLister>,
    pub algorithm: Arc<dyn ScheduleAlgorithm>,
    pub binder: Arc<dyn Binder>,
    /// Cancelling this stops every background task and the scheduling loop
    pub stop: CancellationToken,
    pod_queue: Arc<Fifo<Pod>>,
    error_handler: ErrorHandler,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SchedulerConfig {
    /// Wait for the next pod that needs a node
    pub async fn next_pod(&self) -> Arc<Pod> {
        let pod = self.pod_queue.pop().await;
        debug!(
            "About to try and schedule pod {}",
            pod.metadata.name.as_deref().unwrap_or_default()
        );
        pod
    }

    /// Retry `pod` after its backoff; never blocks
    pub fn error(&self, pod: &Pod, err: &SchedulerError) -> JoinHandle<()> {
        self.error_handler.handle(pod, err)
    }

    pub fn pod_queue(&self) -> &Arc<Fifo<Pod>> {
        &self.pod_queue
    }

    /// Cancel the stop token and wait for the cache tasks to finish
    pub async fn shutdown(&self) {
        self.stop.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()),
        );
        for task in tasks {
            let _ = task.await;
        }
        info!("Scheduler caches stopped");
    }
}

/// Creates `SchedulerConfig`s backed by caches of the cluster
pub struct ConfigFactory {
    client: Arc<dyn ClusterClient>,
    config: FactoryConfig,
    pod_queue: Arc<Fifo<Pod>>,
    scheduled_pods: Arc<ThreadSafeStore<Pod>>,
    scheduled_pod_populator: Option<Informer<Pod>>,
    modeler: Arc<SimpleModeler>,
    pod_lister: Arc<dyn PodLister>,
    node_store: Arc<ThreadSafeStore<Node>>,
    node_lister: Arc<StoreToNodeLister>,
    service_store: Arc<ThreadSafeStore<Service>>,
    service_lister: Arc<StoreToServiceLister>,
    registry: AlgorithmRegistry,
    stop: CancellationToken,
}

impl ConfigFactory {
    pub fn new(client: Arc<dyn ClusterClient>, config: FactoryConfig) -> Self {
        let pod_queue = Arc::new(Fifo::<Pod>::new());
        let scheduled_pods = Arc::new(ThreadSafeStore::<Pod>::new());
        let modeler = Arc::new(SimpleModeler::new(
            pod_queue.clone(),
            scheduled_pods.clone(),
        ));
        let pod_lister = modeler.pod_lister();

        // Pods confirmed by the assigned-pod watch are no longer assumed
        let on_add = modeler.clone();
        let on_delete = modeler.clone();
        let handler = ResourceEventHandlerFuncs::<Pod>::new()
            .on_add(move |pod| on_add.forget_pod(pod))
            .on_delete(move |deleted| match deleted.object() {
                Some(pod) => on_delete.forget_pod(pod),
                None => {
                    if let Some(key) = deleted.key() {
                        on_delete.forget_pod_by_key(&key);
                    }
                }
            });

        let scheduled_pod_populator = Informer::with_store(
            "scheduled-pods",
            Arc::new(ListWatch::<Pod>::new(
                client.clone(),
                FieldSelector::assigned_pods(),
            )),
            scheduled_pods.clone(),
            Arc::new(handler),
            config.reflector_config(),
        );

        let node_store = Arc::new(ThreadSafeStore::<Node>::new());
        let service_store = Arc::new(ThreadSafeStore::<Service>::new());

        Self {
            node_lister: Arc::new(StoreToNodeLister::new(node_store.clone())),
            service_lister: Arc::new(StoreToServiceLister::new(service_store.clone())),
            client,
            config,
            pod_queue,
            scheduled_pods,
            scheduled_pod_populator: Some(scheduled_pod_populator),
            modeler,
            pod_lister,
            node_store,
            service_store,
            registry: AlgorithmRegistry::with_defaults(),
            stop: CancellationToken::new(),
        }
    }

    /// Registry consulted by every `create_*` call
    pub fn registry(&self) -> &AlgorithmRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut AlgorithmRegistry {
        &mut self.registry
    }

    pub fn pod_queue(&self) -> &Arc<Fifo<Pod>> {
        &self.pod_queue
    }

    /// Assigned pods as last reported by the cluster
    pub fn scheduled_pods(&self) -> &Arc<ThreadSafeStore<Pod>> {
        &self.scheduled_pods
    }

    pub fn modeler(&self) -> &Arc<SimpleModeler> {
        &self.modeler
    }

    pub fn node_lister(&self) -> &Arc<StoreToNodeLister> {
        &self.node_lister
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Scheduler using `DefaultProvider`
    pub fn create(&mut self) -> Result<SchedulerConfig> {
        self.create_from_provider(DEFAULT_PROVIDER)
    }

    /// Scheduler using a registered algorithm provider
    pub fn create_from_provider(&mut self, provider_name: &str) -> Result<SchedulerConfig> {
        info!("Creating scheduler from algorithm provider '{}'", provider_name);
        let provider = self.registry.get_algorithm_provider(provider_name)?.clone();
        self.create_from_keys(
            &provider.fit_predicate_keys,
            &provider.priority_function_keys,
        )
    }

    /// Scheduler described by a policy document
    pub fn create_from_config(&mut self, policy: &Policy) -> Result<SchedulerConfig> {
        info!(
            "Creating scheduler from policy ({} predicates, {} priorities)",
            policy.predicates.len(),
            policy.priorities.len()
        );
        policy.validate()?;

        let mut predicate_keys = BTreeSet::new();
        for predicate in &policy.predicates {
            debug!("Registering predicate: {}", predicate.name);
            predicate_keys.insert(self.registry.register_custom_fit_predicate(predicate)?);
        }

        let mut priority_keys = BTreeSet::new();
        for priority in &policy.priorities {
            debug!("Registering priority: {}", priority.name);
            priority_keys.insert(self.registry.register_custom_priority_function(priority)?);
        }

        self.create_from_keys(&predicate_keys, &priority_keys)
    }

    /// Scheduler from registered predicate and priority names
    ///
    /// Starts the cache tasks on success. A factory creates at most one
    /// scheduler.
    pub fn create_from_keys(
        &mut self,
        predicate_keys: &BTreeSet<String>,
        priority_keys: &BTreeSet<String>,
    ) -> Result<SchedulerConfig> {
        info!(
            "Creating scheduler with fit predicates {:?} and priority functions {:?}",
            predicate_keys, priority_keys
        );

        let plugin_args = PluginFactoryArgs {
            pod_lister: self.pod_lister.clone(),
            service_lister: self.service_lister.clone(),
            node_lister: self.node_lister.clone(),
        };
        let predicates = self.registry.get_fit_predicates(predicate_keys, &plugin_args)?;
        let priorities = self
            .registry
            .get_priority_configs(priority_keys, &plugin_args)?;

        let populator = self.scheduled_pod_populator.take().ok_or_else(|| {
            SchedulerError::internal_error("this factory has already created a scheduler")
        })?;

        let tasks = self.start_caches(populator);

        let algorithm = GenericScheduler::new(
            predicates,
            priorities,
            self.pod_lister.clone(),
            StdRng::from_os_rng(),
        );
        let backoff = Arc::new(PodBackoff::new(self.config.backoff.clone()));

        Ok(SchedulerConfig {
            modeler: self.modeler.clone(),
            node_lister: self.node_lister.clone(),
            algorithm: Arc::new(algorithm),
            binder: Arc::new(ClientBinder::new(self.client.clone())),
            stop: self.stop.clone(),
            pod_queue: self.pod_queue.clone(),
            error_handler: ErrorHandler::new(
                self.client.clone(),
                backoff,
                self.pod_queue.clone(),
            ),
            tasks: Mutex::new(tasks),
        })
    }

    fn start_caches(&self, populator: Informer<Pod>) -> Vec<JoinHandle<()>> {
        let reflector_config = self.config.reflector_config();
        let mut tasks = Vec::with_capacity(4);

        // Pods waiting for a node feed the work queue; never resynced so pods
        // backing off stay out of it
        let unassigned: Arc<dyn ListerWatcher<Pod>> = Arc::new(ListWatch::new(
            self.client.clone(),
            FieldSelector::unassigned_pods(),
        ));
        tasks.push(
            Reflector::new(
                "unassigned-pods",
                unassigned,
                self.pod_queue.clone(),
                ReflectorConfig {
                    resync_period: Duration::ZERO,
                    ..reflector_config.clone()
                },
            )
            .spawn(self.stop.clone()),
        );

        tasks.push(populator.spawn(self.stop.clone()));

        if self.config.node_poll_period.is_zero() {
            let nodes: Arc<dyn ListerWatcher<Node>> =
                Arc::new(ListWatch::everything(self.client.clone()));
            tasks.push(
                Reflector::new(
                    "nodes",
                    nodes,
                    self.node_store.clone(),
                    reflector_config.clone(),
                )
                .spawn(self.stop.clone()),
            );
        } else {
            tasks.push(
                Poller::new(
                    Arc::new(NodePollSource::new(self.client.clone())),
                    self.config.node_poll_period,
                    self.node_store.clone(),
                )
                .spawn(self.stop.clone()),
            );
        }

        let services: Arc<dyn ListerWatcher<Service>> =
            Arc::new(ListWatch::everything(self.client.clone()));
        tasks.push(
            Reflector::new(
                "services",
                services,
                self.service_store.clone(),
                reflector_config,
            )
            .spawn(self.stop.clone()),
        );

        tasks
    }

    /// Fetch every node and keep the ones eligible for placement
    pub async fn poll_nodes(&self) -> Result<NodeEnumerator> {
        Ok(NodePollSource::new(self.client.clone()).enumerate().await?)
    }
}
