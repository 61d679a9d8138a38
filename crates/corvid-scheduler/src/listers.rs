use crate::error::Result;
use corvid_cache::Store;
use corvid_core::{is_node_schedulable, LabelSelector, Node, Pod, Service};
use std::sync::Arc;

/// Lists pods by label
pub trait PodLister: Send + Sync {
    fn list(&self, selector: &LabelSelector) -> Result<Vec<Arc<Pod>>>;
}

/// Lists nodes eligible for placement
pub trait NodeLister: Send + Sync {
    fn list(&self) -> Result<Vec<Arc<Node>>>;
}

/// Lists services and finds the ones selecting a pod
pub trait ServiceLister: Send + Sync {
    fn list(&self) -> Result<Vec<Arc<Service>>>;

    /// Services in the pod's namespace whose selector matches the pod's labels
    fn get_pod_services(&self, pod: &Pod) -> Result<Vec<Arc<Service>>> {
        let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
        let labels = pod.metadata.labels.as_ref();

        Ok(self
            .list()?
            .into_iter()
            .filter(|svc| svc.metadata.namespace.as_deref().unwrap_or_default() == namespace)
            .filter(|svc| {
                // A service without a selector selects nothing
                match svc.spec.as_ref().and_then(|s| s.selector.as_ref()) {
                    Some(selector) if !selector.is_empty() => {
                        LabelSelector::from_map(selector).matches(labels)
                    }
                    _ => false,
                }
            })
            .collect())
    }
}

/// Pod lister over a store
pub struct StoreToPodLister {
    store: Arc<dyn Store<Pod>>,
}

impl StoreToPodLister {
    pub fn new(store: Arc<dyn Store<Pod>>) -> Self {
        Self { store }
    }

    /// Whether the store holds a pod with this key
    pub fn exists(&self, key: &str) -> bool {
        self.store.get_by_key(key).is_some()
    }
}

impl PodLister for StoreToPodLister {
    fn list(&self, selector: &LabelSelector) -> Result<Vec<Arc<Pod>>> {
        Ok(self
            .store
            .list()
            .into_iter()
            .filter(|pod| selector.matches(pod.metadata.labels.as_ref()))
            .collect())
    }
}

/// Fixed pod list
impl PodLister for Vec<Arc<Pod>> {
    fn list(&self, selector: &LabelSelector) -> Result<Vec<Arc<Pod>>> {
        Ok(self
            .iter()
            .filter(|pod| selector.matches(pod.metadata.labels.as_ref()))
            .cloned()
            .collect())
    }
}

/// Node lister over a store
///
/// The store mirrors every node; as a `NodeLister` only schedulable nodes
/// are returned.
pub struct StoreToNodeLister {
    store: Arc<dyn Store<Node>>,
}

impl StoreToNodeLister {
    pub fn new(store: Arc<dyn Store<Node>>) -> Self {
        Self { store }
    }

    /// Every cached node
    pub fn list_all(&self) -> Vec<Arc<Node>> {
        self.store.list()
    }

    /// Cached nodes that are Ready and not marked unschedulable
    pub fn list_schedulable(&self) -> Vec<Arc<Node>> {
        self.store
            .list()
            .into_iter()
            .filter(|node| is_node_schedulable(node))
            .collect()
    }
}

impl NodeLister for StoreToNodeLister {
    fn list(&self) -> Result<Vec<Arc<Node>>> {
        Ok(self.list_schedulable())
    }
}

/// Fixed node list
impl NodeLister for Vec<Arc<Node>> {
    fn list(&self) -> Result<Vec<Arc<Node>>> {
        Ok(self.clone())
    }
}

/// Service lister over a store
pub struct StoreToServiceLister {
    store: Arc<dyn Store<Service>>,
}

impl StoreToServiceLister {
    pub fn new(store: Arc<dyn Store<Service>>) -> Self {
        Self { store }
    }
}

impl ServiceLister for StoreToServiceLister {
    fn list(&self) -> Result<Vec<Arc<Service>>> {
        Ok(self.store.list())
    }
}
