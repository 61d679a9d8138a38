use crate::error::Result;
use crate::listers::PodLister;
use corvid_cache::{object_key, Store};
use corvid_core::{LabelSelector, Pod, Resource};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Tracks pods the scheduler has placed but the cluster has not confirmed
pub trait SystemModeler: Send + Sync {
    /// Record a pod that was just bound
    fn assume_pod(&self, pod: &Pod);

    /// Stop assuming anything about this pod
    fn forget_pod(&self, pod: &Pod);

    /// Stop assuming anything about the pod with this key
    fn forget_pod_by_key(&self, key: &str);
}

/// Merges confirmed assigned pods with assumed ones
///
/// Assumed pods that show up again in the work queue (they are being retried)
/// or in the confirmed store are dropped the next time pods are listed.
pub struct SimpleModeler {
    queued_pods: Arc<dyn Store<Pod>>,
    scheduled_pods: Arc<dyn Store<Pod>>,
    assumed_pods: Mutex<HashMap<String, Arc<Pod>>>,
}

impl SimpleModeler {
    pub fn new(queued_pods: Arc<dyn Store<Pod>>, scheduled_pods: Arc<dyn Store<Pod>>) -> Self {
        Self {
            queued_pods,
            scheduled_pods,
            assumed_pods: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Pod>>> {
        self.assumed_pods.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of pods currently assumed
    pub fn assumed_len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_assumed(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Lister over the merged view
    pub fn pod_lister(self: &Arc<Self>) -> Arc<dyn PodLister> {
        self.clone()
    }

    fn list_pods(&self, selector: &LabelSelector) -> Vec<Arc<Pod>> {
        let mut assumed = self.lock();
        assumed.retain(|key, _| {
            let confirmed = self.queued_pods.get_by_key(key).is_some()
                || self.scheduled_pods.get_by_key(key).is_some();
            if confirmed {
                debug!("No longer assuming pod {}", key);
            }
            !confirmed
        });

        let mut pods: Vec<Arc<Pod>> = self
            .scheduled_pods
            .list()
            .into_iter()
            .filter(|pod| selector.matches(pod.metadata.labels.as_ref()))
            .collect();
        pods.extend(
            assumed
                .values()
                .filter(|pod| selector.matches(pod.metadata.labels.as_ref()))
                .cloned(),
        );
        pods
    }
}

impl SystemModeler for SimpleModeler {
    fn assume_pod(&self, pod: &Pod) {
        match object_key(pod) {
            Ok(key) => {
                debug!("Assuming pod {} is scheduled", key);
                self.lock().insert(key, Arc::new(pod.clone()));
            }
            Err(e) => warn!("Cannot assume pod {}: {}", pod.name_any(), e),
        }
    }

    fn forget_pod(&self, pod: &Pod) {
        match object_key(pod) {
            Ok(key) => self.forget_pod_by_key(&key),
            Err(e) => warn!("Cannot forget pod {}: {}", pod.name_any(), e),
        }
    }

    fn forget_pod_by_key(&self, key: &str) {
        if self.lock().remove(key).is_some() {
            debug!("Forgot assumed pod {}", key);
        }
    }
}

impl PodLister for SimpleModeler {
    fn list(&self, selector: &LabelSelector) -> Result<Vec<Arc<Pod>>> {
        Ok(self.list_pods(selector))
    }
}
