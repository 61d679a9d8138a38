use crate::error::{ClientError, Result};
use crate::selector::FieldSelector;
use crate::traits::{ClusterClient, ObjectList, WatchStream};
use async_trait::async_trait;
use corvid_core::{
    Binding, Node, Pod, Resource, ResourceKind, Service, WatchEvent, WatchEventType,
};
use futures_util::StreamExt;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

/// One committed mutation, with the object before and after
#[derive(Debug, Clone)]
struct Change {
    kind: ResourceKind,
    resource_version: u64,
    old: Option<Value>,
    new: Option<Value>,
}

#[derive(Debug, Clone)]
enum FakeEvent {
    Change(Change),
    Disconnect,
}

#[derive(Default)]
struct FakeState {
    objects: HashMap<ResourceKind, BTreeMap<String, Value>>,
    history: Vec<Change>,
    resource_version: u64,
    bindings: Vec<Binding>,
    list_calls: HashMap<ResourceKind, usize>,
    fail_lists: usize,
    fail_watches: usize,
    fail_gets: usize,
    fail_binds: usize,
}

/// In-memory remote store for testing without an API server
///
/// Keeps every object as JSON, stamps a monotonically increasing resource
/// version on each write and serves watches from a change history followed by
/// a live broadcast. Watches with a field selector see objects entering the
/// selection as ADDED and leaving it as DELETED. Failures can be injected per
/// operation.
pub struct FakeCluster {
    state: Arc<Mutex<FakeState>>,
    events: broadcast::Sender<FakeEvent>,
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCluster {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            state: Arc::new(Mutex::new(FakeState::default())),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        // Recover from poisoning
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create or replace an object, returning the stored copy
    pub fn apply<T: Resource>(&self, object: &T) -> Result<T> {
        let key = object
            .object_key()
            .map_err(|e| ClientError::decode(e.to_string()))?
            .to_string();
        let mut value = corvid_core::to_value(object)?;

        let mut state = self.lock();
        state.resource_version += 1;
        let rv = state.resource_version;
        value["metadata"]["resourceVersion"] = Value::String(rv.to_string());

        let old = state
            .objects
            .entry(T::KIND)
            .or_default()
            .insert(key.clone(), value.clone());
        debug!("Fake: {} {} stored at version {}", T::KIND, key, rv);

        self.record(&mut state, T::KIND, old, Some(value.clone()));
        drop(state);

        corvid_core::from_value(value).map_err(ClientError::from)
    }

    pub fn add_pod(&self, pod: &Pod) -> Result<Pod> {
        self.apply(pod)
    }

    pub fn add_node(&self, node: &Node) -> Result<Node> {
        self.apply(node)
    }

    pub fn add_service(&self, service: &Service) -> Result<Service> {
        self.apply(service)
    }

    /// Delete an object by kind and key
    pub fn delete(&self, kind: ResourceKind, key: &str) -> Result<()> {
        let mut state = self.lock();
        let old = state
            .objects
            .get_mut(&kind)
            .and_then(|objects| objects.remove(key))
            .ok_or_else(|| ClientError::not_found(kind.kind(), key))?;

        state.resource_version += 1;
        debug!("Fake: {} {} deleted", kind, key);
        self.record(&mut state, kind, Some(old), None);
        Ok(())
    }

    /// Close every open watch with a transport error
    pub fn disconnect_watches(&self) {
        let _ = self.events.send(FakeEvent::Disconnect);
    }

    pub fn fail_next_lists(&self, count: usize) {
        self.lock().fail_lists = count;
    }

    pub fn fail_next_watches(&self, count: usize) {
        self.lock().fail_watches = count;
    }

    pub fn fail_next_gets(&self, count: usize) {
        self.lock().fail_gets = count;
    }

    pub fn fail_next_binds(&self, count: usize) {
        self.lock().fail_binds = count;
    }

    /// Bindings accepted so far, in order
    pub fn bindings(&self) -> Vec<Binding> {
        self.lock().bindings.clone()
    }

    /// Number of list calls served for a kind
    pub fn list_calls(&self, kind: ResourceKind) -> usize {
        self.lock().list_calls.get(&kind).copied().unwrap_or(0)
    }

    fn record(
        &self,
        state: &mut FakeState,
        kind: ResourceKind,
        old: Option<Value>,
        new: Option<Value>,
    ) {
        let change = Change {
            kind,
            resource_version: state.resource_version,
            old,
            new,
        };
        state.history.push(change.clone());
        // No receivers is fine
        let _ = self.events.send(FakeEvent::Change(change));
    }

    fn take_failure(counter: &mut usize) -> bool {
        if *counter > 0 {
            *counter -= 1;
            true
        } else {
            false
        }
    }
}

/// Translate a change into the event a selector-filtered watch would see
fn project(change: &Change, selector: &FieldSelector) -> Option<WatchEvent<Value>> {
    let old_match = change.old.as_ref().is_some_and(|o| selector.matches(o));
    let new_match = change.new.as_ref().is_some_and(|n| selector.matches(n));

    let event_type = match (old_match, new_match) {
        (false, true) => WatchEventType::Added,
        (true, true) => WatchEventType::Modified,
        (true, false) => WatchEventType::Deleted,
        (false, false) => return None,
    };
    // Deleted objects carry their last state; objects leaving the selection
    // carry the new state
    let object = change.new.clone().or_else(|| change.old.clone())?;
    Some(WatchEvent::new(event_type, object))
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn list(&self, kind: ResourceKind, selector: &FieldSelector) -> Result<ObjectList> {
        let mut state = self.lock();
        *state.list_calls.entry(kind).or_default() += 1;
        if Self::take_failure(&mut state.fail_lists) {
            return Err(ClientError::transport("injected list failure"));
        }

        let items = state
            .objects
            .get(&kind)
            .map(|objects| {
                objects
                    .values()
                    .filter(|v| selector.matches(v))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(ObjectList {
            items,
            resource_version: state.resource_version.to_string(),
        })
    }

    async fn watch(
        &self,
        kind: ResourceKind,
        selector: &FieldSelector,
        resource_version: &str,
    ) -> Result<WatchStream> {
        let from: u64 = if resource_version.is_empty() {
            0
        } else {
            resource_version
                .parse()
                .map_err(|_| ClientError::status(400, format!("bad resourceVersion {}", resource_version)))?
        };

        // Subscribe under the lock so no change falls between replay and live delivery
        let mut state = self.lock();
        if Self::take_failure(&mut state.fail_watches) {
            return Err(ClientError::transport("injected watch failure"));
        }
        let rx = self.events.subscribe();
        let replay: Vec<Result<WatchEvent<Value>>> = state
            .history
            .iter()
            .filter(|c| c.kind == kind && c.resource_version > from)
            .filter_map(|c| project(c, selector))
            .map(Ok)
            .collect();
        drop(state);

        let selector = selector.clone();
        let live = BroadcastStream::new(rx)
            .map(move |item| match item {
                Ok(FakeEvent::Change(change)) => {
                    if change.kind != kind || change.resource_version <= from {
                        return None;
                    }
                    project(&change, &selector).map(Ok)
                }
                Ok(FakeEvent::Disconnect) => {
                    Some(Err(ClientError::transport("watch disconnected")))
                }
                Err(e) => Some(Err(ClientError::transport(format!("watch lagged: {}", e)))),
            })
            .filter_map(futures_util::future::ready);

        Ok(futures_util::stream::iter(replay).chain(live).boxed())
    }

    async fn get(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<Value> {
        let mut state = self.lock();
        if Self::take_failure(&mut state.fail_gets) {
            return Err(ClientError::transport("injected get failure"));
        }

        let key = if kind.is_namespaced() {
            format!("{}/{}", namespace, name)
        } else {
            name.to_string()
        };

        state
            .objects
            .get(&kind)
            .and_then(|objects| objects.get(&key))
            .cloned()
            .ok_or_else(|| ClientError::not_found(kind.kind(), key))
    }

    async fn create_binding(&self, binding: &Binding) -> Result<()> {
        let namespace = binding.metadata.namespace.clone().unwrap_or_default();
        let name = binding.metadata.name.clone().unwrap_or_default();
        let key = format!("{}/{}", namespace, name);

        let mut state = self.lock();
        if Self::take_failure(&mut state.fail_binds) {
            return Err(ClientError::transport("injected bind failure"));
        }

        let old = state
            .objects
            .get(&ResourceKind::Pod)
            .and_then(|pods| pods.get(&key))
            .cloned()
            .ok_or_else(|| ClientError::not_found("Pod", key.clone()))?;

        if FieldSelector::assigned_pods().matches(&old) {
            return Err(ClientError::conflict(format!(
                "pod {} is already assigned to {}",
                key, old["spec"]["nodeName"]
            )));
        }

        state.resource_version += 1;
        let mut new = old.clone();
        new["spec"]["nodeName"] = Value::String(binding.target.name.clone().unwrap_or_default());
        new["metadata"]["resourceVersion"] = Value::String(state.resource_version.to_string());

        state
            .objects
            .entry(ResourceKind::Pod)
            .or_default()
            .insert(key.clone(), new.clone());
        state.bindings.push(binding.clone());
        debug!("Fake: bound {} to {:?}", key, binding.target.name);

        self.record(&mut state, ResourceKind::Pod, Some(old), Some(new));
        Ok(())
    }
}
