use crate::error::Result;
use crate::store::{object_key, Store};
use corvid_core::Resource;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::trace;

struct FifoState<T> {
    items: HashMap<String, Arc<T>>,
    queue: VecDeque<String>,
}

/// Work queue keyed by object identity
///
/// Adding an object whose key is already queued replaces the stored object but
/// keeps its original position, so a pod updated while waiting is scheduled
/// once with its newest state. `pop` hands out the oldest queued object.
pub struct Fifo<T> {
    state: Mutex<FifoState<T>>,
    ready: Notify,
}

impl<T> Default for Fifo<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(FifoState {
                items: HashMap::new(),
                queue: VecDeque::new(),
            }),
            ready: Notify::new(),
        }
    }
}

impl<T: Resource> Fifo<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FifoState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(&self, key: String, obj: Arc<T>) {
        let mut state = self.lock();
        if state.items.insert(key.clone(), obj).is_none() {
            trace!("Queued {} {}", T::KIND, key);
            state.queue.push_back(key);
        }
        drop(state);
        self.ready.notify_one();
    }

    /// Remove and return the oldest queued object without waiting
    pub fn try_pop(&self) -> Option<Arc<T>> {
        let mut state = self.lock();
        while let Some(key) = state.queue.pop_front() {
            if let Some(obj) = state.items.remove(&key) {
                return Some(obj);
            }
        }
        None
    }

    /// Wait for an object and remove it from the queue
    pub async fn pop(&self) -> Arc<T> {
        loop {
            if let Some(obj) = self.try_pop() {
                return obj;
            }
            self.ready.notified().await;
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().items.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Resource> Store<T> for Fifo<T> {
    fn add(&self, obj: T) -> Result<()> {
        let key = object_key(&obj)?;
        self.insert(key, Arc::new(obj));
        Ok(())
    }

    fn update(&self, obj: T) -> Result<()> {
        self.add(obj)
    }

    fn delete(&self, obj: &T) -> Result<()> {
        let key = object_key(obj)?;
        let mut state = self.lock();
        if state.items.remove(&key).is_some() {
            state.queue.retain(|k| k != &key);
        }
        Ok(())
    }

    fn list(&self) -> Vec<Arc<T>> {
        let state = self.lock();
        state
            .queue
            .iter()
            .filter_map(|k| state.items.get(k).cloned())
            .collect()
    }

    fn list_keys(&self) -> Vec<String> {
        self.lock().queue.iter().cloned().collect()
    }

    fn get_by_key(&self, key: &str) -> Option<Arc<T>> {
        self.lock().items.get(key).cloned()
    }

    fn replace(&self, items: Vec<T>, _resource_version: &str) -> Result<()> {
        let mut fresh = FifoState {
            items: HashMap::with_capacity(items.len()),
            queue: VecDeque::with_capacity(items.len()),
        };
        for item in items {
            let key = object_key(&item)?;
            if fresh.items.insert(key.clone(), Arc::new(item)).is_none() {
                fresh.queue.push_back(key);
            }
        }

        let has_items = !fresh.queue.is_empty();
        *self.lock() = fresh;
        if has_items {
            self.ready.notify_one();
        }
        Ok(())
    }
}
