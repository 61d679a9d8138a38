use crate::error::Result;
use corvid_core::Resource;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Key an object by `namespace/name` (bare `name` for cluster-scoped kinds)
pub fn object_key<T: Resource>(obj: &T) -> Result<String> {
    Ok(obj.object_key()?.to_string())
}

/// Local cache of one remote collection
///
/// Writers are the reflector (or informer) that owns the store; any number of
/// readers may take snapshots concurrently.
pub trait Store<T>: Send + Sync {
    /// Insert an object, replacing any object with the same key
    fn add(&self, obj: T) -> Result<()>;

    /// Replace an existing object (inserts when absent)
    fn update(&self, obj: T) -> Result<()>;

    /// Remove an object by its key
    fn delete(&self, obj: &T) -> Result<()>;

    /// Snapshot of every object
    fn list(&self) -> Vec<Arc<T>>;

    /// Snapshot of every key
    fn list_keys(&self) -> Vec<String>;

    /// Look up an object by key
    fn get_by_key(&self, key: &str) -> Option<Arc<T>>;

    /// Atomically swap the whole contents for `items`
    fn replace(&self, items: Vec<T>, resource_version: &str) -> Result<()>;
}

/// RwLock-protected map store
pub struct ThreadSafeStore<T> {
    items: RwLock<HashMap<String, Arc<T>>>,
}

impl<T> Default for ThreadSafeStore<T> {
    fn default() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: Resource> ThreadSafeStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<T>>> {
        self.items.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<T>>> {
        self.items.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert an already shared object
    pub fn insert_arc(&self, key: String, obj: Arc<T>) {
        self.write().insert(key, obj);
    }

    /// Remove by key, returning the removed object
    pub fn delete_by_key(&self, key: &str) -> Option<Arc<T>> {
        self.write().remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl<T: Resource> Store<T> for ThreadSafeStore<T> {
    fn add(&self, obj: T) -> Result<()> {
        let key = object_key(&obj)?;
        self.write().insert(key, Arc::new(obj));
        Ok(())
    }

    fn update(&self, obj: T) -> Result<()> {
        self.add(obj)
    }

    fn delete(&self, obj: &T) -> Result<()> {
        let key = object_key(obj)?;
        self.write().remove(&key);
        Ok(())
    }

    fn list(&self) -> Vec<Arc<T>> {
        self.read().values().cloned().collect()
    }

    fn list_keys(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    fn get_by_key(&self, key: &str) -> Option<Arc<T>> {
        self.read().get(key).cloned()
    }

    fn replace(&self, items: Vec<T>, resource_version: &str) -> Result<()> {
        let mut fresh = HashMap::with_capacity(items.len());
        for item in items {
            fresh.insert(object_key(&item)?, Arc::new(item));
        }

        debug!(
            "Replacing {} store contents with {} items at version {}",
            T::KIND,
            fresh.len(),
            resource_version
        );
        *self.write() = fresh;
        Ok(())
    }
}
