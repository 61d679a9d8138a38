use crate::error::Result;
use crate::listwatch::ListerWatcher;
use crate::reflector::{Reflector, ReflectorConfig};
use crate::store::{object_key, Store, ThreadSafeStore};
use corvid_core::Resource;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Payload of a delete notification
#[derive(Debug, Clone)]
pub enum DeletedObject<T> {
    /// Deletion observed on the watch, with the object's final state
    Known(Arc<T>),
    /// The object vanished between two listings; only its key is certain
    FinalStateUnknown {
        key: String,
        last_known: Option<Arc<T>>,
    },
}

impl<T: Resource> DeletedObject<T> {
    pub fn key(&self) -> Option<String> {
        match self {
            Self::Known(obj) => object_key(obj.as_ref()).ok(),
            Self::FinalStateUnknown { key, .. } => Some(key.clone()),
        }
    }

    /// Best known state of the deleted object
    pub fn object(&self) -> Option<&Arc<T>> {
        match self {
            Self::Known(obj) => Some(obj),
            Self::FinalStateUnknown { last_known, .. } => last_known.as_ref(),
        }
    }
}

/// Callbacks invoked by an informer after its store has been updated
pub trait ResourceEventHandler<T>: Send + Sync {
    fn on_add(&self, _obj: &Arc<T>) {}

    fn on_update(&self, _old: &Arc<T>, _new: &Arc<T>) {}

    fn on_delete(&self, _obj: &DeletedObject<T>) {}
}

type AddFn<T> = Box<dyn Fn(&Arc<T>) + Send + Sync>;
type UpdateFn<T> = Box<dyn Fn(&Arc<T>, &Arc<T>) + Send + Sync>;
type DeleteFn<T> = Box<dyn Fn(&DeletedObject<T>) + Send + Sync>;

/// Closure-based event handler
pub struct ResourceEventHandlerFuncs<T> {
    add: Option<AddFn<T>>,
    update: Option<UpdateFn<T>>,
    delete: Option<DeleteFn<T>>,
}

impl<T> Default for ResourceEventHandlerFuncs<T> {
    fn default() -> Self {
        Self {
            add: None,
            update: None,
            delete: None,
        }
    }
}

impl<T> ResourceEventHandlerFuncs<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_add(mut self, f: impl Fn(&Arc<T>) + Send + Sync + 'static) -> Self {
        self.add = Some(Box::new(f));
        self
    }

    pub fn on_update(mut self, f: impl Fn(&Arc<T>, &Arc<T>) + Send + Sync + 'static) -> Self {
        self.update = Some(Box::new(f));
        self
    }

    pub fn on_delete(mut self, f: impl Fn(&DeletedObject<T>) + Send + Sync + 'static) -> Self {
        self.delete = Some(Box::new(f));
        self
    }
}

impl<T: Send + Sync> ResourceEventHandler<T> for ResourceEventHandlerFuncs<T> {
    fn on_add(&self, obj: &Arc<T>) {
        if let Some(f) = &self.add {
            f(obj);
        }
    }

    fn on_update(&self, old: &Arc<T>, new: &Arc<T>) {
        if let Some(f) = &self.update {
            f(old, new);
        }
    }

    fn on_delete(&self, obj: &DeletedObject<T>) {
        if let Some(f) = &self.delete {
            f(obj);
        }
    }
}

/// A change queued by the reflector for the processing loop
#[derive(Debug)]
enum Delta<T> {
    Upsert(String, Arc<T>),
    Deleted(String, DeletedObject<T>),
}

/// Store fed by the reflector that forwards every change as a delta
///
/// Keeps its own view of known keys so a relist can report objects that
/// disappeared without a delete event.
struct DeltaSink<T> {
    known: Mutex<HashMap<String, Arc<T>>>,
    tx: mpsc::UnboundedSender<Delta<T>>,
}

impl<T: Resource> DeltaSink<T> {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<T>>> {
        self.known.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn send(&self, delta: Delta<T>) {
        // Receiver gone means the informer is shutting down
        let _ = self.tx.send(delta);
    }

    fn upsert(&self, obj: T) -> Result<()> {
        let key = object_key(&obj)?;
        let obj = Arc::new(obj);
        self.lock().insert(key.clone(), obj.clone());
        self.send(Delta::Upsert(key, obj));
        Ok(())
    }
}

impl<T: Resource> Store<T> for DeltaSink<T> {
    fn add(&self, obj: T) -> Result<()> {
        self.upsert(obj)
    }

    fn update(&self, obj: T) -> Result<()> {
        self.upsert(obj)
    }

    fn delete(&self, obj: &T) -> Result<()> {
        let key = object_key(obj)?;
        self.lock().remove(&key);
        self.send(Delta::Deleted(
            key,
            DeletedObject::Known(Arc::new(obj.clone())),
        ));
        Ok(())
    }

    fn list(&self) -> Vec<Arc<T>> {
        self.lock().values().cloned().collect()
    }

    fn list_keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn get_by_key(&self, key: &str) -> Option<Arc<T>> {
        self.lock().get(key).cloned()
    }

    fn replace(&self, items: Vec<T>, _resource_version: &str) -> Result<()> {
        let mut fresh = HashMap::with_capacity(items.len());
        for item in items {
            fresh.insert(object_key(&item)?, Arc::new(item));
        }

        let mut known = self.lock();
        for (key, last_known) in known.drain() {
            if !fresh.contains_key(&key) {
                self.send(Delta::Deleted(
                    key.clone(),
                    DeletedObject::FinalStateUnknown {
                        key,
                        last_known: Some(last_known),
                    },
                ));
            }
        }
        for (key, obj) in &fresh {
            self.send(Delta::Upsert(key.clone(), obj.clone()));
        }
        *known = fresh;
        Ok(())
    }
}

/// Reflector plus a processing loop that keeps a store and notifies a handler
///
/// The store is updated before the handler runs, so a handler observing an
/// add can already find the object in the store.
pub struct Informer<T> {
    name: String,
    reflector: Reflector<T>,
    deltas: mpsc::UnboundedReceiver<Delta<T>>,
    store: Arc<ThreadSafeStore<T>>,
    handler: Arc<dyn ResourceEventHandler<T>>,
}

impl<T: Resource> Informer<T> {
    /// Build an informer, returning the store it maintains
    pub fn new(
        name: impl Into<String>,
        lister_watcher: Arc<dyn ListerWatcher<T>>,
        handler: Arc<dyn ResourceEventHandler<T>>,
        config: ReflectorConfig,
    ) -> (Arc<ThreadSafeStore<T>>, Self) {
        let store = Arc::new(ThreadSafeStore::new());
        let informer = Self::with_store(name, lister_watcher, store.clone(), handler, config);
        (store, informer)
    }

    /// Build an informer that maintains an existing store
    pub fn with_store(
        name: impl Into<String>,
        lister_watcher: Arc<dyn ListerWatcher<T>>,
        store: Arc<ThreadSafeStore<T>>,
        handler: Arc<dyn ResourceEventHandler<T>>,
        config: ReflectorConfig,
    ) -> Self {
        let name = name.into();
        let (tx, deltas) = mpsc::unbounded_channel();
        let sink = Arc::new(DeltaSink {
            known: Mutex::new(HashMap::new()),
            tx,
        });
        let reflector = Reflector::new(name.clone(), lister_watcher, sink, config);

        Self {
            name,
            reflector,
            deltas,
            store,
            handler,
        }
    }

    /// Run on a background task until `token` is cancelled
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(token))
    }

    /// Run the reflector and the processing loop until `token` is cancelled
    pub async fn run(self, token: CancellationToken) {
        let Self {
            name,
            reflector,
            mut deltas,
            store,
            handler,
        } = self;

        info!("Starting {} informer", name);
        let reflector_task = reflector.spawn(token.clone());

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                delta = deltas.recv() => match delta {
                    Some(delta) => process(&store, handler.as_ref(), delta),
                    None => break,
                },
            }
        }

        let _ = reflector_task.await;
        info!("{} informer stopped", name);
    }
}

fn process<T: Resource>(
    store: &ThreadSafeStore<T>,
    handler: &dyn ResourceEventHandler<T>,
    delta: Delta<T>,
) {
    match delta {
        Delta::Upsert(key, obj) => match store.get_by_key(&key) {
            Some(old) => {
                store.insert_arc(key, obj.clone());
                handler.on_update(&old, &obj);
            }
            None => {
                debug!("Informer observed new {} {}", T::KIND, key);
                store.insert_arc(key, obj.clone());
                handler.on_add(&obj);
            }
        },
        Delta::Deleted(key, deleted) => {
            debug!("Informer observed deletion of {} {}", T::KIND, key);
            store.delete_by_key(&key);
            handler.on_delete(&deleted);
        }
    }
}
