//! Corvid Cache - Local mirrors of remote collections
//!
//! This crate provides:
//! - Thread-safe keyed stores and a keyed FIFO work queue
//! - List/watch sources over a `ClusterClient`
//! - Reflectors that keep a store in sync with a collection
//! - Informers that notify event handlers of changes
//! - Pollers for pull-based snapshots

pub mod error;
pub mod fifo;
pub mod informer;
pub mod listwatch;
pub mod poller;
pub mod reflector;
pub mod store;

// Re-export commonly used types
pub use error::{CacheError, Result};
pub use fifo::Fifo;
pub use informer::{DeletedObject, Informer, ResourceEventHandler, ResourceEventHandlerFuncs};
pub use listwatch::{EventStream, ListWatch, ListerWatcher};
pub use poller::{Enumerator, PollSource, Poller};
pub use reflector::{Reflector, ReflectorConfig};
pub use store::{object_key, Store, ThreadSafeStore};
