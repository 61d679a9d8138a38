use crate::error::Result;
use crate::listwatch::ListerWatcher;
use crate::store::Store;
use corvid_core::{Resource, WatchEvent, WatchEventType};
use futures_util::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Configuration for a reflector
#[derive(Debug, Clone)]
pub struct ReflectorConfig {
    /// Force a fresh list this often; zero disables resync
    pub resync_period: Duration,
    /// Pause after a failed or closed list/watch cycle
    pub retry_period: Duration,
}

impl Default for ReflectorConfig {
    fn default() -> Self {
        Self {
            resync_period: Duration::ZERO,
            retry_period: Duration::from_secs(1),
        }
    }
}

impl ReflectorConfig {
    pub fn with_resync(resync_period: Duration) -> Self {
        Self {
            resync_period,
            ..Default::default()
        }
    }
}

/// Why a list/watch cycle ended without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Cancelled,
    ResyncRequested,
    Closed,
}

/// Mirrors a remote collection into a local store
///
/// Each cycle lists the collection, replaces the store contents, then applies
/// watch events from the listing's resource version until the watch fails,
/// closes or the resync timer fires. Failures are logged and the cycle starts
/// over after `retry_period`.
pub struct Reflector<T> {
    name: String,
    lister_watcher: Arc<dyn ListerWatcher<T>>,
    store: Arc<dyn Store<T>>,
    config: ReflectorConfig,
    last_sync_resource_version: Mutex<String>,
}

impl<T: Resource> Reflector<T> {
    pub fn new(
        name: impl Into<String>,
        lister_watcher: Arc<dyn ListerWatcher<T>>,
        store: Arc<dyn Store<T>>,
        config: ReflectorConfig,
    ) -> Self {
        Self {
            name: name.into(),
            lister_watcher,
            store,
            config,
            last_sync_resource_version: Mutex::new(String::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resource version of the newest list or event applied to the store
    pub fn last_sync_resource_version(&self) -> String {
        self.last_sync_resource_version
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_last_sync_resource_version(&self, version: &str) {
        *self
            .last_sync_resource_version
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = version.to_string();
    }

    /// Run on a background task until `token` is cancelled
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(token).await })
    }

    /// Run until `token` is cancelled
    pub async fn run(&self, token: CancellationToken) {
        info!(
            "Starting {} reflector for {} (resync: {:?})",
            self.name,
            T::KIND,
            self.config.resync_period
        );

        loop {
            match self.list_and_watch(&token).await {
                Ok(Outcome::Cancelled) => break,
                Ok(Outcome::ResyncRequested) => {
                    debug!("{} reflector resyncing", self.name);
                    continue;
                }
                Ok(Outcome::Closed) => {
                    debug!("{} reflector watch closed", self.name);
                }
                Err(e) => {
                    warn!("{} reflector list/watch failed: {}", self.name, e);
                }
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.config.retry_period) => {}
            }
        }

        info!("{} reflector stopped", self.name);
    }

    async fn list_and_watch(&self, token: &CancellationToken) -> Result<Outcome> {
        let (items, resource_version) = tokio::select! {
            _ = token.cancelled() => return Ok(Outcome::Cancelled),
            listed = self.lister_watcher.list() => listed?,
        };

        debug!(
            "{} reflector listed {} items at version {}",
            self.name,
            items.len(),
            resource_version
        );
        self.store.replace(items, &resource_version)?;
        self.set_last_sync_resource_version(&resource_version);

        let mut events = tokio::select! {
            _ = token.cancelled() => return Ok(Outcome::Cancelled),
            watched = self.lister_watcher.watch(&resource_version) => watched?,
        };

        let resync_period = self.config.resync_period;
        let resync = async move {
            if resync_period.is_zero() {
                std::future::pending::<()>().await
            } else {
                tokio::time::sleep(resync_period).await
            }
        };
        tokio::pin!(resync);

        loop {
            tokio::select! {
                _ = token.cancelled() => return Ok(Outcome::Cancelled),
                _ = &mut resync => return Ok(Outcome::ResyncRequested),
                next = events.next() => match next {
                    None => return Ok(Outcome::Closed),
                    Some(event) => self.apply(event?),
                },
            }
        }
    }

    fn apply(&self, event: WatchEvent<T>) {
        let version = event.object.resource_version();
        trace!(
            "{} reflector applying {:?} for {}",
            self.name,
            event.event_type,
            event.object.name_any()
        );

        let applied = match event.event_type {
            WatchEventType::Added => self.store.add(event.object),
            WatchEventType::Modified => self.store.update(event.object),
            WatchEventType::Deleted => self.store.delete(&event.object),
            WatchEventType::Error => return,
        };

        match applied {
            Ok(()) => {
                if let Some(version) = version {
                    self.set_last_sync_resource_version(version.as_str());
                }
            }
            Err(e) => warn!("{} reflector dropped event: {}", self.name, e),
        }
    }
}
