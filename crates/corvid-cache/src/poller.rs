use crate::error::Result;
use crate::store::{object_key, Store};
use async_trait::async_trait;
use corvid_core::Resource;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Indexed view over a polled snapshot
pub trait Enumerator<T>: Send + Sync {
    fn len(&self) -> usize;

    /// Item at `index`; panics when out of range
    fn get(&self, index: usize) -> &T;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Send + Sync> Enumerator<T> for Vec<T> {
    fn len(&self) -> usize {
        <[T]>::len(self)
    }

    fn get(&self, index: usize) -> &T {
        &self[index]
    }
}

/// Produces a fresh snapshot on every call
#[async_trait]
pub trait PollSource<T>: Send + Sync {
    async fn poll(&self) -> Result<Box<dyn Enumerator<T>>>;
}

/// Periodically polls a source and syncs a store to the snapshot
pub struct Poller<T> {
    source: Arc<dyn PollSource<T>>,
    period: Duration,
    store: Arc<dyn Store<T>>,
}

impl<T: Resource> Poller<T> {
    pub fn new(
        source: Arc<dyn PollSource<T>>,
        period: Duration,
        store: Arc<dyn Store<T>>,
    ) -> Self {
        Self {
            source,
            period,
            store,
        }
    }

    /// Run on a background task until `token` is cancelled
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(token).await })
    }

    pub async fn run(&self, token: CancellationToken) {
        info!("Starting {} poller (period: {:?})", T::KIND, self.period);

        let mut interval = tokio::time::interval(self.period);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!("{} poll failed: {}", T::KIND, e);
                    }
                }
            }
        }

        info!("{} poller stopped", T::KIND);
    }

    /// Poll once and apply the snapshot
    pub async fn poll_once(&self) -> Result<()> {
        let snapshot = self.source.poll().await?;
        self.sync(snapshot.as_ref())
    }

    fn sync(&self, snapshot: &dyn Enumerator<T>) -> Result<()> {
        let mut present = HashSet::with_capacity(snapshot.len());
        for i in 0..snapshot.len() {
            let item = snapshot.get(i).clone();
            let key = object_key(&item)?;
            if self.store.get_by_key(&key).is_some() {
                self.store.update(item)?;
            } else {
                self.store.add(item)?;
            }
            present.insert(key);
        }

        for obj in self.store.list() {
            let key = object_key(obj.as_ref())?;
            if !present.contains(&key) {
                debug!("{} {} no longer polled, removing", T::KIND, key);
                self.store.delete(obj.as_ref())?;
            }
        }

        Ok(())
    }
}
