use crate::error::{CacheError, Result};
use async_trait::async_trait;
use corvid_client::{ClusterClient, FieldSelector};
use corvid_core::{Resource, WatchEvent, WatchEventType};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::warn;

/// Typed watch stream
pub type EventStream<T> = BoxStream<'static, Result<WatchEvent<T>>>;

/// Source of a full listing plus a change stream for one collection
#[async_trait]
pub trait ListerWatcher<T>: Send + Sync {
    /// List every object, returning the items and the listing's resource version
    async fn list(&self) -> Result<(Vec<T>, String)>;

    /// Watch changes after `resource_version`
    async fn watch(&self, resource_version: &str) -> Result<EventStream<T>>;
}

/// `ListerWatcher` over a `ClusterClient` collection filtered by a field selector
pub struct ListWatch<T> {
    client: Arc<dyn ClusterClient>,
    selector: FieldSelector,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Resource> ListWatch<T> {
    pub fn new(client: Arc<dyn ClusterClient>, selector: FieldSelector) -> Self {
        Self {
            client,
            selector,
            _marker: PhantomData,
        }
    }

    /// Every object of the kind
    pub fn everything(client: Arc<dyn ClusterClient>) -> Self {
        Self::new(client, FieldSelector::everything())
    }

    pub fn selector(&self) -> &FieldSelector {
        &self.selector
    }
}

#[async_trait]
impl<T: Resource> ListerWatcher<T> for ListWatch<T> {
    async fn list(&self) -> Result<(Vec<T>, String)> {
        let list = self.client.list(T::KIND, &self.selector).await?;

        let mut items = Vec::with_capacity(list.items.len());
        for value in list.items {
            match corvid_core::from_value::<T>(value) {
                Ok(item) => items.push(item),
                Err(e) => warn!("Skipping undecodable {} in list: {}", T::KIND, e),
            }
        }

        Ok((items, list.resource_version))
    }

    async fn watch(&self, resource_version: &str) -> Result<EventStream<T>> {
        let raw = self
            .client
            .watch(T::KIND, &self.selector, resource_version)
            .await?;

        let events = raw.map(|item| {
            let event = item?;
            if event.event_type == WatchEventType::Error {
                return Err(CacheError::watch_error(event.object.to_string()));
            }
            event
                .try_map(corvid_core::from_value::<T>)
                .map_err(CacheError::from)
        });

        Ok(events.boxed())
    }
}
