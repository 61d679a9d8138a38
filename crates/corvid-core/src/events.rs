use serde::{Deserialize, Serialize};

/// Watch event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
    Error,
}

/// A single event delivered by a watch, in the wire format
/// `{"type": "ADDED", "object": {...}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent<T> {
    #[serde(rename = "type")]
    pub event_type: WatchEventType,
    pub object: T,
}

impl<T> WatchEvent<T> {
    pub fn new(event_type: WatchEventType, object: T) -> Self {
        Self { event_type, object }
    }

    /// Convert the payload, keeping the event type
    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<WatchEvent<U>, E> {
        Ok(WatchEvent {
            event_type: self.event_type,
            object: f(self.object)?,
        })
    }
}
