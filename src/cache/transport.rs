//! Broadcast channel and change feed seams, with in-process implementations.
//!
//! The invalidation bus only sees the two traits. [`LocalBroadcastHub`] and
//! [`LocalChangeFeed`] connect several buses inside one process; delivery is
//! at-most-once, so a lagging subscriber loses messages rather than blocking
//! publishers.

use async_stream::stream;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::BoxStream;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use super::error::TransportError;
use super::events::{ChangeEvent, InvalidationEvent};

const DEFAULT_CAPACITY: usize = 256;

pub type EventStream = BoxStream<'static, InvalidationEvent>;
pub type ChangeStream = BoxStream<'static, ChangeEvent>;

/// Pub/sub channel carrying invalidation events between sessions.
#[async_trait]
pub trait BroadcastChannel: Send + Sync {
    async fn publish(&self, topic: &str, event: &InvalidationEvent) -> Result<(), TransportError>;

    async fn subscribe(&self, topic: &str) -> Result<EventStream, TransportError>;
}

/// Row-level change notifications from the backend.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, resource: &str) -> Result<ChangeStream, TransportError>;
}

/// In-process [`BroadcastChannel`]: one tokio broadcast channel per topic,
/// carrying JSON-encoded events.
pub struct LocalBroadcastHub {
    topics: DashMap<String, broadcast::Sender<String>>,
    capacity: usize,
}

impl LocalBroadcastHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<String> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Live subscriptions on `topic`.
    pub fn receiver_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for LocalBroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BroadcastChannel for LocalBroadcastHub {
    async fn publish(&self, topic: &str, event: &InvalidationEvent) -> Result<(), TransportError> {
        let message =
            serde_json::to_string(event).map_err(|err| TransportError::publish(topic, err.to_string()))?;
        match self.sender(topic).send(message) {
            Ok(receivers) => debug!(topic, event_id = %event.id, receivers, "Invalidation published"),
            Err(_) => debug!(topic, event_id = %event.id, "Invalidation published with no subscribers"),
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<EventStream, TransportError> {
        let mut receiver = self.sender(topic).subscribe();
        let topic = topic.to_string();

        Ok(Box::pin(stream! {
            loop {
                match receiver.recv().await {
                    Ok(message) => match serde_json::from_str::<InvalidationEvent>(&message) {
                        Ok(event) => yield event,
                        Err(error) => warn!(topic = %topic, error = %error, "Dropping undecodable invalidation"),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(topic = %topic, skipped, "Invalidation subscriber lagged, messages dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }))
    }
}

/// In-process [`ChangeFeed`] driven by [`LocalChangeFeed::emit`].
pub struct LocalChangeFeed {
    resources: DashMap<String, broadcast::Sender<ChangeEvent>>,
    capacity: usize,
}

impl LocalChangeFeed {
    pub fn new() -> Self {
        Self {
            resources: DashMap::new(),
            capacity: DEFAULT_CAPACITY,
        }
    }

    fn sender(&self, resource: &str) -> broadcast::Sender<ChangeEvent> {
        self.resources
            .entry(resource.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Deliver `event` to every watcher of its resource. Returns the number reached.
    pub fn emit(&self, event: ChangeEvent) -> usize {
        self.sender(&event.resource).send(event).unwrap_or(0)
    }

    pub fn watcher_count(&self, resource: &str) -> usize {
        self.resources
            .get(resource)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for LocalChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangeFeed for LocalChangeFeed {
    async fn subscribe(&self, resource: &str) -> Result<ChangeStream, TransportError> {
        let mut receiver = self.sender(resource).subscribe();
        let resource = resource.to_string();

        Ok(Box::pin(stream! {
            loop {
                match receiver.recv().await {
                    Ok(event) => yield event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(resource = %resource, skipped, "Change feed lagged, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }))
    }
}
