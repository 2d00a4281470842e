//! Content change events.
//!
//! Publishers (a CMS hook, an editor save, an operator) announce changes on a
//! broadcast channel; every loop controller subscribed to it decides on its
//! own whether the change concerns the query it displays.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

const DEFAULT_CAPACITY: usize = 64;

/// Kinds of change that invalidate cached responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PostCreated,
    PostUpdated,
    /// Explicit request to drop cached data and reload.
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentEvent {
    /// Unique identifier for log correlation (UUIDv4).
    pub id: Uuid,
    pub kind: EventKind,
    /// Content type the change belongs to. `None` concerns every loop.
    pub content_type: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl ContentEvent {
    pub fn new(kind: EventKind, content_type: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            content_type,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn scoped(kind: EventKind, content_type: impl Into<String>) -> Self {
        Self::new(kind, Some(content_type.into()))
    }

    pub fn unscoped(kind: EventKind) -> Self {
        Self::new(kind, None)
    }

    /// Whether this event concerns loops showing `content_type`.
    pub fn applies_to(&self, content_type: &str) -> bool {
        self.content_type
            .as_deref()
            .is_none_or(|scope| scope == content_type)
    }
}

/// Broadcast channel carrying [`ContentEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ContentEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event, returning how many subscribers received it.
    pub fn publish(&self, event: ContentEvent) -> usize {
        info!(
            event_id = %event.id,
            event_kind = ?event.kind,
            content_type = event.content_type.as_deref().unwrap_or("*"),
            "Content event published"
        );

        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("Content event dropped: no subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ContentEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
