//! Fan-out of execution events to subscribed observers.

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};
use testgrid_core::types::Timestamp;

use crate::event::ExecutionEvent;

/// Channel sender half for pushing events to one subscriber.
pub type EventSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Metadata for a single subscriber.
pub struct Subscriber {
    /// Channel sender for outbound events to this subscriber.
    pub sender: EventSender,
    /// When this subscriber attached.
    pub subscribed_at: Timestamp,
}

/// Fans execution lifecycle events out to all attached subscribers.
///
/// Each subscriber gets its own unbounded channel, so delivery to one
/// never blocks delivery to another. Thread-safe via interior `RwLock`;
/// designed to be wrapped in `Arc` and shared across the application.
///
/// Events published for the same execution id arrive at each subscriber
/// in publication order; no ordering is guaranteed across subscribers.
pub struct NotificationHub {
    subscribers: RwLock<HashMap<String, Subscriber>>,
}

impl NotificationHub {
    /// Create a new, empty hub.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new subscriber.
    ///
    /// Returns the receiver half of the event channel. Dropping the
    /// receiver detaches the subscriber; it is skipped on the next
    /// broadcast and removed lazily.
    pub async fn subscribe(&self, subscriber_id: String) -> mpsc::UnboundedReceiver<ExecutionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriber = Subscriber {
            sender: tx,
            subscribed_at: chrono::Utc::now(),
        };
        self.subscribers.write().await.insert(subscriber_id, subscriber);
        rx
    }

    /// Remove a subscriber by its id.
    pub async fn unsubscribe(&self, subscriber_id: &str) {
        self.subscribers.write().await.remove(subscriber_id);
    }

    /// Broadcast an event to all current subscribers.
    ///
    /// Departed subscribers (closed channels) are skipped and logged;
    /// a drop is never fatal to the publisher. Returns the number of
    /// subscribers the event was delivered to.
    pub async fn broadcast(&self, event: ExecutionEvent) -> usize {
        let subscribers = self.subscribers.read().await;
        let mut delivered = 0;
        for (id, subscriber) in subscribers.iter() {
            if subscriber.sender.send(event.clone()).is_err() {
                tracing::debug!(
                    subscriber_id = %id,
                    execution_id = %event.execution_id,
                    "Dropping event for departed subscriber",
                );
            } else {
                delivered += 1;
            }
        }
        delivered
    }

    /// Return the current number of attached subscribers.
    pub async fn client_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Detach every subscriber and clear the registry.
    ///
    /// Dropping the senders closes each subscriber's receive stream,
    /// which observers treat as end-of-stream during shutdown.
    pub async fn shutdown(&self) {
        let mut subscribers = self.subscribers.write().await;
        let count = subscribers.len();
        subscribers.clear();
        tracing::info!(count, "Detached all event subscribers");
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}
