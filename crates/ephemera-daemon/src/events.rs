//! Event emission.
//!
//! Events are pushed from the daemon to `subscribe_events` connections as
//! JSON-RPC notifications. The chat bridge is one such subscriber: it turns
//! transport events into actual chat messages.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub const DAEMON_STARTED: &str = "DaemonStarted";
pub const CONTENT_DELIVERED: &str = "ContentDelivered";
pub const CONTENT_REMOVED: &str = "ContentRemoved";
pub const UPSELL_REQUESTED: &str = "UpsellRequested";
pub const SUBSCRIPTION_NOTICE: &str = "SubscriptionNotice";
pub const OPERATOR_ALERT: &str = "OperatorAlert";

/// An event emitted by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event type name (e.g. "ContentDelivered", "DaemonStarted").
    pub event_type: String,
    /// Unix timestamp.
    pub timestamp: u64,
    /// Monotonic per-process sequence number.
    pub sequence: u64,
    /// Type-specific payload.
    pub payload: serde_json::Value,
}

/// Filter for event subscriptions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// Only these event types. `None` = everything.
    #[serde(default)]
    pub event_types: Option<Vec<String>>,
}

/// Event bus for broadcasting events to subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event and return how many subscribers received it.
    pub fn emit(&self, event_type: &str, timestamp: u64, payload: serde_json::Value) -> usize {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let event = Event {
            event_type: event_type.to_string(),
            timestamp,
            sequence,
            payload,
        };
        // No subscribers is not an error for the bus itself.
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to events. Returns a receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Get the current sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

impl EventFilter {
    /// Check if an event matches this filter.
    pub fn matches(&self, event: &Event) -> bool {
        match &self.event_types {
            Some(types) => types.iter().any(|t| t == &event.event_type),
            None => true,
        }
    }
}
