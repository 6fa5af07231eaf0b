//! [`Transport`] backed by the event bus.
//!
//! Each call becomes an event for the connected chat bridge. With no bridge
//! subscribed the transport reports itself unavailable, so callers retry
//! and then fail instead of pretending something was sent.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ephemera_types::clock::Clock;
use ephemera_types::content::RevocationKey;
use ephemera_types::transport::{Notice, OperatorAlert, Transport, TransportError};
use ephemera_types::{DeliveredItemId, DestinationId, PrincipalId};

use crate::events::{self, EventBus};

pub struct EventBusTransport {
    bus: EventBus,
    clock: Arc<dyn Clock>,
    next_item: AtomicI64,
    reviewers: Vec<PrincipalId>,
}

impl EventBusTransport {
    /// Item ids start at `first_item_id` and count up.
    pub fn new(
        bus: EventBus,
        clock: Arc<dyn Clock>,
        first_item_id: DeliveredItemId,
        reviewers: Vec<PrincipalId>,
    ) -> Self {
        Self {
            bus,
            clock,
            next_item: AtomicI64::new(first_item_id),
            reviewers,
        }
    }

    fn publish(&self, event_type: &str, payload: serde_json::Value) -> Result<(), TransportError> {
        match self.bus.emit(event_type, self.clock.now(), payload) {
            0 => Err(TransportError::Unavailable("no bridge connected".into())),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Transport for EventBusTransport {
    async fn send_content(
        &self,
        destination: DestinationId,
        payload_ref: &str,
        ttl_secs: u64,
    ) -> Result<DeliveredItemId, TransportError> {
        if self.bus.subscriber_count() == 0 {
            return Err(TransportError::Unavailable("no bridge connected".into()));
        }
        let item_id = self.next_item.fetch_add(1, Ordering::SeqCst);
        self.publish(
            events::CONTENT_DELIVERED,
            serde_json::json!({
                "destination": destination,
                "item_id": item_id,
                "payload_ref": payload_ref,
                "ttl_secs": ttl_secs,
            }),
        )?;
        Ok(item_id)
    }

    async fn delete_item(&self, key: RevocationKey) -> Result<(), TransportError> {
        self.publish(
            events::CONTENT_REMOVED,
            serde_json::json!({
                "destination": key.destination,
                "item_id": key.item_id,
            }),
        )
    }

    async fn send_upsell(
        &self,
        destination: DestinationId,
        principal_id: PrincipalId,
    ) -> Result<(), TransportError> {
        self.publish(
            events::UPSELL_REQUESTED,
            serde_json::json!({
                "destination": destination,
                "principal_id": principal_id,
            }),
        )
    }

    async fn send_notice(
        &self,
        principal_id: PrincipalId,
        notice: Notice,
    ) -> Result<(), TransportError> {
        self.publish(
            events::SUBSCRIPTION_NOTICE,
            serde_json::json!({
                "principal_id": principal_id,
                "notice": notice,
            }),
        )
    }

    async fn notify_operators(&self, alert: OperatorAlert) -> Result<(), TransportError> {
        self.publish(
            events::OPERATOR_ALERT,
            serde_json::json!({
                "recipients": self.reviewers,
                "alert": alert,
            }),
        )
    }
}
