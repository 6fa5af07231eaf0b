//! Delivery scheduler.
//!
//! Resolves a token, asks the access gate, sends the payload and arms its
//! removal. A denied request gets an upsell instead of content.

use std::sync::Arc;

use ephemera_gate::AccessGate;
use ephemera_resilience::RetryPolicy;
use ephemera_types::access::{AccessDecision, Denial, DeliveryOutcome};
use ephemera_types::content::RevocationKey;
use ephemera_types::transport::Transport;
use ephemera_types::{DestinationId, PrincipalId, Result, ServiceError};
use tracing::{error, info, warn};

use crate::registry::ContentRegistry;
use crate::revocation::RevocationService;

pub struct DeliveryScheduler {
    registry: Arc<ContentRegistry>,
    gate: Arc<AccessGate>,
    revocations: RevocationService,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    ttl_secs: u64,
}

impl DeliveryScheduler {
    pub fn new(
        registry: Arc<ContentRegistry>,
        gate: Arc<AccessGate>,
        revocations: RevocationService,
        transport: Arc<dyn Transport>,
        retry: RetryPolicy,
        ttl_secs: u64,
    ) -> Self {
        Self {
            registry,
            gate,
            revocations,
            transport,
            retry,
            ttl_secs,
        }
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Deliver the content behind `token` to `destination` for `principal_id`.
    ///
    /// An unknown token is an error and has no side effects.
    pub async fn deliver(
        &self,
        destination: DestinationId,
        token: &str,
        principal_id: PrincipalId,
    ) -> Result<DeliveryOutcome> {
        let content = self.registry.resolve(token).await?;

        let via = match self.gate.authorize(principal_id).await? {
            AccessDecision::Allow(via) => via,
            AccessDecision::Deny { reason } => {
                info!(principal_id, destination, reason = reason.as_str(), "delivery denied");
                if reason == Denial::LimitReached {
                    self.upsell(destination, principal_id).await;
                }
                return Ok(DeliveryOutcome::Denied { reason });
            }
        };

        let ttl = self.ttl_secs;
        let item_id = ephemera_resilience::call(&self.retry, "send_content", || async {
            self.transport
                .send_content(destination, &content.payload_ref, ttl)
                .await
                .map_err(ServiceError::from)
        })
        .await?;

        let key = RevocationKey::new(destination, item_id);
        let scheduled = match self.revocations.arm(key, ttl).await {
            Ok(scheduled) => scheduled,
            Err(e) => {
                // Never leave an item behind without a deadline.
                error!(%key, error = %e, "could not arm revocation; removing item now");
                self.revocations.remove_now(key).await;
                return Err(e);
            }
        };

        info!(
            principal_id,
            %key,
            expires_at = scheduled.fire_at,
            "content delivered"
        );
        Ok(DeliveryOutcome::Delivered {
            item_id,
            expires_at: scheduled.fire_at,
            via,
        })
    }

    async fn upsell(&self, destination: DestinationId, principal_id: PrincipalId) {
        let sent = ephemera_resilience::call(&self.retry, "send_upsell", || async {
            self.transport
                .send_upsell(destination, principal_id)
                .await
                .map_err(ServiceError::from)
        })
        .await;
        if let Err(e) = sent {
            warn!(principal_id, destination, error = %e, "upsell not delivered");
        }
    }
}
