//! The chat-transport seam.
//!
//! Webhook plumbing, copy text and keyboards live outside this workspace.
//! Components only see this trait and always call it through the resilient
//! call wrapper.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::content::RevocationKey;
use crate::{DeliveredItemId, DestinationId, PaymentId, PrincipalId, ServiceError, SubscriptionId};

/// Transport failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Network hiccup, rate limit, upstream 5xx. Retryable.
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// The upstream refused the call (chat gone, message already deleted).
    #[error("transport rejected call: {0}")]
    Rejected(String),
}

impl From<TransportError> for ServiceError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unavailable(detail) => ServiceError::Dependency(detail),
            TransportError::Rejected(detail) => ServiceError::Validation(detail),
        }
    }
}

/// A message addressed to a principal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Notice {
    /// The subscription ends within the warning window.
    ExpiryWarning {
        subscription_id: SubscriptionId,
        tier: String,
        expires_at: u64,
    },
    /// The subscription has ended.
    Expired {
        subscription_id: SubscriptionId,
        tier: String,
    },
    PaymentApproved {
        payment_id: PaymentId,
        tier: String,
        expires_at: u64,
    },
    PaymentRejected { payment_id: PaymentId },
}

/// A message for every operator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum OperatorAlert {
    ProofSubmitted {
        payment_id: PaymentId,
        principal_id: PrincipalId,
        tier: String,
        price: u64,
        proof_ref: String,
    },
}

/// Outbound chat operations.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a payload and return the id of the delivered message.
    async fn send_content(
        &self,
        destination: DestinationId,
        payload_ref: &str,
        ttl_secs: u64,
    ) -> Result<DeliveredItemId, TransportError>;

    /// Remove a previously delivered message.
    async fn delete_item(&self, key: RevocationKey) -> Result<(), TransportError>;

    /// Tell the principal the free views are used up.
    async fn send_upsell(
        &self,
        destination: DestinationId,
        principal_id: PrincipalId,
    ) -> Result<(), TransportError>;

    async fn send_notice(&self, principal_id: PrincipalId, notice: Notice)
        -> Result<(), TransportError>;

    async fn notify_operators(&self, alert: OperatorAlert) -> Result<(), TransportError>;
}
