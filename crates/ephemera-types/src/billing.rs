//! Payment and subscription structures.

use serde::{Deserialize, Serialize};

use crate::{PaymentId, PrincipalId, SubscriptionId, SECS_PER_DAY};

/// A named purchase plan with a fixed price and duration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    pub name: String,
    /// Price in whole currency units.
    pub price: u64,
    pub days_valid: u32,
}

impl Tier {
    /// Subscription length in seconds.
    pub fn duration_secs(&self) -> u64 {
        u64::from(self.days_valid) * SECS_PER_DAY
    }
}

/// Lifecycle of a pending payment. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Initiated,
    AwaitingProof,
    Approved,
    Rejected,
}

impl PaymentStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::AwaitingProof => "awaiting_proof",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Parse the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initiated" => Some(Self::Initiated),
            "awaiting_proof" => Some(Self::AwaitingProof),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// `approved` and `rejected` never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A purchase in flight.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPayment {
    pub id: PaymentId,
    pub principal_id: PrincipalId,
    pub tier: String,
    /// Fixed from the tier catalog at creation time.
    pub price: u64,
    pub days_valid: u32,
    pub status: PaymentStatus,
    /// Opaque reference to the uploaded proof (screenshot file id).
    pub proof_ref: Option<String>,
    /// Operator that approved or rejected the payment.
    pub decided_by: Option<PrincipalId>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Which lifecycle notice a subscription has received.
///
/// Stored as 0/1/2 and only ever increases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum NotifyStatus {
    None = 0,
    Warned = 1,
    Expired = 2,
}

impl NotifyStatus {
    /// Convert from the stored integer; unknown values clamp to `Expired`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Warned,
            _ => Self::Expired,
        }
    }
}

/// A time-bounded entitlement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub principal_id: PrincipalId,
    pub tier: String,
    pub price: u64,
    /// Payment that produced this row, when granted through approval.
    pub payment_id: Option<PaymentId>,
    pub created_at: u64,
    pub expires_at: u64,
    pub notify_status: NotifyStatus,
}

impl Subscription {
    /// Whether the entitlement still holds at `now`.
    pub fn is_active_at(&self, now: u64) -> bool {
        self.expires_at > now
    }
}

/// Default tier catalog.
pub fn default_tiers() -> Vec<Tier> {
    vec![
        Tier {
            name: "weekly".to_string(),
            price: 129,
            days_valid: 7,
        },
        Tier {
            name: "monthly".to_string(),
            price: 399,
            days_valid: 30,
        },
    ]
}
