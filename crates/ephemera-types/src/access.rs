//! Access decisions and denial reasons.

use serde::{Deserialize, Serialize};

use crate::DeliveredItemId;

/// Why a request was allowed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "via")]
pub enum AllowReason {
    /// An active subscription covers the request.
    Entitled { expires_at: u64 },
    /// A free view was consumed; `remaining` are left afterwards.
    FreeView { remaining: u32 },
}

/// Why a request was refused.
///
/// The presentation layer reacts differently to each, so they stay distinct.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Denial {
    /// Free views are used up; show the upsell.
    LimitReached,
    /// The membership precondition failed.
    NotMember,
}

impl Denial {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LimitReached => "limit_reached",
            Self::NotMember => "not_member",
        }
    }
}

/// Result of the access gate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum AccessDecision {
    Allow(AllowReason),
    Deny { reason: Denial },
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }
}

/// Result of a delivery request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum DeliveryOutcome {
    /// The payload was sent and will be removed at `expires_at`.
    Delivered {
        item_id: DeliveredItemId,
        expires_at: u64,
        via: AllowReason,
    },
    /// Nothing was delivered.
    Denied { reason: Denial },
}
