//! # ephemera-types
//!
//! Shared domain types used across the Ephemera workspace: content tokens,
//! payments, subscriptions, access decisions, the service error taxonomy and
//! the two seams every component talks through ([`clock::Clock`] and
//! [`transport::Transport`]).

pub mod access;
pub mod billing;
pub mod clock;
pub mod content;
pub mod error;
pub mod testing;
pub mod transport;

pub use error::{ConflictKind, ServiceError};

/// External end-user identity (chat user id).
pub type PrincipalId = i64;

/// Chat the content is delivered into.
pub type DestinationId = i64;

/// Transport-assigned identifier of a delivered message.
pub type DeliveredItemId = i64;

/// Row id of a pending payment.
pub type PaymentId = i64;

/// Row id of a subscription.
pub type SubscriptionId = i64;

/// Seconds in a day.
pub const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Default number of free views per principal.
pub const DEFAULT_FREE_LIMIT: u32 = 3;

/// Default lifetime of a delivered item in seconds (15 minutes).
pub const DEFAULT_DELIVERY_TTL_SECS: u64 = 15 * 60;

/// Result alias for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;
