//! # ephemera-billing
//!
//! Tier catalog, subscription ledger and the payment approval workflow.
//!
//! ## Payment lifecycle
//!
//! ```text
//! initiated ──attach_proof──▶ awaiting_proof ──decide──▶ approved | rejected
//!     └──────────────────────decide───────────────────▶ approved | rejected
//! ```
//!
//! `approved` and `rejected` are terminal. Approval appends a subscription
//! and resets the principal's free-view counter in the same transaction.
//!
//! ## Modules
//!
//! - [`tiers`]: the configured purchase plans
//! - [`ledger`]: append-only subscription ledger
//! - [`payments`]: the payment state machine

pub mod ledger;
pub mod payments;
pub mod tiers;

pub use ledger::SubscriptionLedger;
pub use payments::{Decision, PaymentWorkflow};
pub use tiers::TierCatalog;
