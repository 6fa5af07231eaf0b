//! Database query functions organized by domain.

pub mod content;
pub mod counters;
pub mod payments;
pub mod revocations;
pub mod subscriptions;
