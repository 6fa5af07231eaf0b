//! # ephemera-delivery
//!
//! Content registry, the delivery scheduler and time-bounded revocation of
//! delivered items.
//!
//! Every item the scheduler sends is armed for removal `ttl_secs` later. The
//! deadline is persisted before the in-memory timer starts, so a restart
//! re-arms or immediately fires whatever was still pending.

pub mod registry;
pub mod revocation;
pub mod scheduler;

pub use registry::ContentRegistry;
pub use revocation::RevocationService;
pub use scheduler::DeliveryScheduler;
