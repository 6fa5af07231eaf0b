//! # ephemera-gate
//!
//! Who may do what, and whether a principal may view content right now.
//!
//! ## Modules
//!
//! - [`authz`]: role/action authorization choke point
//! - [`cache`]: short-lived entitlement cache with explicit invalidation
//! - [`access`]: the access gate (entitlement first, then free views)

pub mod access;
pub mod authz;
pub mod cache;

pub use access::{AccessGate, EntitlementLookup};
pub use authz::{Action, Authorizer, Role};
pub use cache::EntitlementCache;
