//! Content registry and delivery structures.

use serde::{Deserialize, Serialize};

use crate::{DeliveredItemId, DestinationId};

/// Opaque token resolving to a content payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentToken {
    pub token: String,
    /// Transport-level reference to the payload (file id, message link).
    pub payload_ref: String,
    pub created_at: u64,
}

/// Identifies one delivered artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevocationKey {
    pub destination: DestinationId,
    pub item_id: DeliveredItemId,
}

impl RevocationKey {
    pub fn new(destination: DestinationId, item_id: DeliveredItemId) -> Self {
        Self {
            destination,
            item_id,
        }
    }
}

impl std::fmt::Display for RevocationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.destination, self.item_id)
    }
}

/// A persisted revocation deadline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledRevocation {
    pub key: RevocationKey,
    pub armed_at: u64,
    pub fire_at: u64,
}
