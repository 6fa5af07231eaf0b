//! Short-lived cache of subscription lookups.
//!
//! Entries live for `ttl_secs` and are dropped explicitly through
//! [`EntitlementCache::invalidate`] whenever a subscription is granted. A
//! cached subscription is re-checked against its own `expires_at` on every
//! read, so a hit can never extend an entitlement.
//!
//! Each principal also carries a generation that `invalidate` bumps. A
//! lookup takes the generation before reading the ledger and hands it back
//! to [`EntitlementCache::put`], which drops the result if an invalidation
//! happened in between. A grant racing a lookup can therefore never be
//! hidden behind a stale "no subscription" entry.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use ephemera_types::billing::Subscription;
use ephemera_types::PrincipalId;

/// Default entry lifetime in seconds.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 30;

#[derive(Debug, Clone)]
struct Entry {
    subscription: Option<Subscription>,
    cached_until: u64,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<PrincipalId, Entry>,
    generations: HashMap<PrincipalId, u64>,
}

impl State {
    fn generation(&self, principal_id: PrincipalId) -> u64 {
        self.generations.get(&principal_id).copied().unwrap_or(0)
    }
}

/// Per-principal cache of the active subscription (or its absence).
#[derive(Debug)]
pub struct EntitlementCache {
    ttl_secs: u64,
    state: Mutex<State>,
}

impl Default for EntitlementCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL_SECS)
    }
}

impl EntitlementCache {
    /// A `ttl_secs` of zero disables caching.
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl_secs,
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// `Some(lookup)` on a fresh hit, `None` on a miss.
    pub fn get(&self, principal_id: PrincipalId, now: u64) -> Option<Option<Subscription>> {
        let mut state = self.lock();
        let entry = state.entries.get(&principal_id)?;
        if entry.cached_until <= now {
            state.entries.remove(&principal_id);
            return None;
        }
        Some(
            entry
                .subscription
                .clone()
                .filter(|sub| sub.is_active_at(now)),
        )
    }

    /// Current generation for `principal_id`. Take it before the ledger read.
    pub fn generation(&self, principal_id: PrincipalId) -> u64 {
        self.lock().generation(principal_id)
    }

    /// Store a lookup made at `generation`. Returns false when an
    /// invalidation happened since, in which case nothing is stored.
    pub fn put(
        &self,
        principal_id: PrincipalId,
        subscription: Option<Subscription>,
        now: u64,
        generation: u64,
    ) -> bool {
        if self.ttl_secs == 0 {
            return false;
        }
        let mut state = self.lock();
        if state.generation(principal_id) != generation {
            return false;
        }
        state.entries.insert(
            principal_id,
            Entry {
                subscription,
                cached_until: now.saturating_add(self.ttl_secs),
            },
        );
        true
    }

    /// Drop the entry for `principal_id` and fence out lookups in flight.
    pub fn invalidate(&self, principal_id: PrincipalId) {
        let mut state = self.lock();
        state.entries.remove(&principal_id);
        let generation = state.generations.entry(principal_id).or_insert(0);
        *generation = generation.wrapping_add(1);
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ephemera_types::billing::NotifyStatus;

    fn sub(expires_at: u64) -> Subscription {
        Subscription {
            id: 1,
            principal_id: 7,
            tier: "weekly".into(),
            price: 129,
            payment_id: None,
            created_at: 0,
            expires_at,
            notify_status: NotifyStatus::None,
        }
    }

    #[test]
    fn test_hit_and_expiry() {
        let cache = EntitlementCache::new(30);
        assert!(cache.put(7, Some(sub(1_000)), 100, 0));
        assert_eq!(cache.get(7, 129), Some(Some(sub(1_000))));
        assert_eq!(cache.get(7, 130), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_negative_entries_are_cached() {
        let cache = EntitlementCache::new(30);
        cache.put(7, None, 100, 0);
        assert_eq!(cache.get(7, 110), Some(None));
    }

    #[test]
    fn test_cached_subscription_rechecked_against_expiry() {
        let cache = EntitlementCache::new(30);
        cache.put(7, Some(sub(110)), 100, 0);
        assert_eq!(cache.get(7, 109), Some(Some(sub(110))));
        assert_eq!(cache.get(7, 110), Some(None));
    }

    #[test]
    fn test_invalidate() {
        let cache = EntitlementCache::new(30);
        cache.put(7, None, 100, 0);
        cache.put(8, None, 100, 0);
        cache.invalidate(7);
        assert_eq!(cache.get(7, 101), None);
        assert_eq!(cache.get(8, 101), Some(None));
        assert_eq!(cache.generation(7), 1);
        assert_eq!(cache.generation(8), 0);
    }

    #[test]
    fn test_put_after_invalidation_is_dropped() {
        let cache = EntitlementCache::new(30);
        let generation = cache.generation(7);
        // A grant lands between the ledger read and the store.
        cache.invalidate(7);
        assert!(!cache.put(7, None, 100, generation));
        assert_eq!(cache.get(7, 101), None);

        let fresh = cache.generation(7);
        assert!(cache.put(7, Some(sub(1_000)), 101, fresh));
        assert_eq!(cache.get(7, 102), Some(Some(sub(1_000))));
    }

    #[test]
    fn test_zero_ttl_disables() {
        let cache = EntitlementCache::new(0);
        assert!(!cache.put(7, Some(sub(1_000)), 100, 0));
        assert_eq!(cache.get(7, 100), None);
    }
}
