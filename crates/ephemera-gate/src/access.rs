//! The access gate.
//!
//! An active subscription always wins and leaves the free-view counter
//! alone. Without one, a free view is consumed through a single conditional
//! UPSERT, so parallel requests from one principal can never be granted more
//! than `free_limit` views in total.

use std::sync::Arc;

use async_trait::async_trait;
use ephemera_db::queries::counters;
use ephemera_db::SharedConnection;
use ephemera_resilience::RetryPolicy;
use ephemera_types::access::{AccessDecision, AllowReason, Denial};
use ephemera_types::billing::Subscription;
use ephemera_types::clock::Clock;
use ephemera_types::{PrincipalId, Result, ServiceError};
use tracing::debug;

use crate::cache::EntitlementCache;

/// Read side of the subscription ledger.
#[async_trait]
pub trait EntitlementLookup: Send + Sync {
    /// The principal's active subscription at `now`.
    async fn active_subscription(
        &self,
        principal_id: PrincipalId,
        now: u64,
    ) -> Result<Option<Subscription>>;
}

/// Decides whether a principal may view content.
pub struct AccessGate {
    conn: SharedConnection,
    entitlements: Arc<dyn EntitlementLookup>,
    cache: Arc<EntitlementCache>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    free_limit: u32,
}

impl AccessGate {
    pub fn new(
        conn: SharedConnection,
        entitlements: Arc<dyn EntitlementLookup>,
        cache: Arc<EntitlementCache>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        free_limit: u32,
    ) -> Self {
        Self {
            conn,
            entitlements,
            cache,
            clock,
            retry,
            free_limit,
        }
    }

    pub fn free_limit(&self) -> u32 {
        self.free_limit
    }

    /// Allow or deny one view for `principal_id`.
    pub async fn authorize(&self, principal_id: PrincipalId) -> Result<AccessDecision> {
        let now = self.clock.now();

        if let Some(sub) = self.entitlement(principal_id, now).await? {
            debug!(principal_id, subscription_id = sub.id, "access via entitlement");
            return Ok(AccessDecision::Allow(AllowReason::Entitled {
                expires_at: sub.expires_at,
            }));
        }

        let limit = self.free_limit;
        let consumed = ephemera_resilience::call(&self.retry, "consume_free_view", || async {
            let conn = self.conn.lock().await;
            counters::try_consume(&conn, principal_id, limit, now).map_err(ServiceError::from)
        })
        .await?;

        match consumed {
            Some(count) => {
                let remaining = limit.saturating_sub(count);
                debug!(principal_id, count, remaining, "free view granted");
                Ok(AccessDecision::Allow(AllowReason::FreeView { remaining }))
            }
            None => {
                debug!(principal_id, limit, "free views exhausted");
                Ok(AccessDecision::Deny {
                    reason: Denial::LimitReached,
                })
            }
        }
    }

    /// Active subscription, served from the cache when fresh.
    pub async fn entitlement(
        &self,
        principal_id: PrincipalId,
        now: u64,
    ) -> Result<Option<Subscription>> {
        if let Some(hit) = self.cache.get(principal_id, now) {
            return Ok(hit);
        }
        let generation = self.cache.generation(principal_id);
        let found = self.entitlements.active_subscription(principal_id, now).await?;
        if !self.cache.put(principal_id, found.clone(), now, generation) {
            debug!(principal_id, "entitlement changed during lookup; not cached");
        }
        Ok(found)
    }

    /// Free views consumed so far.
    pub async fn free_views_used(&self, principal_id: PrincipalId) -> Result<u32> {
        ephemera_resilience::call(&self.retry, "read_view_counter", || async {
            let conn = self.conn.lock().await;
            counters::get(&conn, principal_id).map_err(ServiceError::from)
        })
        .await
    }
}
