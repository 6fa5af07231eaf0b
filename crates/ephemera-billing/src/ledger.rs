//! Subscription ledger.
//!
//! Rows are only ever appended; history is kept. The active subscription is
//! the row with the latest `expires_at` still in the future.

use std::sync::Arc;

use async_trait::async_trait;
use ephemera_db::queries::subscriptions;
use ephemera_db::SharedConnection;
use ephemera_gate::EntitlementLookup;
use ephemera_resilience::RetryPolicy;
use ephemera_types::billing::Subscription;
use ephemera_types::clock::Clock;
use ephemera_types::{PaymentId, PrincipalId, Result, ServiceError, SECS_PER_DAY};
use rusqlite::Connection;

/// Time-bounded entitlements per principal.
pub struct SubscriptionLedger {
    conn: SharedConnection,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl SubscriptionLedger {
    pub fn new(conn: SharedConnection, clock: Arc<dyn Clock>, retry: RetryPolicy) -> Self {
        Self { conn, clock, retry }
    }

    /// Append a subscription lasting `days` from now.
    pub async fn grant(
        &self,
        principal_id: PrincipalId,
        tier: &str,
        price: u64,
        days: u32,
    ) -> Result<Subscription> {
        let now = self.clock.now();
        let sub = ephemera_resilience::call(&self.retry, "grant_subscription", || async {
            let conn = self.conn.lock().await;
            Self::grant_in(&conn, principal_id, tier, price, days, None, now)
        })
        .await?;
        tracing::info!(
            principal_id,
            subscription_id = sub.id,
            tier,
            expires_at = sub.expires_at,
            "subscription granted"
        );
        Ok(sub)
    }

    /// Append a subscription on an already locked connection or transaction.
    pub fn grant_in(
        conn: &Connection,
        principal_id: PrincipalId,
        tier: &str,
        price: u64,
        days: u32,
        payment_id: Option<PaymentId>,
        now: u64,
    ) -> Result<Subscription> {
        if days == 0 {
            return Err(ServiceError::validation("subscription must last at least a day"));
        }
        let expires_at = now.saturating_add(u64::from(days) * SECS_PER_DAY);
        Ok(subscriptions::insert(
            conn,
            principal_id,
            tier,
            price,
            payment_id,
            now,
            expires_at,
        )?)
    }

    /// The principal's active subscription right now.
    pub async fn get_active(&self, principal_id: PrincipalId) -> Result<Option<Subscription>> {
        self.active_at(principal_id, self.clock.now()).await
    }

    pub async fn active_at(
        &self,
        principal_id: PrincipalId,
        now: u64,
    ) -> Result<Option<Subscription>> {
        ephemera_resilience::call(&self.retry, "get_active_subscription", || async {
            let conn = self.conn.lock().await;
            subscriptions::active_for(&conn, principal_id, now).map_err(ServiceError::from)
        })
        .await
    }

    /// All rows for the principal, newest first.
    pub async fn history(&self, principal_id: PrincipalId) -> Result<Vec<Subscription>> {
        ephemera_resilience::call(&self.retry, "subscription_history", || async {
            let conn = self.conn.lock().await;
            subscriptions::history(&conn, principal_id).map_err(ServiceError::from)
        })
        .await
    }
}

#[async_trait]
impl EntitlementLookup for SubscriptionLedger {
    async fn active_subscription(
        &self,
        principal_id: PrincipalId,
        now: u64,
    ) -> Result<Option<Subscription>> {
        self.active_at(principal_id, now).await
    }
}
