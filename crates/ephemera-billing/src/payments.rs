//! Payment approval workflow.
//!
//! A principal opens one payment at a time, attaches a proof, and an
//! operator approves or rejects it. The decision, the resulting subscription
//! and the counter reset commit together or not at all.

use std::sync::Arc;

use ephemera_db::queries::{counters, payments};
use ephemera_db::{DbError, SharedConnection};
use ephemera_gate::{Action, Authorizer, EntitlementCache};
use ephemera_resilience::RetryPolicy;
use ephemera_types::billing::{PaymentStatus, PendingPayment, Subscription};
use ephemera_types::clock::Clock;
use ephemera_types::transport::{Notice, OperatorAlert, Transport};
use ephemera_types::{ConflictKind, PaymentId, PrincipalId, Result, ServiceError};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::ledger::SubscriptionLedger;
use crate::tiers::TierCatalog;

/// Result of an operator decision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    pub payment: PendingPayment,
    /// The granted subscription when the payment was approved.
    pub subscription: Option<Subscription>,
}

pub struct PaymentWorkflow {
    conn: SharedConnection,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    catalog: TierCatalog,
    authorizer: Arc<Authorizer>,
    cache: Arc<EntitlementCache>,
    transport: Arc<dyn Transport>,
}

impl PaymentWorkflow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conn: SharedConnection,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        catalog: TierCatalog,
        authorizer: Arc<Authorizer>,
        cache: Arc<EntitlementCache>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            conn,
            clock,
            retry,
            catalog,
            authorizer,
            cache,
            transport,
        }
    }

    pub fn catalog(&self) -> &TierCatalog {
        &self.catalog
    }

    /// Open a payment for `tier_name`.
    ///
    /// An open payment for the same tier is returned as is. An open payment
    /// for a different tier is a conflict.
    pub async fn initiate(&self, principal_id: PrincipalId, tier_name: &str) -> Result<PendingPayment> {
        let tier = self.catalog.get(tier_name)?.clone();
        let now = self.clock.now();

        let (payment, created) = ephemera_resilience::call(&self.retry, "initiate_payment", || async {
            let conn = self.conn.lock().await;
            open_or_insert(&conn, principal_id, &tier.name, tier.price, tier.days_valid, now)
        })
        .await?;

        if created {
            info!(
                principal_id,
                payment_id = payment.id,
                tier = %payment.tier,
                price = payment.price,
                "payment initiated"
            );
        }
        Ok(payment)
    }

    /// Attach a proof to an open payment and alert the operators.
    ///
    /// A second proof replaces the first while the payment is still open.
    pub async fn attach_proof(&self, payment_id: PaymentId, proof_ref: &str) -> Result<PendingPayment> {
        let proof_ref = proof_ref.trim();
        if proof_ref.is_empty() {
            return Err(ServiceError::validation("proof reference is empty"));
        }
        let now = self.clock.now();

        let payment = ephemera_resilience::call(&self.retry, "attach_proof", || async {
            let conn = self.conn.lock().await;
            store_proof(&conn, payment_id, proof_ref, now)
        })
        .await?;

        info!(payment_id, principal_id = payment.principal_id, "payment proof attached");

        let alert = OperatorAlert::ProofSubmitted {
            payment_id,
            principal_id: payment.principal_id,
            tier: payment.tier.clone(),
            price: payment.price,
            proof_ref: proof_ref.to_string(),
        };
        let sent = ephemera_resilience::call(&self.retry, "notify_operators", || async {
            self.transport
                .notify_operators(alert.clone())
                .await
                .map_err(ServiceError::from)
        })
        .await;
        if let Err(e) = sent {
            warn!(payment_id, error = %e, "operators not notified of payment proof");
        }

        Ok(payment)
    }

    /// Attach a proof to the principal's open payment.
    pub async fn submit_proof(&self, principal_id: PrincipalId, proof_ref: &str) -> Result<PendingPayment> {
        let open = ephemera_resilience::call(&self.retry, "find_open_payment", || async {
            let conn = self.conn.lock().await;
            current_payment(&conn, principal_id)
        })
        .await?;
        self.attach_proof(open.id, proof_ref).await
    }

    /// The principal's most recent payment in any state.
    pub async fn latest(&self, principal_id: PrincipalId) -> Result<Option<PendingPayment>> {
        ephemera_resilience::call(&self.retry, "latest_payment", || async {
            let conn = self.conn.lock().await;
            payments::latest_for(&conn, principal_id).map_err(ServiceError::from)
        })
        .await
    }

    /// Payments with a proof waiting for a decision, oldest first.
    pub async fn awaiting_decision(
        &self,
        operator_id: PrincipalId,
        limit: u32,
    ) -> Result<Vec<PendingPayment>> {
        self.authorizer.authorize(operator_id, Action::ReviewPayments)?;
        ephemera_resilience::call(&self.retry, "awaiting_decision", || async {
            let conn = self.conn.lock().await;
            payments::awaiting_decision(&conn, limit).map_err(ServiceError::from)
        })
        .await
    }

    /// Approve or reject an open payment.
    ///
    /// Exactly one decision per payment succeeds. Later ones get
    /// `Conflict(AlreadyTerminal)` and change nothing.
    pub async fn decide(
        &self,
        payment_id: PaymentId,
        approve: bool,
        operator_id: PrincipalId,
    ) -> Result<Decision> {
        self.authorizer.authorize(operator_id, Action::DecidePayment)?;
        let now = self.clock.now();

        let decision = ephemera_resilience::call(&self.retry, "decide_payment", || async {
            let conn = self.conn.lock().await;
            decide_in_tx(&conn, payment_id, approve, operator_id, now)
        })
        .await?;

        let payment = &decision.payment;
        self.cache.invalidate(payment.principal_id);

        let notice = match &decision.subscription {
            Some(sub) => {
                info!(
                    payment_id,
                    operator_id,
                    principal_id = payment.principal_id,
                    subscription_id = sub.id,
                    expires_at = sub.expires_at,
                    "payment approved"
                );
                Notice::PaymentApproved {
                    payment_id,
                    tier: sub.tier.clone(),
                    expires_at: sub.expires_at,
                }
            }
            None => {
                info!(
                    payment_id,
                    operator_id,
                    principal_id = payment.principal_id,
                    "payment rejected"
                );
                Notice::PaymentRejected { payment_id }
            }
        };

        let sent = ephemera_resilience::call(&self.retry, "payment_notice", || async {
            self.transport
                .send_notice(payment.principal_id, notice.clone())
                .await
                .map_err(ServiceError::from)
        })
        .await;
        if let Err(e) = sent {
            warn!(payment_id, error = %e, "payment decision notice not delivered");
        }

        Ok(decision)
    }
}

fn open_or_insert(
    conn: &Connection,
    principal_id: PrincipalId,
    tier: &str,
    price: u64,
    days_valid: u32,
    now: u64,
) -> Result<(PendingPayment, bool)> {
    if let Some(open) = payments::open_for(conn, principal_id)? {
        if open.tier == tier {
            return Ok((open, false));
        }
        return Err(ServiceError::Conflict(ConflictKind::ActivePayment {
            payment_id: open.id,
        }));
    }
    let payment = payments::insert(conn, principal_id, tier, price, days_valid, now)?;
    Ok((payment, true))
}

fn store_proof(conn: &Connection, payment_id: PaymentId, proof_ref: &str, now: u64) -> Result<PendingPayment> {
    let updated = payments::attach_proof(conn, payment_id, proof_ref, now)?;
    let payment = payments::get(conn, payment_id)?
        .ok_or_else(|| ServiceError::not_found("payment", payment_id))?;
    if !updated {
        return Err(ServiceError::Conflict(ConflictKind::AlreadyTerminal {
            payment_id,
            status: payment.status,
        }));
    }
    Ok(payment)
}

/// The open payment, or why there is none.
fn current_payment(conn: &Connection, principal_id: PrincipalId) -> Result<PendingPayment> {
    if let Some(open) = payments::open_for(conn, principal_id)? {
        return Ok(open);
    }
    match payments::latest_for(conn, principal_id)? {
        Some(last) => Err(ServiceError::Conflict(ConflictKind::AlreadyTerminal {
            payment_id: last.id,
            status: last.status,
        })),
        None => Err(ServiceError::not_found("payment", format!("principal {principal_id}"))),
    }
}

fn decide_in_tx(
    conn: &Connection,
    payment_id: PaymentId,
    approve: bool,
    operator_id: PrincipalId,
    now: u64,
) -> Result<Decision> {
    let tx = conn.unchecked_transaction().map_err(DbError::from)?;

    let current = payments::get(&tx, payment_id)?
        .ok_or_else(|| ServiceError::not_found("payment", payment_id))?;
    let status = if approve {
        PaymentStatus::Approved
    } else {
        PaymentStatus::Rejected
    };
    if !payments::mark_decided(&tx, payment_id, status, operator_id, now)? {
        return Err(ServiceError::Conflict(ConflictKind::AlreadyTerminal {
            payment_id,
            status: current.status,
        }));
    }

    let subscription = if approve {
        let sub = SubscriptionLedger::grant_in(
            &tx,
            current.principal_id,
            &current.tier,
            current.price,
            current.days_valid,
            Some(payment_id),
            now,
        )?;
        counters::reset(&tx, current.principal_id, now)?;
        Some(sub)
    } else {
        None
    };

    let payment = payments::get(&tx, payment_id)?
        .ok_or_else(|| ServiceError::not_found("payment", payment_id))?;
    tx.commit().map_err(DbError::from)?;

    Ok(Decision {
        payment,
        subscription,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ephemera_db::queries::subscriptions;
    use ephemera_types::clock::ManualClock;
    use ephemera_types::testing::{RecordingTransport, TransportCall};
    use ephemera_types::SECS_PER_DAY;

    const NOW: u64 = 1_700_000_000;
    const OPERATOR: PrincipalId = 900;
    const OWNER: PrincipalId = 901;

    struct Harness {
        workflow: PaymentWorkflow,
        conn: SharedConnection,
        transport: Arc<RecordingTransport>,
        cache: Arc<EntitlementCache>,
    }

    fn harness() -> Harness {
        let conn = ephemera_db::shared(ephemera_db::open_memory().expect("db"));
        let transport = Arc::new(RecordingTransport::new());
        let cache = Arc::new(EntitlementCache::new(30));
        let workflow = PaymentWorkflow::new(
            conn.clone(),
            Arc::new(ManualClock::new(NOW)),
            RetryPolicy::no_retry(),
            TierCatalog::default(),
            Arc::new(Authorizer::new([OWNER], [OPERATOR])),
            cache.clone(),
            transport.clone(),
        );
        Harness {
            workflow,
            conn,
            transport,
            cache,
        }
    }

    #[tokio::test]
    async fn test_initiate_uses_tier_price() {
        let h = harness();
        let payment = h.workflow.initiate(7, "weekly").await.expect("initiate");
        assert_eq!(payment.status, PaymentStatus::Initiated);
        assert_eq!((payment.price, payment.days_valid), (129, 7));
    }

    #[tokio::test]
    async fn test_initiate_unknown_tier() {
        let h = harness();
        let err = h.workflow.initiate(7, "lifetime").await.expect_err("unknown");
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn test_single_open_payment() {
        let h = harness();
        let first = h.workflow.initiate(7, "weekly").await.expect("first");
        let again = h.workflow.initiate(7, "weekly").await.expect("again");
        assert_eq!(first.id, again.id);

        let err = h.workflow.initiate(7, "monthly").await.expect_err("other tier");
        assert!(matches!(
            err,
            ServiceError::Conflict(ConflictKind::ActivePayment { payment_id }) if payment_id == first.id
        ));
    }

    #[tokio::test]
    async fn test_proof_moves_to_awaiting_and_alerts_operators() {
        let h = harness();
        let payment = h.workflow.initiate(7, "weekly").await.expect("initiate");
        let updated = h.workflow.attach_proof(payment.id, "file-1").await.expect("proof");
        assert_eq!(updated.status, PaymentStatus::AwaitingProof);
        assert_eq!(updated.proof_ref.as_deref(), Some("file-1"));

        let replaced = h.workflow.submit_proof(7, "file-2").await.expect("second proof");
        assert_eq!(replaced.proof_ref.as_deref(), Some("file-2"));

        let alerts = h
            .transport
            .calls()
            .into_iter()
            .filter(|c| matches!(c, TransportCall::Operators(_)))
            .count();
        assert_eq!(alerts, 2);
    }

    #[tokio::test]
    async fn test_empty_proof_rejected() {
        let h = harness();
        let payment = h.workflow.initiate(7, "weekly").await.expect("initiate");
        let err = h.workflow.attach_proof(payment.id, "  ").await.expect_err("empty");
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn test_proof_survives_operator_alert_failure() {
        let h = harness();
        let payment = h.workflow.initiate(7, "weekly").await.expect("initiate");
        h.transport.fail_next(1);
        let updated = h.workflow.attach_proof(payment.id, "file-1").await.expect("proof");
        assert_eq!(updated.status, PaymentStatus::AwaitingProof);
    }

    #[tokio::test]
    async fn test_submit_proof_without_payment() {
        let h = harness();
        let err = h.workflow.submit_proof(7, "file").await.expect_err("none");
        assert!(matches!(err, ServiceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_approve_grants_subscription_and_resets_counter() {
        let h = harness();
        {
            let conn = h.conn.lock().await;
            for _ in 0..3 {
                counters::try_consume(&conn, 7, 3, NOW).expect("consume");
            }
        }
        h.cache.put(7, None, NOW, h.cache.generation(7));

        let payment = h.workflow.initiate(7, "weekly").await.expect("initiate");
        h.workflow.attach_proof(payment.id, "file").await.expect("proof");
        let decision = h.workflow.decide(payment.id, true, OPERATOR).await.expect("approve");

        assert_eq!(decision.payment.status, PaymentStatus::Approved);
        assert_eq!(decision.payment.decided_by, Some(OPERATOR));
        let sub = decision.subscription.expect("subscription");
        assert_eq!(sub.payment_id, Some(payment.id));
        assert_eq!(sub.expires_at, NOW + 7 * SECS_PER_DAY);

        let conn = h.conn.lock().await;
        assert_eq!(counters::get(&conn, 7).expect("count"), 0);
        assert_eq!(
            subscriptions::active_for(&conn, 7, NOW).expect("active"),
            Some(sub.clone())
        );
        drop(conn);

        assert_eq!(h.cache.get(7, NOW), None);
        assert!(h.transport.notices().iter().any(|(p, n)| *p == 7
            && matches!(n, Notice::PaymentApproved { payment_id, .. } if *payment_id == payment.id)));
    }

    #[tokio::test]
    async fn test_approve_straight_from_initiated() {
        let h = harness();
        let payment = h.workflow.initiate(7, "monthly").await.expect("initiate");
        let decision = h.workflow.decide(payment.id, true, OWNER).await.expect("approve");
        assert_eq!(
            decision.subscription.map(|s| s.expires_at),
            Some(NOW + 30 * SECS_PER_DAY)
        );
    }

    #[tokio::test]
    async fn test_reject_then_decide_again_conflicts() {
        let h = harness();
        let payment = h.workflow.initiate(7, "weekly").await.expect("initiate");
        let decision = h.workflow.decide(payment.id, false, OPERATOR).await.expect("reject");
        assert_eq!(decision.payment.status, PaymentStatus::Rejected);
        assert!(decision.subscription.is_none());

        let err = h.workflow.decide(payment.id, true, OPERATOR).await.expect_err("again");
        assert!(matches!(
            err,
            ServiceError::Conflict(ConflictKind::AlreadyTerminal {
                status: PaymentStatus::Rejected,
                ..
            })
        ));
        let err = h.workflow.attach_proof(payment.id, "late").await.expect_err("late proof");
        assert!(matches!(err, ServiceError::Conflict(_)));

        let conn = h.conn.lock().await;
        assert!(subscriptions::history(&conn, 7).expect("history").is_empty());
    }

    #[tokio::test]
    async fn test_rejected_payment_reported_on_submit() {
        let h = harness();
        let payment = h.workflow.initiate(7, "weekly").await.expect("initiate");
        h.workflow.decide(payment.id, false, OPERATOR).await.expect("reject");
        let err = h.workflow.submit_proof(7, "file").await.expect_err("rejected");
        assert!(matches!(
            err,
            ServiceError::Conflict(ConflictKind::AlreadyTerminal {
                status: PaymentStatus::Rejected,
                ..
            })
        ));
        // A new payment may be opened after a terminal one.
        h.workflow.initiate(7, "weekly").await.expect("reopen");
    }

    #[tokio::test]
    async fn test_decide_requires_operator() {
        let h = harness();
        let payment = h.workflow.initiate(7, "weekly").await.expect("initiate");
        let err = h.workflow.decide(payment.id, true, 7).await.expect_err("forbidden");
        assert!(matches!(err, ServiceError::Authorization { principal: 7, .. }));

        let conn = h.conn.lock().await;
        let stored = payments::get(&conn, payment.id).expect("get").expect("row");
        assert_eq!(stored.status, PaymentStatus::Initiated);
    }

    #[tokio::test]
    async fn test_review_queue_is_operator_only() {
        let h = harness();
        let proofed = h.workflow.initiate(7, "weekly").await.expect("initiate");
        h.workflow.attach_proof(proofed.id, "file").await.expect("proof");
        h.workflow.initiate(8, "weekly").await.expect("no proof yet");

        let err = h.workflow.awaiting_decision(7, 10).await.expect_err("forbidden");
        assert!(matches!(err, ServiceError::Authorization { principal: 7, .. }));

        let queue = h.workflow.awaiting_decision(OPERATOR, 10).await.expect("queue");
        assert_eq!(queue.iter().map(|p| p.id).collect::<Vec<_>>(), vec![proofed.id]);

        let latest = h.workflow.latest(8).await.expect("latest").expect("row");
        assert_eq!(latest.status, PaymentStatus::Initiated);
        assert!(h.workflow.latest(9).await.expect("latest").is_none());
    }

    #[tokio::test]
    async fn test_decide_unknown_payment() {
        let h = harness();
        let err = h.workflow.decide(404, true, OPERATOR).await.expect_err("missing");
        assert!(matches!(err, ServiceError::NotFound { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_approvals_grant_once() {
        let h = harness();
        let payment = h.workflow.initiate(7, "weekly").await.expect("initiate");
        let workflow = Arc::new(h.workflow);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let workflow = workflow.clone();
            let id = payment.id;
            handles.push(tokio::spawn(async move { workflow.decide(id, true, OPERATOR).await }));
        }
        let mut approved = 0;
        for handle in handles {
            match handle.await.expect("join") {
                Ok(_) => approved += 1,
                Err(err) => assert!(
                    matches!(err, ServiceError::Conflict(ConflictKind::AlreadyTerminal { .. })),
                    "unexpected error: {err}"
                ),
            }
        }
        assert_eq!(approved, 1);

        let conn = h.conn.lock().await;
        assert_eq!(subscriptions::history(&conn, 7).expect("history").len(), 1);
    }
}
