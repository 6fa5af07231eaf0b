//! Integration test: free views, purchase, approval and entitlement.
//!
//! Walks one principal through the whole paid path:
//! 1. Three free deliveries, then a denial with an upsell
//! 2. Open a weekly payment and attach a proof
//! 3. Operator approval grants a 7-day subscription and resets the counter
//! 4. Deliveries now go through the entitlement
//! 5. After expiry the principal is back on free views

use std::sync::Arc;

use ephemera_integration_tests::{Stack, BASE_TIME, OPERATOR};
use ephemera_types::access::{AccessDecision, AllowReason, Denial, DeliveryOutcome};
use ephemera_types::billing::PaymentStatus;
use ephemera_types::testing::TransportCall;
use ephemera_types::transport::{Notice, OperatorAlert};
use ephemera_types::{ConflictKind, ServiceError, SECS_PER_DAY};

const PRINCIPAL: i64 = 7;
const CHAT: i64 = 700;

#[tokio::test(start_paused = true)]
async fn test_free_views_then_purchase() {
    let stack = Stack::new();
    let token = stack
        .registry
        .register(OPERATOR, "file:episode-1")
        .await
        .expect("register");

    // 1. Three free deliveries, then the upsell
    for _ in 0..3 {
        let outcome = stack
            .scheduler
            .deliver(CHAT, &token.token, PRINCIPAL)
            .await
            .expect("deliver");
        assert!(matches!(outcome, DeliveryOutcome::Delivered { .. }));
    }
    let denied = stack
        .scheduler
        .deliver(CHAT, &token.token, PRINCIPAL)
        .await
        .expect("deliver");
    assert_eq!(
        denied,
        DeliveryOutcome::Denied {
            reason: Denial::LimitReached
        }
    );
    assert!(stack.transport.calls().contains(&TransportCall::Upsell {
        destination: CHAT,
        principal_id: PRINCIPAL
    }));

    // 2. Weekly payment with proof
    let payment = stack
        .payments
        .initiate(PRINCIPAL, "weekly")
        .await
        .expect("initiate");
    assert_eq!(payment.price, 129);
    assert_eq!(payment.days_valid, 7);
    assert_eq!(payment.status, PaymentStatus::Initiated);

    let payment = stack
        .payments
        .submit_proof(PRINCIPAL, "photo:receipt")
        .await
        .expect("proof");
    assert_eq!(payment.status, PaymentStatus::AwaitingProof);
    assert!(stack.transport.calls().iter().any(|call| matches!(
        call,
        TransportCall::Operators(OperatorAlert::ProofSubmitted { payment_id, .. })
            if *payment_id == payment.id
    )));

    // 3. Approval
    let decision = stack
        .payments
        .decide(payment.id, true, OPERATOR)
        .await
        .expect("approve");
    let sub = decision.subscription.expect("subscription granted");
    assert_eq!(sub.expires_at, BASE_TIME + 7 * SECS_PER_DAY);
    assert_eq!(stack.gate.free_views_used(PRINCIPAL).await.expect("count"), 0);
    assert!(stack.transport.notices().iter().any(|(p, n)| *p == PRINCIPAL
        && matches!(n, Notice::PaymentApproved { .. })));

    // 4. Entitled deliveries leave the counter alone
    assert_eq!(
        stack.gate.authorize(PRINCIPAL).await.expect("authorize"),
        AccessDecision::Allow(AllowReason::Entitled {
            expires_at: sub.expires_at
        })
    );
    for _ in 0..5 {
        let outcome = stack
            .scheduler
            .deliver(CHAT, &token.token, PRINCIPAL)
            .await
            .expect("deliver");
        assert!(matches!(
            outcome,
            DeliveryOutcome::Delivered {
                via: AllowReason::Entitled { .. },
                ..
            }
        ));
    }
    assert_eq!(stack.gate.free_views_used(PRINCIPAL).await.expect("count"), 0);
    assert_eq!(
        stack.ledger.get_active(PRINCIPAL).await.expect("active"),
        Some(sub.clone())
    );

    // 5. Lapse
    stack.clock.set(sub.expires_at);
    assert_eq!(stack.ledger.get_active(PRINCIPAL).await.expect("active"), None);
    assert_eq!(
        stack.gate.authorize(PRINCIPAL).await.expect("authorize"),
        AccessDecision::Allow(AllowReason::FreeView { remaining: 2 })
    );
}

#[tokio::test]
async fn test_rejection_then_retry() {
    let stack = Stack::new();
    let payment = stack
        .payments
        .initiate(PRINCIPAL, "monthly")
        .await
        .expect("initiate");
    stack
        .payments
        .attach_proof(payment.id, "photo:blurry")
        .await
        .expect("proof");
    let decision = stack
        .payments
        .decide(payment.id, false, OPERATOR)
        .await
        .expect("reject");
    assert_eq!(decision.payment.status, PaymentStatus::Rejected);
    assert!(stack.transport.notices().iter().any(|(_, n)| matches!(
        n,
        Notice::PaymentRejected { payment_id } if *payment_id == payment.id
    )));

    let err = stack
        .payments
        .submit_proof(PRINCIPAL, "photo:again")
        .await
        .expect_err("rejected");
    assert!(matches!(
        err,
        ServiceError::Conflict(ConflictKind::AlreadyTerminal {
            status: PaymentStatus::Rejected,
            ..
        })
    ));

    let retry = stack
        .payments
        .initiate(PRINCIPAL, "monthly")
        .await
        .expect("new payment");
    assert_ne!(retry.id, payment.id);
    assert!(stack.ledger.get_active(PRINCIPAL).await.expect("active").is_none());
}

#[tokio::test]
async fn test_second_decision_never_grants_twice() {
    let stack = Stack::new();
    let payment = stack
        .payments
        .initiate(PRINCIPAL, "weekly")
        .await
        .expect("initiate");
    stack
        .payments
        .decide(payment.id, true, OPERATOR)
        .await
        .expect("approve");

    for approve in [true, false] {
        let err = stack
            .payments
            .decide(payment.id, approve, OPERATOR)
            .await
            .expect_err("already decided");
        assert!(matches!(
            err,
            ServiceError::Conflict(ConflictKind::AlreadyTerminal {
                status: PaymentStatus::Approved,
                ..
            })
        ));
    }
    assert_eq!(stack.ledger.history(PRINCIPAL).await.expect("history").len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_requests_respect_free_limit() {
    let stack = Arc::new(Stack::new());
    let token = stack
        .registry
        .register(OPERATOR, "file:episode-1")
        .await
        .expect("register");

    let mut handles = Vec::new();
    for _ in 0..16 {
        let stack = stack.clone();
        let token = token.token.clone();
        handles.push(tokio::spawn(async move {
            stack.scheduler.deliver(CHAT, &token, PRINCIPAL).await
        }));
    }
    let mut delivered = 0;
    for handle in handles {
        if let DeliveryOutcome::Delivered { .. } = handle.await.expect("join").expect("deliver") {
            delivered += 1;
        }
    }
    assert_eq!(delivered, 3);
    assert_eq!(stack.revocations.pending().await.expect("pending").len(), 3);
}
