//! Integration test: expiry warning and expiry notice for an approved
//! subscription, each sent exactly once.

use ephemera_integration_tests::{Stack, BASE_TIME, OPERATOR};
use ephemera_types::access::{AccessDecision, AllowReason};
use ephemera_types::billing::NotifyStatus;
use ephemera_types::transport::Notice;
use ephemera_types::SECS_PER_DAY;

const PRINCIPAL: i64 = 7;
const HOUR: u64 = 3_600;

#[tokio::test]
async fn test_warning_then_expiry() {
    let stack = Stack::new();
    let payment = stack
        .payments
        .initiate(PRINCIPAL, "weekly")
        .await
        .expect("initiate");
    let sub = stack
        .payments
        .decide(payment.id, true, OPERATOR)
        .await
        .expect("approve")
        .subscription
        .expect("subscription");
    let approvals = stack.transport.notices().len();

    // Nothing due yet.
    let report = stack.notifier.tick().await.expect("tick");
    assert_eq!((report.warned, report.expired), (0, 0));

    // 23 hours left: one warning, then silence.
    stack.clock.set(sub.expires_at - 23 * HOUR);
    assert_eq!(stack.notifier.tick().await.expect("tick").warned, 1);
    assert_eq!(stack.notifier.tick().await.expect("tick").warned, 0);

    // One second past expiry: one expiry notice, then silence.
    stack.clock.set(sub.expires_at + 1);
    assert_eq!(stack.notifier.tick().await.expect("tick").expired, 1);
    assert_eq!(stack.notifier.tick().await.expect("tick").expired, 0);

    let notices: Vec<_> = stack.transport.notices().into_iter().skip(approvals).collect();
    assert_eq!(notices.len(), 2);
    assert!(matches!(
        notices[0].1,
        Notice::ExpiryWarning { expires_at, .. } if expires_at == BASE_TIME + 7 * SECS_PER_DAY
    ));
    assert!(matches!(notices[1].1, Notice::Expired { subscription_id, .. } if subscription_id == sub.id));

    let history = stack.ledger.history(PRINCIPAL).await.expect("history");
    assert_eq!(history[0].notify_status, NotifyStatus::Expired);
    assert_eq!(
        stack.gate.authorize(PRINCIPAL).await.expect("authorize"),
        AccessDecision::Allow(AllowReason::FreeView { remaining: 2 })
    );
}

#[tokio::test]
async fn test_failed_notice_retried_next_tick() {
    let stack = Stack::new();
    let sub = stack.ledger.grant(PRINCIPAL, "weekly", 129, 1).await.expect("grant");
    stack.clock.set(sub.expires_at - HOUR);

    stack.transport.fail_next(1);
    let report = stack.notifier.tick().await.expect("tick");
    assert_eq!((report.warned, report.failed), (0, 1));

    let report = stack.notifier.tick().await.expect("tick");
    assert_eq!((report.warned, report.failed), (1, 0));
    assert_eq!(stack.transport.notices().len(), 1);
}
