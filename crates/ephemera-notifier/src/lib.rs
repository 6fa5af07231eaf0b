//! # ephemera-notifier
//!
//! Periodic subscription lifecycle notices.
//!
//! Each tick runs a warning pass (subscriptions ending within the warning
//! window) and then an expiry pass. A notice is recorded in `notify_status`
//! only after the transport accepted it, and the status only moves forward,
//! so each subscription gets at most one warning and one expiry notice. A
//! failed send is retried on a later tick. Every row gets its own notices,
//! even when a renewal already covers the principal.

use std::sync::Arc;
use std::time::Duration;

use ephemera_db::queries::subscriptions;
use ephemera_db::SharedConnection;
use ephemera_resilience::RetryPolicy;
use ephemera_types::billing::{NotifyStatus, Subscription};
use ephemera_types::clock::Clock;
use ephemera_types::transport::{Notice, Transport};
use ephemera_types::{Result, ServiceError, SECS_PER_DAY};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Default time between ticks.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Default warning window: one day before expiry.
pub const DEFAULT_WARNING_WINDOW_SECS: u64 = SECS_PER_DAY;

/// What one tick did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub warned: usize,
    pub expired: usize,
    /// Sends that failed; retried next tick.
    pub failed: usize,
}

pub struct LifecycleNotifier {
    conn: SharedConnection,
    clock: Arc<dyn Clock>,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    warning_window_secs: u64,
    interval: Duration,
}

impl LifecycleNotifier {
    pub fn new(
        conn: SharedConnection,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn Transport>,
        retry: RetryPolicy,
        warning_window_secs: u64,
        interval: Duration,
    ) -> Self {
        Self {
            conn,
            clock,
            transport,
            retry,
            warning_window_secs,
            interval,
        }
    }

    /// Run one warning pass and one expiry pass.
    pub async fn tick(&self) -> Result<TickReport> {
        let now = self.clock.now();
        let mut report = TickReport::default();

        let window = self.warning_window_secs;
        let warnings = ephemera_resilience::call(&self.retry, "list_expiring", || async {
            let conn = self.conn.lock().await;
            subscriptions::due_for_warning(&conn, now, window).map_err(ServiceError::from)
        })
        .await?;
        for sub in warnings {
            let notice = Notice::ExpiryWarning {
                subscription_id: sub.id,
                tier: sub.tier.clone(),
                expires_at: sub.expires_at,
            };
            self.notify(&sub, notice, NotifyStatus::Warned, &mut report)
                .await;
        }

        let expired = ephemera_resilience::call(&self.retry, "list_expired", || async {
            let conn = self.conn.lock().await;
            subscriptions::due_for_expiry(&conn, now).map_err(ServiceError::from)
        })
        .await?;
        for sub in expired {
            let notice = Notice::Expired {
                subscription_id: sub.id,
                tier: sub.tier.clone(),
            };
            self.notify(&sub, notice, NotifyStatus::Expired, &mut report)
                .await;
        }

        if report != TickReport::default() {
            info!(
                warned = report.warned,
                expired = report.expired,
                failed = report.failed,
                "lifecycle tick"
            );
        }
        Ok(report)
    }

    /// Tick every `interval` until `shutdown` fires.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "lifecycle notifier started");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "lifecycle tick failed");
                    }
                }
                _ = shutdown.recv() => {
                    info!("lifecycle notifier stopped");
                    break;
                }
            }
        }
    }

    async fn notify(
        &self,
        sub: &Subscription,
        notice: Notice,
        status: NotifyStatus,
        report: &mut TickReport,
    ) {
        let sent = ephemera_resilience::call(&self.retry, "send_notice", || async {
            self.transport
                .send_notice(sub.principal_id, notice.clone())
                .await
                .map_err(ServiceError::from)
        })
        .await;
        if let Err(e) = sent {
            warn!(
                subscription_id = sub.id,
                principal_id = sub.principal_id,
                error = %e,
                "lifecycle notice not delivered"
            );
            report.failed += 1;
            return;
        }

        if self.advance(sub, status).await {
            match status {
                NotifyStatus::Warned => report.warned += 1,
                _ => report.expired += 1,
            }
        }
    }

    async fn advance(&self, sub: &Subscription, status: NotifyStatus) -> bool {
        let advanced = ephemera_resilience::call(&self.retry, "advance_notify_status", || async {
            let conn = self.conn.lock().await;
            subscriptions::advance_notify_status(&conn, sub.id, status).map_err(ServiceError::from)
        })
        .await;
        match advanced {
            Ok(advanced) => advanced,
            Err(e) => {
                // The notice went out; the next tick may repeat it.
                warn!(subscription_id = sub.id, error = %e, "notify status not recorded");
                false
            }
        }
    }
}
