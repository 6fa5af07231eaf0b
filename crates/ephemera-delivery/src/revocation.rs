//! Time-bounded revocation of delivered items.
//!
//! The `scheduled_revocations` table is the source of truth. Each armed key
//! also gets a tokio task that sleeps until the deadline and then claims the
//! row with a conditional delete. Only the claimer removes the item, so a
//! deadline fires at most once even when a re-arm races a firing task. A
//! claimer that finds the row pushed further out goes back to sleep.
//!
//! Removal failures after the retry budget are logged and dropped: the
//! upstream item may already be gone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ephemera_db::queries::revocations;
use ephemera_db::SharedConnection;
use ephemera_resilience::RetryPolicy;
use ephemera_types::clock::Clock;
use ephemera_types::content::{RevocationKey, ScheduledRevocation};
use ephemera_types::transport::Transport;
use ephemera_types::{Result, ServiceError};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

struct ArmedTask {
    seq: u64,
    handle: AbortHandle,
}

struct Inner {
    conn: SharedConnection,
    clock: Arc<dyn Clock>,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    delete_retry: RetryPolicy,
    tasks: Mutex<HashMap<RevocationKey, ArmedTask>>,
    next_seq: AtomicU64,
}

/// Schedules and fires item removals. Cheap to clone.
#[derive(Clone)]
pub struct RevocationService {
    inner: Arc<Inner>,
}

impl RevocationService {
    /// `retry` guards storage calls, `delete_retry` bounds removal attempts.
    pub fn new(
        conn: SharedConnection,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn Transport>,
        retry: RetryPolicy,
        delete_retry: RetryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                conn,
                clock,
                transport,
                retry,
                delete_retry,
                tasks: Mutex::new(HashMap::new()),
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Schedule removal of `key` in `ttl_secs`, replacing any earlier deadline.
    pub async fn arm(&self, key: RevocationKey, ttl_secs: u64) -> Result<ScheduledRevocation> {
        let armed_at = self.inner.clock.now();
        let fire_at = armed_at.saturating_add(ttl_secs);

        ephemera_resilience::call(&self.inner.retry, "arm_revocation", || async {
            let conn = self.inner.conn.lock().await;
            revocations::upsert(&conn, key, armed_at, fire_at).map_err(ServiceError::from)
        })
        .await?;

        self.spawn(key, fire_at);
        debug!(%key, fire_at, "revocation armed");
        Ok(ScheduledRevocation {
            key,
            armed_at,
            fire_at,
        })
    }

    /// Drop the deadline for `key`. Returns whether one was pending.
    pub async fn cancel(&self, key: RevocationKey) -> Result<bool> {
        let removed = ephemera_resilience::call(&self.inner.retry, "cancel_revocation", || async {
            let conn = self.inner.conn.lock().await;
            revocations::remove(&conn, key).map_err(ServiceError::from)
        })
        .await?;
        if let Some(task) = self.inner.lock_tasks().remove(&key) {
            task.handle.abort();
        }
        Ok(removed)
    }

    /// Re-arm every persisted deadline. Deadlines already passed fire at once.
    pub async fn restore(&self) -> Result<usize> {
        let pending = self.pending().await?;
        let now = self.inner.clock.now();
        let overdue = pending.iter().filter(|r| r.fire_at <= now).count();
        for row in &pending {
            self.spawn(row.key, row.fire_at);
        }
        info!(restored = pending.len(), overdue, "revocations restored");
        Ok(pending.len())
    }

    /// Claim and fire every deadline at or before `now`. Returns how many
    /// this call claimed.
    pub async fn sweep_due(&self, now: u64) -> Result<usize> {
        let due = ephemera_resilience::call(&self.inner.retry, "list_due_revocations", || async {
            let conn = self.inner.conn.lock().await;
            revocations::list_due(&conn, now).map_err(ServiceError::from)
        })
        .await?;

        let mut fired = 0;
        for row in due {
            if !self.inner.claim(row.key, row.fire_at).await? {
                continue;
            }
            if let Some(task) = self.inner.lock_tasks().remove(&row.key) {
                task.handle.abort();
            }
            self.inner.fire(row.key).await;
            fired += 1;
        }
        Ok(fired)
    }

    /// Persisted deadlines, earliest first.
    pub async fn pending(&self) -> Result<Vec<ScheduledRevocation>> {
        ephemera_resilience::call(&self.inner.retry, "list_revocations", || async {
            let conn = self.inner.conn.lock().await;
            revocations::list_pending(&conn).map_err(ServiceError::from)
        })
        .await
    }

    /// Remove `key` from its destination now and drop any timer for it.
    /// Returns whether the transport confirmed the removal.
    pub async fn remove_now(&self, key: RevocationKey) -> bool {
        if let Some(task) = self.inner.lock_tasks().remove(&key) {
            task.handle.abort();
        }
        self.inner.fire(key).await
    }

    /// Number of live timer tasks.
    pub fn armed(&self) -> usize {
        self.inner.lock_tasks().len()
    }

    /// Abort all timer tasks. Persisted deadlines are kept for [`restore`].
    ///
    /// [`restore`]: RevocationService::restore
    pub fn shutdown(&self) {
        for (_, task) in self.inner.lock_tasks().drain() {
            task.handle.abort();
        }
    }

    fn spawn(&self, key: RevocationKey, fire_at: u64) {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let inner = self.inner.clone();
        let mut tasks = self.inner.lock_tasks();
        if let Some(previous) = tasks.remove(&key) {
            previous.handle.abort();
        }
        let handle = tokio::spawn(async move { inner.run(key, fire_at, seq).await });
        tasks.insert(
            key,
            ArmedTask {
                seq,
                handle: handle.abort_handle(),
            },
        );
    }
}

impl Inner {
    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, HashMap<RevocationKey, ArmedTask>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn run(self: Arc<Self>, key: RevocationKey, mut fire_at: u64, seq: u64) {
        loop {
            let wait = fire_at.saturating_sub(self.clock.now());
            if wait > 0 {
                tokio::time::sleep(Duration::from_secs(wait)).await;
            }

            match self.claim(key, fire_at).await {
                Ok(true) => {
                    self.fire(key).await;
                    break;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(%key, error = %e, "revocation claim failed; left for restore");
                    break;
                }
            }

            // Lost the claim: either re-armed later or already handled.
            let current = ephemera_resilience::call(&self.retry, "read_revocation", || async {
                let conn = self.conn.lock().await;
                revocations::get(&conn, key).map_err(ServiceError::from)
            })
            .await;
            match current {
                Ok(Some(row)) => fire_at = row.fire_at,
                Ok(None) => break,
                Err(e) => {
                    warn!(%key, error = %e, "revocation re-read failed; left for restore");
                    break;
                }
            }
        }

        let mut tasks = self.lock_tasks();
        if tasks.get(&key).is_some_and(|t| t.seq == seq) {
            tasks.remove(&key);
        }
    }

    async fn claim(&self, key: RevocationKey, deadline: u64) -> Result<bool> {
        ephemera_resilience::call(&self.retry, "claim_revocation", || async {
            let conn = self.conn.lock().await;
            revocations::claim(&conn, key, deadline).map_err(ServiceError::from)
        })
        .await
    }

    async fn fire(&self, key: RevocationKey) -> bool {
        let removed = ephemera_resilience::call(&self.delete_retry, "delete_item", || async {
            self.transport
                .delete_item(key)
                .await
                .map_err(ServiceError::from)
        })
        .await;
        match removed {
            Ok(()) => {
                info!(%key, "delivered item removed");
                true
            }
            Err(e) => {
                warn!(%key, error = %e, "delivered item not removed");
                false
            }
        }
    }
}
