//! In-memory [`Transport`] used by unit and integration tests.
//!
//! Records every call and can be told to fail a number of upcoming calls.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::content::RevocationKey;
use crate::transport::{Notice, OperatorAlert, Transport, TransportError};
use crate::{DeliveredItemId, DestinationId, PrincipalId};

/// First item id handed out by [`RecordingTransport`].
pub const FIRST_ITEM_ID: DeliveredItemId = 1000;

/// One recorded transport call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportCall {
    Content {
        destination: DestinationId,
        payload_ref: String,
        item_id: DeliveredItemId,
    },
    Delete(RevocationKey),
    Upsell {
        destination: DestinationId,
        principal_id: PrincipalId,
    },
    Notice {
        principal_id: PrincipalId,
        notice: Notice,
    },
    Operators(OperatorAlert),
}

/// Recording fake transport.
#[derive(Debug)]
pub struct RecordingTransport {
    calls: Mutex<Vec<TransportCall>>,
    next_item: AtomicI64,
    failures_left: AtomicU32,
    unreachable: Mutex<HashSet<PrincipalId>>,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            next_item: AtomicI64::new(FIRST_ITEM_ID),
            failures_left: AtomicU32::new(0),
            unreachable: Mutex::new(HashSet::new()),
        }
    }

    /// Make the next `n` calls of any kind fail with `Unavailable`.
    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Make every notice to `principal_id` fail with `Unavailable`.
    pub fn make_unreachable(&self, principal_id: PrincipalId) {
        if let Ok(mut set) = self.unreachable.lock() {
            set.insert(principal_id);
        }
    }

    /// Snapshot of all successful calls.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn notices(&self) -> Vec<(PrincipalId, Notice)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Notice {
                    principal_id,
                    notice,
                } => Some((principal_id, notice)),
                _ => None,
            })
            .collect()
    }

    pub fn deletions(&self) -> Vec<RevocationKey> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Delete(key) => Some(key),
                _ => None,
            })
            .collect()
    }

    fn check_failure(&self) -> Result<(), TransportError> {
        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(TransportError::Unavailable("injected failure".into()));
        }
        Ok(())
    }

    fn record(&self, call: TransportCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_content(
        &self,
        destination: DestinationId,
        payload_ref: &str,
        _ttl_secs: u64,
    ) -> Result<DeliveredItemId, TransportError> {
        self.check_failure()?;
        let item_id = self.next_item.fetch_add(1, Ordering::SeqCst);
        self.record(TransportCall::Content {
            destination,
            payload_ref: payload_ref.to_string(),
            item_id,
        });
        Ok(item_id)
    }

    async fn delete_item(&self, key: RevocationKey) -> Result<(), TransportError> {
        self.check_failure()?;
        self.record(TransportCall::Delete(key));
        Ok(())
    }

    async fn send_upsell(
        &self,
        destination: DestinationId,
        principal_id: PrincipalId,
    ) -> Result<(), TransportError> {
        self.check_failure()?;
        self.record(TransportCall::Upsell {
            destination,
            principal_id,
        });
        Ok(())
    }

    async fn send_notice(
        &self,
        principal_id: PrincipalId,
        notice: Notice,
    ) -> Result<(), TransportError> {
        let blocked = self
            .unreachable
            .lock()
            .map(|set| set.contains(&principal_id))
            .unwrap_or(false);
        if blocked {
            return Err(TransportError::Unavailable("principal unreachable".into()));
        }
        self.check_failure()?;
        self.record(TransportCall::Notice {
            principal_id,
            notice,
        });
        Ok(())
    }

    async fn notify_operators(&self, alert: OperatorAlert) -> Result<(), TransportError> {
        self.check_failure()?;
        self.record(TransportCall::Operators(alert));
        Ok(())
    }
}
