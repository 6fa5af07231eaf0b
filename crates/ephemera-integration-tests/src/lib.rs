//! Integration test support for the Ephemera workspace.
//!
//! [`Stack`] wires every service onto one in-memory database, a
//! [`ManualClock`] and a [`RecordingTransport`], the same way the daemon
//! wires them onto the real ones. The end-to-end flows live in `tests/`.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p ephemera-integration-tests
//! ```

use std::sync::Arc;
use std::time::Duration;

use ephemera_billing::{PaymentWorkflow, SubscriptionLedger, TierCatalog};
use ephemera_db::SharedConnection;
use ephemera_delivery::{ContentRegistry, DeliveryScheduler, RevocationService};
use ephemera_gate::{AccessGate, Authorizer, EntitlementCache};
use ephemera_notifier::LifecycleNotifier;
use ephemera_resilience::RetryPolicy;
use ephemera_types::clock::ManualClock;
use ephemera_types::testing::RecordingTransport;
use ephemera_types::PrincipalId;

/// Fixed start time for every flow.
pub const BASE_TIME: u64 = 1_700_000_000;
pub const OWNER: PrincipalId = 1;
pub const OPERATOR: PrincipalId = 2;
pub const FREE_LIMIT: u32 = 3;
pub const DELIVERY_TTL_SECS: u64 = 900;

/// Every service sharing one database, clock and transport.
pub struct Stack {
    pub conn: SharedConnection,
    pub clock: ManualClock,
    pub transport: Arc<RecordingTransport>,
    pub cache: Arc<EntitlementCache>,
    pub registry: Arc<ContentRegistry>,
    pub gate: Arc<AccessGate>,
    pub ledger: Arc<SubscriptionLedger>,
    pub payments: PaymentWorkflow,
    pub revocations: RevocationService,
    pub scheduler: DeliveryScheduler,
    pub notifier: LifecycleNotifier,
}

impl Stack {
    pub fn new() -> Self {
        let conn = ephemera_db::shared(ephemera_db::open_memory().expect("open test db"));
        Self::on(conn, ManualClock::new(BASE_TIME), Arc::new(RecordingTransport::new()))
    }

    /// Build the services on existing state, as a restarted process would.
    pub fn on(conn: SharedConnection, clock: ManualClock, transport: Arc<RecordingTransport>) -> Self {
        let shared_clock = Arc::new(clock.clone());
        let retry = RetryPolicy::no_retry();
        let authorizer = Arc::new(Authorizer::new([OWNER], [OPERATOR]));
        let cache = Arc::new(EntitlementCache::new(30));

        let ledger = Arc::new(SubscriptionLedger::new(
            conn.clone(),
            shared_clock.clone(),
            retry.clone(),
        ));
        let gate = Arc::new(AccessGate::new(
            conn.clone(),
            ledger.clone(),
            cache.clone(),
            shared_clock.clone(),
            retry.clone(),
            FREE_LIMIT,
        ));
        let payments = PaymentWorkflow::new(
            conn.clone(),
            shared_clock.clone(),
            retry.clone(),
            TierCatalog::default(),
            authorizer.clone(),
            cache.clone(),
            transport.clone(),
        );
        let registry = Arc::new(ContentRegistry::new(
            conn.clone(),
            shared_clock.clone(),
            retry.clone(),
            authorizer,
        ));
        let revocations = RevocationService::new(
            conn.clone(),
            shared_clock.clone(),
            transport.clone(),
            retry.clone(),
            retry.clone(),
        );
        let scheduler = DeliveryScheduler::new(
            registry.clone(),
            gate.clone(),
            revocations.clone(),
            transport.clone(),
            retry.clone(),
            DELIVERY_TTL_SECS,
        );
        let notifier = LifecycleNotifier::new(
            conn.clone(),
            shared_clock,
            transport.clone(),
            retry,
            ephemera_notifier::DEFAULT_WARNING_WINDOW_SECS,
            ephemera_notifier::DEFAULT_INTERVAL,
        );

        Self {
            conn,
            clock,
            transport,
            cache,
            registry,
            gate,
            ledger,
            payments,
            revocations,
            scheduler,
            notifier,
        }
    }

    /// Advance the wall clock and tokio's paused timer together, then let
    /// woken tasks run. Only valid under `start_paused`.
    pub async fn pass(&self, secs: u64) {
        self.clock.advance(secs);
        tokio::time::advance(Duration::from_secs(secs)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}
