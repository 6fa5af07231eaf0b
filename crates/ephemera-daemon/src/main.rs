//! ephemera-daemon: the Ephemera content gating daemon.
//!
//! Single OS process running a Tokio async runtime. The chat bridge talks to
//! the daemon via JSON-RPC over a Unix socket and receives outbound chat
//! operations as events on the same socket.

mod commands;
mod config;
mod events;
mod rpc;
mod transport;

use std::sync::Arc;

use ephemera_billing::{PaymentWorkflow, SubscriptionLedger, TierCatalog};
use ephemera_db::SharedConnection;
use ephemera_delivery::{ContentRegistry, DeliveryScheduler, RevocationService};
use ephemera_gate::{AccessGate, Authorizer, EntitlementCache};
use ephemera_notifier::LifecycleNotifier;
use ephemera_types::clock::{Clock, SystemClock};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::config::DaemonConfig;
use crate::events::EventBus;
use crate::rpc::RpcServer;
use crate::transport::EventBusTransport;

/// Daemon-wide shared state.
pub struct DaemonState {
    pub config: DaemonConfig,
    /// Event bus for pushing events to subscribers.
    pub event_bus: EventBus,
    pub authorizer: Arc<Authorizer>,
    pub registry: Arc<ContentRegistry>,
    pub gate: Arc<AccessGate>,
    pub ledger: Arc<SubscriptionLedger>,
    pub payments: PaymentWorkflow,
    pub scheduler: DeliveryScheduler,
    pub revocations: RevocationService,
    pub notifier: Arc<LifecycleNotifier>,
    /// Shutdown signal sender.
    pub shutdown_tx: broadcast::Sender<()>,
}

impl DaemonState {
    /// Wire every service onto one connection, clock and transport.
    fn build(
        config: DaemonConfig,
        db: SharedConnection,
        event_bus: EventBus,
        clock: Arc<dyn Clock>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> anyhow::Result<Self> {
        let retry = config.retry.policy();
        let authorizer = Arc::new(Authorizer::new(
            config.authorization.owners.iter().copied(),
            config.authorization.operators.iter().copied(),
        ));
        if authorizer.reviewers().is_empty() {
            warn!("no owners or operators configured; payments cannot be decided");
        }

        let first_item_id = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        let transport = Arc::new(EventBusTransport::new(
            event_bus.clone(),
            clock.clone(),
            first_item_id,
            authorizer.reviewers(),
        ));

        let cache = Arc::new(EntitlementCache::new(config.access.entitlement_cache_ttl_secs));
        let ledger = Arc::new(SubscriptionLedger::new(db.clone(), clock.clone(), retry.clone()));
        let gate = Arc::new(AccessGate::new(
            db.clone(),
            ledger.clone(),
            cache.clone(),
            clock.clone(),
            retry.clone(),
            config.access.free_limit,
        ));
        let catalog = TierCatalog::new(config.tiers.clone())?;
        let payments = PaymentWorkflow::new(
            db.clone(),
            clock.clone(),
            retry.clone(),
            catalog,
            authorizer.clone(),
            cache,
            transport.clone(),
        );
        let registry = Arc::new(ContentRegistry::new(
            db.clone(),
            clock.clone(),
            retry.clone(),
            authorizer.clone(),
        ));
        let revocations = RevocationService::new(
            db.clone(),
            clock.clone(),
            transport.clone(),
            retry.clone(),
            config.revocation_retry.policy(),
        );
        let scheduler = DeliveryScheduler::new(
            registry.clone(),
            gate.clone(),
            revocations.clone(),
            transport.clone(),
            retry.clone(),
            config.delivery.ttl_secs,
        );
        let notifier = Arc::new(LifecycleNotifier::new(
            db,
            clock,
            transport,
            retry,
            config.notifier.warning_window_secs,
            config.notifier.interval(),
        ));

        Ok(Self {
            config,
            event_bus,
            authorizer,
            registry,
            gate,
            ledger,
            payments,
            scheduler,
            revocations,
            notifier,
            shutdown_tx,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = DaemonConfig::load()?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("ephemera={}", config.advanced.log_level).parse()?),
        )
        .init();

    info!("Ephemera daemon starting");

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    // 2. Open database
    let db_path = data_dir.join("ephemera.db");
    let db = ephemera_db::shared(ephemera_db::open(&db_path)?);

    // 3. Event bus and shutdown channel
    let event_bus = EventBus::new(1000);
    let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // 4. Build daemon state
    let state = Arc::new(DaemonState::build(
        config,
        db,
        event_bus,
        clock.clone(),
        shutdown_tx.clone(),
    )?);

    // 5. Re-arm pending revocations once a bridge can carry the removals
    tokio::spawn(restore_when_bridge_connected(
        state.clone(),
        shutdown_tx.subscribe(),
    ));

    // 6. Start the lifecycle notifier
    let notifier = tokio::spawn(state.notifier.clone().run(shutdown_tx.subscribe()));

    // 7. Start IPC server
    let socket_path = data_dir.join("daemon.sock");
    let rpc_server = RpcServer::new(state.clone(), socket_path.clone());

    info!("Starting JSON-RPC server on {:?}", socket_path);

    state.event_bus.emit(
        events::DAEMON_STARTED,
        clock.now(),
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
        }),
    );

    // 8. Run the RPC server until shutdown
    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::select! {
        result = rpc_server.run() => {
            if let Err(e) = result {
                error!("RPC server error: {}", e);
            }
        }
        _ = shutdown_rx.recv() => {
            info!("Shutdown signal received");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
    }

    // Graceful shutdown
    info!("Daemon shutting down gracefully");
    let _ = state.shutdown_tx.send(());
    if let Err(e) = notifier.await {
        warn!("notifier task ended abnormally: {}", e);
    }
    // Persisted deadlines are re-armed by the next start.
    state.revocations.shutdown();

    // Clean up socket file
    let _ = std::fs::remove_file(&socket_path);

    info!("Daemon stopped");
    Ok(())
}

/// Wait for the first event subscriber, then re-arm persisted revocations.
async fn restore_when_bridge_connected(
    state: Arc<DaemonState>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut poll = tokio::time::interval(std::time::Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = poll.tick() => {
                if state.event_bus.subscriber_count() > 0 {
                    break;
                }
            }
            _ = shutdown.recv() => return,
        }
    }
    match state.revocations.restore().await {
        Ok(restored) => info!(restored, "pending revocations re-armed"),
        Err(e) => error!("could not restore revocations: {}", e),
    }
}
