use crate::{
    account::AccountPollingService,
    bus::{BusFeedTx, EngineEvent, EventBus, EventCategory, EventFilter},
    config::EngineConfig,
    error::{EngineError, StrategyError},
    orders::{OrderManager, OrderStats},
    shutdown::{ShutdownController, ShutdownSignal},
    state::StrategyStateManager,
    store::{OrderStore, SnapshotStore, StateStore},
    strategy::{
        Strategy, StrategyParameters,
        runtime::{PortfolioRisk, StrategyRuntime, StrategyStatus},
    },
    sync::{OrderSyncService, SyncStats},
};
use chrono::Utc;
use fnv::FnvHashMap;
use riptide_data::subscription::{MarketDataConnector, manager::SubscriptionManager};
use riptide_execution::{
    client::{AccountUpdate, ExchangeConnector},
    error::OrderError,
    order::{Order, OrderUpdate, id::StrategyId},
};
use riptide_instrument::exchange::ExchangeId;
use riptide_risk::RiskManager;
use serde::{Deserialize, Serialize};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tracing::{debug, error, info, warn};

/// Engine status surface consumed by control planes (UI/CLI).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub strategies: Vec<(StrategyId, StrategyStatus)>,
    pub orders: OrderStats,
    pub active_subscriptions: usize,
    pub sync: SyncStats,
}

/// Assembles the trading core. Every component receives the bus explicitly;
/// nothing is process-global.
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    connectors: Vec<Arc<dyn ExchangeConnector>>,
    order_store: Option<Arc<dyn OrderStore>>,
    state_store: Option<Arc<dyn StateStore>>,
    snapshot_store: Option<Arc<dyn SnapshotStore>>,
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("connectors", &self.connectors.len())
            .finish()
    }
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn connector(mut self, connector: Arc<dyn ExchangeConnector>) -> Self {
        self.connectors.push(connector);
        self
    }

    pub fn order_store(mut self, store: Arc<dyn OrderStore>) -> Self {
        self.order_store = Some(store);
        self
    }

    pub fn state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    pub fn snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshot_store = Some(store);
        self
    }

    pub fn build(self) -> Result<Engine, EngineError> {
        self.config.validate()?;

        let order_store = self
            .order_store
            .unwrap_or_else(|| Arc::new(crate::store::in_memory::InMemoryOrderStore::new()));
        let state_store = self
            .state_store
            .unwrap_or_else(|| Arc::new(crate::store::in_memory::InMemoryStateStore::new()));
        let snapshot_store = self
            .snapshot_store
            .unwrap_or_else(|| Arc::new(crate::store::in_memory::InMemorySnapshotStore::new()));

        let bus = Arc::new(EventBus::new(self.config.bus_config()));

        let connectors: FnvHashMap<ExchangeId, Arc<dyn ExchangeConnector>> = self
            .connectors
            .into_iter()
            .map(|connector| (connector.exchange(), connector))
            .collect();

        let subscriptions = Arc::new(SubscriptionManager::new(
            BusFeedTx::new(Arc::clone(&bus)),
            self.config.poll_intervals(),
            connectors
                .values()
                .map(|connector| Arc::clone(connector) as Arc<dyn MarketDataConnector>),
        ));

        let orders = Arc::new(OrderManager::new(Arc::clone(&bus), order_store.clone()));
        let risk = Arc::new(RiskManager::new(self.config.risk.clone()));
        let state = Arc::new(StrategyStateManager::new(
            state_store,
            order_store,
            self.config.state_config(),
        ));
        let portfolio_risk = Arc::new(parking_lot::RwLock::new(PortfolioRisk::default()));

        let runtime = Arc::new(StrategyRuntime::new(
            Arc::clone(&bus),
            Arc::clone(&subscriptions),
            connectors.values().cloned(),
            Arc::clone(&orders),
            Arc::clone(&risk),
            Arc::clone(&state),
            Arc::clone(&portfolio_risk),
            self.config.runtime_config(),
        ));

        let sync = Arc::new(OrderSyncService::new(
            Arc::clone(&orders),
            connectors.values().cloned(),
            self.config.sync_config(),
        ));

        let account = Arc::new(AccountPollingService::new(
            Arc::clone(&bus),
            connectors.values().cloned(),
            snapshot_store,
            Arc::clone(&portfolio_risk),
            self.config.account_config(),
        ));

        Ok(Engine {
            config: self.config,
            bus,
            connectors,
            orders,
            state,
            subscriptions,
            runtime,
            sync,
            account,
            shutdown: ShutdownController::new(),
            tasks: parking_lot::Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        })
    }
}

/// The long-running trading core.
pub struct Engine {
    config: EngineConfig,
    bus: Arc<EventBus>,
    connectors: FnvHashMap<ExchangeId, Arc<dyn ExchangeConnector>>,
    orders: Arc<OrderManager>,
    state: Arc<StrategyStateManager>,
    subscriptions: Arc<SubscriptionManager<BusFeedTx>>,
    runtime: Arc<StrategyRuntime>,
    sync: Arc<OrderSyncService>,
    account: Arc<AccountPollingService>,
    shutdown: ShutdownController,
    tasks: parking_lot::Mutex<Vec<tokio::task::JoinHandle<()>>>,
    running: AtomicBool,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("running", &self.running.load(Ordering::SeqCst))
            .field("exchanges", &self.connectors.keys())
            .finish()
    }
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn orders(&self) -> &Arc<OrderManager> {
        &self.orders
    }

    pub fn state_manager(&self) -> &Arc<StrategyStateManager> {
        &self.state
    }

    pub fn sync_service(&self) -> &Arc<OrderSyncService> {
        &self.sync
    }

    pub fn account_service(&self) -> &Arc<AccountPollingService> {
        &self.account
    }

    /// Connect venues and spawn the background services.
    pub async fn start(&self) -> Result<(), EngineError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        for (exchange, connector) in &self.connectors {
            match connector.connect().await {
                Ok(()) => {
                    self.bus.publish(EngineEvent::ExchangeConnected {
                        exchange: *exchange,
                        time: Utc::now(),
                    });
                }
                Err(error) => {
                    // Engine starts regardless; the sync and polling loops
                    // skip disconnected venues until they recover
                    warn!(%exchange, %error, "exchange connect failed");
                    self.bus.publish(EngineEvent::ExchangeError {
                        exchange: *exchange,
                        message: error.to_string(),
                        time: Utc::now(),
                    });
                }
            }
        }

        let mut tasks = Vec::new();

        // Private account streams: order, balance and position pushes
        for (exchange, connector) in &self.connectors {
            match connector.account_stream().await {
                Ok(stream) => {
                    tasks.push(tokio::spawn(consume_account_stream(
                        *exchange,
                        stream,
                        Arc::clone(&self.orders),
                        Arc::clone(&self.bus),
                        self.shutdown.subscribe(),
                    )));
                }
                Err(error) => {
                    warn!(%exchange, %error, "account stream unavailable - relying on sync polling");
                    self.bus.publish(EngineEvent::ExchangeError {
                        exchange: *exchange,
                        message: error.to_string(),
                        time: Utc::now(),
                    });
                }
            }
        }

        tasks.push(tokio::spawn(
            Arc::clone(&self.sync).run(self.shutdown.subscribe()),
        ));
        tasks.push(tokio::spawn(
            Arc::clone(&self.account).run(self.shutdown.subscribe()),
        ));
        tasks.push(tokio::spawn(supervise_risk_events(
            self.bus.subscribe("engine_supervisor", EventFilter::categories([EventCategory::Risk])),
            Arc::clone(&self.runtime),
            Arc::clone(&self.orders),
            self.connectors.clone(),
            Arc::clone(&self.bus),
            self.config.shutdown_timeout(),
            self.shutdown.subscribe(),
        )));
        self.tasks.lock().extend(tasks);

        self.bus.publish(EngineEvent::EngineStarted {
            message: format!("engine started with {} exchange(s)", self.connectors.len()),
            time: Utc::now(),
        });
        info!(exchanges = self.connectors.len(), "engine started");
        Ok(())
    }

    /// Initialise, recover and start a strategy.
    pub async fn start_strategy(
        &self,
        strategy: Box<dyn Strategy>,
        parameters: StrategyParameters,
    ) -> Result<(), EngineError> {
        self.runtime.start_strategy(strategy, parameters).await
    }

    pub async fn stop_strategy(&self, id: &StrategyId) -> Result<(), StrategyError> {
        self.runtime
            .stop_strategy(id, self.config.shutdown_timeout())
            .await
    }

    pub fn pause_strategy(&self, id: &StrategyId) -> Result<(), StrategyError> {
        self.runtime.pause_strategy(id)
    }

    pub fn resume_strategy(&self, id: &StrategyId) -> Result<(), StrategyError> {
        self.runtime.resume_strategy(id)
    }

    /// Stop a strategy and delete its persisted state.
    pub async fn delete_strategy(&self, id: &StrategyId) -> Result<(), EngineError> {
        self.runtime
            .stop_strategy(id, self.config.shutdown_timeout())
            .await?;
        self.state.delete_state(id)?;
        Ok(())
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            running: self.running.load(Ordering::SeqCst),
            strategies: self
                .runtime
                .strategy_ids()
                .into_iter()
                .filter_map(|id| self.runtime.status(&id).map(|status| (id, status)))
                .collect(),
            orders: self.orders.stats(),
            active_subscriptions: self.subscriptions.active_subscriptions(),
            sync: self.sync.stats(),
        }
    }

    /// Graceful stop: strategies flush final snapshots, services drain, the
    /// cancellation token fans out, then upstreams close.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let timeout = self.config.shutdown_timeout();
        self.runtime.stop_all(timeout).await;

        self.shutdown.cancel();
        self.subscriptions.shutdown();

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if tokio::time::timeout(timeout, task).await.is_err() {
                warn!("background task did not drain within shutdown timeout");
                self.bus.publish(EngineEvent::EngineError {
                    message: "background task did not drain within shutdown timeout".to_string(),
                    time: Utc::now(),
                });
            }
        }

        for (exchange, connector) in &self.connectors {
            if let Err(error) = connector.disconnect().await {
                warn!(%exchange, %error, "disconnect failed");
            } else {
                self.bus.publish(EngineEvent::ExchangeDisconnected {
                    exchange: *exchange,
                    time: Utc::now(),
                });
            }
        }

        self.bus.publish(EngineEvent::EngineStopped {
            message: "engine stopped".to_string(),
            time: Utc::now(),
        });
        info!("engine stopped");
    }

    /// Trigger the emergency procedure: every strategy stops, open orders
    /// are cancelled best-effort, the engine reports stopped.
    pub fn emergency_stop(&self, reason: impl Into<String>) {
        self.bus.publish(EngineEvent::EmergencyStop {
            reason: reason.into(),
            time: Utc::now(),
        });
    }
}

/// Forward one exchange's private stream into the core.
///
/// Order snapshots run through the order manager (and therefore the
/// suppression gate); balances and positions republish as account events.
async fn consume_account_stream(
    exchange: ExchangeId,
    mut stream: riptide_integration::channel::UnboundedRx<AccountUpdate>,
    orders: Arc<OrderManager>,
    bus: Arc<EventBus>,
    mut shutdown: ShutdownSignal,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            update = stream.recv() => {
                let Some(update) = update else { break };
                match update {
                    AccountUpdate::Order(snapshot) => {
                        apply_order_snapshot(&orders, snapshot.0);
                    }
                    AccountUpdate::Balances(balances) => {
                        bus.publish(EngineEvent::BalanceUpdate {
                            exchange,
                            balances,
                            time: Utc::now(),
                        });
                    }
                    AccountUpdate::Positions(positions) => {
                        bus.publish(EngineEvent::PositionUpdate {
                            exchange,
                            positions,
                            time: Utc::now(),
                        });
                    }
                }
            }
        }
    }
    debug!(%exchange, "account stream consumer stopped");
}

/// Route an exchange order snapshot through the order manager.
fn apply_order_snapshot(orders: &OrderManager, snapshot: Order) {
    match orders.get_order(&snapshot.id) {
        Some(local) => {
            let update = OrderUpdate::from_exchange(&snapshot);
            if !local.differs_from(&update) {
                return;
            }
            match orders.update_order(&snapshot.id, update) {
                Ok(_) => {}
                // Duplicates racing the sync path are expected
                Err(OrderError::TerminalStatus { .. }) | Err(OrderError::StaleUpdate { .. }) => {}
                Err(error) => {
                    error!(order_id = %snapshot.id, %error, "order snapshot rejected");
                }
            }
        }
        None => {
            // Venue knows an order we do not track locally, eg/ placed
            // before a crash: adopt it
            if let Err(error) = orders.add_order(snapshot.clone()) {
                error!(order_id = %snapshot.id, %error, "failed to adopt exchange order");
            }
        }
    }
}

/// React to critical risk events: stop strategies, cancel open orders
/// best-effort, report the engine stopped.
async fn supervise_risk_events(
    mut rx: crate::bus::BusRx,
    runtime: Arc<StrategyRuntime>,
    orders: Arc<OrderManager>,
    connectors: FnvHashMap<ExchangeId, Arc<dyn ExchangeConnector>>,
    bus: Arc<EventBus>,
    timeout: std::time::Duration,
    mut shutdown: ShutdownSignal,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = rx.recv() => event,
        };

        let EngineEvent::EmergencyStop { reason, .. } = event else {
            continue;
        };

        error!(%reason, "emergency stop triggered");
        runtime.stop_all(timeout).await;

        // Best-effort venue-side cancellation of everything still open
        for order in orders.open_orders() {
            let Some(connector) = connectors.get(&order.exchange) else {
                continue;
            };
            if let Err(error) = connector.cancel_order(&order.symbol, &order.id).await {
                warn!(order_id = %order.id, %error, "emergency cancel failed");
            }
        }
        orders.cancel_all_orders(None);

        bus.publish(EngineEvent::EngineStopped {
            message: format!("emergency stop: {reason}"),
            time: Utc::now(),
        });
    }
}
