use crate::{
    bus::{BusFeedTx, BusRx, EngineEvent, EventBus, EventCategory, EventFilter},
    error::{EngineError, StrategyError},
    orders::OrderManager,
    state::{StrategyState, StrategyStateManager},
    store::OrderFilter,
    strategy::{
        InitialData, MarketData, RecoveryContext, SignalAction, Strategy, StrategyParameters,
        StrategyResult, StrategyStateData, SubscriptionRequirements,
    },
};
use chrono::Utc;
use fnv::FnvHashMap;
use riptide_data::{
    event::{DataKind, MarketEvent},
    subscription::{KlineInterval, SubscriberId, kline::Kline, ticker::Ticker, trade::PublicTrade},
    books::OrderBook,
    subscription::manager::SubscriptionManager,
};
use riptide_execution::{
    client::ExchangeConnector,
    order::{Order, OrderKind, TimeInForce, id::{ClientOrderId, StrategyId}, request::OrderIntent},
};
use riptide_instrument::{Side, exchange::ExchangeId};
use riptide_integration::{
    backoff::ExponentialBackoff,
    channel::{Tx, UnboundedRx, UnboundedTx, mpsc_unbounded},
    collection::FixedWindow,
};
use riptide_risk::{RiskContext, RiskManager, Severity};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{error, info, warn};

const ORDER_PLACE_TIMEOUT: Duration = Duration::from_secs(20);
const PLACE_RETRY_ATTEMPTS: u32 = 3;

/// Runtime failure-handling configuration.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Analyzer errors within [`error_window`](Self::error_window) that
    /// transition a strategy to `Paused`.
    pub error_threshold: usize,
    pub error_window: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            error_threshold: 5,
            error_window: Duration::from_secs(60),
        }
    }
}

/// Lifecycle state of a registered strategy.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum StrategyStatus {
    Running,
    /// Stopped receiving events, state retained until restarted.
    Paused,
    Stopped,
}

/// Portfolio-level observations shared with the risk checks; maintained by
/// the account polling service.
#[derive(Debug, Clone, Default)]
pub struct PortfolioRisk {
    pub daily_pnl: Decimal,
    pub drawdown: Decimal,
}

#[derive(Debug, Copy, Clone)]
enum StrategyCommand {
    Pause,
    Resume,
    Stop,
}

struct StrategyHandle {
    status: Arc<parking_lot::RwLock<StrategyStatus>>,
    command_tx: UnboundedTx<StrategyCommand>,
    task: Option<tokio::task::JoinHandle<()>>,
}

/// Runs each active strategy as an independent cooperative task: parallel
/// across strategies, serial per strategy (the task owns its strategy, so
/// `analyze` calls can never overlap).
pub struct StrategyRuntime {
    bus: Arc<EventBus>,
    subscriptions: Arc<SubscriptionManager<BusFeedTx>>,
    connectors: FnvHashMap<ExchangeId, Arc<dyn ExchangeConnector>>,
    orders: Arc<OrderManager>,
    risk: Arc<RiskManager>,
    state: Arc<StrategyStateManager>,
    portfolio_risk: Arc<parking_lot::RwLock<PortfolioRisk>>,
    config: RuntimeConfig,
    strategies: parking_lot::Mutex<FnvHashMap<StrategyId, StrategyHandle>>,
}

impl std::fmt::Debug for StrategyRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRuntime")
            .field("strategies", &self.strategies.lock().len())
            .finish()
    }
}

impl StrategyRuntime {
    pub fn new(
        bus: Arc<EventBus>,
        subscriptions: Arc<SubscriptionManager<BusFeedTx>>,
        connectors: impl IntoIterator<Item = Arc<dyn ExchangeConnector>>,
        orders: Arc<OrderManager>,
        risk: Arc<RiskManager>,
        state: Arc<StrategyStateManager>,
        portfolio_risk: Arc<parking_lot::RwLock<PortfolioRisk>>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            bus,
            subscriptions,
            connectors: connectors
                .into_iter()
                .map(|connector| (connector.exchange(), connector))
                .collect(),
            orders,
            risk,
            state,
            portfolio_risk,
            config,
            strategies: parking_lot::Mutex::new(FnvHashMap::default()),
        }
    }

    /// Initialise, recover and start a strategy.
    ///
    /// Order of operations: load initial data, `initialize`, recover
    /// persisted state and open orders, `restore_state`,
    /// `set_recovery_context` (exactly once), subscribe market data, then
    /// spawn the dispatch loop.
    pub async fn start_strategy(
        &self,
        mut strategy: Box<dyn Strategy>,
        parameters: StrategyParameters,
    ) -> Result<(), EngineError> {
        let id = strategy.id();
        if self.strategies.lock().contains_key(&id) {
            return Err(StrategyError::AlreadyRegistered(id.to_string()).into());
        }

        let requirements = strategy.subscription_requirements();
        let connector = self
            .connectors
            .get(&requirements.exchange)
            .cloned()
            .ok_or_else(|| {
                EngineError::InvariantViolation(format!(
                    "no connector registered for {}",
                    requirements.exchange
                ))
            })?;

        // Initial data, eg/ kline history to prime indicators
        let mut initial = InitialData::default();
        for (interval, limit) in strategy.initial_data_requirements().klines {
            let klines = connector
                .get_klines(&requirements.symbol, interval, None, None, Some(limit))
                .await?;
            initial.klines.insert(interval, klines);
        }

        strategy.initialize(&parameters, &initial)?;

        // Recovery: rebuild position and open-order context
        let long_only = parameters.boolean("long_only").unwrap_or(false);
        let recovery = self
            .state
            .recover(&id, &self.connectors, &self.orders, long_only)
            .await?;

        if let Some(state) = &recovery.state {
            strategy.restore_state(&StrategyStateData::from(state));
        }
        strategy.set_recovery_context(&RecoveryContext {
            position: recovery.total_position,
            average_price: recovery.average_price,
            open_orders: recovery.open_orders.clone(),
        });

        let start_paused = recovery.has_errors();
        if start_paused {
            warn!(strategy = %id, "recovery reported errors - starting paused");
        }

        // Market data subscriptions
        let subscriber = SubscriberId::new(id.to_string());
        self.subscriptions
            .subscribe(&subscriber, requirements.requests())
            .await
            .map_err(|e| EngineError::InvariantViolation(e.to_string()))?;

        let bus_rx = self.bus.subscribe(
            id.to_string(),
            EventFilter::categories([EventCategory::MarketData, EventCategory::Order])
                .with_symbols([requirements.symbol.clone()])
                .with_strategy(id.clone()),
        );

        let status = Arc::new(parking_lot::RwLock::new(if start_paused {
            StrategyStatus::Paused
        } else {
            StrategyStatus::Running
        }));
        let (command_tx, command_rx) = mpsc_unbounded();

        let worker = StrategyWorker {
            id: id.clone(),
            strategy,
            requirements,
            connector,
            bus: Arc::clone(&self.bus),
            subscriptions: Arc::clone(&self.subscriptions),
            orders: Arc::clone(&self.orders),
            risk: Arc::clone(&self.risk),
            state: Arc::clone(&self.state),
            portfolio_risk: Arc::clone(&self.portfolio_risk),
            status: Arc::clone(&status),
            config: self.config,
            subscriber,
            initial_klines: initial.klines,
        };

        let task = tokio::spawn(worker.run(bus_rx, command_rx));

        self.strategies.lock().insert(
            id.clone(),
            StrategyHandle {
                status,
                command_tx,
                task: Some(task),
            },
        );

        info!(strategy = %id, paused = start_paused, "strategy started");
        Ok(())
    }

    pub fn status(&self, id: &StrategyId) -> Option<StrategyStatus> {
        self.strategies
            .lock()
            .get(id)
            .map(|handle| *handle.status.read())
    }

    pub fn strategy_ids(&self) -> Vec<StrategyId> {
        self.strategies.lock().keys().cloned().collect()
    }

    pub fn pause_strategy(&self, id: &StrategyId) -> Result<(), StrategyError> {
        self.send_command(id, StrategyCommand::Pause)
    }

    pub fn resume_strategy(&self, id: &StrategyId) -> Result<(), StrategyError> {
        self.send_command(id, StrategyCommand::Resume)
    }

    fn send_command(&self, id: &StrategyId, command: StrategyCommand) -> Result<(), StrategyError> {
        let strategies = self.strategies.lock();
        let handle = strategies
            .get(id)
            .ok_or_else(|| StrategyError::NotFound(id.to_string()))?;
        handle
            .command_tx
            .send(command)
            .map_err(|_| StrategyError::NotFound(id.to_string()))
    }

    /// Stop one strategy: final snapshot, cleanup, release subscriptions.
    pub async fn stop_strategy(&self, id: &StrategyId, timeout: Duration) -> Result<(), StrategyError> {
        let (command_tx, task) = {
            let mut strategies = self.strategies.lock();
            let handle = strategies
                .get_mut(id)
                .ok_or_else(|| StrategyError::NotFound(id.to_string()))?;
            (handle.command_tx.clone(), handle.task.take())
        };

        let _ = command_tx.send(StrategyCommand::Stop);
        if let Some(task) = task {
            if tokio::time::timeout(timeout, task).await.is_err() {
                warn!(strategy = %id, "strategy did not stop within timeout - aborting");
            }
        }

        self.strategies.lock().remove(id);
        Ok(())
    }

    /// Stop every strategy, bounded by the provided timeout overall.
    pub async fn stop_all(&self, timeout: Duration) {
        let ids = self.strategy_ids();
        let deadline = Instant::now() + timeout;
        for id in ids {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Err(error) = self.stop_strategy(&id, remaining.max(Duration::from_millis(10))).await {
                warn!(strategy = %id, %error, "failed to stop strategy");
            }
        }
    }
}

/// Everything one dispatch loop owns.
struct StrategyWorker {
    id: StrategyId,
    strategy: Box<dyn Strategy>,
    requirements: SubscriptionRequirements,
    connector: Arc<dyn ExchangeConnector>,
    bus: Arc<EventBus>,
    subscriptions: Arc<SubscriptionManager<BusFeedTx>>,
    orders: Arc<OrderManager>,
    risk: Arc<RiskManager>,
    state: Arc<StrategyStateManager>,
    portfolio_risk: Arc<parking_lot::RwLock<PortfolioRisk>>,
    status: Arc<parking_lot::RwLock<StrategyStatus>>,
    config: RuntimeConfig,
    subscriber: SubscriberId,
    initial_klines: FnvHashMap<KlineInterval, Vec<Kline>>,
}

impl StrategyWorker {
    async fn run(
        mut self,
        mut bus_rx: BusRx,
        mut command_rx: UnboundedRx<StrategyCommand>,
    ) {
        let mut cache = MarketCache::new(&self.requirements, std::mem::take(&mut self.initial_klines));
        let mut recent_errors: VecDeque<Instant> = VecDeque::new();
        let mut autosave = tokio::time::interval(self.state.config().autosave_interval);
        autosave.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The immediate first tick would snapshot before any work
        autosave.tick().await;

        loop {
            tokio::select! {
                biased;

                command = command_rx.recv() => {
                    match command {
                        Some(StrategyCommand::Stop) | None => break,
                        Some(StrategyCommand::Pause) => {
                            *self.status.write() = StrategyStatus::Paused;
                            info!(strategy = %self.id, "strategy paused");
                        }
                        Some(StrategyCommand::Resume) => {
                            recent_errors.clear();
                            *self.status.write() = StrategyStatus::Running;
                            info!(strategy = %self.id, "strategy resumed");
                        }
                    }
                }

                event = bus_rx.recv() => {
                    if *self.status.read() != StrategyStatus::Running {
                        continue;
                    }
                    self.on_event(event, &mut cache, &mut recent_errors).await;
                }

                _ = autosave.tick() => {
                    self.save_snapshot(None);
                }
            }
        }

        // Flush: final snapshot, idempotent cleanup, release upstreams
        self.save_snapshot(None);
        self.strategy.cleanup();
        self.subscriptions.unsubscribe(&self.subscriber);
        *self.status.write() = StrategyStatus::Stopped;
        info!(strategy = %self.id, "strategy stopped");
    }

    async fn on_event(
        &mut self,
        event: EngineEvent,
        cache: &mut MarketCache,
        recent_errors: &mut VecDeque<Instant>,
    ) {
        let order_event = match event {
            EngineEvent::MarketData(market) => {
                cache.update(&market);
                None
            }
            other => other.order().cloned(),
        };

        let had_order_context = order_event.is_some();
        let market_data = cache.snapshot(order_event);

        match self.strategy.analyze(&market_data) {
            Ok(result) => {
                if !result.is_hold() {
                    self.on_signal(result).await;
                }
            }
            Err(error) => self.on_analyze_error(error, recent_errors),
        }

        // Order progress changes the position this strategy must resume
        // with, so it snapshots immediately rather than waiting for the
        // autosave tick
        if had_order_context {
            self.save_snapshot(None);
        }
    }

    async fn on_signal(&mut self, result: StrategyResult) {
        self.bus.publish(EngineEvent::StrategySignal {
            strategy: self.id.clone(),
            action: smol_str::SmolStr::new(result.action.to_string()),
            quantity: result.quantity,
            price: result.price,
            confidence: result.confidence,
            reason: result.reason.clone(),
            time: Utc::now(),
        });

        let Some(quantity) = result.quantity else {
            warn!(strategy = %self.id, action = %result.action, "signal without quantity - skipping");
            return;
        };

        let side = match result.action {
            SignalAction::Buy => Side::Buy,
            SignalAction::Sell => Side::Sell,
            SignalAction::Hold => return,
        };

        let intent = OrderIntent {
            client_order_id: ClientOrderId::random(),
            strategy: self.id.clone(),
            exchange: self.requirements.exchange,
            symbol: self.requirements.symbol.clone(),
            side,
            kind: if result.price.is_some() {
                OrderKind::Limit
            } else {
                OrderKind::Market
            },
            time_in_force: TimeInForce::Gtc,
            quantity,
            price: result.price,
            stop_price: None,
        };

        // Risk gate in front of the order manager
        let context = self.risk_context();
        if let Err(violation) = self.risk.check(&intent, &context) {
            let severity = violation.severity;
            self.bus.publish(EngineEvent::RiskLimitExceeded {
                strategy: self.id.clone(),
                violation,
                time: Utc::now(),
            });
            if severity == Severity::Critical {
                self.bus.publish(EngineEvent::EmergencyStop {
                    reason: "critical risk limit exceeded".to_string(),
                    time: Utc::now(),
                });
            }
            return;
        }

        match self.place_with_retry(&intent).await {
            Ok(mut order) => {
                order.strategy = Some(self.id.clone());
                if let Err(error) = self.orders.add_order(order) {
                    // Tracking a venue-acknowledged order can only fail on a
                    // local logic bug, which stops the whole engine
                    error!(strategy = %self.id, %error, "failed to track placed order");
                    self.bus.publish(EngineEvent::EmergencyStop {
                        reason: format!("invariant violation tracking order: {error}"),
                        time: Utc::now(),
                    });
                }
                // Snapshot on every non-hold result
                self.save_snapshot(Some(result.action));
            }
            Err(error) => {
                self.bus.publish(EngineEvent::ExchangeError {
                    exchange: intent.exchange,
                    message: error.to_string(),
                    time: Utc::now(),
                });
                if !error.retryable {
                    *self.status.write() = StrategyStatus::Paused;
                    warn!(strategy = %self.id, %error, "order placement failed - strategy paused");
                }
            }
        }
    }

    async fn place_with_retry(
        &self,
        intent: &OrderIntent,
    ) -> Result<Order, riptide_execution::error::ExchangeError> {
        let mut backoff = ExponentialBackoff::default();

        loop {
            let attempt = tokio::time::timeout(
                ORDER_PLACE_TIMEOUT,
                self.connector.place_order(intent),
            )
            .await
            .unwrap_or_else(|_| {
                Err(riptide_execution::error::ExchangeError::network(
                    intent.exchange,
                    "order placement timed out",
                ))
            });

            match attempt {
                Ok(order) => return Ok(order),
                Err(error) if error.retryable
                    && backoff.consecutive_failures() + 1 < PLACE_RETRY_ATTEMPTS =>
                {
                    let delay = backoff.next_delay();
                    warn!(
                        strategy = %self.id,
                        %error,
                        attempt = backoff.consecutive_failures(),
                        "retrying order placement"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn on_analyze_error(&mut self, error: StrategyError, recent_errors: &mut VecDeque<Instant>) {
        warn!(strategy = %self.id, %error, "analyze failed");
        self.bus.publish(EngineEvent::StrategyError {
            strategy: self.id.clone(),
            message: error.to_string(),
            time: Utc::now(),
        });

        let now = Instant::now();
        recent_errors.push_back(now);
        while recent_errors
            .front()
            .is_some_and(|first| now.duration_since(*first) > self.config.error_window)
        {
            recent_errors.pop_front();
        }

        if recent_errors.len() > self.config.error_threshold {
            *self.status.write() = StrategyStatus::Paused;
            warn!(
                strategy = %self.id,
                errors = recent_errors.len(),
                window_secs = self.config.error_window.as_secs(),
                "error rate exceeded - strategy paused"
            );
        }
    }

    fn risk_context(&self) -> RiskContext {
        let portfolio = self.portfolio_risk.read().clone();
        RiskContext {
            position_quantity: self.orders.net_executed(&self.requirements.symbol),
            open_positions: self.orders.position_symbol_count(),
            daily_pnl: portfolio.daily_pnl,
            drawdown: portfolio.drawdown,
            leverage: None,
        }
    }

    fn save_snapshot(&self, signal: Option<SignalAction>) {
        let trail = self
            .orders
            .orders(&OrderFilter::by_strategy(self.id.clone()));
        let (position, average_price) = crate::state::position_from_orders(&trail);

        let previous = self.state.load_state(&self.id).ok().flatten();
        let data = self.strategy.save_state();

        let state = StrategyState {
            strategy_id: self.id.clone(),
            internal_state: data.internal,
            indicator_data: data.indicators,
            last_signal: signal.or(previous.as_ref().and_then(|state| state.last_signal)),
            signal_time: match signal {
                Some(_) => Some(Utc::now()),
                None => previous.as_ref().and_then(|state| state.signal_time),
            },
            current_position: position,
            average_price,
            last_update_time: Utc::now(),
        };

        if let Err(error) = self.state.save_state(state) {
            warn!(strategy = %self.id, %error, "snapshot save failed");
        }
    }
}

/// Rolling market view maintained per strategy from subscribed events.
struct MarketCache {
    ticker: Option<Ticker>,
    book: Option<OrderBook>,
    book_depth: usize,
    trades: FixedWindow<PublicTrade>,
    klines: FnvHashMap<KlineInterval, FixedWindow<Kline>>,
}

impl MarketCache {
    fn new(
        requirements: &SubscriptionRequirements,
        initial_klines: FnvHashMap<KlineInterval, Vec<Kline>>,
    ) -> Self {
        let mut book_depth = 20;
        let mut trades_limit = 100;
        let mut klines: FnvHashMap<KlineInterval, FixedWindow<Kline>> = FnvHashMap::default();

        for requirement in &requirements.data {
            match requirement {
                crate::strategy::DataRequirement::OrderBook { depth } => book_depth = *depth,
                crate::strategy::DataRequirement::Trades { limit } => trades_limit = *limit,
                crate::strategy::DataRequirement::Klines { interval, limit } => {
                    klines.insert(*interval, FixedWindow::new((*limit).max(1)));
                }
                crate::strategy::DataRequirement::Ticker => {}
            }
        }

        for (interval, bars) in initial_klines {
            let window = klines
                .entry(interval)
                .or_insert_with(|| FixedWindow::new(bars.len().max(1)));
            for bar in bars {
                window.push(bar);
            }
        }

        Self {
            ticker: None,
            book: None,
            book_depth,
            trades: FixedWindow::new(trades_limit.max(1)),
            klines,
        }
    }

    fn update(&mut self, event: &MarketEvent) {
        match &event.kind {
            DataKind::Ticker(ticker) => self.ticker = Some(ticker.clone()),
            DataKind::OrderBook(book) => self.book = Some(book.truncated(self.book_depth)),
            DataKind::Trade(trade) => {
                self.trades.push(trade.clone());
            }
            DataKind::Kline(kline) => {
                let window = self
                    .klines
                    .entry(kline.interval)
                    .or_insert_with(|| FixedWindow::new(100));

                // A still-forming bar updates in place; a new bar appends
                match window.latest_mut() {
                    Some(last) if last.open_time == kline.open_time => *last = kline.clone(),
                    _ => {
                        window.push(kline.clone());
                    }
                }
            }
        }
    }

    fn snapshot(&self, order_event: Option<Order>) -> MarketData {
        MarketData {
            ticker: self.ticker.clone(),
            order_book: self.book.clone(),
            trades: self.trades.iter().cloned().collect(),
            klines: self
                .klines
                .iter()
                .map(|(interval, window)| (*interval, window.iter().cloned().collect()))
                .collect(),
            order_event,
            time: Utc::now(),
        }
    }
}
