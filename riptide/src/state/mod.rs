use crate::{
    error::StateError,
    orders::OrderManager,
    store::{OrderFilter, OrderStore, StateStore},
    strategy::SignalAction,
};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use riptide_execution::{client::ExchangeConnector, order::{Order, id::StrategyId}};
use riptide_instrument::exchange::ExchangeId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

const ORDER_QUERY_TIMEOUT: Duration = Duration::from_secs(10);
const OPEN_ORDERS_WARNING_THRESHOLD: usize = 10;

/// Immutable snapshot of everything a strategy needs to resume its
/// decisions. Never mutated in place - a new snapshot replaces the old.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StrategyState {
    pub strategy_id: StrategyId,
    /// Strategy-private key/value state, opaque to the engine.
    #[serde(default)]
    pub internal_state: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub indicator_data: HashMap<String, serde_json::Value>,
    pub last_signal: Option<SignalAction>,
    pub signal_time: Option<DateTime<Utc>>,
    /// Signed position (positive long).
    pub current_position: Decimal,
    pub average_price: Option<Decimal>,
    pub last_update_time: DateTime<Utc>,
}

/// Severity of a [`RecoveryIssue`].
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize,
    derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum IssueLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct RecoveryIssue {
    pub level: IssueLevel,
    pub message: String,
}

impl RecoveryIssue {
    fn info(message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Info,
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Error,
            message: message.into(),
        }
    }
}

/// Outcome of startup reconciliation for one strategy.
#[derive(Debug, Clone)]
pub struct StrategyRecoveryResult {
    pub strategy_id: StrategyId,
    pub state: Option<StrategyState>,
    /// Open and partially-filled orders rebuilt from local persistence and
    /// reconciled with the exchange.
    pub open_orders: Vec<Order>,
    /// Net signed position recomputed from the reconciled order trail.
    pub total_position: Decimal,
    /// Running weighted-average entry price of the recomputed position.
    pub average_price: Option<Decimal>,
    pub issues: Vec<RecoveryIssue>,
    pub recovery_time: Duration,
}

impl StrategyRecoveryResult {
    /// Whether recovery produced an `Error`-level issue; callers pause the
    /// strategy in that case.
    pub fn has_errors(&self) -> bool {
        self.issues
            .iter()
            .any(|issue| issue.level == IssueLevel::Error)
    }
}

/// State manager configuration.
#[derive(Debug, Clone, Copy)]
pub struct StateManagerConfig {
    pub autosave_interval: Duration,
    pub cache_timeout: Duration,
    pub max_recovery_time: Duration,
}

impl Default for StateManagerConfig {
    fn default() -> Self {
        Self {
            autosave_interval: Duration::from_secs(30),
            cache_timeout: Duration::from_secs(5 * 60),
            max_recovery_time: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct CachedState {
    state: StrategyState,
    cached_at: Instant,
}

/// Persists and restores [`StrategyState`], rebuilds open-order context, and
/// reconciles local persistence with exchange reality after a restart.
///
/// Reads hit a write-through cache (TTL [`StateManagerConfig::cache_timeout`])
/// in front of the durable [`StateStore`].
#[derive(Debug)]
pub struct StrategyStateManager {
    store: Arc<dyn StateStore>,
    order_store: Arc<dyn OrderStore>,
    config: StateManagerConfig,
    cache: parking_lot::Mutex<FnvHashMap<StrategyId, CachedState>>,
    recovering: Arc<parking_lot::Mutex<HashSet<StrategyId>>>,
}

impl StrategyStateManager {
    pub fn new(
        store: Arc<dyn StateStore>,
        order_store: Arc<dyn OrderStore>,
        config: StateManagerConfig,
    ) -> Self {
        Self {
            store,
            order_store,
            config,
            cache: parking_lot::Mutex::new(FnvHashMap::default()),
            recovering: Arc::new(parking_lot::Mutex::new(HashSet::new())),
        }
    }

    pub fn config(&self) -> &StateManagerConfig {
        &self.config
    }

    /// Write-through save: cache and durable store.
    pub fn save_state(&self, state: StrategyState) -> Result<(), StateError> {
        self.store.put(&state)?;
        self.cache.lock().insert(
            state.strategy_id.clone(),
            CachedState {
                state,
                cached_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Load the latest snapshot, from cache when fresh.
    pub fn load_state(&self, id: &StrategyId) -> Result<Option<StrategyState>, StateError> {
        {
            let cache = self.cache.lock();
            if let Some(cached) = cache.get(id) {
                if cached.cached_at.elapsed() < self.config.cache_timeout {
                    return Ok(Some(cached.state.clone()));
                }
            }
        }

        let state = self.store.get(id)?;
        if let Some(state) = &state {
            self.cache.lock().insert(
                id.clone(),
                CachedState {
                    state: state.clone(),
                    cached_at: Instant::now(),
                },
            );
        }
        Ok(state)
    }

    /// Remove a deleted strategy's snapshot.
    pub fn delete_state(&self, id: &StrategyId) -> Result<(), StateError> {
        self.cache.lock().remove(id);
        self.store.delete(id)?;
        Ok(())
    }

    /// Reconcile a strategy's persisted world with exchange reality.
    ///
    /// Per-order exchange failures degrade to `warning` issues and never
    /// abort recovery; only a concurrent recovery for the same id is
    /// rejected outright.
    pub async fn recover(
        &self,
        id: &StrategyId,
        connectors: &FnvHashMap<ExchangeId, Arc<dyn ExchangeConnector>>,
        orders: &OrderManager,
        long_only: bool,
    ) -> Result<StrategyRecoveryResult, StateError> {
        let _guard = RecoveryGuard::acquire(Arc::clone(&self.recovering), id)?;
        let started = Instant::now();
        let mut issues = Vec::new();

        // 1. Last snapshot
        let state = self.load_state(id)?;
        match &state {
            Some(state) => issues.push(RecoveryIssue::info(format!(
                "recovered snapshot from {}",
                state.last_update_time
            ))),
            None => issues.push(RecoveryIssue::info("no prior snapshot found")),
        }

        // 2. Local orders, non-terminal ones overwritten with exchange truth
        let local_orders = self.order_store.list(&OrderFilter::by_strategy(id.clone()))?;
        let mut reconciled = Vec::with_capacity(local_orders.len());

        for mut order in local_orders {
            if !order.status.is_terminal() {
                match connectors.get(&order.exchange) {
                    Some(connector) => {
                        let query = connector.get_order(
                            &order.symbol,
                            Some(&order.id),
                            order.client_order_id.as_ref(),
                        );
                        match tokio::time::timeout(ORDER_QUERY_TIMEOUT, query).await {
                            Ok(Ok(mut exchange_order)) => {
                                exchange_order.strategy = order.strategy.clone();
                                debug!(
                                    strategy = %id,
                                    order_id = %order.id,
                                    local = %order.status,
                                    exchange = %exchange_order.status,
                                    "order reconciled with exchange truth"
                                );
                                order = exchange_order;
                            }
                            Ok(Err(error)) => issues.push(RecoveryIssue::warning(format!(
                                "order {} could not be reconciled: {error}",
                                order.id
                            ))),
                            Err(_) => issues.push(RecoveryIssue::warning(format!(
                                "order {} reconciliation timed out",
                                order.id
                            ))),
                        }
                    }
                    None => issues.push(RecoveryIssue::warning(format!(
                        "order {} on {} has no registered connector",
                        order.id, order.exchange
                    ))),
                }
            }

            self.order_store.put(&order)?;
            orders.restore_order(order.clone());
            reconciled.push(order);
        }

        // 3. Recompute the position from the reconciled trail
        let (total_position, average_price) = position_from_orders(&reconciled);

        // 4. Consistency checks
        if long_only && total_position < Decimal::ZERO {
            issues.push(RecoveryIssue::warning(format!(
                "long-only strategy recovered a short position of {total_position}"
            )));
        }

        let open_orders: Vec<Order> = reconciled
            .iter()
            .filter(|order| order.status.is_open())
            .cloned()
            .collect();
        if open_orders.len() > OPEN_ORDERS_WARNING_THRESHOLD {
            issues.push(RecoveryIssue::warning(format!(
                "{} open orders recovered",
                open_orders.len()
            )));
        }

        let recovery_time = started.elapsed();
        if recovery_time > self.config.max_recovery_time {
            issues.push(RecoveryIssue::error(format!(
                "recovery took {recovery_time:?}, exceeding the {:?} limit",
                self.config.max_recovery_time
            )));
        }

        info!(
            strategy = %id,
            open_orders = open_orders.len(),
            %total_position,
            elapsed_ms = recovery_time.as_millis() as u64,
            "strategy recovery complete"
        );

        Ok(StrategyRecoveryResult {
            strategy_id: id.clone(),
            state,
            open_orders,
            total_position,
            average_price,
            issues,
            recovery_time,
        })
    }
}

/// Rejects concurrent recoveries for the same strategy id.
struct RecoveryGuard {
    recovering: Arc<parking_lot::Mutex<HashSet<StrategyId>>>,
    id: StrategyId,
}

impl RecoveryGuard {
    fn acquire(
        recovering: Arc<parking_lot::Mutex<HashSet<StrategyId>>>,
        id: &StrategyId,
    ) -> Result<Self, StateError> {
        if !recovering.lock().insert(id.clone()) {
            warn!(strategy = %id, "recovery already in progress");
            return Err(StateError::RecoveryInProgress(id.to_string()));
        }
        Ok(Self {
            recovering,
            id: id.clone(),
        })
    }
}

impl Drop for RecoveryGuard {
    fn drop(&mut self) {
        self.recovering.lock().remove(&self.id);
    }
}

/// Net signed position and running weighted-average entry price from an
/// order trail, using signed executed quantities (BUY positive, SELL
/// negative).
pub fn position_from_orders(orders: &[Order]) -> (Decimal, Option<Decimal>) {
    let mut trail: Vec<&Order> = orders
        .iter()
        .filter(|order| !order.executed_quantity.is_zero())
        .collect();
    trail.sort_by_key(|order| order.update_time);

    let mut position = Decimal::ZERO;
    let mut average: Option<Decimal> = None;

    for order in trail {
        let quantity = order.signed_executed_quantity();
        let price = order
            .average_price
            .or(order.price)
            .unwrap_or(Decimal::ZERO);

        let same_direction = position.is_zero()
            || (position.is_sign_positive() == quantity.is_sign_positive());

        if same_direction {
            let combined = position.abs() + quantity.abs();
            let weighted = average.unwrap_or(Decimal::ZERO) * position.abs() + price * quantity.abs();
            average = riptide_integration::decimal::checked_div(weighted, combined);
            position += quantity;
        } else if quantity.abs() <= position.abs() {
            // Reducing: entry price unchanged, may go flat
            position += quantity;
            if position.is_zero() {
                average = None;
            }
        } else {
            // Flipping: remainder opens a new position at the fill price
            position += quantity;
            average = Some(price);
        }
    }

    (position, average)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bus::EventBus,
        store::in_memory::{InMemoryOrderStore, InMemoryStateStore},
    };
    use chrono::TimeDelta;
    use riptide_execution::{
        client::mock::MockConnector,
        order::{OrderKind, OrderStatus, TimeInForce, id::{ClientOrderId, OrderId}},
    };
    use riptide_instrument::Side;
    use rust_decimal_macros::dec;

    fn order(
        id: &str,
        side: Side,
        quantity: Decimal,
        executed: Decimal,
        price: Decimal,
        status: OrderStatus,
        secs: i64,
    ) -> Order {
        Order {
            id: OrderId::new(id),
            client_order_id: Some(ClientOrderId::random()),
            symbol: "BTC/USDT".parse().unwrap(),
            exchange: ExchangeId::Mock,
            strategy: Some(StrategyId::new("strategy_1")),
            side,
            kind: OrderKind::Limit,
            time_in_force: TimeInForce::Gtc,
            quantity,
            price: Some(price),
            stop_price: None,
            status,
            executed_quantity: executed,
            cumulative_quote_quantity: executed * price,
            average_price: (!executed.is_zero()).then_some(price),
            timestamp: DateTime::<Utc>::MIN_UTC + TimeDelta::seconds(secs),
            update_time: DateTime::<Utc>::MIN_UTC + TimeDelta::seconds(secs),
            fills: vec![],
        }
    }

    #[test]
    fn test_position_from_orders() {
        struct TestCase {
            name: &'static str,
            orders: Vec<Order>,
            expected_position: Decimal,
            expected_average: Option<Decimal>,
        }

        let cases = vec![
            TestCase {
                name: "no executions",
                orders: vec![order(
                    "1",
                    Side::Buy,
                    dec!(1),
                    dec!(0),
                    dec!(100),
                    OrderStatus::New,
                    0,
                )],
                expected_position: dec!(0),
                expected_average: None,
            },
            TestCase {
                name: "single buy",
                orders: vec![order(
                    "1",
                    Side::Buy,
                    dec!(0.01),
                    dec!(0.01),
                    dec!(50198),
                    OrderStatus::Filled,
                    0,
                )],
                expected_position: dec!(0.01),
                expected_average: Some(dec!(50198)),
            },
            TestCase {
                name: "two buys average their entries",
                orders: vec![
                    order("1", Side::Buy, dec!(1), dec!(1), dec!(100), OrderStatus::Filled, 0),
                    order("2", Side::Buy, dec!(1), dec!(1), dec!(200), OrderStatus::Filled, 1),
                ],
                expected_position: dec!(2),
                expected_average: Some(dec!(150)),
            },
            TestCase {
                name: "partial sell keeps entry price",
                orders: vec![
                    order("1", Side::Buy, dec!(2), dec!(2), dec!(100), OrderStatus::Filled, 0),
                    order("2", Side::Sell, dec!(1), dec!(1), dec!(150), OrderStatus::Filled, 1),
                ],
                expected_position: dec!(1),
                expected_average: Some(dec!(100)),
            },
            TestCase {
                name: "full close goes flat",
                orders: vec![
                    order("1", Side::Buy, dec!(1), dec!(1), dec!(100), OrderStatus::Filled, 0),
                    order("2", Side::Sell, dec!(1), dec!(1), dec!(150), OrderStatus::Filled, 1),
                ],
                expected_position: dec!(0),
                expected_average: None,
            },
            TestCase {
                name: "flip long to short takes the fill price",
                orders: vec![
                    order("1", Side::Buy, dec!(1), dec!(1), dec!(100), OrderStatus::Filled, 0),
                    order("2", Side::Sell, dec!(3), dec!(3), dec!(150), OrderStatus::Filled, 1),
                ],
                expected_position: dec!(-2),
                expected_average: Some(dec!(150)),
            },
        ];

        for (index, test) in cases.into_iter().enumerate() {
            let (position, average) = position_from_orders(&test.orders);
            assert_eq!(position, test.expected_position, "TC{index} ({}) position", test.name);
            assert_eq!(average, test.expected_average, "TC{index} ({}) average", test.name);
        }
    }

    fn manager() -> (StrategyStateManager, Arc<InMemoryOrderStore>) {
        let order_store = Arc::new(InMemoryOrderStore::new());
        (
            StrategyStateManager::new(
                Arc::new(InMemoryStateStore::new()),
                Arc::clone(&order_store) as Arc<dyn OrderStore>,
                StateManagerConfig::default(),
            ),
            order_store,
        )
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let (manager, _) = manager();
        let state = StrategyState {
            strategy_id: StrategyId::new("strategy_1"),
            current_position: dec!(0.01),
            average_price: Some(dec!(50198)),
            last_signal: Some(SignalAction::Buy),
            signal_time: Some(Utc::now()),
            last_update_time: Utc::now(),
            ..StrategyState::default()
        };

        manager.save_state(state.clone()).unwrap();
        let loaded = manager.load_state(&StrategyId::new("strategy_1")).unwrap().unwrap();
        assert_eq!(loaded.current_position, state.current_position);
        assert_eq!(loaded.average_price, state.average_price);
        assert_eq!(loaded.last_signal, state.last_signal);
    }

    #[tokio::test]
    async fn test_recovery_reconciles_open_order_with_exchange() {
        let (manager, order_store) = manager();
        let bus = Arc::new(EventBus::default());
        let orders = Arc::new(OrderManager::new(
            Arc::clone(&bus),
            Arc::clone(&order_store) as Arc<dyn OrderStore>,
        ));
        let mock = MockConnector::default();

        // Locally persisted as PARTIALLY_FILLED, exchange says FILLED
        let local = order(
            "1",
            Side::Buy,
            dec!(0.01),
            dec!(0.005),
            dec!(50195),
            OrderStatus::PartiallyFilled,
            0,
        );
        order_store.put(&local).unwrap();

        let mut exchange_truth = local.clone();
        exchange_truth.status = OrderStatus::Filled;
        exchange_truth.executed_quantity = dec!(0.01);
        exchange_truth.cumulative_quote_quantity = dec!(501.98);
        exchange_truth.average_price = Some(dec!(50198));
        exchange_truth.update_time = local.update_time + TimeDelta::seconds(1);
        mock.seed_order(exchange_truth);

        let mut connectors: FnvHashMap<ExchangeId, Arc<dyn ExchangeConnector>> =
            FnvHashMap::default();
        connectors.insert(ExchangeId::Mock, Arc::new(mock));

        let id = StrategyId::new("strategy_1");
        let result = manager
            .recover(&id, &connectors, &orders, true)
            .await
            .unwrap();

        assert_eq!(result.total_position, dec!(0.01));
        assert_eq!(result.average_price, Some(dec!(50198)));
        assert!(result.open_orders.is_empty());
        assert!(!result.has_errors());
        assert_eq!(
            result
                .issues
                .iter()
                .filter(|issue| issue.level == IssueLevel::Info)
                .count(),
            1
        );
        assert!(result.recovery_time < Duration::from_secs(60));

        // The order manager now tracks the reconciled order without
        // re-emitting its current status
        assert_eq!(
            orders.get_order(&OrderId::new("1")).unwrap().status,
            OrderStatus::Filled
        );
    }

    #[tokio::test]
    async fn test_recovery_query_failure_degrades_to_warning() {
        let (manager, order_store) = manager();
        let bus = Arc::new(EventBus::default());
        let orders = Arc::new(OrderManager::new(
            Arc::clone(&bus),
            Arc::clone(&order_store) as Arc<dyn OrderStore>,
        ));
        let mock = MockConnector::default();

        // Local open order unknown to the exchange
        let local = order(
            "ghost",
            Side::Buy,
            dec!(0.01),
            dec!(0),
            dec!(50200),
            OrderStatus::New,
            0,
        );
        order_store.put(&local).unwrap();

        let mut connectors: FnvHashMap<ExchangeId, Arc<dyn ExchangeConnector>> =
            FnvHashMap::default();
        connectors.insert(ExchangeId::Mock, Arc::new(mock));

        let result = manager
            .recover(&StrategyId::new("strategy_1"), &connectors, &orders, false)
            .await
            .unwrap();

        assert!(result
            .issues
            .iter()
            .any(|issue| issue.level == IssueLevel::Warning));
        // The local copy survives untouched
        assert_eq!(result.open_orders.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_recovery_rejected() {
        let (manager, _) = manager();
        let id = StrategyId::new("strategy_1");

        let _guard = RecoveryGuard::acquire(Arc::clone(&manager.recovering), &id).unwrap();

        let connectors = FnvHashMap::default();
        let bus = Arc::new(EventBus::default());
        let orders = OrderManager::new(Arc::clone(&bus), Arc::new(InMemoryOrderStore::new()));

        let result = manager.recover(&id, &connectors, &orders, false).await;
        assert!(matches!(result, Err(StateError::RecoveryInProgress(_))));
    }
}
