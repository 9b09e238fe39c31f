use crate::{
    AccountSnapshot,
    balance::AssetBalance,
    client::{AccountUpdate, ExchangeConnector},
    error::{ExchangeError, OrderError},
    order::{
        Order, OrderUpdate,
        id::{ClientOrderId, OrderId},
        request::OrderIntent,
    },
    position::Position,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use riptide_data::{
    DataError,
    event::MarketEvent,
    subscription::{KlineInterval, MarketDataConnector, SubscriptionKey, kline::Kline},
};
use riptide_instrument::{exchange::ExchangeId, symbol::Symbol};
use riptide_integration::{
    channel::{Tx, UnboundedRx, UnboundedTx, mpsc_unbounded},
    snapshot::Snapshot,
};
use smol_str::format_smolstr;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

#[derive(Debug, Default)]
struct MockState {
    orders: FnvHashMap<OrderId, Order>,
    cid_index: FnvHashMap<ClientOrderId, OrderId>,
    balances: Vec<AssetBalance>,
    positions: Vec<Position>,
    klines: Vec<Kline>,
    next_order_id: u64,
    reject_next_place: Option<String>,
    market_streams: Vec<(SubscriptionKey, UnboundedTx<MarketEvent>)>,
    account_streams: Vec<UnboundedTx<AccountUpdate>>,
    market_streams_opened: usize,
}

/// Scriptable in-process exchange.
///
/// Behaves like a venue with immediate acknowledgement: placed orders are
/// stored as exchange truth, and test drivers advance them with
/// [`exchange_update`](Self::exchange_update), which also pushes the order
/// snapshot over any open account streams unless pushes are suppressed
/// (to exercise the reconciliation fallback).
#[derive(Debug, Clone)]
pub struct MockConnector {
    exchange: ExchangeId,
    connected: Arc<AtomicBool>,
    suppress_account_push: Arc<AtomicBool>,
    state: Arc<parking_lot::Mutex<MockState>>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new(ExchangeId::Mock)
    }
}

impl MockConnector {
    pub fn new(exchange: ExchangeId) -> Self {
        Self {
            exchange,
            connected: Arc::new(AtomicBool::new(true)),
            suppress_account_push: Arc::new(AtomicBool::new(false)),
            state: Arc::new(parking_lot::Mutex::new(MockState::default())),
        }
    }

    /// Suppress (or re-enable) account stream pushes, simulating lost
    /// websocket updates.
    pub fn set_suppress_account_push(&self, suppress: bool) {
        self.suppress_account_push.store(suppress, Ordering::SeqCst);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Queue a rejection for the next [`place_order`](ExchangeConnector::place_order).
    pub fn reject_next_place(&self, reason: impl Into<String>) {
        self.state.lock().reject_next_place = Some(reason.into());
    }

    pub fn set_balances(&self, balances: Vec<AssetBalance>) {
        self.state.lock().balances = balances;
    }

    pub fn set_positions(&self, positions: Vec<Position>) {
        self.state.lock().positions = positions;
    }

    pub fn seed_klines(&self, klines: Vec<Kline>) {
        self.state.lock().klines = klines;
    }

    /// Insert an order directly as exchange truth, bypassing `place_order`.
    /// Used to model state that survived a crash.
    pub fn seed_order(&self, order: Order) {
        let mut state = self.state.lock();
        if let Some(cid) = &order.client_order_id {
            state.cid_index.insert(cid.clone(), order.id.clone());
        }
        state.orders.insert(order.id.clone(), order);
    }

    /// Advance an order on the exchange side and push the resulting snapshot
    /// over open account streams (unless suppressed).
    pub fn exchange_update(&self, id: &OrderId, update: OrderUpdate) -> Result<(), OrderError> {
        let snapshot = {
            let mut state = self.state.lock();
            let order = state
                .orders
                .get_mut(id)
                .unwrap_or_else(|| panic!("MockConnector has no order {id}"));
            order.apply(update)?;
            order.clone()
        };

        if !self.suppress_account_push.load(Ordering::SeqCst) {
            self.push_account_update(AccountUpdate::Order(Snapshot(snapshot)));
        }
        Ok(())
    }

    /// Push an arbitrary account update over open account streams.
    pub fn push_account_update(&self, update: AccountUpdate) {
        let mut state = self.state.lock();
        state
            .account_streams
            .retain(|tx| tx.send(update.clone()).is_ok());
    }

    /// Push a market event to every open market stream matching its symbol
    /// and data kind.
    pub fn push_market_event(&self, event: MarketEvent) {
        let mut state = self.state.lock();
        let kind = event.kind.kind_name();
        state.market_streams.retain(|(key, tx)| {
            if key.symbol != event.symbol || key.data_type.kind_name() != kind {
                return true;
            }
            tx.send(event.clone()).is_ok()
        });
    }

    /// Exchange truth for one order, if any.
    pub fn order(&self, id: &OrderId) -> Option<Order> {
        self.state.lock().orders.get(id).cloned()
    }

    pub fn market_streams_opened(&self) -> usize {
        self.state.lock().market_streams_opened
    }

    /// Compose the current [`AccountSnapshot`].
    pub fn account_snapshot(&self) -> AccountSnapshot {
        let state = self.state.lock();
        AccountSnapshot::new(
            self.exchange,
            state.balances.clone(),
            state.positions.clone(),
            Utc::now(),
        )
    }

    fn require_connected(&self) -> Result<(), ExchangeError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ExchangeError::network(self.exchange, "connector disconnected"))
        }
    }
}

#[async_trait]
impl MarketDataConnector for MockConnector {
    fn exchange(&self) -> ExchangeId {
        self.exchange
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn supports_websocket(&self, _: &SubscriptionKey) -> bool {
        true
    }

    async fn stream_market_data(
        &self,
        key: &SubscriptionKey,
    ) -> Result<UnboundedRx<MarketEvent>, DataError> {
        let (tx, rx) = mpsc_unbounded();
        let mut state = self.state.lock();
        state.market_streams.push((key.clone(), tx));
        state.market_streams_opened += 1;
        Ok(rx)
    }

    async fn fetch_market_data(&self, _: &SubscriptionKey) -> Result<Vec<MarketEvent>, DataError> {
        Ok(vec![])
    }
}

#[async_trait]
impl ExchangeConnector for MockConnector {
    async fn connect(&self) -> Result<(), ExchangeError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ExchangeError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn account_stream(&self) -> Result<UnboundedRx<AccountUpdate>, ExchangeError> {
        self.require_connected()?;
        let (tx, rx) = mpsc_unbounded();
        self.state.lock().account_streams.push(tx);
        Ok(rx)
    }

    async fn get_order(
        &self,
        _: &Symbol,
        id: Option<&OrderId>,
        client_order_id: Option<&ClientOrderId>,
    ) -> Result<Order, ExchangeError> {
        self.require_connected()?;
        let state = self.state.lock();

        let resolved = match (id, client_order_id) {
            (Some(id), _) => state.orders.get(id),
            (None, Some(cid)) => state
                .cid_index
                .get(cid)
                .and_then(|id| state.orders.get(id)),
            (None, None) => None,
        };

        resolved.cloned().ok_or_else(|| {
            ExchangeError::unknown(self.exchange, "order not found")
        })
    }

    async fn place_order(&self, intent: &OrderIntent) -> Result<Order, ExchangeError> {
        self.require_connected()?;
        intent
            .validate()
            .map_err(|message| ExchangeError::unknown(self.exchange, message))?;

        let mut state = self.state.lock();

        if let Some(reason) = state.reject_next_place.take() {
            return Err(ExchangeError::unknown(self.exchange, reason));
        }

        state.next_order_id += 1;
        let id = OrderId(format_smolstr!("mock-{}", state.next_order_id));
        let order = intent.clone().into_order(id.clone(), Utc::now());

        state.cid_index.insert(intent.client_order_id.clone(), id.clone());
        state.orders.insert(id, order.clone());

        Ok(order)
    }

    async fn cancel_order(&self, _: &Symbol, id: &OrderId) -> Result<Order, ExchangeError> {
        self.require_connected()?;
        let mut state = self.state.lock();

        let order = state
            .orders
            .get_mut(id)
            .ok_or_else(|| ExchangeError::unknown(self.exchange, "order not found"))?;

        if order.status.is_terminal() {
            return Err(ExchangeError::unknown(self.exchange, "order already terminal"));
        }

        let update = OrderUpdate {
            status: crate::order::OrderStatus::Canceled,
            executed_quantity: order.executed_quantity,
            cumulative_quote_quantity: order.cumulative_quote_quantity,
            average_price: order.average_price,
            update_time: Utc::now().max(order.update_time),
            fill: None,
        };
        order
            .apply(update)
            .map_err(|error| ExchangeError::unknown(self.exchange, error.to_string()))?;

        Ok(order.clone())
    }

    async fn get_balances(&self) -> Result<Vec<AssetBalance>, ExchangeError> {
        self.require_connected()?;
        Ok(self.state.lock().balances.clone())
    }

    async fn get_positions(&self) -> Result<Vec<Position>, ExchangeError> {
        self.require_connected()?;
        Ok(self.state.lock().positions.clone())
    }

    async fn get_klines(
        &self,
        _: &Symbol,
        interval: KlineInterval,
        _: Option<DateTime<Utc>>,
        _: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Kline>, ExchangeError> {
        self.require_connected()?;
        let state = self.state.lock();
        let matching: Vec<Kline> = state
            .klines
            .iter()
            .filter(|kline| kline.interval == interval)
            .cloned()
            .collect();

        let skip = limit
            .map(|limit| matching.len().saturating_sub(limit))
            .unwrap_or(0);
        Ok(matching.into_iter().skip(skip).collect())
    }
}
