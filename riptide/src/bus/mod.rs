use chrono::{DateTime, Utc};
use riptide_data::event::MarketEvent;
use riptide_execution::{
    balance::AssetBalance,
    order::{Order, OrderStatus, id::StrategyId},
    position::Position,
};
use riptide_instrument::{exchange::ExchangeId, symbol::Symbol};
use riptide_risk::RiskViolation;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::{
    collections::{HashSet, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};
use tracing::debug;

pub mod gate;

pub use gate::StatusGate;

/// Typed domain event fanned out by the [`EventBus`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum EngineEvent {
    /// Ticker, order book, trade or kline update.
    MarketData(MarketEvent),

    OrderCreated { order: Order, time: DateTime<Utc> },
    OrderPartiallyFilled { order: Order, time: DateTime<Utc> },
    OrderFilled { order: Order, time: DateTime<Utc> },
    /// Covers both venue cancellation and expiry; the order's status
    /// distinguishes them.
    OrderCancelled { order: Order, time: DateTime<Utc> },
    OrderRejected { order: Order, time: DateTime<Utc> },

    BalanceUpdate {
        exchange: ExchangeId,
        balances: Vec<AssetBalance>,
        time: DateTime<Utc>,
    },
    PositionUpdate {
        exchange: ExchangeId,
        positions: Vec<Position>,
        time: DateTime<Utc>,
    },

    StrategySignal {
        strategy: StrategyId,
        action: SmolStr,
        quantity: Option<Decimal>,
        price: Option<Decimal>,
        confidence: Option<Decimal>,
        reason: Option<String>,
        time: DateTime<Utc>,
    },
    StrategyError {
        strategy: StrategyId,
        message: String,
        time: DateTime<Utc>,
    },

    RiskLimitExceeded {
        strategy: StrategyId,
        violation: RiskViolation,
        time: DateTime<Utc>,
    },
    EmergencyStop {
        reason: String,
        time: DateTime<Utc>,
    },

    EngineStarted { message: String, time: DateTime<Utc> },
    EngineStopped { message: String, time: DateTime<Utc> },
    EngineError { message: String, time: DateTime<Utc> },

    ExchangeConnected { exchange: ExchangeId, time: DateTime<Utc> },
    ExchangeDisconnected { exchange: ExchangeId, time: DateTime<Utc> },
    ExchangeError {
        exchange: ExchangeId,
        message: String,
        time: DateTime<Utc>,
    },
}

/// Coarse event grouping used by subscriber filters.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    MarketData,
    Order,
    Account,
    Strategy,
    Risk,
    Engine,
    Exchange,
}

impl EngineEvent {
    pub fn category(&self) -> EventCategory {
        match self {
            EngineEvent::MarketData(_) => EventCategory::MarketData,
            EngineEvent::OrderCreated { .. }
            | EngineEvent::OrderPartiallyFilled { .. }
            | EngineEvent::OrderFilled { .. }
            | EngineEvent::OrderCancelled { .. }
            | EngineEvent::OrderRejected { .. } => EventCategory::Order,
            EngineEvent::BalanceUpdate { .. } | EngineEvent::PositionUpdate { .. } => {
                EventCategory::Account
            }
            EngineEvent::StrategySignal { .. } | EngineEvent::StrategyError { .. } => {
                EventCategory::Strategy
            }
            EngineEvent::RiskLimitExceeded { .. } | EngineEvent::EmergencyStop { .. } => {
                EventCategory::Risk
            }
            EngineEvent::EngineStarted { .. }
            | EngineEvent::EngineStopped { .. }
            | EngineEvent::EngineError { .. } => EventCategory::Engine,
            EngineEvent::ExchangeConnected { .. }
            | EngineEvent::ExchangeDisconnected { .. }
            | EngineEvent::ExchangeError { .. } => EventCategory::Exchange,
        }
    }

    /// The order carried by an order lifecycle event.
    pub fn order(&self) -> Option<&Order> {
        match self {
            EngineEvent::OrderCreated { order, .. }
            | EngineEvent::OrderPartiallyFilled { order, .. }
            | EngineEvent::OrderFilled { order, .. }
            | EngineEvent::OrderCancelled { order, .. }
            | EngineEvent::OrderRejected { order, .. } => Some(order),
            _ => None,
        }
    }

    /// Construct the lifecycle event matching the order's current status.
    pub fn from_order_status(order: Order) -> Self {
        let time = Utc::now();
        match order.status {
            OrderStatus::New => EngineEvent::OrderCreated { order, time },
            OrderStatus::PartiallyFilled => EngineEvent::OrderPartiallyFilled { order, time },
            OrderStatus::Filled => EngineEvent::OrderFilled { order, time },
            OrderStatus::Canceled | OrderStatus::Expired => {
                EngineEvent::OrderCancelled { order, time }
            }
            OrderStatus::Rejected => EngineEvent::OrderRejected { order, time },
        }
    }
}

/// Subscriber interest declaration. Unset dimensions match everything.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub categories: Option<HashSet<EventCategory>>,
    /// Applies to market data events only.
    pub symbols: Option<HashSet<Symbol>>,
    /// Applies to order and strategy events only.
    pub strategy: Option<StrategyId>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn categories(categories: impl IntoIterator<Item = EventCategory>) -> Self {
        Self {
            categories: Some(categories.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn with_symbols(mut self, symbols: impl IntoIterator<Item = Symbol>) -> Self {
        self.symbols = Some(symbols.into_iter().collect());
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyId) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn matches(&self, event: &EngineEvent) -> bool {
        if let Some(categories) = &self.categories {
            if !categories.contains(&event.category()) {
                return false;
            }
        }

        if let Some(symbols) = &self.symbols {
            if let EngineEvent::MarketData(market) = event {
                if !symbols.contains(&market.symbol) {
                    return false;
                }
            }
        }

        if let Some(strategy) = &self.strategy {
            match event {
                EngineEvent::OrderCreated { order, .. }
                | EngineEvent::OrderPartiallyFilled { order, .. }
                | EngineEvent::OrderFilled { order, .. }
                | EngineEvent::OrderCancelled { order, .. }
                | EngineEvent::OrderRejected { order, .. } => {
                    if order.strategy.as_ref() != Some(strategy) {
                        return false;
                    }
                }
                EngineEvent::StrategySignal { strategy: owner, .. }
                | EngineEvent::StrategyError { strategy: owner, .. }
                | EngineEvent::RiskLimitExceeded { strategy: owner, .. } => {
                    if owner != strategy {
                        return false;
                    }
                }
                _ => {}
            }
        }

        true
    }
}

/// Behaviour when a subscriber buffer is full.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest buffered event to admit the new one.
    #[default]
    DropOldest,
    /// Drop the incoming event.
    DropNewest,
}

/// Event bus configuration: per-subscriber buffering and overflow policy.
#[derive(Debug, Copy, Clone, Deserialize, Serialize)]
pub struct BusConfig {
    pub buffer_size: usize,
    pub overflow_policy: OverflowPolicy,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            overflow_policy: OverflowPolicy::default(),
        }
    }
}

#[derive(Debug)]
struct SubscriberShared {
    name: SmolStr,
    buffer: parking_lot::Mutex<VecDeque<EngineEvent>>,
    notify: tokio::sync::Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
    capacity: usize,
    policy: OverflowPolicy,
}

#[derive(Debug)]
struct SubscriberHandle {
    filter: EventFilter,
    shared: Arc<SubscriberShared>,
}

/// Process-wide typed publish/subscribe hub.
///
/// Delivery is at-least-once within the process; per-publisher FIFO order is
/// preserved because `publish` enqueues synchronously on the caller's
/// thread. Slow subscribers lose events to their overflow policy (recorded
/// in a dropped counter) rather than back-pressuring publishers.
#[derive(Debug)]
pub struct EventBus {
    config: BusConfig,
    subscribers: parking_lot::RwLock<Vec<SubscriberHandle>>,
    gate: StatusGate,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            subscribers: parking_lot::RwLock::new(Vec::new()),
            gate: StatusGate::new(),
        }
    }

    /// The order-status suppression gate shared by the stream and sync
    /// paths.
    pub fn gate(&self) -> &StatusGate {
        &self.gate
    }

    /// Register a subscriber with the provided filter.
    pub fn subscribe(&self, name: impl AsRef<str>, filter: EventFilter) -> BusRx {
        let shared = Arc::new(SubscriberShared {
            name: SmolStr::new(name.as_ref()),
            buffer: parking_lot::Mutex::new(VecDeque::with_capacity(self.config.buffer_size)),
            notify: tokio::sync::Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            capacity: self.config.buffer_size,
            policy: self.config.overflow_policy,
        });

        self.subscribers.write().push(SubscriberHandle {
            filter,
            shared: Arc::clone(&shared),
        });

        BusRx { shared }
    }

    /// Publish an event to every matching subscriber. Never blocks.
    pub fn publish(&self, event: EngineEvent) {
        let mut any_closed = false;

        {
            let subscribers = self.subscribers.read();
            for subscriber in subscribers.iter() {
                if subscriber.shared.closed.load(Ordering::Acquire) {
                    any_closed = true;
                    continue;
                }
                if !subscriber.filter.matches(&event) {
                    continue;
                }

                let mut buffer = subscriber.shared.buffer.lock();
                if buffer.len() >= subscriber.shared.capacity {
                    match subscriber.shared.policy {
                        OverflowPolicy::DropOldest => {
                            buffer.pop_front();
                            buffer.push_back(event.clone());
                        }
                        OverflowPolicy::DropNewest => {}
                    }
                    subscriber.shared.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        subscriber = %subscriber.shared.name,
                        "event bus subscriber buffer full - dropping"
                    );
                } else {
                    buffer.push_back(event.clone());
                }
                drop(buffer);
                subscriber.shared.notify.notify_one();
            }
        }

        if any_closed {
            self.subscribers
                .write()
                .retain(|subscriber| !subscriber.shared.closed.load(Ordering::Acquire));
        }
    }

    /// Publish the lifecycle event for an order's current status, subject to
    /// duplicate suppression: at most one event is ever emitted per
    /// `(order, status)` across every publishing path.
    pub fn publish_order_status(&self, order: &Order) {
        if !self.gate.should_emit(&order.id, order.status) {
            debug!(
                order_id = %order.id,
                status = %order.status,
                "suppressed duplicate order status event"
            );
            return;
        }
        self.publish(EngineEvent::from_order_status(order.clone()));
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

/// Bridges the subscription manager's feed into the bus: market events and
/// upstream failure reports become [`EngineEvent`]s at publish time.
#[derive(Debug, Clone)]
pub struct BusFeedTx {
    bus: Arc<EventBus>,
}

impl BusFeedTx {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

impl riptide_integration::channel::Tx for BusFeedTx {
    type Item = riptide_data::subscription::FeedEvent;
    type Error = std::convert::Infallible;

    fn send(&self, item: Self::Item) -> Result<(), Self::Error> {
        match item {
            riptide_data::subscription::FeedEvent::Market(event) => {
                self.bus.publish(EngineEvent::MarketData(event));
            }
            riptide_data::subscription::FeedEvent::UpstreamError {
                exchange,
                message,
                consecutive_failures,
            } => {
                self.bus.publish(EngineEvent::ExchangeError {
                    exchange,
                    message: format!("{message} ({consecutive_failures} consecutive failures)"),
                    time: Utc::now(),
                });
            }
        }
        Ok(())
    }
}

/// Buffered receiving side of a bus subscription.
///
/// Single-consumer: wrap in your own synchronisation to share.
#[derive(Debug)]
pub struct BusRx {
    shared: Arc<SubscriberShared>,
}

impl BusRx {
    /// Await the next event. Returns events in publish order (per
    /// publisher).
    pub async fn recv(&mut self) -> EngineEvent {
        loop {
            if let Some(event) = self.shared.buffer.lock().pop_front() {
                return event;
            }
            self.shared.notify.notified().await;
        }
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<EngineEvent> {
        self.shared.buffer.lock().pop_front()
    }

    /// Events lost to the overflow policy since subscription.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for BusRx {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}
