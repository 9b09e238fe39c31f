use parking_lot::Mutex;
use riptide::{
    error::StrategyError,
    strategy::{
        DataRequirement, InitialData, MarketData, RecoveryContext, SignalAction, Strategy,
        StrategyParameters, StrategyResult, StrategyStateData, SubscriptionRequirements,
    },
};
use riptide_data::{event::MarketEvent, subscription::ticker::Ticker};
use riptide_execution::order::id::StrategyId;
use riptide_instrument::{exchange::ExchangeId, symbol::Symbol};
use rust_decimal::Decimal;
use serde_json::json;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

/// Strategy that buys a fixed quantity on the nth ticker update it sees.
///
/// Deterministic stand-in for a real analyzer in the end-to-end scenarios.
pub struct ScriptedStrategy {
    id: StrategyId,
    exchange: ExchangeId,
    symbol: Symbol,
    trigger_at: usize,
    quantity: Decimal,
    price: Option<Decimal>,
    ticks: usize,
    fired: bool,
    pub recovered: Arc<Mutex<Option<RecoveryContext>>>,
}

impl ScriptedStrategy {
    pub fn new(
        id: &str,
        symbol: &str,
        trigger_at: usize,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> Self {
        Self {
            id: StrategyId::new(id),
            exchange: ExchangeId::Mock,
            symbol: symbol.parse().unwrap(),
            trigger_at,
            quantity,
            price,
            ticks: 0,
            fired: false,
            recovered: Arc::new(Mutex::new(None)),
        }
    }

    pub fn recovery_probe(&self) -> Arc<Mutex<Option<RecoveryContext>>> {
        Arc::clone(&self.recovered)
    }
}

impl Strategy for ScriptedStrategy {
    fn id(&self) -> StrategyId {
        self.id.clone()
    }

    fn subscription_requirements(&self) -> SubscriptionRequirements {
        SubscriptionRequirements {
            exchange: self.exchange,
            symbol: self.symbol.clone(),
            data: vec![DataRequirement::Ticker],
        }
    }

    fn initialize(
        &mut self,
        _: &StrategyParameters,
        _: &InitialData,
    ) -> Result<(), StrategyError> {
        Ok(())
    }

    fn analyze(&mut self, market_data: &MarketData) -> Result<StrategyResult, StrategyError> {
        // Order lifecycle dispatches carry context; only tickers count
        if market_data.order_event.is_some() || market_data.ticker.is_none() {
            return Ok(StrategyResult::hold());
        }

        self.ticks += 1;
        if self.ticks >= self.trigger_at && !self.fired {
            self.fired = true;
            return Ok(StrategyResult {
                action: SignalAction::Buy,
                quantity: Some(self.quantity),
                price: self.price,
                reason: Some(format!("tick {} reached", self.ticks)),
                ..StrategyResult::default()
            });
        }

        Ok(StrategyResult::hold())
    }

    fn save_state(&self) -> StrategyStateData {
        let mut data = StrategyStateData::default();
        data.internal.insert("ticks".to_string(), json!(self.ticks));
        data.internal.insert("fired".to_string(), json!(self.fired));
        data
    }

    fn restore_state(&mut self, snapshot: &StrategyStateData) {
        if let Some(ticks) = snapshot.internal.get("ticks").and_then(|v| v.as_u64()) {
            self.ticks = ticks as usize;
        }
        if let Some(fired) = snapshot.internal.get("fired").and_then(|v| v.as_bool()) {
            self.fired = fired;
        }
    }

    fn set_recovery_context(&mut self, context: &RecoveryContext) {
        *self.recovered.lock() = Some(context.clone());
    }

    fn cleanup(&mut self) {}
}

/// Build a ticker market event for the mock exchange.
pub fn ticker_event(symbol: &str, price: Decimal, sequence: u64) -> MarketEvent {
    MarketEvent {
        time_exchange: chrono::Utc::now(),
        time_received: chrono::Utc::now(),
        exchange: ExchangeId::Mock,
        symbol: symbol.parse().unwrap(),
        sequence: Some(sequence),
        kind: Ticker::from_last_price(price).into(),
    }
}

/// Poll `condition` every 10ms until it holds, panicking after `timeout`.
pub async fn wait_until(timeout: Duration, what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + timeout;
    while !condition() {
        assert!(
            Instant::now() < deadline,
            "timed out after {timeout:?} waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
