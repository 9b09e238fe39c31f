use crate::{error::StrategyError, state::StrategyState};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use riptide_data::{
    books::OrderBook,
    subscription::{
        DataType, KlineInterval, SubscriptionKey, SubscriptionRequest, kline::Kline,
        ticker::Ticker, trade::PublicTrade,
    },
};
use riptide_execution::order::{Order, id::StrategyId};
use riptide_instrument::{exchange::ExchangeId, symbol::Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Strategy dispatch loops and lifecycle management.
pub mod runtime;

/// Reference SMA-crossover strategy.
pub mod sma;

/// Trading signal produced by a strategy.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Default, Deserialize, Serialize, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum SignalAction {
    #[display("buy")]
    Buy,
    #[display("sell")]
    Sell,
    #[default]
    #[display("hold")]
    Hold,
}

/// Output of one `analyze` call.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StrategyResult {
    pub action: SignalAction,
    pub quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub confidence: Option<Decimal>,
    pub reason: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl StrategyResult {
    pub fn hold() -> Self {
        Self::default()
    }

    pub fn is_hold(&self) -> bool {
        self.action == SignalAction::Hold
    }
}

/// Typed view over a strategy's configured parameters.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StrategyParameters(pub HashMap<String, serde_json::Value>);

impl StrategyParameters {
    pub fn decimal(&self, key: &str) -> Option<Decimal> {
        let value = self.0.get(key)?;
        match value {
            serde_json::Value::String(text) => text.parse().ok(),
            serde_json::Value::Number(number) => number.to_string().parse().ok(),
            _ => None,
        }
    }

    pub fn integer(&self, key: &str) -> Option<i64> {
        self.0.get(key)?.as_i64()
    }

    pub fn boolean(&self, key: &str) -> Option<bool> {
        self.0.get(key)?.as_bool()
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.0.get(key)?.as_str()
    }

    /// Fetch a required integer parameter, validating positivity.
    pub fn require_positive_integer(&self, key: &str) -> Result<usize, StrategyError> {
        let value = self
            .integer(key)
            .ok_or_else(|| StrategyError::MissingParameter(key.to_string()))?;
        usize::try_from(value)
            .ok()
            .filter(|value| *value > 0)
            .ok_or_else(|| StrategyError::InvalidParameter {
                parameter: key.to_string(),
                message: format!("{value} must be a positive integer"),
            })
    }

    pub fn require_decimal(&self, key: &str) -> Result<Decimal, StrategyError> {
        self.decimal(key)
            .ok_or_else(|| StrategyError::MissingParameter(key.to_string()))
    }
}

/// Market data slices a strategy declares at registration.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct SubscriptionRequirements {
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    pub data: Vec<DataRequirement>,
}

/// One declared data slice, with the history the runtime should retain.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum DataRequirement {
    Ticker,
    OrderBook { depth: usize },
    Trades { limit: usize },
    Klines { interval: KlineInterval, limit: usize },
}

impl SubscriptionRequirements {
    /// Translate into subscription manager requests.
    pub fn requests(&self) -> Vec<SubscriptionRequest> {
        self.data
            .iter()
            .map(|requirement| {
                let data_type = match requirement {
                    DataRequirement::Ticker => DataType::Ticker,
                    DataRequirement::OrderBook { depth } => DataType::OrderBook { depth: *depth },
                    DataRequirement::Trades { .. } => DataType::Trades,
                    DataRequirement::Klines { interval, .. } => DataType::Klines {
                        interval: *interval,
                    },
                };
                SubscriptionRequest::new(
                    SubscriptionKey::new(self.exchange, self.symbol.clone(), data_type),
                    Default::default(),
                )
            })
            .collect()
    }
}

/// Historical data loaded before the first `analyze` call.
#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct InitialDataRequirements {
    /// Kline history per interval, eg/ to prime indicators.
    pub klines: Vec<(KlineInterval, usize)>,
}

/// Historical data fetched by the runtime per the strategy's
/// [`InitialDataRequirements`].
#[derive(Debug, Clone, Default)]
pub struct InitialData {
    pub klines: FnvHashMap<KlineInterval, Vec<Kline>>,
}

/// Curated market snapshot handed to `analyze`.
#[derive(Debug, Clone, Default)]
pub struct MarketData {
    pub ticker: Option<Ticker>,
    pub order_book: Option<OrderBook>,
    /// Most recent trades, oldest first.
    pub trades: Vec<PublicTrade>,
    /// Kline history per interval, oldest first; the last bar may still be
    /// forming (`is_closed == false`).
    pub klines: FnvHashMap<KlineInterval, Vec<Kline>>,
    /// Order lifecycle context when the dispatch was triggered by an order
    /// event for this strategy.
    pub order_event: Option<Order>,
    pub time: DateTime<Utc>,
}

impl MarketData {
    /// Closed klines only, for decisions that must not act on a forming bar.
    pub fn closed_klines(&self, interval: KlineInterval) -> Vec<&Kline> {
        self.klines
            .get(&interval)
            .map(|klines| klines.iter().filter(|kline| kline.is_closed).collect())
            .unwrap_or_default()
    }
}

/// Context handed to a strategy exactly once after restart, before its first
/// `analyze`.
#[derive(Debug, Clone, Default)]
pub struct RecoveryContext {
    /// Reconstructed signed position (positive long).
    pub position: Decimal,
    pub average_price: Option<Decimal>,
    /// Open and partially-filled orders rebuilt from persistence and
    /// reconciled with the exchange.
    pub open_orders: Vec<Order>,
}

/// Strategy-private state carried across restarts.
///
/// For any strategy, `restore_state(save_state())` must be an identity when
/// no events occur in between.
#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct StrategyStateData {
    pub internal: HashMap<String, serde_json::Value>,
    pub indicators: HashMap<String, serde_json::Value>,
}

impl From<&StrategyState> for StrategyStateData {
    fn from(state: &StrategyState) -> Self {
        Self {
            internal: state.internal_state.clone(),
            indicators: state.indicator_data.clone(),
        }
    }
}

/// The strategy contract.
///
/// `analyze` must be a pure function of the provided snapshot and internal
/// state - no I/O. All I/O (initial data loads, order placement,
/// persistence) is owned by the runtime.
pub trait Strategy: Send + Sync {
    fn id(&self) -> StrategyId;

    /// Market data slices this strategy consumes.
    fn subscription_requirements(&self) -> SubscriptionRequirements;

    /// Historical data to load before the first `analyze`.
    fn initial_data_requirements(&self) -> InitialDataRequirements {
        InitialDataRequirements::default()
    }

    /// Validate parameters and prime internal state from initial data.
    fn initialize(
        &mut self,
        parameters: &StrategyParameters,
        initial: &InitialData,
    ) -> Result<(), StrategyError>;

    /// Produce a signal from the provided market snapshot.
    fn analyze(&mut self, market_data: &MarketData) -> Result<StrategyResult, StrategyError>;

    /// Capture strategy-private state for persistence.
    fn save_state(&self) -> StrategyStateData;

    /// Restore strategy-private state from a snapshot.
    fn restore_state(&mut self, snapshot: &StrategyStateData);

    /// Invoked exactly once before the first post-restart `analyze`.
    fn set_recovery_context(&mut self, context: &RecoveryContext);

    /// Idempotent resource release.
    fn cleanup(&mut self);
}
