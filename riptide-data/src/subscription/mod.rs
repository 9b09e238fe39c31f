use crate::{DataError, event::MarketEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_more::{Constructor, Display, From};
use riptide_instrument::{exchange::ExchangeId, symbol::Symbol};
use riptide_integration::channel::UnboundedRx;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::time::Duration;

/// Reference-counted subscription manager.
pub mod manager;

/// Ticker payload.
pub mod ticker;

/// Public trade payload.
pub mod trade;

/// Kline (candlestick) payload.
pub mod kline;

/// Identifier of a logical subscriber (one per strategy).
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display, From,
)]
pub struct SubscriberId(pub SmolStr);

impl SubscriberId {
    pub fn new<S: AsRef<str>>(id: S) -> Self {
        Self(SmolStr::new(id))
    }
}

/// Kline bar interval.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum KlineInterval {
    #[display("1m")]
    Minute1,
    #[display("5m")]
    Minute5,
    #[display("15m")]
    Minute15,
    #[display("1h")]
    Hour1,
    #[display("4h")]
    Hour4,
    #[display("1d")]
    Day1,
}

impl KlineInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            KlineInterval::Minute1 => "1m",
            KlineInterval::Minute5 => "5m",
            KlineInterval::Minute15 => "15m",
            KlineInterval::Hour1 => "1h",
            KlineInterval::Hour4 => "4h",
            KlineInterval::Day1 => "1d",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            KlineInterval::Minute1 => Duration::from_secs(60),
            KlineInterval::Minute5 => Duration::from_secs(5 * 60),
            KlineInterval::Minute15 => Duration::from_secs(15 * 60),
            KlineInterval::Hour1 => Duration::from_secs(60 * 60),
            KlineInterval::Hour4 => Duration::from_secs(4 * 60 * 60),
            KlineInterval::Day1 => Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Market data slice requested from an upstream, including its parameters.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum DataType {
    Ticker,
    OrderBook { depth: usize },
    Trades,
    Klines { interval: KlineInterval },
}

impl DataType {
    pub fn kind_name(&self) -> &'static str {
        match self {
            DataType::Ticker => "ticker",
            DataType::OrderBook { .. } => "orderbook",
            DataType::Trades => "trades",
            DataType::Klines { .. } => "klines",
        }
    }
}

/// Identity of one upstream market data subscription.
///
/// Requests from distinct strategies that map to an equal key share a single
/// upstream connection via reference counting.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Constructor)]
pub struct SubscriptionKey {
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    pub data_type: DataType,
}

/// Transport preference for a subscription request.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MethodPreference {
    /// Websocket when the venue supports it, otherwise REST polling.
    #[default]
    Auto,
    Websocket,
    Rest,
}

/// Transport actually in use for an upstream.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionMethod {
    Websocket,
    Rest,
}

/// One requested market data slice.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct SubscriptionRequest {
    pub key: SubscriptionKey,
    #[serde(default)]
    pub method: MethodPreference,
}

/// Event forwarded by the subscription manager: a normalised market event,
/// or an upstream failure report.
#[derive(Debug, Clone, From)]
pub enum FeedEvent {
    Market(MarketEvent),
    UpstreamError {
        exchange: ExchangeId,
        message: String,
        consecutive_failures: u32,
    },
}

/// Venue market data source consumed by the subscription manager.
///
/// Implemented by every exchange connector; the manager only ever sees this
/// narrowed capability set.
#[async_trait]
pub trait MarketDataConnector: Send + Sync {
    fn exchange(&self) -> ExchangeId;

    fn is_connected(&self) -> bool;

    /// Whether [`stream_market_data`](Self::stream_market_data) is available
    /// for the provided key.
    fn supports_websocket(&self, key: &SubscriptionKey) -> bool;

    /// Open a push upstream for the key. The returned channel closes when
    /// the upstream disconnects.
    async fn stream_market_data(
        &self,
        key: &SubscriptionKey,
    ) -> Result<UnboundedRx<MarketEvent>, DataError>;

    /// Execute one REST poll for the key, returning zero or more events in
    /// upstream order.
    async fn fetch_market_data(&self, key: &SubscriptionKey) -> Result<Vec<MarketEvent>, DataError>;
}

/// De-duplication identity for overlapping websocket and REST upstreams.
pub(crate) fn event_identity(event: &MarketEvent) -> (DateTime<Utc>, Option<u64>) {
    (event.time_exchange, event.sequence)
}
