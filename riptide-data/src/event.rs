use crate::{
    books::OrderBook,
    subscription::{kline::Kline, ticker::Ticker, trade::PublicTrade},
};
use chrono::{DateTime, Utc};
use derive_more::From;
use riptide_instrument::{exchange::ExchangeId, symbol::Symbol};
use serde::{Deserialize, Serialize};

/// Normalised Riptide `MarketEvent<T>` wrapping the `T` data variant in
/// metadata.
///
/// The optional `sequence` carries the venue's update id where one exists,
/// and is used to de-duplicate overlapping websocket and REST upstreams.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MarketEvent<T = DataKind> {
    pub time_exchange: DateTime<Utc>,
    pub time_received: DateTime<Utc>,
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    pub sequence: Option<u64>,
    pub kind: T,
}

impl<T> MarketEvent<T> {
    pub fn map_kind<F, O>(self, op: F) -> MarketEvent<O>
    where
        F: FnOnce(T) -> O,
    {
        MarketEvent {
            time_exchange: self.time_exchange,
            time_received: self.time_received,
            exchange: self.exchange,
            symbol: self.symbol,
            sequence: self.sequence,
            kind: op(self.kind),
        }
    }
}

/// Available kinds of normalised Riptide [`MarketEvent`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, From)]
pub enum DataKind {
    Ticker(Ticker),
    OrderBook(OrderBook),
    Trade(PublicTrade),
    Kline(Kline),
}

impl DataKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            DataKind::Ticker(_) => "ticker",
            DataKind::OrderBook(_) => "orderbook",
            DataKind::Trade(_) => "trade",
            DataKind::Kline(_) => "kline",
        }
    }
}

impl From<MarketEvent<Ticker>> for MarketEvent<DataKind> {
    fn from(value: MarketEvent<Ticker>) -> Self {
        value.map_kind(Ticker::into)
    }
}

impl From<MarketEvent<OrderBook>> for MarketEvent<DataKind> {
    fn from(value: MarketEvent<OrderBook>) -> Self {
        value.map_kind(OrderBook::into)
    }
}

impl From<MarketEvent<PublicTrade>> for MarketEvent<DataKind> {
    fn from(value: MarketEvent<PublicTrade>) -> Self {
        value.map_kind(PublicTrade::into)
    }
}

impl From<MarketEvent<Kline>> for MarketEvent<DataKind> {
    fn from(value: MarketEvent<Kline>) -> Self {
        value.map_kind(Kline::into)
    }
}
