use crate::{
    balance::AssetBalance,
    error::ExchangeError,
    order::{
        Order,
        id::{ClientOrderId, OrderId},
        request::OrderIntent,
    },
    position::Position,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_more::From;
use riptide_data::subscription::{KlineInterval, MarketDataConnector, kline::Kline};
use riptide_instrument::symbol::Symbol;
use riptide_integration::{channel::UnboundedRx, snapshot::Snapshot};

/// Binance reference adapter.
pub mod binance;

/// Scriptable in-process connector for tests and paper trading.
pub mod mock;

/// Private account update pushed by a venue stream.
#[derive(Debug, Clone, From)]
pub enum AccountUpdate {
    /// Full order snapshot replacing prior state for that order.
    Order(Snapshot<Order>),
    Balances(Vec<AssetBalance>),
    Positions(Vec<Position>),
}

/// Uniform view over a heterogeneous trading venue: market data (via the
/// [`MarketDataConnector`] supertrait) plus private account and order
/// operations.
///
/// Every outbound call is expected to respect the engine's deadlines; errors
/// are reported as typed [`ExchangeError`]s tagged `retryable` or not.
#[async_trait]
pub trait ExchangeConnector: MarketDataConnector {
    async fn connect(&self) -> Result<(), ExchangeError>;

    async fn disconnect(&self) -> Result<(), ExchangeError>;

    /// Open the private account stream: order, balance and position pushes.
    async fn account_stream(&self) -> Result<UnboundedRx<AccountUpdate>, ExchangeError>;

    /// Fetch current exchange truth for one order, by venue id and/or client
    /// order id.
    async fn get_order(
        &self,
        symbol: &Symbol,
        id: Option<&OrderId>,
        client_order_id: Option<&ClientOrderId>,
    ) -> Result<Order, ExchangeError>;

    /// Submit an order intent, returning the venue-acknowledged order.
    async fn place_order(&self, intent: &OrderIntent) -> Result<Order, ExchangeError>;

    /// Cancel an open order, returning its post-cancel state.
    async fn cancel_order(&self, symbol: &Symbol, id: &OrderId) -> Result<Order, ExchangeError>;

    async fn get_balances(&self) -> Result<Vec<AssetBalance>, ExchangeError>;

    async fn get_positions(&self) -> Result<Vec<Position>, ExchangeError>;

    async fn get_klines(
        &self,
        symbol: &Symbol,
        interval: KlineInterval,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Kline>, ExchangeError>;
}
