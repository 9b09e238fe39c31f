use crate::order::{
    Order, OrderKind, OrderStatus, TimeInForce,
    id::{ClientOrderId, OrderId, StrategyId},
};
use chrono::{DateTime, Utc};
use riptide_instrument::{Side, exchange::ExchangeId, symbol::Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order intent produced by a strategy, before venue acknowledgement.
///
/// Carries a fresh [`ClientOrderId`] so the eventual exchange order can be
/// correlated end-to-end.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct OrderIntent {
    pub client_order_id: ClientOrderId,
    pub strategy: StrategyId,
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    pub side: Side,
    pub kind: OrderKind,
    pub time_in_force: TimeInForce,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
}

impl OrderIntent {
    /// Validate intent completeness for its [`OrderKind`].
    pub fn validate(&self) -> Result<(), String> {
        if self.quantity <= Decimal::ZERO {
            return Err(format!("quantity {} must be positive", self.quantity));
        }
        if self.kind.requires_price() && self.price.is_none() {
            return Err(format!("{} order requires a price", self.kind));
        }
        if self.kind.requires_stop_price() && self.stop_price.is_none() {
            return Err(format!("{} order requires a stop price", self.kind));
        }
        Ok(())
    }

    /// Build the local `NEW` order record for an accepted intent, using the
    /// venue-assigned [`OrderId`].
    pub fn into_order(self, id: OrderId, time: DateTime<Utc>) -> Order {
        Order {
            id,
            client_order_id: Some(self.client_order_id),
            symbol: self.symbol,
            exchange: self.exchange,
            strategy: Some(self.strategy),
            side: self.side,
            kind: self.kind,
            time_in_force: self.time_in_force,
            quantity: self.quantity,
            price: self.price,
            stop_price: self.stop_price,
            status: OrderStatus::New,
            executed_quantity: Decimal::ZERO,
            cumulative_quote_quantity: Decimal::ZERO,
            average_price: None,
            timestamp: time,
            update_time: time,
            fills: vec![],
        }
    }
}
