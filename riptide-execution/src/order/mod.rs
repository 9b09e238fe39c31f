use crate::{
    error::OrderError,
    order::id::{ClientOrderId, OrderId, StrategyId},
    trade::Fill,
};
use chrono::{DateTime, Utc};
use riptide_instrument::{Side, exchange::ExchangeId, symbol::Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// `Order` related identifiers.
pub mod id;

/// Order intents produced by strategies before venue acknowledgement.
pub mod request;

/// Execution style of an order.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
    derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Market,
    Limit,
    StopLoss,
    StopLossLimit,
    TakeProfit,
    TakeProfitLimit,
}

impl OrderKind {
    /// Whether the order kind requires a limit price.
    pub fn requires_price(&self) -> bool {
        matches!(
            self,
            OrderKind::Limit | OrderKind::StopLossLimit | OrderKind::TakeProfitLimit
        )
    }

    /// Whether the order kind requires a stop trigger price.
    pub fn requires_stop_price(&self) -> bool {
        matches!(
            self,
            OrderKind::StopLoss
                | OrderKind::StopLossLimit
                | OrderKind::TakeProfit
                | OrderKind::TakeProfitLimit
        )
    }
}

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
    derive_more::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeInForce {
    /// Good until cancelled.
    Gtc,
    /// Immediate or cancel.
    Ioc,
    /// Fill or kill.
    Fok,
}

/// Lifecycle status of an [`Order`].
///
/// `Filled`, `Canceled`, `Rejected` and `Expired` are terminal: once one of
/// them has been observed no further transition is accepted.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
    derive_more::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Rejected
                | OrderStatus::Expired
        )
    }

    pub fn is_open(&self) -> bool {
        matches!(self, OrderStatus::New | OrderStatus::PartiallyFilled)
    }
}

/// Normalised exchange order record.
///
/// Created by the engine from an accepted
/// [`OrderIntent`](request::OrderIntent), mutated only through
/// [`Order::apply`], and removed only on explicit purge - terminal orders
/// are retained for history.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Order {
    pub id: OrderId,
    pub client_order_id: Option<ClientOrderId>,
    pub symbol: Symbol,
    pub exchange: ExchangeId,
    /// Strategy that produced the order. Local metadata: venues never return
    /// it, so reconciliation preserves the local value.
    pub strategy: Option<StrategyId>,
    pub side: Side,
    pub kind: OrderKind,
    pub time_in_force: TimeInForce,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub status: OrderStatus,
    pub executed_quantity: Decimal,
    pub cumulative_quote_quantity: Decimal,
    pub average_price: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    pub fills: Vec<Fill>,
}

/// Patch applied to an [`Order`] when the exchange reports progress.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct OrderUpdate {
    pub status: OrderStatus,
    pub executed_quantity: Decimal,
    pub cumulative_quote_quantity: Decimal,
    pub average_price: Option<Decimal>,
    pub update_time: DateTime<Utc>,
    pub fill: Option<Fill>,
}

impl OrderUpdate {
    /// Derive the patch the provided exchange-truth order would apply.
    pub fn from_exchange(order: &Order) -> Self {
        Self {
            status: order.status,
            executed_quantity: order.executed_quantity,
            cumulative_quote_quantity: order.cumulative_quote_quantity,
            average_price: order.average_price,
            update_time: order.update_time,
            fill: None,
        }
    }
}

impl Order {
    /// Signed executed quantity: positive for `Buy`, negative for `Sell`.
    pub fn signed_executed_quantity(&self) -> Decimal {
        self.executed_quantity * Decimal::from(self.side.sign())
    }

    /// Quantity still unexecuted.
    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.executed_quantity
    }

    /// Whether applying the update would change the observable order state
    /// the reconciliation loop compares on.
    pub fn differs_from(&self, update: &OrderUpdate) -> bool {
        self.status != update.status
            || self.executed_quantity != update.executed_quantity
            || self.cumulative_quote_quantity != update.cumulative_quote_quantity
    }

    /// Apply an exchange-reported update, enforcing the lifecycle
    /// invariants. Returns the previous status on success.
    ///
    /// Rejections:
    /// * current status terminal
    /// * `update_time` older than the current one
    /// * executed quantity above the order quantity, or decreasing
    /// * `Filled` status without the full quantity executed
    pub fn apply(&mut self, update: OrderUpdate) -> Result<OrderStatus, OrderError> {
        if self.status.is_terminal() {
            return Err(OrderError::TerminalStatus {
                current: self.status,
                requested: update.status,
            });
        }

        if update.update_time < self.update_time {
            return Err(OrderError::StaleUpdate {
                current: self.update_time,
                update: update.update_time,
            });
        }

        if update.executed_quantity > self.quantity {
            return Err(OrderError::ExecutedExceedsQuantity {
                executed: update.executed_quantity,
                quantity: self.quantity,
            });
        }

        if update.executed_quantity < self.executed_quantity {
            return Err(OrderError::ExecutedDecreased {
                current: self.executed_quantity,
                update: update.executed_quantity,
            });
        }

        if update.status == OrderStatus::Filled && update.executed_quantity != self.quantity {
            return Err(OrderError::FilledQuantityMismatch {
                executed: update.executed_quantity,
                quantity: self.quantity,
            });
        }

        let previous = self.status;
        self.status = update.status;
        self.executed_quantity = update.executed_quantity;
        self.cumulative_quote_quantity = update.cumulative_quote_quantity;
        self.average_price = update.average_price.or(self.average_price);
        self.update_time = update.update_time;
        if let Some(fill) = update.fill {
            self.fills.push(fill);
        }

        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use rust_decimal_macros::dec;

    fn order(status: OrderStatus, executed: Decimal) -> Order {
        Order {
            id: OrderId::new("1"),
            client_order_id: Some(ClientOrderId::new("cid_1")),
            symbol: "BTC/USDT".parse().unwrap(),
            exchange: ExchangeId::Mock,
            strategy: Some(StrategyId::new("strategy_1")),
            side: Side::Buy,
            kind: OrderKind::Limit,
            time_in_force: TimeInForce::Gtc,
            quantity: dec!(0.01),
            price: Some(dec!(50200)),
            stop_price: None,
            status,
            executed_quantity: executed,
            cumulative_quote_quantity: Decimal::ZERO,
            average_price: None,
            timestamp: DateTime::<Utc>::MIN_UTC,
            update_time: DateTime::<Utc>::MIN_UTC,
            fills: vec![],
        }
    }

    fn update(
        status: OrderStatus,
        executed: Decimal,
        time_offset_secs: i64,
    ) -> OrderUpdate {
        OrderUpdate {
            status,
            executed_quantity: executed,
            cumulative_quote_quantity: Decimal::ZERO,
            average_price: None,
            update_time: DateTime::<Utc>::MIN_UTC + TimeDelta::seconds(time_offset_secs),
            fill: None,
        }
    }

    #[test]
    fn test_apply_order_update() {
        struct TestCase {
            name: &'static str,
            state: Order,
            input: OrderUpdate,
            expected: Result<OrderStatus, OrderError>,
        }

        let cases = vec![
            TestCase {
                name: "new to partially filled",
                state: order(OrderStatus::New, Decimal::ZERO),
                input: update(OrderStatus::PartiallyFilled, dec!(0.005), 1),
                expected: Ok(OrderStatus::New),
            },
            TestCase {
                name: "partially filled to filled with full quantity",
                state: order(OrderStatus::PartiallyFilled, dec!(0.005)),
                input: update(OrderStatus::Filled, dec!(0.01), 2),
                expected: Ok(OrderStatus::PartiallyFilled),
            },
            TestCase {
                name: "terminal filled absorbs cancel",
                state: order(OrderStatus::Filled, dec!(0.01)),
                input: update(OrderStatus::Canceled, dec!(0.01), 3),
                expected: Err(OrderError::TerminalStatus {
                    current: OrderStatus::Filled,
                    requested: OrderStatus::Canceled,
                }),
            },
            TestCase {
                name: "stale update_time rejected",
                state: {
                    let mut order = order(OrderStatus::New, Decimal::ZERO);
                    order.update_time = DateTime::<Utc>::MIN_UTC + TimeDelta::seconds(10);
                    order
                },
                input: update(OrderStatus::PartiallyFilled, dec!(0.005), 5),
                expected: Err(OrderError::StaleUpdate {
                    current: DateTime::<Utc>::MIN_UTC + TimeDelta::seconds(10),
                    update: DateTime::<Utc>::MIN_UTC + TimeDelta::seconds(5),
                }),
            },
            TestCase {
                name: "executed above quantity rejected",
                state: order(OrderStatus::New, Decimal::ZERO),
                input: update(OrderStatus::PartiallyFilled, dec!(0.02), 1),
                expected: Err(OrderError::ExecutedExceedsQuantity {
                    executed: dec!(0.02),
                    quantity: dec!(0.01),
                }),
            },
            TestCase {
                name: "executed decrease rejected",
                state: order(OrderStatus::PartiallyFilled, dec!(0.005)),
                input: update(OrderStatus::PartiallyFilled, dec!(0.004), 1),
                expected: Err(OrderError::ExecutedDecreased {
                    current: dec!(0.005),
                    update: dec!(0.004),
                }),
            },
            TestCase {
                name: "filled without full quantity rejected",
                state: order(OrderStatus::PartiallyFilled, dec!(0.005)),
                input: update(OrderStatus::Filled, dec!(0.005), 1),
                expected: Err(OrderError::FilledQuantityMismatch {
                    executed: dec!(0.005),
                    quantity: dec!(0.01),
                }),
            },
            TestCase {
                name: "cancel of partial fill accepted",
                state: order(OrderStatus::PartiallyFilled, dec!(0.005)),
                input: update(OrderStatus::Canceled, dec!(0.005), 1),
                expected: Ok(OrderStatus::PartiallyFilled),
            },
        ];

        for (index, mut test) in cases.into_iter().enumerate() {
            let actual = test.state.apply(test.input.clone());
            assert_eq!(actual, test.expected, "TC{index} ({}) failed", test.name);

            if actual.is_ok() {
                assert_eq!(test.state.status, test.input.status);
                assert_eq!(test.state.executed_quantity, test.input.executed_quantity);
                assert_eq!(test.state.update_time, test.input.update_time);
            }
        }
    }

    #[test]
    fn test_update_time_is_monotone_across_applies() {
        let mut state = order(OrderStatus::New, Decimal::ZERO);

        state
            .apply(update(OrderStatus::PartiallyFilled, dec!(0.005), 5))
            .unwrap();
        let after_first = state.update_time;

        assert!(state
            .apply(update(OrderStatus::PartiallyFilled, dec!(0.006), 3))
            .is_err());
        assert_eq!(state.update_time, after_first);

        state
            .apply(update(OrderStatus::Filled, dec!(0.01), 7))
            .unwrap();
        assert!(state.update_time >= after_first);
    }

    #[test]
    fn test_signed_executed_quantity() {
        let mut buy = order(OrderStatus::PartiallyFilled, dec!(0.005));
        assert_eq!(buy.signed_executed_quantity(), dec!(0.005));

        buy.side = Side::Sell;
        assert_eq!(buy.signed_executed_quantity(), dec!(-0.005));
    }
}
