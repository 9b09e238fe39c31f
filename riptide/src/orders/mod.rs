use crate::{
    bus::EventBus,
    store::{OrderFilter, OrderStore},
};
use chrono::Utc;
use fnv::FnvHashMap;
use itertools::Itertools;
use riptide_execution::{
    error::OrderError,
    order::{Order, OrderStatus, OrderUpdate, id::OrderId},
};
use riptide_instrument::{Side, symbol::Symbol};
use riptide_integration::decimal::checked_div;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, warn};

/// Aggregate counters over the tracked order set.
#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct OrderStats {
    pub total: usize,
    pub open: usize,
    pub filled: usize,
    pub cancelled: usize,
    pub rejected: usize,
    pub expired: usize,
}

#[derive(Debug, Default)]
struct OrderSet {
    orders: FnvHashMap<OrderId, Order>,
    by_symbol: FnvHashMap<Symbol, HashSet<OrderId>>,
    by_status: FnvHashMap<OrderStatus, HashSet<OrderId>>,
}

impl OrderSet {
    fn index(&mut self, order: &Order) {
        self.by_symbol
            .entry(order.symbol.clone())
            .or_default()
            .insert(order.id.clone());
        self.by_status
            .entry(order.status)
            .or_default()
            .insert(order.id.clone());
    }

    fn unindex_status(&mut self, id: &OrderId, status: OrderStatus) {
        if let Some(ids) = self.by_status.get_mut(&status) {
            ids.remove(id);
        }
    }

    fn unindex(&mut self, order: &Order) {
        if let Some(ids) = self.by_symbol.get_mut(&order.symbol) {
            ids.remove(&order.id);
        }
        self.unindex_status(&order.id, order.status);
    }
}

/// In-memory store of all orders with indexes by id, symbol and status.
///
/// All mutations run the [`Order`] state machine and hold a single writer
/// lock; reads proceed under the shared reader lock. Every status-changing
/// mutation is write-through persisted and published through the
/// [`EventBus`]'s suppression gate, so a transition is visible exactly once
/// no matter which path (stream or sync) reported it first.
#[derive(Debug)]
pub struct OrderManager {
    bus: Arc<EventBus>,
    store: Arc<dyn OrderStore>,
    inner: parking_lot::RwLock<OrderSet>,
}

impl OrderManager {
    pub fn new(bus: Arc<EventBus>, store: Arc<dyn OrderStore>) -> Self {
        Self {
            bus,
            store,
            inner: parking_lot::RwLock::new(OrderSet::default()),
        }
    }

    /// Insert a new order. Emits `order_created` when its status is `NEW`.
    pub fn add_order(&self, order: Order) -> Result<(), OrderError> {
        {
            let mut inner = self.inner.write();
            if let Some(existing) = inner.orders.get(&order.id) {
                warn!(
                    order_id = %order.id,
                    status = %existing.status,
                    "order already tracked - add ignored"
                );
                return Ok(());
            }
            inner.index(&order);
            inner.orders.insert(order.id.clone(), order.clone());
        }

        if let Err(error) = self.store.put(&order) {
            warn!(order_id = %order.id, %error, "failed to persist order");
        }

        if order.status == OrderStatus::New {
            self.bus.publish_order_status(&order);
        } else {
            // Seed the gate so the current status does not re-fire later
            self.bus.gate().seed(&order.id, order.status);
        }

        debug!(order_id = %order.id, symbol = %order.symbol, "order tracked");
        Ok(())
    }

    /// Re-install an order rebuilt during recovery: indexes and persistence
    /// are updated, but no event is emitted and the suppression gate is
    /// seeded with the current status.
    pub fn restore_order(&self, order: Order) {
        {
            let mut inner = self.inner.write();
            if let Some(previous) = inner.orders.remove(&order.id) {
                inner.unindex(&previous);
            }
            inner.index(&order);
            inner.orders.insert(order.id.clone(), order.clone());
        }

        if let Err(error) = self.store.put(&order) {
            warn!(order_id = %order.id, %error, "failed to persist restored order");
        }
        self.bus.gate().seed(&order.id, order.status);
    }

    /// Apply an exchange-reported update to a tracked order.
    ///
    /// Index moves are atomic with the mutation; the corresponding status
    /// event is published through the suppression gate after the writer lock
    /// is released.
    pub fn update_order(&self, id: &OrderId, update: OrderUpdate) -> Result<OrderStatus, OrderError> {
        let updated = {
            let mut inner = self.inner.write();
            let Some(order) = inner.orders.get_mut(id) else {
                warn!(order_id = %id, "update for untracked order - ignoring");
                return Err(OrderError::Untracked);
            };

            let previous = order.apply(update)?;
            let order = order.clone();
            if previous != order.status {
                inner.unindex_status(id, previous);
                inner
                    .by_status
                    .entry(order.status)
                    .or_default()
                    .insert(id.clone());
            }
            order
        };

        if let Err(error) = self.store.put(&updated) {
            warn!(order_id = %id, %error, "failed to persist order update");
        }

        self.bus.publish_order_status(&updated);
        Ok(updated.status)
    }

    /// Explicit purge. Terminal orders are otherwise retained for history.
    pub fn remove_order(&self, id: &OrderId) -> Option<Order> {
        let removed = {
            let mut inner = self.inner.write();
            let order = inner.orders.remove(id)?;
            inner.unindex(&order);
            Some(order)
        };

        if removed.is_some() {
            self.bus.gate().forget(id);
            if let Err(error) = self.store.delete(id) {
                warn!(order_id = %id, %error, "failed to delete order from store");
            }
        }
        removed
    }

    pub fn get_order(&self, id: &OrderId) -> Option<Order> {
        self.inner.read().orders.get(id).cloned()
    }

    pub fn orders_by_symbol(&self, symbol: &Symbol) -> Vec<Order> {
        let inner = self.inner.read();
        inner
            .by_symbol
            .get(symbol)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.orders.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn orders_by_status(&self, status: OrderStatus) -> Vec<Order> {
        let inner = self.inner.read();
        inner
            .by_status
            .get(&status)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.orders.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Orders in status `NEW` or `PARTIALLY_FILLED`.
    pub fn open_orders(&self) -> Vec<Order> {
        let inner = self.inner.read();
        [OrderStatus::New, OrderStatus::PartiallyFilled]
            .iter()
            .flat_map(|status| inner.by_status.get(status))
            .flatten()
            .filter_map(|id| inner.orders.get(id).cloned())
            .collect()
    }

    /// Orders matching the provided filter.
    pub fn orders(&self, filter: &OrderFilter) -> Vec<Order> {
        self.inner
            .read()
            .orders
            .values()
            .filter(|order| filter.matches(order))
            .cloned()
            .collect()
    }

    /// Total unexecuted quantity across open orders of one side.
    pub fn open_quantity(&self, symbol: &Symbol, side: Side) -> Decimal {
        self.orders_by_symbol(symbol)
            .into_iter()
            .filter(|order| order.status.is_open() && order.side == side)
            .map(|order| order.remaining_quantity())
            .sum()
    }

    /// Volume-weighted average fill price across all orders of one side.
    pub fn average_fill_price(&self, symbol: &Symbol, side: Side) -> Option<Decimal> {
        let (quote, base) = self
            .orders_by_symbol(symbol)
            .into_iter()
            .filter(|order| order.side == side && !order.executed_quantity.is_zero())
            .fold((Decimal::ZERO, Decimal::ZERO), |(quote, base), order| {
                (
                    quote + order.cumulative_quote_quantity,
                    base + order.executed_quantity,
                )
            });

        checked_div(quote, base)
    }

    /// Net signed executed quantity for a symbol:
    /// `Σ executed BUY − Σ executed SELL`.
    pub fn net_executed(&self, symbol: &Symbol) -> Decimal {
        self.orders_by_symbol(symbol)
            .into_iter()
            .map(|order| order.signed_executed_quantity())
            .sum()
    }

    /// Number of symbols currently carrying a non-zero net executed
    /// position.
    pub fn position_symbol_count(&self) -> usize {
        let inner = self.inner.read();
        inner
            .by_symbol
            .iter()
            .filter(|(_, ids)| {
                let net: Decimal = ids
                    .iter()
                    .filter_map(|id| inner.orders.get(id))
                    .map(Order::signed_executed_quantity)
                    .sum();
                !net.is_zero()
            })
            .count()
    }

    pub fn stats(&self) -> OrderStats {
        let inner = self.inner.read();
        let count = |status: OrderStatus| {
            inner
                .by_status
                .get(&status)
                .map(HashSet::len)
                .unwrap_or(0)
        };

        OrderStats {
            total: inner.orders.len(),
            open: count(OrderStatus::New) + count(OrderStatus::PartiallyFilled),
            filled: count(OrderStatus::Filled),
            cancelled: count(OrderStatus::Canceled),
            rejected: count(OrderStatus::Rejected),
            expired: count(OrderStatus::Expired),
        }
    }

    /// Batch-transition all open orders (optionally per symbol) to
    /// `CANCELED`. Returns the transitioned ids.
    pub fn cancel_all_orders(&self, symbol: Option<&Symbol>) -> Vec<OrderId> {
        let open: Vec<Order> = self
            .open_orders()
            .into_iter()
            .filter(|order| symbol.is_none_or(|symbol| &order.symbol == symbol))
            .sorted_by_key(|order| order.id.clone())
            .collect();

        let mut cancelled = Vec::with_capacity(open.len());
        for order in open {
            let update = OrderUpdate {
                status: OrderStatus::Canceled,
                executed_quantity: order.executed_quantity,
                cumulative_quote_quantity: order.cumulative_quote_quantity,
                average_price: order.average_price,
                update_time: Utc::now().max(order.update_time),
                fill: None,
            };
            match self.update_order(&order.id, update) {
                Ok(_) => cancelled.push(order.id),
                Err(error) => {
                    warn!(order_id = %order.id, %error, "cancel_all transition rejected");
                }
            }
        }
        cancelled
    }
}
