use crate::{
    state::StrategyState,
    store::{OrderFilter, OrderStore, SnapshotStore, StateStore, StoreError},
};
use fnv::FnvHashMap;
use riptide_execution::{
    AccountSnapshot,
    order::{Order, id::{OrderId, StrategyId}},
};
use riptide_instrument::exchange::ExchangeId;

/// In-memory [`OrderStore`].
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    orders: parking_lot::RwLock<FnvHashMap<OrderId, Order>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OrderStore for InMemoryOrderStore {
    fn put(&self, order: &Order) -> Result<(), StoreError> {
        self.orders.write().insert(order.id.clone(), order.clone());
        Ok(())
    }

    fn get(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.read().get(id).cloned())
    }

    fn delete(&self, id: &OrderId) -> Result<(), StoreError> {
        self.orders.write().remove(id);
        Ok(())
    }

    fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        Ok(self
            .orders
            .read()
            .values()
            .filter(|order| filter.matches(order))
            .cloned()
            .collect())
    }
}

/// In-memory [`StateStore`].
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    states: parking_lot::RwLock<FnvHashMap<StrategyId, StrategyState>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for InMemoryStateStore {
    fn put(&self, state: &StrategyState) -> Result<(), StoreError> {
        self.states
            .write()
            .insert(state.strategy_id.clone(), state.clone());
        Ok(())
    }

    fn get(&self, id: &StrategyId) -> Result<Option<StrategyState>, StoreError> {
        Ok(self.states.read().get(id).cloned())
    }

    fn delete(&self, id: &StrategyId) -> Result<(), StoreError> {
        self.states.write().remove(id);
        Ok(())
    }
}

/// In-memory [`SnapshotStore`].
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: parking_lot::RwLock<Vec<AccountSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn append(&self, snapshot: &AccountSnapshot) -> Result<(), StoreError> {
        self.snapshots.write().push(snapshot.clone());
        Ok(())
    }

    fn recent(
        &self,
        exchange: ExchangeId,
        limit: usize,
    ) -> Result<Vec<AccountSnapshot>, StoreError> {
        Ok(self
            .snapshots
            .read()
            .iter()
            .rev()
            .filter(|snapshot| snapshot.exchange == exchange)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::OrderFilter;
    use chrono::Utc;
    use riptide_execution::order::{OrderKind, OrderStatus, TimeInForce, id::ClientOrderId};
    use riptide_instrument::Side;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn order(id: &str, strategy: &str, status: OrderStatus) -> Order {
        Order {
            id: OrderId::new(id),
            client_order_id: Some(ClientOrderId::random()),
            symbol: "BTC/USDT".parse().unwrap(),
            exchange: ExchangeId::Mock,
            strategy: Some(StrategyId::new(strategy)),
            side: Side::Buy,
            kind: OrderKind::Limit,
            time_in_force: TimeInForce::Gtc,
            quantity: dec!(0.01),
            price: Some(dec!(50200)),
            stop_price: None,
            status,
            executed_quantity: Decimal::ZERO,
            cumulative_quote_quantity: Decimal::ZERO,
            average_price: None,
            timestamp: Utc::now(),
            update_time: Utc::now(),
            fills: vec![],
        }
    }

    #[test]
    fn test_order_store_filtered_list() {
        let store = InMemoryOrderStore::new();
        store.put(&order("1", "a", OrderStatus::New)).unwrap();
        store.put(&order("2", "a", OrderStatus::Filled)).unwrap();
        store.put(&order("3", "b", OrderStatus::New)).unwrap();

        let strategy_a = store
            .list(&OrderFilter::by_strategy(StrategyId::new("a")))
            .unwrap();
        assert_eq!(strategy_a.len(), 2);

        let open_a = store
            .list(&OrderFilter {
                status: Some(OrderStatus::New),
                strategy: Some(StrategyId::new("a")),
                ..OrderFilter::default()
            })
            .unwrap();
        assert_eq!(open_a.len(), 1);
        assert_eq!(open_a[0].id, OrderId::new("1"));
    }

    #[test]
    fn test_snapshot_store_recent_is_newest_first() {
        let store = InMemorySnapshotStore::new();
        for _ in 0..3 {
            store
                .append(&AccountSnapshot::new(
                    ExchangeId::Mock,
                    vec![],
                    vec![],
                    Utc::now(),
                ))
                .unwrap();
        }

        assert_eq!(store.recent(ExchangeId::Mock, 2).unwrap().len(), 2);
        assert_eq!(store.recent(ExchangeId::Okx, 10).unwrap().len(), 0);
    }
}
