use crate::state::StrategyState;
use riptide_execution::{
    AccountSnapshot,
    order::{Order, OrderStatus, id::{OrderId, StrategyId}},
};
use riptide_instrument::{exchange::ExchangeId, symbol::Symbol};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// In-memory store implementations, used in tests and as write-through
/// caches.
pub mod in_memory;

/// Redis-backed store implementations used in production.
pub mod redis;

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum StoreError {
    #[error("serialisation: {0}")]
    Serialisation(String),

    #[error("backend: {0}")]
    Backend(String),
}

/// Filter for [`OrderStore::list`]. Unset dimensions match everything.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub strategy: Option<StrategyId>,
    pub symbol: Option<Symbol>,
    pub exchange: Option<ExchangeId>,
}

impl OrderFilter {
    pub fn by_strategy(strategy: StrategyId) -> Self {
        Self {
            strategy: Some(strategy),
            ..Self::default()
        }
    }

    pub fn matches(&self, order: &Order) -> bool {
        self.status.is_none_or(|status| order.status == status)
            && self
                .strategy
                .as_ref()
                .is_none_or(|strategy| order.strategy.as_ref() == Some(strategy))
            && self
                .symbol
                .as_ref()
                .is_none_or(|symbol| &order.symbol == symbol)
            && self
                .exchange
                .is_none_or(|exchange| order.exchange == exchange)
    }
}

/// Durable order records: one row per order, atomic update per row.
pub trait OrderStore: Send + Sync + std::fmt::Debug {
    fn put(&self, order: &Order) -> Result<(), StoreError>;
    fn get(&self, id: &OrderId) -> Result<Option<Order>, StoreError>;
    fn delete(&self, id: &OrderId) -> Result<(), StoreError>;
    fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError>;
}

/// Durable strategy state snapshots keyed by strategy id.
pub trait StateStore: Send + Sync + std::fmt::Debug {
    fn put(&self, state: &StrategyState) -> Result<(), StoreError>;
    fn get(&self, id: &StrategyId) -> Result<Option<StrategyState>, StoreError>;
    fn delete(&self, id: &StrategyId) -> Result<(), StoreError>;
}

/// Append-only, timestamped account snapshots for analytics.
pub trait SnapshotStore: Send + Sync {
    fn append(&self, snapshot: &AccountSnapshot) -> Result<(), StoreError>;
    fn recent(&self, exchange: ExchangeId, limit: usize)
    -> Result<Vec<AccountSnapshot>, StoreError>;
}
