use crate::{
    state::StrategyState,
    store::{OrderFilter, OrderStore, SnapshotStore, StateStore, StoreError},
};
use riptide_execution::{
    AccountSnapshot,
    order::{Order, id::{OrderId, StrategyId}},
};
use riptide_instrument::exchange::ExchangeId;
use serde::{Serialize, de::DeserializeOwned};

/// Redis-backed implementation of all three store interfaces.
///
/// Layout:
/// * `{prefix}:order:{id}` - order row (`SET`/`GET`/`DEL`)
/// * `{prefix}:orders` - index set of order ids (`SADD`/`SREM`/`SMEMBERS`)
/// * `{prefix}:state:{strategy_id}` - strategy state snapshot
/// * `{prefix}:account:{exchange}` - append-only snapshot list (`RPUSH`)
///
/// Per-row `SET` preserves the atomic-update-per-row semantics the core
/// requires.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    prefix: String,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl RedisStore {
    pub fn new(url: &str, prefix: impl Into<String>) -> Result<Self, StoreError> {
        Ok(Self {
            client: redis::Client::open(url).map_err(backend)?,
            prefix: prefix.into(),
        })
    }

    fn connection(&self) -> Result<redis::Connection, StoreError> {
        self.client.get_connection().map_err(backend)
    }

    fn order_key(&self, id: &OrderId) -> String {
        format!("{}:order:{}", self.prefix, id)
    }

    fn order_index_key(&self) -> String {
        format!("{}:orders", self.prefix)
    }

    fn state_key(&self, id: &StrategyId) -> String {
        format!("{}:state:{}", self.prefix, id)
    }

    fn account_key(&self, exchange: ExchangeId) -> String {
        format!("{}:account:{}", self.prefix, exchange)
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let mut connection = self.connection()?;
        let payload: Option<String> = redis::cmd("GET")
            .arg(key)
            .query(&mut connection)
            .map_err(backend)?;

        payload
            .map(|payload| serde_json::from_str(&payload).map_err(serialisation))
            .transpose()
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let payload = serde_json::to_string(value).map_err(serialisation)?;
        let mut connection = self.connection()?;
        redis::cmd("SET")
            .arg(key)
            .arg(payload)
            .query::<()>(&mut connection)
            .map_err(backend)
    }
}

fn backend(error: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(error.to_string())
}

fn serialisation(error: impl std::fmt::Display) -> StoreError {
    StoreError::Serialisation(error.to_string())
}

impl OrderStore for RedisStore {
    fn put(&self, order: &Order) -> Result<(), StoreError> {
        let payload = serde_json::to_string(order).map_err(serialisation)?;
        let mut connection = self.connection()?;
        redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(self.order_key(&order.id))
            .arg(payload)
            .cmd("SADD")
            .arg(self.order_index_key())
            .arg(order.id.to_string())
            .query::<()>(&mut connection)
            .map_err(backend)
    }

    fn get(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        self.get_json(&self.order_key(id))
    }

    fn delete(&self, id: &OrderId) -> Result<(), StoreError> {
        let mut connection = self.connection()?;
        redis::pipe()
            .atomic()
            .cmd("DEL")
            .arg(self.order_key(id))
            .cmd("SREM")
            .arg(self.order_index_key())
            .arg(id.to_string())
            .query::<()>(&mut connection)
            .map_err(backend)
    }

    fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        let mut connection = self.connection()?;
        let ids: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.order_index_key())
            .query(&mut connection)
            .map_err(backend)?;
        drop(connection);

        let mut orders = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(order) = OrderStore::get(self, &OrderId::new(&id))? {
                if filter.matches(&order) {
                    orders.push(order);
                }
            }
        }
        Ok(orders)
    }
}

impl StateStore for RedisStore {
    fn put(&self, state: &StrategyState) -> Result<(), StoreError> {
        self.set_json(&self.state_key(&state.strategy_id), state)
    }

    fn get(&self, id: &StrategyId) -> Result<Option<StrategyState>, StoreError> {
        self.get_json(&self.state_key(id))
    }

    fn delete(&self, id: &StrategyId) -> Result<(), StoreError> {
        let mut connection = self.connection()?;
        redis::cmd("DEL")
            .arg(self.state_key(id))
            .query::<()>(&mut connection)
            .map_err(backend)
    }
}

impl SnapshotStore for RedisStore {
    fn append(&self, snapshot: &AccountSnapshot) -> Result<(), StoreError> {
        let payload = serde_json::to_string(snapshot).map_err(serialisation)?;
        let mut connection = self.connection()?;
        redis::cmd("RPUSH")
            .arg(self.account_key(snapshot.exchange))
            .arg(payload)
            .query::<()>(&mut connection)
            .map_err(backend)
    }

    fn recent(
        &self,
        exchange: ExchangeId,
        limit: usize,
    ) -> Result<Vec<AccountSnapshot>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut connection = self.connection()?;
        let payloads: Vec<String> = redis::cmd("LRANGE")
            .arg(self.account_key(exchange))
            .arg(-(limit as isize))
            .arg(-1)
            .query(&mut connection)
            .map_err(backend)?;

        payloads
            .into_iter()
            .rev()
            .map(|payload| serde_json::from_str(&payload).map_err(serialisation))
            .collect()
    }
}
