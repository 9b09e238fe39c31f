use crate::{orders::OrderManager, shutdown::ShutdownSignal};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use futures::{StreamExt, stream};
use riptide_execution::{
    client::ExchangeConnector,
    error::OrderError,
    order::{Order, OrderUpdate},
};
use riptide_instrument::exchange::ExchangeId;
use riptide_integration::collection::FixedWindow;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

/// Reconciliation loop configuration.
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    /// Loop cadence. Clamped to a 1 second minimum.
    pub interval: Duration,
    /// Concurrent order queries per exchange.
    pub batch_size: usize,
    /// Capacity of the recent-error ring.
    pub max_error_records: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            batch_size: 5,
            max_error_records: 10,
        }
    }
}

/// Per-service counters plus a bounded ring of recent errors.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SyncStats {
    pub total_syncs: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    pub orders_updated: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncError {
    pub exchange: ExchangeId,
    pub message: String,
    pub time: DateTime<Utc>,
}

#[derive(Debug)]
struct SyncState {
    stats: SyncStats,
    recent_errors: FixedWindow<SyncError>,
}

/// Periodic exchange reconciliation covering push-update loss.
///
/// Each cycle queries every local open order against its exchange and
/// applies any divergence through the [`OrderManager`], whose suppression
/// gate guarantees the resulting status event is emitted exactly once even
/// if the missed push later arrives.
pub struct OrderSyncService {
    orders: Arc<OrderManager>,
    connectors: FnvHashMap<ExchangeId, Arc<dyn ExchangeConnector>>,
    config: SyncConfig,
    state: parking_lot::Mutex<SyncState>,
}

impl std::fmt::Debug for OrderSyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderSyncService")
            .field("exchanges", &self.connectors.keys())
            .field("config", &self.config)
            .finish()
    }
}

impl OrderSyncService {
    pub fn new(
        orders: Arc<OrderManager>,
        connectors: impl IntoIterator<Item = Arc<dyn ExchangeConnector>>,
        config: SyncConfig,
    ) -> Self {
        let recent_errors = FixedWindow::new(config.max_error_records.max(1));
        Self {
            orders,
            connectors: connectors
                .into_iter()
                .map(|connector| (connector.exchange(), connector))
                .collect(),
            config,
            state: parking_lot::Mutex::new(SyncState {
                stats: SyncStats::default(),
                recent_errors,
            }),
        }
    }

    pub fn stats(&self) -> SyncStats {
        self.state.lock().stats.clone()
    }

    pub fn recent_errors(&self) -> Vec<SyncError> {
        self.state.lock().recent_errors.iter().cloned().collect()
    }

    /// Drive the reconciliation loop until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownSignal) {
        let interval = self.config.interval.max(Duration::from_secs(1));
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.sync_once().await;
                }
            }
        }
        debug!("order sync service stopped");
    }

    /// Execute one reconciliation cycle. Returns the number of orders whose
    /// local record was updated.
    pub async fn sync_once(&self) -> usize {
        let open = self.orders.open_orders();

        // Partition by exchange, skipping venues whose connector is down
        let mut by_exchange: FnvHashMap<ExchangeId, Vec<Order>> = FnvHashMap::default();
        for order in open {
            by_exchange.entry(order.exchange).or_default().push(order);
        }

        let mut updated = 0usize;
        let mut failed = false;

        for (exchange, orders) in by_exchange {
            let Some(connector) = self.connectors.get(&exchange) else {
                warn!(%exchange, "no connector registered for open orders");
                continue;
            };
            if !connector.is_connected() {
                debug!(%exchange, "skipping sync for disconnected exchange");
                continue;
            }

            let results: Vec<(Order, Result<Order, _>)> = stream::iter(orders)
                .map(|order| {
                    let connector = Arc::clone(connector);
                    async move {
                        let result = connector
                            .get_order(
                                &order.symbol,
                                Some(&order.id),
                                order.client_order_id.as_ref(),
                            )
                            .await;
                        (order, result)
                    }
                })
                .buffer_unordered(self.config.batch_size.max(1))
                .collect()
                .await;

            for (local, result) in results {
                match result {
                    Ok(exchange_order) => {
                        let update = OrderUpdate::from_exchange(&exchange_order);
                        if !local.differs_from(&update) {
                            continue;
                        }

                        match self.orders.update_order(&local.id, update) {
                            Ok(_) => updated += 1,
                            // Late duplicates and stale reads are expected noise
                            Err(OrderError::TerminalStatus { .. })
                            | Err(OrderError::StaleUpdate { .. }) => {}
                            Err(error) => {
                                failed = true;
                                self.record_error(exchange, error.to_string());
                            }
                        }
                    }
                    Err(error) => {
                        failed = true;
                        self.record_error(exchange, error.to_string());
                    }
                }
            }
        }

        let mut state = self.state.lock();
        state.stats.total_syncs += 1;
        if failed {
            state.stats.failed_syncs += 1;
        } else {
            state.stats.successful_syncs += 1;
        }
        state.stats.orders_updated += updated as u64;

        updated
    }

    fn record_error(&self, exchange: ExchangeId, message: String) {
        warn!(%exchange, %message, "order sync failure");
        self.state.lock().recent_errors.push(SyncError {
            exchange,
            message,
            time: Utc::now(),
        });
    }
}
