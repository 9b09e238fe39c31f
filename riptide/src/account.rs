use crate::{
    bus::{EngineEvent, EventBus},
    shutdown::ShutdownSignal,
    store::SnapshotStore,
    strategy::runtime::PortfolioRisk,
};
use chrono::Utc;
use fnv::FnvHashMap;
use riptide_execution::{AccountSnapshot, client::ExchangeConnector, position::Position};
use riptide_instrument::exchange::ExchangeId;
use riptide_integration::decimal::checked_div;
use rust_decimal::Decimal;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Account polling configuration.
#[derive(Debug, Clone, Copy)]
pub struct AccountPollConfig {
    pub interval: Duration,
}

impl Default for AccountPollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

/// Periodically fetches balances and positions per exchange, publishes
/// `balance_update` / `position_update` pairs, and persists the composed
/// [`AccountSnapshot`] for analytics.
///
/// Cycles missed due to transient errors are skipped, not queued.
pub struct AccountPollingService {
    bus: Arc<EventBus>,
    connectors: FnvHashMap<ExchangeId, Arc<dyn ExchangeConnector>>,
    store: Arc<dyn SnapshotStore>,
    portfolio_risk: Arc<parking_lot::RwLock<PortfolioRisk>>,
    config: AccountPollConfig,
    /// Session equity peak, for drawdown derivation.
    equity_peak: parking_lot::Mutex<Option<Decimal>>,
}

impl std::fmt::Debug for AccountPollingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountPollingService")
            .field("exchanges", &self.connectors.keys())
            .field("config", &self.config)
            .finish()
    }
}

impl AccountPollingService {
    pub fn new(
        bus: Arc<EventBus>,
        connectors: impl IntoIterator<Item = Arc<dyn ExchangeConnector>>,
        store: Arc<dyn SnapshotStore>,
        portfolio_risk: Arc<parking_lot::RwLock<PortfolioRisk>>,
        config: AccountPollConfig,
    ) -> Self {
        Self {
            bus,
            connectors: connectors
                .into_iter()
                .map(|connector| (connector.exchange(), connector))
                .collect(),
            store,
            portfolio_risk,
            config,
            equity_peak: parking_lot::Mutex::new(None),
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownSignal) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }
        debug!("account polling service stopped");
    }

    /// Execute one polling cycle across every connected exchange. Returns
    /// the number of snapshots persisted.
    pub async fn poll_once(&self) -> usize {
        let mut persisted = 0;

        for (exchange, connector) in &self.connectors {
            if !connector.is_connected() {
                debug!(%exchange, "skipping account poll for disconnected exchange");
                continue;
            }

            let balances = match tokio::time::timeout(FETCH_TIMEOUT, connector.get_balances()).await
            {
                Ok(Ok(balances)) => balances,
                Ok(Err(error)) => {
                    warn!(%exchange, %error, "balance fetch failed - skipping cycle");
                    continue;
                }
                Err(_) => {
                    warn!(%exchange, "balance fetch timed out - skipping cycle");
                    continue;
                }
            };

            let positions = match tokio::time::timeout(FETCH_TIMEOUT, connector.get_positions())
                .await
            {
                Ok(Ok(positions)) => positions,
                Ok(Err(error)) => {
                    warn!(%exchange, %error, "position fetch failed - skipping cycle");
                    continue;
                }
                Err(_) => {
                    warn!(%exchange, "position fetch timed out - skipping cycle");
                    continue;
                }
            };

            // Fill in PnL the venue did not report
            let positions: Vec<Position> = positions
                .into_iter()
                .map(|mut position| {
                    position.unrealized_pnl = Some(position.pnl());
                    position
                })
                .collect();

            let total_position_value: Decimal =
                positions.iter().map(Position::notional).sum();
            let unrealized_pnl: Decimal = positions.iter().map(Position::pnl).sum();

            let time = Utc::now();
            let snapshot =
                AccountSnapshot::new(*exchange, balances.clone(), positions.clone(), time);

            self.update_portfolio_risk(&snapshot, unrealized_pnl);

            self.bus.publish(EngineEvent::BalanceUpdate {
                exchange: *exchange,
                balances,
                time,
            });
            self.bus.publish(EngineEvent::PositionUpdate {
                exchange: *exchange,
                positions,
                time,
            });

            match self.store.append(&snapshot) {
                Ok(()) => persisted += 1,
                Err(error) => warn!(%exchange, %error, "failed to persist account snapshot"),
            }

            info!(
                %exchange,
                %total_position_value,
                %unrealized_pnl,
                "account snapshot captured"
            );
        }

        persisted
    }

    /// Derive the drawdown observations shared with the risk checks.
    fn update_portfolio_risk(&self, snapshot: &AccountSnapshot, unrealized_pnl: Decimal) {
        let equity: Decimal = snapshot
            .balances
            .iter()
            .map(|balance| balance.balance.total())
            .sum::<Decimal>()
            + unrealized_pnl;

        let mut peak = self.equity_peak.lock();
        let current_peak = peak.map_or(equity, |peak| peak.max(equity));
        *peak = Some(current_peak);

        let drawdown = checked_div(current_peak - equity, current_peak)
            .unwrap_or(Decimal::ZERO)
            .max(Decimal::ZERO);

        let mut risk = self.portfolio_risk.write();
        risk.drawdown = drawdown;
        risk.daily_pnl = unrealized_pnl;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bus::{EventCategory, EventFilter},
        store::in_memory::InMemorySnapshotStore,
    };
    use riptide_execution::{
        balance::{AssetBalance, Balance},
        client::mock::MockConnector,
    };
    use rust_decimal_macros::dec;
    use smol_str::SmolStr;

    fn position(quantity: Decimal, avg: Decimal, mark: Decimal) -> Position {
        Position {
            symbol: "BTC/USDT:USDT".parse().unwrap(),
            quantity,
            avg_price: avg,
            mark_price: mark,
            unrealized_pnl: None,
            leverage: None,
        }
    }

    #[tokio::test]
    async fn test_poll_publishes_pair_and_persists() {
        let bus = Arc::new(EventBus::default());
        let store = Arc::new(InMemorySnapshotStore::new());
        let mock = MockConnector::default();

        mock.set_balances(vec![AssetBalance::new(
            SmolStr::new("USDT"),
            Balance::new(dec!(1000), dec!(500)),
            Utc::now(),
        )]);
        mock.set_positions(vec![position(dec!(0.5), dec!(50000), dec!(51000))]);

        let service = AccountPollingService::new(
            Arc::clone(&bus),
            [Arc::new(mock) as Arc<dyn ExchangeConnector>],
            Arc::clone(&store) as Arc<dyn SnapshotStore>,
            Arc::new(parking_lot::RwLock::new(PortfolioRisk::default())),
            AccountPollConfig::default(),
        );

        let mut rx = bus.subscribe("test", EventFilter::categories([EventCategory::Account]));
        assert_eq!(service.poll_once().await, 1);

        match rx.recv().await {
            EngineEvent::BalanceUpdate { balances, .. } => {
                assert_eq!(balances.len(), 1);
                assert_eq!(balances[0].balance.total(), dec!(1500));
            }
            other => panic!("expected BalanceUpdate, got {other:?}"),
        }
        match rx.recv().await {
            EngineEvent::PositionUpdate { positions, .. } => {
                // Derived PnL filled in: (51000 - 50000) * 0.5
                assert_eq!(positions[0].unrealized_pnl, Some(dec!(500.0)));
            }
            other => panic!("expected PositionUpdate, got {other:?}"),
        }

        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_cycle_is_skipped_not_queued() {
        let bus = Arc::new(EventBus::default());
        let store = Arc::new(InMemorySnapshotStore::new());
        let mock = MockConnector::default();
        mock.set_connected(false);

        let service = AccountPollingService::new(
            Arc::clone(&bus),
            [Arc::new(mock.clone()) as Arc<dyn ExchangeConnector>],
            Arc::clone(&store) as Arc<dyn SnapshotStore>,
            Arc::new(parking_lot::RwLock::new(PortfolioRisk::default())),
            AccountPollConfig::default(),
        );

        assert_eq!(service.poll_once().await, 0);
        assert!(store.is_empty());

        mock.set_connected(true);
        assert_eq!(service.poll_once().await, 1);
        // Only the successful cycle persisted anything
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_drawdown_derivation() {
        let bus = Arc::new(EventBus::default());
        let store = Arc::new(InMemorySnapshotStore::new());
        let mock = MockConnector::default();
        let risk = Arc::new(parking_lot::RwLock::new(PortfolioRisk::default()));

        let service = AccountPollingService::new(
            Arc::clone(&bus),
            [Arc::new(mock.clone()) as Arc<dyn ExchangeConnector>],
            Arc::clone(&store) as Arc<dyn SnapshotStore>,
            Arc::clone(&risk),
            AccountPollConfig::default(),
        );

        mock.set_balances(vec![AssetBalance::new(
            SmolStr::new("USDT"),
            Balance::new(dec!(1000), dec!(0)),
            Utc::now(),
        )]);
        service.poll_once().await;
        assert_eq!(risk.read().drawdown, Decimal::ZERO);

        // Equity halves: 50% drawdown from the peak
        mock.set_balances(vec![AssetBalance::new(
            SmolStr::new("USDT"),
            Balance::new(dec!(500), dec!(0)),
            Utc::now(),
        )]);
        service.poll_once().await;
        assert_eq!(risk.read().drawdown, dec!(0.5));
    }
}
