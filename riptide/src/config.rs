use crate::{
    account::AccountPollConfig,
    bus::{BusConfig, OverflowPolicy},
    error::ConfigError,
    state::StateManagerConfig,
    strategy::runtime::RuntimeConfig,
    sync::SyncConfig,
};
use riptide_data::subscription::manager::PollIntervals;
use riptide_risk::RiskLimits;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Process-wide engine configuration.
///
/// Every recognised option with its default; loaded from JSON, validated
/// once at startup (validation failures are fatal [`ConfigError`]s).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    pub engine: EngineSection,
    pub event_bus: EventBusSection,
    pub order_sync: OrderSyncSection,
    pub account_poll: AccountPollSection,
    pub state_manager: StateManagerSection,
    pub subscriptions: SubscriptionSection,
    pub strategy_runtime: StrategyRuntimeSection,
    pub risk: RiskLimits,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineSection {
    /// Max time to drain tasks on stop.
    pub shutdown_timeout_secs: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EventBusSection {
    pub buffer_size: usize,
    pub overflow_policy: OverflowPolicy,
}

impl Default for EventBusSection {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            overflow_policy: OverflowPolicy::DropOldest,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrderSyncSection {
    /// Reconciliation cadence; 1 second minimum.
    pub sync_interval_ms: u64,
    pub batch_size: usize,
    pub max_error_records: usize,
}

impl Default for OrderSyncSection {
    fn default() -> Self {
        Self {
            sync_interval_ms: 5_000,
            batch_size: 5,
            max_error_records: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AccountPollSection {
    pub interval_secs: u64,
}

impl Default for AccountPollSection {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StateManagerSection {
    pub autosave_interval_secs: u64,
    pub cache_timeout_secs: u64,
    pub max_recovery_time_secs: u64,
}

impl Default for StateManagerSection {
    fn default() -> Self {
        Self {
            autosave_interval_secs: 30,
            cache_timeout_secs: 5 * 60,
            max_recovery_time_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SubscriptionSection {
    pub ticker_interval_ms: u64,
    pub orderbook_interval_ms: u64,
    pub trades_interval_ms: u64,
    pub klines_interval_ms: u64,
}

impl Default for SubscriptionSection {
    fn default() -> Self {
        Self {
            ticker_interval_ms: 1_000,
            orderbook_interval_ms: 500,
            trades_interval_ms: 2_000,
            klines_interval_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StrategyRuntimeSection {
    pub error_threshold: usize,
    pub error_window_secs: u64,
}

impl Default for StrategyRuntimeSection {
    fn default() -> Self {
        Self {
            error_threshold: 5,
            error_window_secs: 60,
        }
    }
}

impl EngineConfig {
    pub fn from_json(input: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(input).map_err(|error| ConfigError::Parse(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_bus.buffer_size == 0 {
            return Err(ConfigError::InvalidValue {
                option: "eventBus.bufferSize",
                message: "must be positive".to_string(),
            });
        }
        if self.order_sync.sync_interval_ms < 1_000 {
            return Err(ConfigError::InvalidValue {
                option: "orderSync.syncInterval",
                message: format!(
                    "{}ms is below the 1s minimum",
                    self.order_sync.sync_interval_ms
                ),
            });
        }
        if self.order_sync.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                option: "orderSync.batchSize",
                message: "must be positive".to_string(),
            });
        }
        if self.account_poll.interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                option: "accountPoll.interval",
                message: "must be positive".to_string(),
            });
        }
        if self.state_manager.autosave_interval_secs == 0
            || self.state_manager.max_recovery_time_secs == 0
        {
            return Err(ConfigError::InvalidValue {
                option: "stateManager",
                message: "intervals must be positive".to_string(),
            });
        }
        if let Some(drawdown) = self.risk.max_drawdown {
            if drawdown < rust_decimal::Decimal::ZERO || drawdown > rust_decimal::Decimal::ONE {
                return Err(ConfigError::InvalidValue {
                    option: "risk.maxDrawdown",
                    message: format!("{drawdown} must be a fraction within [0, 1]"),
                });
            }
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.engine.shutdown_timeout_secs)
    }

    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            buffer_size: self.event_bus.buffer_size,
            overflow_policy: self.event_bus.overflow_policy,
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            interval: Duration::from_millis(self.order_sync.sync_interval_ms),
            batch_size: self.order_sync.batch_size,
            max_error_records: self.order_sync.max_error_records,
        }
    }

    pub fn account_config(&self) -> AccountPollConfig {
        AccountPollConfig {
            interval: Duration::from_secs(self.account_poll.interval_secs),
        }
    }

    pub fn state_config(&self) -> StateManagerConfig {
        StateManagerConfig {
            autosave_interval: Duration::from_secs(self.state_manager.autosave_interval_secs),
            cache_timeout: Duration::from_secs(self.state_manager.cache_timeout_secs),
            max_recovery_time: Duration::from_secs(self.state_manager.max_recovery_time_secs),
        }
    }

    pub fn poll_intervals(&self) -> PollIntervals {
        PollIntervals {
            ticker: Duration::from_millis(self.subscriptions.ticker_interval_ms),
            orderbook: Duration::from_millis(self.subscriptions.orderbook_interval_ms),
            trades: Duration::from_millis(self.subscriptions.trades_interval_ms),
            klines: Duration::from_millis(self.subscriptions.klines_interval_ms),
        }
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            error_threshold: self.strategy_runtime.error_threshold,
            error_window: Duration::from_secs(self.strategy_runtime.error_window_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.event_bus.buffer_size, 1024);
        assert_eq!(config.sync_config().interval, Duration::from_secs(5));
        assert_eq!(config.account_config().interval, Duration::from_secs(30));
        assert_eq!(
            config.state_config().cache_timeout,
            Duration::from_secs(300)
        );
    }

    #[test]
    fn test_from_json_overrides_and_validates() {
        let config = EngineConfig::from_json(
            r#"{
                "engine": {"shutdownTimeoutSecs": 10},
                "orderSync": {"syncIntervalMs": 2000, "batchSize": 3},
                "risk": {"max_position_size": "0.01"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.shutdown_timeout(), Duration::from_secs(10));
        assert_eq!(config.sync_config().interval, Duration::from_secs(2));
        assert_eq!(config.sync_config().batch_size, 3);
        assert_eq!(config.risk.max_position_size, Some(dec!(0.01)));

        let below_minimum =
            EngineConfig::from_json(r#"{"orderSync": {"syncIntervalMs": 500}}"#);
        assert!(below_minimum.is_err());
    }
}
