use crate::{
    error::StrategyError,
    strategy::{
        DataRequirement, InitialData, InitialDataRequirements, MarketData, RecoveryContext,
        SignalAction, Strategy, StrategyParameters, StrategyResult, StrategyStateData,
        SubscriptionRequirements,
    },
};
use riptide_data::subscription::KlineInterval;
use riptide_execution::order::id::StrategyId;
use riptide_instrument::{exchange::ExchangeId, symbol::Symbol};
use rust_decimal::Decimal;
use serde_json::json;

/// Simple-moving-average crossover over closed klines.
///
/// Buys when the fast average crosses above the slow one, sells the held
/// quantity back when it crosses below. Forming bars are ignored, so a
/// signal can only fire once per closed bar.
#[derive(Debug)]
pub struct SmaCrossStrategy {
    id: StrategyId,
    exchange: ExchangeId,
    symbol: Symbol,
    interval: KlineInterval,
    fast_period: usize,
    slow_period: usize,
    quantity: Decimal,
    in_position: bool,
    /// Sign of `fast - slow` after the previous closed bar.
    last_relation: Option<i8>,
}

impl SmaCrossStrategy {
    pub fn new(
        id: StrategyId,
        exchange: ExchangeId,
        symbol: Symbol,
        interval: KlineInterval,
    ) -> Self {
        Self {
            id,
            exchange,
            symbol,
            interval,
            fast_period: 0,
            slow_period: 0,
            quantity: Decimal::ZERO,
            in_position: false,
            last_relation: None,
        }
    }

    fn sma(closes: &[Decimal], period: usize) -> Option<Decimal> {
        if closes.len() < period || period == 0 {
            return None;
        }
        let sum: Decimal = closes[closes.len() - period..].iter().copied().sum();
        riptide_integration::decimal::checked_div(sum, Decimal::from(period as u64))
    }
}

impl Strategy for SmaCrossStrategy {
    fn id(&self) -> StrategyId {
        self.id.clone()
    }

    fn subscription_requirements(&self) -> SubscriptionRequirements {
        SubscriptionRequirements {
            exchange: self.exchange,
            symbol: self.symbol.clone(),
            data: vec![DataRequirement::Klines {
                interval: self.interval,
                limit: self.slow_period.max(1) * 2,
            }],
        }
    }

    fn initial_data_requirements(&self) -> InitialDataRequirements {
        InitialDataRequirements {
            klines: vec![(self.interval, self.slow_period.max(1) * 2)],
        }
    }

    fn initialize(
        &mut self,
        parameters: &StrategyParameters,
        initial: &InitialData,
    ) -> Result<(), StrategyError> {
        self.fast_period = parameters.require_positive_integer("fast_period")?;
        self.slow_period = parameters.require_positive_integer("slow_period")?;
        self.quantity = parameters.require_decimal("quantity")?;

        if self.fast_period >= self.slow_period {
            return Err(StrategyError::InvalidParameter {
                parameter: "fast_period".to_string(),
                message: format!(
                    "fast period {} must be below slow period {}",
                    self.fast_period, self.slow_period
                ),
            });
        }

        // Prime the crossover memory from history so the first live bar
        // cannot fire a stale signal
        if let Some(history) = initial.klines.get(&self.interval) {
            let closes: Vec<Decimal> = history
                .iter()
                .filter(|kline| kline.is_closed)
                .map(|kline| kline.close)
                .collect();
            if let (Some(fast), Some(slow)) = (
                Self::sma(&closes, self.fast_period),
                Self::sma(&closes, self.slow_period),
            ) {
                self.last_relation = Some(relation(fast, slow));
            }
        }

        Ok(())
    }

    fn analyze(&mut self, market_data: &MarketData) -> Result<StrategyResult, StrategyError> {
        let closes: Vec<Decimal> = market_data
            .closed_klines(self.interval)
            .iter()
            .map(|kline| kline.close)
            .collect();

        let (Some(fast), Some(slow)) = (
            Self::sma(&closes, self.fast_period),
            Self::sma(&closes, self.slow_period),
        ) else {
            return Ok(StrategyResult::hold());
        };

        let current = relation(fast, slow);
        let previous = self.last_relation.replace(current);

        let action = match previous {
            Some(previous) if previous <= 0 && current > 0 && !self.in_position => {
                self.in_position = true;
                SignalAction::Buy
            }
            Some(previous) if previous >= 0 && current < 0 && self.in_position => {
                self.in_position = false;
                SignalAction::Sell
            }
            _ => SignalAction::Hold,
        };

        if action == SignalAction::Hold {
            return Ok(StrategyResult::hold());
        }

        Ok(StrategyResult {
            action,
            quantity: Some(self.quantity),
            price: None,
            confidence: riptide_integration::decimal::checked_div((fast - slow).abs(), slow),
            reason: Some(format!("fast sma {fast} crossed slow sma {slow}")),
            ..StrategyResult::default()
        })
    }

    fn save_state(&self) -> StrategyStateData {
        let mut data = StrategyStateData::default();
        data.internal
            .insert("in_position".to_string(), json!(self.in_position));
        if let Some(relation) = self.last_relation {
            data.internal
                .insert("last_relation".to_string(), json!(relation));
        }
        data
    }

    fn restore_state(&mut self, snapshot: &StrategyStateData) {
        if let Some(in_position) = snapshot.internal.get("in_position").and_then(|v| v.as_bool()) {
            self.in_position = in_position;
        }
        self.last_relation = snapshot
            .internal
            .get("last_relation")
            .and_then(|v| v.as_i64())
            .map(|v| v as i8);
    }

    fn set_recovery_context(&mut self, context: &RecoveryContext) {
        // Exchange truth wins over whatever the snapshot believed
        self.in_position = context.position > Decimal::ZERO;
    }

    fn cleanup(&mut self) {}
}

fn relation(fast: Decimal, slow: Decimal) -> i8 {
    match fast.cmp(&slow) {
        std::cmp::Ordering::Greater => 1,
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeDelta, Utc};
    use riptide_data::subscription::kline::Kline;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::collections::HashMap;

    fn strategy() -> SmaCrossStrategy {
        let mut strategy = SmaCrossStrategy::new(
            StrategyId::new("sma_1"),
            ExchangeId::Mock,
            "BTC/USDT".parse().unwrap(),
            KlineInterval::Minute1,
        );
        strategy
            .initialize(
                &StrategyParameters(HashMap::from([
                    ("fast_period".to_string(), json!(2)),
                    ("slow_period".to_string(), json!(3)),
                    ("quantity".to_string(), json!("0.01")),
                ])),
                &InitialData::default(),
            )
            .unwrap();
        strategy
    }

    fn market_data(closes: &[Decimal]) -> MarketData {
        let klines = closes
            .iter()
            .enumerate()
            .map(|(index, close)| Kline {
                interval: KlineInterval::Minute1,
                open_time: DateTime::<Utc>::MIN_UTC + TimeDelta::seconds(60 * index as i64),
                open: *close,
                high: *close,
                low: *close,
                close: *close,
                volume: dec!(1),
                is_closed: true,
            })
            .collect();

        let mut data = MarketData::default();
        data.klines.insert(KlineInterval::Minute1, klines);
        data
    }

    #[test]
    fn test_buy_on_upward_cross_then_sell_on_downward() {
        let mut strategy = strategy();

        // Downtrend: fast below slow
        let result = strategy.analyze(&market_data(&[dec!(103), dec!(102), dec!(101)])).unwrap();
        assert!(result.is_hold());

        // Reversal: fast crosses above slow
        let result = strategy
            .analyze(&market_data(&[dec!(103), dec!(102), dec!(101), dec!(105), dec!(108)]))
            .unwrap();
        assert_eq!(result.action, SignalAction::Buy);
        assert_eq!(result.quantity, Some(dec!(0.01)));

        // Still above: no duplicate signal
        let result = strategy
            .analyze(&market_data(&[dec!(102), dec!(101), dec!(105), dec!(108), dec!(109)]))
            .unwrap();
        assert!(result.is_hold());

        // Cross back below while long: sell
        let result = strategy
            .analyze(&market_data(&[dec!(105), dec!(108), dec!(109), dec!(100), dec!(95)]))
            .unwrap();
        assert_eq!(result.action, SignalAction::Sell);
    }

    #[test]
    fn test_insufficient_history_holds() {
        let mut strategy = strategy();
        let result = strategy.analyze(&market_data(&[dec!(100), dec!(101)])).unwrap();
        assert!(result.is_hold());
    }

    #[test]
    fn test_save_restore_round_trip_is_identity() {
        let mut original = strategy();
        original
            .analyze(&market_data(&[dec!(103), dec!(102), dec!(101), dec!(105), dec!(108)]))
            .unwrap();
        assert!(original.in_position);

        let saved = original.save_state();

        let mut restored = strategy();
        restored.restore_state(&saved);
        assert_eq!(restored.in_position, original.in_position);
        assert_eq!(restored.last_relation, original.last_relation);
        assert_eq!(restored.save_state(), saved);
    }

    #[test]
    fn test_recovery_context_overrides_position_memory() {
        let mut strategy = strategy();
        strategy.in_position = true;

        strategy.set_recovery_context(&RecoveryContext {
            position: Decimal::ZERO,
            average_price: None,
            open_orders: vec![],
        });
        assert!(!strategy.in_position);
    }

    #[test]
    fn test_invalid_periods_rejected() {
        let mut strategy = SmaCrossStrategy::new(
            StrategyId::new("sma_1"),
            ExchangeId::Mock,
            "BTC/USDT".parse().unwrap(),
            KlineInterval::Minute1,
        );
        let result = strategy.initialize(
            &StrategyParameters(HashMap::from([
                ("fast_period".to_string(), json!(5)),
                ("slow_period".to_string(), json!(3)),
                ("quantity".to_string(), json!("0.01")),
            ])),
            &InitialData::default(),
        );
        assert!(result.is_err());
    }
}
