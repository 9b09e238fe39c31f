#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    clippy::useless_let_if_seq,
    missing_debug_implementations,
    rust_2018_idioms,
    rust_2024_compatibility
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments)]

//! # Riptide-Risk
//! Pre-trade risk checks evaluated in front of the order manager. Every
//! order intent passes through [`RiskManager::check`] before it can reach an
//! exchange; violations are rejected and reported, they never reach the
//! venue.

use derive_more::Constructor;
use riptide_execution::order::request::OrderIntent;
use riptide_instrument::Side;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Hard limits applied to every order intent. `None` disables a check.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RiskLimits {
    /// Max absolute position per symbol, in base units, after the intent
    /// would execute in full.
    pub max_position_size: Option<Decimal>,
    /// Max realised loss per UTC day, in quote units (positive number).
    pub max_daily_loss: Option<Decimal>,
    /// Max peak-to-trough equity drawdown, as a fraction in `[0, 1]`.
    pub max_drawdown: Option<Decimal>,
    /// Max number of simultaneously open positions across all symbols.
    pub max_open_positions: Option<usize>,
    /// Max leverage on any single intent.
    pub max_leverage: Option<Decimal>,
}

/// Severity of a [`RiskViolation`]: `Critical` violations additionally
/// trigger an engine-wide emergency stop.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
    derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

/// Rejected order intent, with the limit and observed values that tripped.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
#[error("{kind} limit exceeded: observed {observed}, limit {limit}")]
pub struct RiskViolation {
    pub kind: RiskLimitKind,
    pub severity: Severity,
    pub observed: Decimal,
    pub limit: Decimal,
}

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
    derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLimitKind {
    #[display("max_position_size")]
    MaxPositionSize,
    #[display("max_daily_loss")]
    MaxDailyLoss,
    #[display("max_drawdown")]
    MaxDrawdown,
    #[display("max_open_positions")]
    MaxOpenPositions,
    #[display("max_leverage")]
    MaxLeverage,
}

/// Portfolio observations the checks are evaluated against.
#[derive(Debug, Clone, Default, Constructor)]
pub struct RiskContext {
    /// Current signed position in the intent's symbol (positive long).
    pub position_quantity: Decimal,
    /// Count of open positions across all symbols.
    pub open_positions: usize,
    /// Realised PnL for the current UTC day (negative = loss), quote units.
    pub daily_pnl: Decimal,
    /// Current peak-to-trough equity drawdown fraction in `[0, 1]`.
    pub drawdown: Decimal,
    /// Leverage the intent would execute at, where applicable.
    pub leverage: Option<Decimal>,
}

/// Thin filter in front of the order manager.
///
/// Position-shaped breaches (`max_position_size`, `max_open_positions`,
/// `max_leverage`) reject the single intent at `Warning` severity;
/// portfolio-damage breaches (`max_daily_loss`, `max_drawdown`) are
/// `Critical` and escalate to an emergency stop.
#[derive(Debug, Clone, Default, Constructor)]
pub struct RiskManager {
    limits: RiskLimits,
}

impl RiskManager {
    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Evaluate an intent. `Ok(())` clears it for the order manager.
    pub fn check(&self, intent: &OrderIntent, context: &RiskContext) -> Result<(), RiskViolation> {
        if let Some(limit) = self.limits.max_daily_loss {
            let loss = -context.daily_pnl;
            if loss > limit {
                return Err(self.violation(RiskLimitKind::MaxDailyLoss, Severity::Critical, loss, limit, intent));
            }
        }

        if let Some(limit) = self.limits.max_drawdown {
            if context.drawdown > limit {
                return Err(self.violation(
                    RiskLimitKind::MaxDrawdown,
                    Severity::Critical,
                    context.drawdown,
                    limit,
                    intent,
                ));
            }
        }

        if let Some(limit) = self.limits.max_position_size {
            let signed = match intent.side {
                Side::Buy => intent.quantity,
                Side::Sell => -intent.quantity,
            };
            let projected = (context.position_quantity + signed).abs();
            if projected > limit {
                return Err(self.violation(
                    RiskLimitKind::MaxPositionSize,
                    Severity::Warning,
                    projected,
                    limit,
                    intent,
                ));
            }
        }

        if let Some(limit) = self.limits.max_open_positions {
            // An intent that increases exposure in a flat symbol opens one more
            let opens_new = context.position_quantity.is_zero();
            let projected = context.open_positions + usize::from(opens_new);
            if projected > limit {
                return Err(self.violation(
                    RiskLimitKind::MaxOpenPositions,
                    Severity::Warning,
                    Decimal::from(projected as u64),
                    Decimal::from(limit as u64),
                    intent,
                ));
            }
        }

        if let (Some(limit), Some(leverage)) = (self.limits.max_leverage, context.leverage) {
            if leverage > limit {
                return Err(self.violation(
                    RiskLimitKind::MaxLeverage,
                    Severity::Warning,
                    leverage,
                    limit,
                    intent,
                ));
            }
        }

        Ok(())
    }

    fn violation(
        &self,
        kind: RiskLimitKind,
        severity: Severity,
        observed: Decimal,
        limit: Decimal,
        intent: &OrderIntent,
    ) -> RiskViolation {
        warn!(
            %kind,
            %severity,
            %observed,
            %limit,
            strategy = %intent.strategy,
            symbol = %intent.symbol,
            side = %intent.side,
            quantity = %intent.quantity,
            "order intent rejected by risk check"
        );
        RiskViolation {
            kind,
            severity,
            observed,
            limit,
        }
    }
}
