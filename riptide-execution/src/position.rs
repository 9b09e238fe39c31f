use riptide_instrument::symbol::Symbol;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a [`Position`], derived from the sign of its quantity.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
    derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum PositionSide {
    Long,
    Short,
    Flat,
}

/// Net position in one instrument.
///
/// `quantity` is signed: positive long, negative short. This is the single
/// sign convention used everywhere in the system - `side()` is derived from
/// it and never stored independently.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Position {
    pub symbol: Symbol,
    pub quantity: Decimal,
    pub avg_price: Decimal,
    pub mark_price: Decimal,
    /// Venue-reported unrealised PnL; derived from prices when absent.
    pub unrealized_pnl: Option<Decimal>,
    pub leverage: Option<Decimal>,
}

impl Position {
    pub fn flat(symbol: Symbol) -> Self {
        Self {
            symbol,
            quantity: Decimal::ZERO,
            avg_price: Decimal::ZERO,
            mark_price: Decimal::ZERO,
            unrealized_pnl: None,
            leverage: None,
        }
    }

    pub fn side(&self) -> PositionSide {
        if self.quantity.is_zero() {
            PositionSide::Flat
        } else if self.quantity > Decimal::ZERO {
            PositionSide::Long
        } else {
            PositionSide::Short
        }
    }

    /// Absolute position value at the mark price.
    pub fn notional(&self) -> Decimal {
        self.quantity.abs() * self.mark_price
    }

    /// Unrealised PnL: the venue-reported figure when present, otherwise
    /// `(mark_price - avg_price) * quantity` with the signed quantity.
    pub fn pnl(&self) -> Decimal {
        self.unrealized_pnl
            .unwrap_or_else(|| (self.mark_price - self.avg_price) * self.quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

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

    #[test]
    fn test_side_is_derived_from_quantity_sign() {
        assert_eq!(position(dec!(0.5), dec!(1), dec!(1)).side(), PositionSide::Long);
        assert_eq!(position(dec!(-0.5), dec!(1), dec!(1)).side(), PositionSide::Short);
        assert_eq!(position(dec!(0), dec!(1), dec!(1)).side(), PositionSide::Flat);
    }

    #[test]
    fn test_derived_pnl_uses_signed_quantity() {
        // Long 0.5 @ 50_000, marked 51_000: +500
        assert_eq!(position(dec!(0.5), dec!(50000), dec!(51000)).pnl(), dec!(500.0));
        // Short 0.5 @ 50_000, marked 51_000: -500
        assert_eq!(position(dec!(-0.5), dec!(50000), dec!(51000)).pnl(), dec!(-500.0));
    }

    #[test]
    fn test_exchange_reported_pnl_wins() {
        let mut position = position(dec!(0.5), dec!(50000), dec!(51000));
        position.unrealized_pnl = Some(dec!(123.45));
        assert_eq!(position.pnl(), dec!(123.45));
    }

    #[test]
    fn test_notional() {
        assert_eq!(
            position(dec!(-0.5), dec!(50000), dec!(51000)).notional(),
            dec!(25500.0)
        );
    }
}
