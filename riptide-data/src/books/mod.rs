use derive_more::Constructor;
use riptide_integration::decimal::checked_div;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Normalised OrderBook [`Level`] - a price and the quantity resting at it.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Default, Deserialize, Serialize, Constructor,
)]
pub struct Level {
    pub price: Decimal,
    pub amount: Decimal,
}

impl<P, A> From<(P, A)> for Level
where
    P: Into<Decimal>,
    A: Into<Decimal>,
{
    fn from((price, amount): (P, A)) -> Self {
        Self::new(price.into(), amount.into())
    }
}

/// Normalised L2 order book snapshot: bids descending, asks ascending.
#[derive(Debug, Clone, Eq, PartialEq, Default, Deserialize, Serialize, Constructor)]
pub struct OrderBook {
    pub sequence: u64,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<&Level> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&Level> {
        self.asks.first()
    }

    /// Average of the best bid and ask prices.
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => checked_div(bid.price + ask.price, Decimal::TWO),
            _ => None,
        }
    }

    /// Truncate both sides to the top `depth` levels.
    pub fn truncated(&self, depth: usize) -> Self {
        Self {
            sequence: self.sequence,
            bids: self.bids.iter().copied().take(depth).collect(),
            asks: self.asks.iter().copied().take(depth).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn book() -> OrderBook {
        OrderBook::new(
            7,
            vec![Level::new(dec!(100), dec!(1)), Level::new(dec!(99), dec!(2))],
            vec![Level::new(dec!(101), dec!(1)), Level::new(dec!(102), dec!(3))],
        )
    }

    #[test]
    fn test_mid_price() {
        assert_eq!(book().mid_price(), Some(dec!(100.5)));
        assert_eq!(OrderBook::default().mid_price(), None);
    }

    #[test]
    fn test_truncated_keeps_top_levels() {
        let truncated = book().truncated(1);
        assert_eq!(truncated.bids, vec![Level::new(dec!(100), dec!(1))]);
        assert_eq!(truncated.asks, vec![Level::new(dec!(101), dec!(1))]);
        assert_eq!(truncated.sequence, 7);
    }
}
