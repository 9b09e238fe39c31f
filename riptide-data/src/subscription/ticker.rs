use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Normalised ticker: last traded price plus 24h aggregates.
#[derive(Debug, Clone, Eq, PartialEq, Default, Deserialize, Serialize)]
pub struct Ticker {
    pub last_price: Decimal,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub high_24h: Option<Decimal>,
    pub low_24h: Option<Decimal>,
    pub volume_24h: Option<Decimal>,
    pub price_change_percent_24h: Option<Decimal>,
}

impl Ticker {
    pub fn from_last_price(last_price: Decimal) -> Self {
        Self {
            last_price,
            ..Default::default()
        }
    }
}
