use crate::subscription::KlineInterval;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Normalised kline (candlestick) bar.
///
/// `is_closed = false` means the bar is still forming; advisory only, it
/// must never drive an irreversible decision.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Kline {
    pub interval: KlineInterval,
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub is_closed: bool,
}
