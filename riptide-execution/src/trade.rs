use chrono::{DateTime, Utc};
use derive_more::Constructor;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Single execution against an order.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct Fill {
    pub price: Decimal,
    pub quantity: Decimal,
    pub fee: Option<Decimal>,
    pub fee_asset: Option<SmolStr>,
    pub time: DateTime<Utc>,
}
