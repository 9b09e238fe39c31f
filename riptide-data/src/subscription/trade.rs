use riptide_instrument::Side;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Normalised public trade.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct PublicTrade {
    pub id: SmolStr,
    pub price: Decimal,
    pub amount: Decimal,
    pub side: Side,
}
