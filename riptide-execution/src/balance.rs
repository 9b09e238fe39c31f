use chrono::{DateTime, Utc};
use derive_more::Constructor;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Funds held in a single asset: `total` is always `free + locked`, so it is
/// computed rather than stored.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Default, Deserialize, Serialize,
    Constructor,
)]
pub struct Balance {
    pub free: Decimal,
    pub locked: Decimal,
}

impl Balance {
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

/// [`Balance`] of one asset at a point in time.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct AssetBalance {
    pub asset: SmolStr,
    pub balance: Balance,
    pub time_exchange: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_total_is_free_plus_locked() {
        let balance = Balance::new(dec!(1.5), dec!(0.25));
        assert_eq!(balance.total(), dec!(1.75));
        assert_eq!(Balance::default().total(), Decimal::ZERO);
    }
}
