/// Binance market data connector - the reference venue implementation.
pub mod binance;

/// Shared deserialisation helpers for venue wire formats.
pub mod de {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer};

    /// Deserialize a `u64` milliseconds-since-epoch as a `DateTime<Utc>`.
    pub fn de_u64_epoch_ms_as_datetime_utc<'de, D>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Utc.timestamp_millis_opt(millis as i64)
            .single()
            .ok_or_else(|| serde::de::Error::custom("epoch ms out of range"))
    }

    /// Construct a `DateTime<Utc>` from milliseconds since the epoch.
    pub fn datetime_utc_from_epoch_ms(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}
