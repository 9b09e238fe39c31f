use crate::{
    books::{Level, OrderBook},
    event::MarketEvent,
    exchange::de::de_u64_epoch_ms_as_datetime_utc,
    subscription::{KlineInterval, kline::Kline, ticker::Ticker, trade::PublicTrade},
};
use chrono::{DateTime, Utc};
use riptide_instrument::{Side, exchange::ExchangeId, symbol::Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use smol_str::ToSmolStr;

/// Binance 24hr ticker message, shared by the websocket stream and the
/// `/ticker/24hr` REST endpoint via field aliases.
///
/// ### Raw Payload Examples
/// See docs: <https://binance-docs.github.io/apidocs/spot/en/#individual-symbol-ticker-streams>
/// ```json
/// {
///     "e":"24hrTicker","E":1649324825173,"s":"BTCUSDT",
///     "c":"50250.00","b":"50249.10","a":"50250.90",
///     "h":"51000.00","l":"49000.00","v":"1234.5","P":"1.27"
/// }
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct BinanceTicker {
    #[serde(
        alias = "E",
        alias = "closeTime",
        deserialize_with = "de_u64_epoch_ms_as_datetime_utc"
    )]
    pub time: DateTime<Utc>,
    #[serde(alias = "c", alias = "lastPrice", with = "rust_decimal::serde::str")]
    pub last_price: Decimal,
    #[serde(alias = "b", alias = "bidPrice", default, with = "rust_decimal::serde::str_option")]
    pub bid: Option<Decimal>,
    #[serde(alias = "a", alias = "askPrice", default, with = "rust_decimal::serde::str_option")]
    pub ask: Option<Decimal>,
    #[serde(alias = "h", alias = "highPrice", default, with = "rust_decimal::serde::str_option")]
    pub high: Option<Decimal>,
    #[serde(alias = "l", alias = "lowPrice", default, with = "rust_decimal::serde::str_option")]
    pub low: Option<Decimal>,
    #[serde(alias = "v", alias = "volume", default, with = "rust_decimal::serde::str_option")]
    pub volume: Option<Decimal>,
    #[serde(
        alias = "P",
        alias = "priceChangePercent",
        default,
        with = "rust_decimal::serde::str_option"
    )]
    pub price_change_percent: Option<Decimal>,
}

impl From<(ExchangeId, Symbol, BinanceTicker)> for MarketEvent {
    fn from((exchange, symbol, ticker): (ExchangeId, Symbol, BinanceTicker)) -> Self {
        MarketEvent {
            time_exchange: ticker.time,
            time_received: Utc::now(),
            exchange,
            symbol,
            sequence: None,
            kind: Ticker {
                last_price: ticker.last_price,
                bid: ticker.bid,
                ask: ticker.ask,
                high_24h: ticker.high,
                low_24h: ticker.low,
                volume_24h: ticker.volume,
                price_change_percent_24h: ticker.price_change_percent,
            }
            .into(),
        }
    }
}

/// Binance partial book depth, shared by the `<symbol>@depth<N>` stream and
/// the `/depth` REST endpoint.
///
/// ```json
/// {"lastUpdateId":160,"bids":[["50249.10","0.5"]],"asks":[["50250.90","0.7"]]}
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct BinanceDepth {
    #[serde(alias = "lastUpdateId")]
    pub last_update_id: u64,
    pub bids: Vec<BinanceLevel>,
    pub asks: Vec<BinanceLevel>,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct BinanceLevel(
    #[serde(with = "rust_decimal::serde::str")] pub Decimal,
    #[serde(with = "rust_decimal::serde::str")] pub Decimal,
);

impl From<BinanceLevel> for Level {
    fn from(BinanceLevel(price, amount): BinanceLevel) -> Self {
        Level::new(price, amount)
    }
}

impl From<(ExchangeId, Symbol, BinanceDepth)> for MarketEvent {
    fn from((exchange, symbol, depth): (ExchangeId, Symbol, BinanceDepth)) -> Self {
        let time = Utc::now();
        MarketEvent {
            time_exchange: time,
            time_received: time,
            exchange,
            symbol,
            sequence: Some(depth.last_update_id),
            kind: OrderBook::new(
                depth.last_update_id,
                depth.bids.into_iter().map(Level::from).collect(),
                depth.asks.into_iter().map(Level::from).collect(),
            )
            .into(),
        }
    }
}

/// Binance real-time trade message.
///
/// ```json
/// {
///     "e":"trade","E":1649324825173,"s":"BTCUSDT","t":1000000000,
///     "p":"50250.00","q":"0.239000","T":1649324825200,"m":false
/// }
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct BinanceWsTrade {
    #[serde(alias = "T", deserialize_with = "de_u64_epoch_ms_as_datetime_utc")]
    pub time: DateTime<Utc>,
    #[serde(alias = "t")]
    pub id: u64,
    #[serde(alias = "p", with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(alias = "q", with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    #[serde(alias = "m", deserialize_with = "de_side_from_buyer_is_maker")]
    pub side: Side,
}

/// Binance `/trades` REST payload item.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceRestTrade {
    pub id: u64,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub qty: Decimal,
    #[serde(deserialize_with = "de_u64_epoch_ms_as_datetime_utc")]
    pub time: DateTime<Utc>,
    pub is_buyer_maker: bool,
}

impl From<(ExchangeId, Symbol, BinanceWsTrade)> for MarketEvent {
    fn from((exchange, symbol, trade): (ExchangeId, Symbol, BinanceWsTrade)) -> Self {
        MarketEvent {
            time_exchange: trade.time,
            time_received: Utc::now(),
            exchange,
            symbol,
            sequence: Some(trade.id),
            kind: PublicTrade {
                id: trade.id.to_smolstr(),
                price: trade.price,
                amount: trade.amount,
                side: trade.side,
            }
            .into(),
        }
    }
}

impl From<(ExchangeId, Symbol, BinanceRestTrade)> for MarketEvent {
    fn from((exchange, symbol, trade): (ExchangeId, Symbol, BinanceRestTrade)) -> Self {
        MarketEvent {
            time_exchange: trade.time,
            time_received: Utc::now(),
            exchange,
            symbol,
            sequence: Some(trade.id),
            kind: PublicTrade {
                id: trade.id.to_smolstr(),
                price: trade.price,
                amount: trade.qty,
                side: if trade.is_buyer_maker {
                    Side::Sell
                } else {
                    Side::Buy
                },
            }
            .into(),
        }
    }
}

/// Binance websocket kline event wrapper.
///
/// ```json
/// {
///     "e":"kline","E":1649324825173,"s":"BTCUSDT",
///     "k":{
///         "t":1649324820000,"T":1649324879999,"s":"BTCUSDT","i":"1m",
///         "o":"50200.00","c":"50250.00","h":"50260.00","l":"50190.00",
///         "v":"12.5","x":false
///     }
/// }
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct BinanceKlineEvent {
    #[serde(alias = "E", deserialize_with = "de_u64_epoch_ms_as_datetime_utc")]
    pub time: DateTime<Utc>,
    #[serde(alias = "k")]
    pub kline: BinanceKline,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct BinanceKline {
    #[serde(alias = "t", deserialize_with = "de_u64_epoch_ms_as_datetime_utc")]
    pub open_time: DateTime<Utc>,
    #[serde(alias = "i", deserialize_with = "de_kline_interval")]
    pub interval: KlineInterval,
    #[serde(alias = "o", with = "rust_decimal::serde::str")]
    pub open: Decimal,
    #[serde(alias = "h", with = "rust_decimal::serde::str")]
    pub high: Decimal,
    #[serde(alias = "l", with = "rust_decimal::serde::str")]
    pub low: Decimal,
    #[serde(alias = "c", with = "rust_decimal::serde::str")]
    pub close: Decimal,
    #[serde(alias = "v", with = "rust_decimal::serde::str")]
    pub volume: Decimal,
    #[serde(alias = "x")]
    pub is_closed: bool,
}

impl From<(ExchangeId, Symbol, BinanceKlineEvent)> for MarketEvent {
    fn from((exchange, symbol, event): (ExchangeId, Symbol, BinanceKlineEvent)) -> Self {
        let BinanceKlineEvent { time, kline } = event;
        MarketEvent {
            time_exchange: time,
            time_received: Utc::now(),
            exchange,
            symbol,
            sequence: Some(kline.open_time.timestamp_millis() as u64),
            kind: Kline {
                interval: kline.interval,
                open_time: kline.open_time,
                open: kline.open,
                high: kline.high,
                low: kline.low,
                close: kline.close,
                volume: kline.volume,
                is_closed: kline.is_closed,
            }
            .into(),
        }
    }
}

/// Binance `/klines` REST row:
/// `[openTime, open, high, low, close, volume, closeTime, ...]`.
#[derive(Debug, Clone, Deserialize)]
pub struct BinanceKlineRow(
    pub i64,
    #[serde(with = "rust_decimal::serde::str")] pub Decimal,
    #[serde(with = "rust_decimal::serde::str")] pub Decimal,
    #[serde(with = "rust_decimal::serde::str")] pub Decimal,
    #[serde(with = "rust_decimal::serde::str")] pub Decimal,
    #[serde(with = "rust_decimal::serde::str")] pub Decimal,
    pub i64,
    #[serde(default)] pub serde_json::Value,
    #[serde(default)] pub serde_json::Value,
    #[serde(default)] pub serde_json::Value,
    #[serde(default)] pub serde_json::Value,
    #[serde(default)] pub serde_json::Value,
);

impl BinanceKlineRow {
    /// Whether the bar's close time has already passed, ie/ the bar is final.
    pub fn into_kline(self, interval: KlineInterval, now: DateTime<Utc>) -> Kline {
        let open_time = crate::exchange::de::datetime_utc_from_epoch_ms(self.0);
        let close_time = crate::exchange::de::datetime_utc_from_epoch_ms(self.6);
        Kline {
            interval,
            open_time,
            open: self.1,
            high: self.2,
            low: self.3,
            close: self.4,
            volume: self.5,
            is_closed: close_time <= now,
        }
    }
}

/// Deserialize Binance's `buyer_is_maker` boolean as a [`Side`]:
/// buyer_is_maker => the aggressor sold.
pub fn de_side_from_buyer_is_maker<'de, D>(deserializer: D) -> Result<Side, D::Error>
where
    D: Deserializer<'de>,
{
    bool::deserialize(deserializer).map(|buyer_is_maker| {
        if buyer_is_maker {
            Side::Sell
        } else {
            Side::Buy
        }
    })
}

/// Deserialize a Binance interval string (eg/ "1m") as a [`KlineInterval`].
pub fn de_kline_interval<'de, D>(deserializer: D) -> Result<KlineInterval, D::Error>
where
    D: Deserializer<'de>,
{
    let input = <&str as Deserialize>::deserialize(deserializer)?;
    match input {
        "1m" => Ok(KlineInterval::Minute1),
        "5m" => Ok(KlineInterval::Minute5),
        "15m" => Ok(KlineInterval::Minute15),
        "1h" => Ok(KlineInterval::Hour1),
        "4h" => Ok(KlineInterval::Hour4),
        "1d" => Ok(KlineInterval::Day1),
        other => Err(serde::de::Error::custom(format!(
            "unsupported kline interval: {other}"
        ))),
    }
}
