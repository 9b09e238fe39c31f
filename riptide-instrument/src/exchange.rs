use crate::symbol::Symbol;
use serde::{Deserialize, Serialize};
use smol_str::{SmolStr, format_smolstr};

/// Unique identifier for a trading venue.
///
/// ### Notes
/// A venue may run distinct servers for different market types. For example,
/// BinanceSpot and BinanceFuturesUsd have distinct APIs, and are therefore
/// represented as unique variants.
#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Deserialize,
    Serialize,
    derive_more::Display,
)]
#[serde(rename = "exchange", rename_all = "snake_case")]
pub enum ExchangeId {
    Other,
    Mock,
    BinanceSpot,
    BinanceFuturesUsd,
    BybitSpot,
    BybitPerpetualsUsd,
    Coinbase,
    Kraken,
    Okx,
}

impl ExchangeId {
    /// Return the &str representation of this [`ExchangeId`].
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::Other => "other",
            ExchangeId::Mock => "mock",
            ExchangeId::BinanceSpot => "binance_spot",
            ExchangeId::BinanceFuturesUsd => "binance_futures_usd",
            ExchangeId::BybitSpot => "bybit_spot",
            ExchangeId::BybitPerpetualsUsd => "bybit_perpetuals_usd",
            ExchangeId::Coinbase => "coinbase",
            ExchangeId::Kraken => "kraken",
            ExchangeId::Okx => "okx",
        }
    }

    /// Whether the venue natively supports streaming market data over
    /// websocket. Venues that do not are served by REST polling fallback.
    pub fn supports_websocket(&self) -> bool {
        !matches!(self, ExchangeId::Other)
    }

    /// Produce this venue's spelling of the provided canonical [`Symbol`].
    ///
    /// This is a pure function: the canonical form is the single source of
    /// truth and venue encodings are derived, never stored.
    ///
    /// eg/ `BTC/USDT` -> `BTCUSDT` (Binance), `BTC-USDT` (Okx spot)
    /// eg/ `BTC/USDT:USDT` -> `BTCUSDT` (Binance futures), `BTC-USDT-SWAP` (Okx)
    pub fn encode_symbol(&self, symbol: &Symbol) -> SmolStr {
        let base = symbol.base().to_uppercase();
        let quote = symbol.quote().to_uppercase();

        match self {
            ExchangeId::BinanceSpot
            | ExchangeId::BinanceFuturesUsd
            | ExchangeId::BybitSpot
            | ExchangeId::BybitPerpetualsUsd
            | ExchangeId::Mock
            | ExchangeId::Other => format_smolstr!("{base}{quote}"),
            ExchangeId::Coinbase | ExchangeId::Kraken => {
                format_smolstr!("{base}-{quote}")
            }
            ExchangeId::Okx => {
                if symbol.is_perpetual() {
                    format_smolstr!("{base}-{quote}-SWAP")
                } else {
                    format_smolstr!("{base}-{quote}")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_symbol() {
        struct TestCase {
            exchange: ExchangeId,
            input: Symbol,
            expected: &'static str,
        }

        let cases = vec![
            TestCase {
                exchange: ExchangeId::BinanceSpot,
                input: "BTC/USDT".parse().unwrap(),
                expected: "BTCUSDT",
            },
            TestCase {
                exchange: ExchangeId::BinanceFuturesUsd,
                input: "BTC/USDT:USDT".parse().unwrap(),
                expected: "BTCUSDT",
            },
            TestCase {
                exchange: ExchangeId::Okx,
                input: "BTC/USDT:USDT".parse().unwrap(),
                expected: "BTC-USDT-SWAP",
            },
            TestCase {
                exchange: ExchangeId::Okx,
                input: "eth/usdt".parse().unwrap(),
                expected: "ETH-USDT",
            },
            TestCase {
                exchange: ExchangeId::Coinbase,
                input: "BTC/USD".parse().unwrap(),
                expected: "BTC-USD",
            },
        ];

        for (index, test) in cases.into_iter().enumerate() {
            assert_eq!(
                test.exchange.encode_symbol(&test.input),
                test.expected,
                "TC{index} failed"
            );
        }
    }
}
