use crate::{
    DataError,
    event::MarketEvent,
    exchange::binance::message::{
        BinanceDepth, BinanceKlineEvent, BinanceKlineRow, BinanceRestTrade, BinanceTicker,
        BinanceWsTrade,
    },
    subscription::{DataType, KlineInterval, MarketDataConnector, SubscriptionKey, kline::Kline},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use riptide_instrument::{exchange::ExchangeId, symbol::Symbol};
use riptide_integration::channel::{Tx, UnboundedRx, mpsc_unbounded};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

/// Binance wire message types.
pub mod message;

const REST_TIMEOUT: Duration = Duration::from_secs(10);
const WS_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Binance market data connector serving both the spot and USD-margined
/// futures APIs, distinguished by base URLs.
#[derive(Debug, Clone)]
pub struct BinanceMarketData {
    exchange: ExchangeId,
    http: reqwest::Client,
    rest_url: Url,
    ws_url: Url,
}

impl BinanceMarketData {
    pub fn spot() -> Result<Self, DataError> {
        Self::new(
            ExchangeId::BinanceSpot,
            "https://api.binance.com/api/v3/",
            "wss://stream.binance.com:9443",
        )
    }

    pub fn futures_usd() -> Result<Self, DataError> {
        Self::new(
            ExchangeId::BinanceFuturesUsd,
            "https://fapi.binance.com/fapi/v1/",
            "wss://fstream.binance.com",
        )
    }

    /// Construct against custom base URLs, eg/ a testnet or local stub.
    pub fn new(
        exchange: ExchangeId,
        rest_url: &str,
        ws_url: &str,
    ) -> Result<Self, DataError> {
        Ok(Self {
            exchange,
            http: reqwest::Client::builder()
                .timeout(REST_TIMEOUT)
                .build()
                .map_err(|error| DataError::Upstream {
                    exchange,
                    message: error.to_string(),
                })?,
            rest_url: Url::parse(rest_url)
                .map_err(|error| DataError::InvalidPayload(error.to_string()))?,
            ws_url: Url::parse(ws_url)
                .map_err(|error| DataError::InvalidPayload(error.to_string()))?,
        })
    }

    fn venue_symbol(&self, symbol: &Symbol) -> String {
        self.exchange.encode_symbol(symbol).to_string()
    }

    /// Binance stream name for the provided key, eg/ `btcusdt@trade`.
    fn stream_name(&self, key: &SubscriptionKey) -> String {
        let symbol = self.venue_symbol(&key.symbol).to_lowercase();
        match &key.data_type {
            DataType::Ticker => format!("{symbol}@ticker"),
            DataType::OrderBook { depth } => format!("{symbol}@depth{depth}@100ms"),
            DataType::Trades => format!("{symbol}@trade"),
            DataType::Klines { interval } => format!("{symbol}@kline_{}", interval.as_str()),
        }
    }

    fn upstream_error(&self, error: impl std::fmt::Display) -> DataError {
        DataError::Upstream {
            exchange: self.exchange,
            message: error.to_string(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, DataError> {
        let url = self
            .rest_url
            .join(path)
            .map_err(|error| DataError::InvalidPayload(error.to_string()))?;

        self.http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|error| self.upstream_error(error))?
            .error_for_status()
            .map_err(|error| self.upstream_error(error))?
            .json()
            .await
            .map_err(|error| DataError::InvalidPayload(error.to_string()))
    }

    /// Fetch historical klines, oldest first.
    pub async fn fetch_klines(
        &self,
        symbol: &Symbol,
        interval: KlineInterval,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Kline>, DataError> {
        let mut query = vec![
            ("symbol", self.venue_symbol(symbol)),
            ("interval", interval.as_str().to_string()),
        ];
        if let Some(start) = start {
            query.push(("startTime", start.timestamp_millis().to_string()));
        }
        if let Some(end) = end {
            query.push(("endTime", end.timestamp_millis().to_string()));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }

        let rows: Vec<BinanceKlineRow> = self.get_json("klines", &query).await?;
        let now = Utc::now();
        Ok(rows
            .into_iter()
            .map(|row| row.into_kline(interval, now))
            .collect())
    }

    fn parse_ws_payload(
        &self,
        key: &SubscriptionKey,
        payload: &str,
    ) -> Result<MarketEvent, DataError> {
        let event = match &key.data_type {
            DataType::Ticker => {
                let ticker = serde_json::from_str::<BinanceTicker>(payload)
                    .map_err(|error| DataError::InvalidPayload(error.to_string()))?;
                MarketEvent::from((self.exchange, key.symbol.clone(), ticker))
            }
            DataType::OrderBook { .. } => {
                let depth = serde_json::from_str::<BinanceDepth>(payload)
                    .map_err(|error| DataError::InvalidPayload(error.to_string()))?;
                MarketEvent::from((self.exchange, key.symbol.clone(), depth))
            }
            DataType::Trades => {
                let trade = serde_json::from_str::<BinanceWsTrade>(payload)
                    .map_err(|error| DataError::InvalidPayload(error.to_string()))?;
                MarketEvent::from((self.exchange, key.symbol.clone(), trade))
            }
            DataType::Klines { .. } => {
                let kline = serde_json::from_str::<BinanceKlineEvent>(payload)
                    .map_err(|error| DataError::InvalidPayload(error.to_string()))?;
                MarketEvent::from((self.exchange, key.symbol.clone(), kline))
            }
        };
        Ok(event)
    }
}

#[async_trait]
impl MarketDataConnector for BinanceMarketData {
    fn exchange(&self) -> ExchangeId {
        self.exchange
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn supports_websocket(&self, _: &SubscriptionKey) -> bool {
        true
    }

    async fn stream_market_data(
        &self,
        key: &SubscriptionKey,
    ) -> Result<UnboundedRx<MarketEvent>, DataError> {
        let mut url = self.ws_url.clone();
        url.set_path(&format!("/ws/{}", self.stream_name(key)));

        let (ws, _) = tokio::time::timeout(
            WS_CONNECT_TIMEOUT,
            tokio_tungstenite::connect_async(url.as_str()),
        )
        .await
        .map_err(|_| self.upstream_error("websocket connect timed out"))?
        .map_err(|error| self.upstream_error(error))?;

        let (tx, rx) = mpsc_unbounded();
        let this = self.clone();
        let key = key.clone();

        tokio::spawn(async move {
            let (mut write, mut read) = ws.split();

            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(payload)) => {
                        match this.parse_ws_payload(&key, payload.as_str()) {
                            Ok(event) => {
                                if tx.send(event).is_err() {
                                    // Receiver gone: subscription was released
                                    break;
                                }
                            }
                            Err(error) => {
                                warn!(
                                    exchange = %this.exchange,
                                    symbol = %key.symbol,
                                    %error,
                                    "failed to parse binance market data payload"
                                );
                            }
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if write.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        debug!(
                            exchange = %this.exchange,
                            symbol = %key.symbol,
                            ?frame,
                            "binance closed market data stream"
                        );
                        break;
                    }
                    Ok(_) => {}
                    Err(error) => {
                        warn!(
                            exchange = %this.exchange,
                            symbol = %key.symbol,
                            %error,
                            "binance market data stream failed"
                        );
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn fetch_market_data(&self, key: &SubscriptionKey) -> Result<Vec<MarketEvent>, DataError> {
        let symbol = self.venue_symbol(&key.symbol);

        match &key.data_type {
            DataType::Ticker => {
                let ticker: BinanceTicker = self
                    .get_json("ticker/24hr", &[("symbol", symbol)])
                    .await?;
                Ok(vec![MarketEvent::from((
                    self.exchange,
                    key.symbol.clone(),
                    ticker,
                ))])
            }
            DataType::OrderBook { depth } => {
                let book: BinanceDepth = self
                    .get_json(
                        "depth",
                        &[("symbol", symbol), ("limit", depth.to_string())],
                    )
                    .await?;
                Ok(vec![MarketEvent::from((
                    self.exchange,
                    key.symbol.clone(),
                    book,
                ))])
            }
            DataType::Trades => {
                let trades: Vec<BinanceRestTrade> = self
                    .get_json("trades", &[("symbol", symbol), ("limit", "50".to_string())])
                    .await?;
                Ok(trades
                    .into_iter()
                    .map(|trade| MarketEvent::from((self.exchange, key.symbol.clone(), trade)))
                    .collect())
            }
            DataType::Klines { interval } => {
                let klines = self
                    .fetch_klines(&key.symbol, *interval, None, None, Some(2))
                    .await?;
                Ok(klines
                    .into_iter()
                    .map(|kline| MarketEvent {
                        time_exchange: kline.open_time,
                        time_received: Utc::now(),
                        exchange: self.exchange,
                        symbol: key.symbol.clone(),
                        sequence: Some(kline.open_time.timestamp_millis() as u64),
                        kind: kline.into(),
                    })
                    .collect())
            }
        }
    }
}
