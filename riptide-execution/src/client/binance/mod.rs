use crate::{
    balance::{AssetBalance, Balance},
    client::{AccountUpdate, ExchangeConnector},
    error::ExchangeError,
    order::{
        Order, OrderKind, OrderStatus, TimeInForce,
        id::{ClientOrderId, OrderId, StrategyId},
        request::OrderIntent,
    },
    position::Position,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use futures::{SinkExt, StreamExt};
use riptide_data::{
    DataError,
    event::MarketEvent,
    exchange::{binance::BinanceMarketData, de::de_u64_epoch_ms_as_datetime_utc},
    subscription::{KlineInterval, MarketDataConnector, SubscriptionKey, kline::Kline},
};
use riptide_instrument::{Side, exchange::ExchangeId, symbol::Symbol};
use riptide_integration::{
    channel::{Tx, UnboundedRx, mpsc_unbounded},
    snapshot::Snapshot,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use self::signer::{BinanceSigner, HEADER_API_KEY, canonical_query};
use smol_str::{SmolStr, ToSmolStr};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

/// HMAC-SHA256 request signing.
pub mod signer;

const REST_TIMEOUT: Duration = Duration::from_secs(10);
const ORDER_TIMEOUT: Duration = Duration::from_secs(20);
const WS_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const LISTEN_KEY_KEEPALIVE: Duration = Duration::from_secs(30 * 60);
const RECV_WINDOW_MS: u64 = 5_000;

/// Binance API credentials.
#[derive(Debug, Clone)]
pub struct BinanceCredentials {
    pub api_key: String,
    pub secret: String,
}

/// Binance execution adapter (spot).
///
/// Market data is served by the embedded [`BinanceMarketData`] connector;
/// account and order operations use the signed REST API plus the user data
/// stream.
#[derive(Debug, Clone)]
pub struct BinanceConnector {
    exchange: ExchangeId,
    market: BinanceMarketData,
    http: reqwest::Client,
    rest_url: Url,
    ws_url: Url,
    signer: BinanceSigner,
    /// Venue spelling -> canonical symbol, for decoding inbound payloads.
    symbols: FnvHashMap<SmolStr, Symbol>,
    connected: Arc<AtomicBool>,
}

impl BinanceConnector {
    pub fn spot(
        credentials: BinanceCredentials,
        instruments: impl IntoIterator<Item = Symbol>,
    ) -> Result<Self, ExchangeError> {
        Self::new(
            ExchangeId::BinanceSpot,
            credentials,
            instruments,
            "https://api.binance.com/api/v3/",
            "wss://stream.binance.com:9443",
        )
    }

    /// Construct against custom base URLs, eg/ the spot testnet.
    pub fn new(
        exchange: ExchangeId,
        credentials: BinanceCredentials,
        instruments: impl IntoIterator<Item = Symbol>,
        rest_url: &str,
        ws_url: &str,
    ) -> Result<Self, ExchangeError> {
        let market = BinanceMarketData::new(exchange, rest_url, ws_url)
            .map_err(|error| ExchangeError::unknown(exchange, error.to_string()))?;

        Ok(Self {
            exchange,
            market,
            http: reqwest::Client::builder()
                .timeout(REST_TIMEOUT)
                .build()
                .map_err(|error| ExchangeError::unknown(exchange, error.to_string()))?,
            rest_url: Url::parse(rest_url)
                .map_err(|error| ExchangeError::unknown(exchange, error.to_string()))?,
            ws_url: Url::parse(ws_url)
                .map_err(|error| ExchangeError::unknown(exchange, error.to_string()))?,
            signer: BinanceSigner::new(credentials.api_key, credentials.secret),
            symbols: instruments
                .into_iter()
                .map(|symbol| (exchange.encode_symbol(&symbol), symbol))
                .collect(),
            connected: Arc::new(AtomicBool::new(false)),
        })
    }

    fn decode_symbol(&self, venue: &str) -> Result<Symbol, ExchangeError> {
        self.symbols
            .get(venue)
            .cloned()
            .ok_or_else(|| ExchangeError::bad_symbol(self.exchange, venue))
    }

    fn map_http_error(&self, status: reqwest::StatusCode, body: &str) -> ExchangeError {
        let message = serde_json::from_str::<BinanceApiError>(body)
            .map(|error| error.msg)
            .unwrap_or_else(|_| body.to_string());

        match status.as_u16() {
            401 | 403 => ExchangeError::auth(self.exchange, message),
            418 | 429 => ExchangeError::rate_limit(self.exchange, message),
            500..=599 => ExchangeError::network(self.exchange, message),
            _ if message.contains("Invalid symbol") => {
                ExchangeError::bad_symbol(self.exchange, message)
            }
            _ => ExchangeError::unknown(self.exchange, message),
        }
    }

    /// Execute a signed request against the provided path, with parameters
    /// in canonical order.
    async fn signed_request<'a, T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        params: impl IntoIterator<Item = (&'a str, String)>,
        timeout: Duration,
    ) -> Result<T, ExchangeError> {
        let mut params: Vec<(&str, String)> = params.into_iter().collect();
        params.push(("recvWindow", RECV_WINDOW_MS.to_string()));
        params.push(("timestamp", Utc::now().timestamp_millis().to_string()));

        let query = self.signer.signed_query(canonical_query(params));

        let mut url = self
            .rest_url
            .join(path)
            .map_err(|error| ExchangeError::unknown(self.exchange, error.to_string()))?;
        url.set_query(Some(&query));

        let response = tokio::time::timeout(
            timeout,
            self.http
                .request(method, url)
                .header(HEADER_API_KEY, &self.signer.api_key)
                .send(),
        )
        .await
        .map_err(|_| ExchangeError::network(self.exchange, "request timed out"))?
        .map_err(|error| ExchangeError::network(self.exchange, error.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| ExchangeError::network(self.exchange, error.to_string()))?;

        if !status.is_success() {
            return Err(self.map_http_error(status, &body));
        }

        serde_json::from_str(&body)
            .map_err(|error| ExchangeError::unknown(self.exchange, error.to_string()))
    }
}

#[async_trait]
impl MarketDataConnector for BinanceConnector {
    fn exchange(&self) -> ExchangeId {
        self.exchange
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn supports_websocket(&self, key: &SubscriptionKey) -> bool {
        self.market.supports_websocket(key)
    }

    async fn stream_market_data(
        &self,
        key: &SubscriptionKey,
    ) -> Result<UnboundedRx<MarketEvent>, DataError> {
        self.market.stream_market_data(key).await
    }

    async fn fetch_market_data(&self, key: &SubscriptionKey) -> Result<Vec<MarketEvent>, DataError> {
        self.market.fetch_market_data(key).await
    }
}

#[async_trait]
impl ExchangeConnector for BinanceConnector {
    async fn connect(&self) -> Result<(), ExchangeError> {
        let url = self
            .rest_url
            .join("ping")
            .map_err(|error| ExchangeError::unknown(self.exchange, error.to_string()))?;

        self.http
            .get(url)
            .send()
            .await
            .map_err(|error| ExchangeError::network(self.exchange, error.to_string()))?
            .error_for_status()
            .map_err(|error| ExchangeError::network(self.exchange, error.to_string()))?;

        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ExchangeError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn account_stream(&self) -> Result<UnboundedRx<AccountUpdate>, ExchangeError> {
        // Obtain a listen key; authenticated via header only
        let url = self
            .rest_url
            .join("userDataStream")
            .map_err(|error| ExchangeError::unknown(self.exchange, error.to_string()))?;

        let response: BinanceListenKey = self
            .http
            .post(url.clone())
            .header(HEADER_API_KEY, &self.signer.api_key)
            .send()
            .await
            .map_err(|error| ExchangeError::network(self.exchange, error.to_string()))?
            .json()
            .await
            .map_err(|error| ExchangeError::unknown(self.exchange, error.to_string()))?;

        let mut ws_url = self.ws_url.clone();
        ws_url.set_path(&format!("/ws/{}", response.listen_key));

        let (ws, _) = tokio::time::timeout(
            WS_CONNECT_TIMEOUT,
            tokio_tungstenite::connect_async(ws_url.as_str()),
        )
        .await
        .map_err(|_| ExchangeError::network(self.exchange, "user stream connect timed out"))?
        .map_err(|error| ExchangeError::network(self.exchange, error.to_string()))?;

        let (tx, rx) = mpsc_unbounded();
        let this = self.clone();
        let listen_key = response.listen_key.clone();

        // Keepalive: Binance expires listen keys after 60 minutes idle
        let keepalive = self.http.clone();
        let keepalive_url = url;
        let keepalive_api_key = self.signer.api_key.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(LISTEN_KEY_KEEPALIVE);
            interval.tick().await;
            loop {
                interval.tick().await;
                let result = keepalive
                    .put(keepalive_url.clone())
                    .header(HEADER_API_KEY, &keepalive_api_key)
                    .query(&[("listenKey", listen_key.as_str())])
                    .send()
                    .await;
                if let Err(error) = result {
                    warn!(%error, "binance listen key keepalive failed");
                }
            }
        });

        tokio::spawn(async move {
            let (mut write, mut read) = ws.split();

            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(payload)) => {
                        match this.parse_user_event(payload.as_str()) {
                            Ok(Some(update)) => {
                                if tx.send(update).is_err() {
                                    break;
                                }
                            }
                            Ok(None) => {}
                            Err(error) => {
                                warn!(%error, "failed to parse binance user stream payload");
                            }
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if write.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "binance closed user data stream");
                        break;
                    }
                    Ok(_) => {}
                    Err(error) => {
                        warn!(%error, "binance user data stream failed");
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn get_order(
        &self,
        symbol: &Symbol,
        id: Option<&OrderId>,
        client_order_id: Option<&ClientOrderId>,
    ) -> Result<Order, ExchangeError> {
        let mut params = vec![("symbol", self.exchange.encode_symbol(symbol).to_string())];
        match (id, client_order_id) {
            (Some(id), _) => params.push(("orderId", id.0.to_string())),
            (None, Some(cid)) => params.push(("origClientOrderId", cid.0.to_string())),
            (None, None) => {
                return Err(ExchangeError::unknown(
                    self.exchange,
                    "get_order requires an order id or client order id",
                ));
            }
        }

        let response: BinanceOrderResponse = self
            .signed_request(reqwest::Method::GET, "order", params, REST_TIMEOUT)
            .await?;

        self.order_from_response(response)
    }

    async fn place_order(&self, intent: &OrderIntent) -> Result<Order, ExchangeError> {
        intent
            .validate()
            .map_err(|message| ExchangeError::unknown(self.exchange, message))?;

        let mut params = vec![
            ("symbol", self.exchange.encode_symbol(&intent.symbol).to_string()),
            ("side", binance_side(intent.side).to_string()),
            ("type", binance_order_kind(intent.kind).to_string()),
        ];
        if intent.kind != OrderKind::Market {
            params.push(("timeInForce", binance_tif(intent.time_in_force).to_string()));
        }
        params.push(("quantity", intent.quantity.to_string()));
        if let Some(price) = intent.price {
            params.push(("price", price.to_string()));
        }
        if let Some(stop_price) = intent.stop_price {
            params.push(("stopPrice", stop_price.to_string()));
        }
        params.push(("newClientOrderId", intent.client_order_id.0.to_string()));
        params.push(("newOrderRespType", "RESULT".to_string()));

        let response: BinanceOrderResponse = self
            .signed_request(reqwest::Method::POST, "order", params, ORDER_TIMEOUT)
            .await?;

        let mut order = self.order_from_response(response)?;
        order.strategy = Some(intent.strategy.clone());
        Ok(order)
    }

    async fn cancel_order(&self, symbol: &Symbol, id: &OrderId) -> Result<Order, ExchangeError> {
        let params = vec![
            ("symbol", self.exchange.encode_symbol(symbol).to_string()),
            ("orderId", id.0.to_string()),
        ];

        let response: BinanceOrderResponse = self
            .signed_request(reqwest::Method::DELETE, "order", params, REST_TIMEOUT)
            .await?;

        self.order_from_response(response)
    }

    async fn get_balances(&self) -> Result<Vec<AssetBalance>, ExchangeError> {
        let response: BinanceAccount = self
            .signed_request(reqwest::Method::GET, "account", std::iter::empty(), REST_TIMEOUT)
            .await?;

        let time = Utc::now();
        Ok(response
            .balances
            .into_iter()
            .filter(|balance| !balance.free.is_zero() || !balance.locked.is_zero())
            .map(|balance| {
                AssetBalance::new(
                    balance.asset,
                    Balance::new(balance.free, balance.locked),
                    time,
                )
            })
            .collect())
    }

    async fn get_positions(&self) -> Result<Vec<Position>, ExchangeError> {
        // Spot carries no derivative positions
        Ok(vec![])
    }

    async fn get_klines(
        &self,
        symbol: &Symbol,
        interval: KlineInterval,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Kline>, ExchangeError> {
        self.market
            .fetch_klines(symbol, interval, start, end, limit)
            .await
            .map_err(|error| ExchangeError::network(self.exchange, error.to_string()))
    }
}

impl BinanceConnector {
    fn order_from_response(&self, response: BinanceOrderResponse) -> Result<Order, ExchangeError> {
        let symbol = self.decode_symbol(&response.symbol)?;
        let average_price = average_price(
            response.cummulative_quote_qty,
            response.executed_qty,
        );

        Ok(Order {
            id: OrderId(response.order_id.to_smolstr()),
            client_order_id: Some(ClientOrderId::new(response.client_order_id)),
            symbol,
            exchange: self.exchange,
            strategy: None,
            side: response.side,
            kind: response.kind,
            time_in_force: response.time_in_force,
            quantity: response.orig_qty,
            price: (!response.price.is_zero()).then_some(response.price),
            stop_price: None,
            status: response.status,
            executed_quantity: response.executed_qty,
            cumulative_quote_quantity: response.cummulative_quote_qty,
            average_price,
            timestamp: response.time.unwrap_or_else(Utc::now),
            update_time: response.update_time.or(response.time).unwrap_or_else(Utc::now),
            fills: vec![],
        })
    }

    fn parse_user_event(&self, payload: &str) -> Result<Option<AccountUpdate>, ExchangeError> {
        let event: BinanceUserEvent = serde_json::from_str(payload)
            .map_err(|error| ExchangeError::unknown(self.exchange, error.to_string()))?;

        match event {
            BinanceUserEvent::ExecutionReport(report) => {
                let symbol = self.decode_symbol(&report.symbol)?;
                let average_price =
                    average_price(report.cumulative_quote_qty, report.cumulative_filled_qty);

                let order = Order {
                    id: OrderId(report.order_id.to_smolstr()),
                    client_order_id: Some(ClientOrderId::new(report.client_order_id)),
                    symbol,
                    exchange: self.exchange,
                    // Populated from local state by the reconciling consumer
                    strategy: None::<StrategyId>,
                    side: report.side,
                    kind: report.kind,
                    time_in_force: report.time_in_force,
                    quantity: report.orig_qty,
                    price: (!report.price.is_zero()).then_some(report.price),
                    stop_price: (!report.stop_price.is_zero()).then_some(report.stop_price),
                    status: report.status,
                    executed_quantity: report.cumulative_filled_qty,
                    cumulative_quote_quantity: report.cumulative_quote_qty,
                    average_price,
                    timestamp: report.order_creation_time,
                    update_time: report.transaction_time,
                    fills: vec![],
                };

                Ok(Some(AccountUpdate::Order(Snapshot(order))))
            }
            BinanceUserEvent::AccountPosition(account) => {
                let time = account.time;
                Ok(Some(AccountUpdate::Balances(
                    account
                        .balances
                        .into_iter()
                        .map(|balance| {
                            AssetBalance::new(
                                balance.asset,
                                Balance::new(balance.free, balance.locked),
                                time,
                            )
                        })
                        .collect(),
                )))
            }
            BinanceUserEvent::Other => Ok(None),
        }
    }
}

fn binance_side(side: Side) -> &'static str {
    match side {
        Side::Buy => "BUY",
        Side::Sell => "SELL",
    }
}

fn binance_order_kind(kind: OrderKind) -> &'static str {
    match kind {
        OrderKind::Market => "MARKET",
        OrderKind::Limit => "LIMIT",
        OrderKind::StopLoss => "STOP_LOSS",
        OrderKind::StopLossLimit => "STOP_LOSS_LIMIT",
        OrderKind::TakeProfit => "TAKE_PROFIT",
        OrderKind::TakeProfitLimit => "TAKE_PROFIT_LIMIT",
    }
}

fn binance_tif(time_in_force: TimeInForce) -> &'static str {
    match time_in_force {
        TimeInForce::Gtc => "GTC",
        TimeInForce::Ioc => "IOC",
        TimeInForce::Fok => "FOK",
    }
}

fn average_price(cumulative_quote: Decimal, executed: Decimal) -> Option<Decimal> {
    riptide_integration::decimal::checked_div(cumulative_quote, executed)
}

#[derive(Debug, Deserialize)]
struct BinanceApiError {
    #[allow(dead_code)]
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceListenKey {
    listen_key: String,
}

/// Order payload returned by the signed `order` endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceOrderResponse {
    symbol: SmolStr,
    order_id: u64,
    #[serde(alias = "origClientOrderId")]
    client_order_id: SmolStr,
    #[serde(with = "rust_decimal::serde::str")]
    price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    orig_qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    executed_qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    cummulative_quote_qty: Decimal,
    #[serde(deserialize_with = "de_order_status")]
    status: OrderStatus,
    #[serde(deserialize_with = "de_time_in_force")]
    time_in_force: TimeInForce,
    #[serde(rename = "type", deserialize_with = "de_order_kind")]
    kind: OrderKind,
    #[serde(deserialize_with = "de_side")]
    side: Side,
    #[serde(
        default,
        alias = "transactTime",
        deserialize_with = "de_opt_epoch_ms"
    )]
    time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "de_opt_epoch_ms")]
    update_time: Option<DateTime<Utc>>,
}

/// User data stream events the engine consumes; everything else is ignored.
#[derive(Debug)]
enum BinanceUserEvent {
    ExecutionReport(BinanceExecutionReport),
    AccountPosition(BinanceAccountPosition),
    Other,
}

impl<'de> Deserialize<'de> for BinanceUserEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value.get("e").and_then(|event| event.as_str()) {
            Some("executionReport") => serde_json::from_value(value)
                .map(BinanceUserEvent::ExecutionReport)
                .map_err(serde::de::Error::custom),
            Some("outboundAccountPosition") => serde_json::from_value(value)
                .map(BinanceUserEvent::AccountPosition)
                .map_err(serde::de::Error::custom),
            _ => Ok(BinanceUserEvent::Other),
        }
    }
}

/// `executionReport` user stream payload.
///
/// ```json
/// {
///     "e":"executionReport","E":1499405658658,"s":"BTCUSDT","c":"cid_1",
///     "S":"BUY","o":"LIMIT","f":"GTC","q":"0.01","p":"50200.00","P":"0.00",
///     "X":"PARTIALLY_FILLED","i":4293153,"l":"0.005","z":"0.005",
///     "L":"50195.00","Z":"250.975","O":1499405658657,"T":1499405658657
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
struct BinanceExecutionReport {
    #[serde(rename = "s")]
    symbol: SmolStr,
    #[serde(rename = "c")]
    client_order_id: SmolStr,
    #[serde(rename = "S", deserialize_with = "de_side")]
    side: Side,
    #[serde(rename = "o", deserialize_with = "de_order_kind")]
    kind: OrderKind,
    #[serde(rename = "f", deserialize_with = "de_time_in_force")]
    time_in_force: TimeInForce,
    #[serde(rename = "q", with = "rust_decimal::serde::str")]
    orig_qty: Decimal,
    #[serde(rename = "p", with = "rust_decimal::serde::str")]
    price: Decimal,
    #[serde(rename = "P", with = "rust_decimal::serde::str")]
    stop_price: Decimal,
    #[serde(rename = "X", deserialize_with = "de_order_status")]
    status: OrderStatus,
    #[serde(rename = "i")]
    order_id: u64,
    #[serde(rename = "z", with = "rust_decimal::serde::str")]
    cumulative_filled_qty: Decimal,
    #[serde(rename = "Z", with = "rust_decimal::serde::str")]
    cumulative_quote_qty: Decimal,
    #[serde(rename = "O", deserialize_with = "de_u64_epoch_ms_as_datetime_utc")]
    order_creation_time: DateTime<Utc>,
    #[serde(rename = "T", deserialize_with = "de_u64_epoch_ms_as_datetime_utc")]
    transaction_time: DateTime<Utc>,
}

/// `outboundAccountPosition` user stream payload.
#[derive(Debug, Clone, Deserialize)]
struct BinanceAccountPosition {
    #[serde(rename = "E", deserialize_with = "de_u64_epoch_ms_as_datetime_utc")]
    time: DateTime<Utc>,
    #[serde(rename = "B")]
    balances: Vec<BinanceStreamBalance>,
}

#[derive(Debug, Clone, Deserialize)]
struct BinanceStreamBalance {
    #[serde(rename = "a")]
    asset: SmolStr,
    #[serde(rename = "f", with = "rust_decimal::serde::str")]
    free: Decimal,
    #[serde(rename = "l", with = "rust_decimal::serde::str")]
    locked: Decimal,
}

#[derive(Debug, Deserialize)]
struct BinanceAccount {
    balances: Vec<BinanceRestBalance>,
}

#[derive(Debug, Deserialize)]
struct BinanceRestBalance {
    asset: SmolStr,
    #[serde(with = "rust_decimal::serde::str")]
    free: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    locked: Decimal,
}

fn de_side<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<Side, D::Error> {
    match <&str as Deserialize>::deserialize(deserializer)? {
        "BUY" => Ok(Side::Buy),
        "SELL" => Ok(Side::Sell),
        other => Err(serde::de::Error::custom(format!("unknown side: {other}"))),
    }
}

fn de_order_status<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> Result<OrderStatus, D::Error> {
    match <&str as Deserialize>::deserialize(deserializer)? {
        "NEW" | "PENDING_NEW" => Ok(OrderStatus::New),
        "PARTIALLY_FILLED" => Ok(OrderStatus::PartiallyFilled),
        "FILLED" => Ok(OrderStatus::Filled),
        "CANCELED" | "PENDING_CANCEL" => Ok(OrderStatus::Canceled),
        "REJECTED" => Ok(OrderStatus::Rejected),
        "EXPIRED" | "EXPIRED_IN_MATCH" => Ok(OrderStatus::Expired),
        other => Err(serde::de::Error::custom(format!(
            "unknown order status: {other}"
        ))),
    }
}

fn de_order_kind<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> Result<OrderKind, D::Error> {
    match <&str as Deserialize>::deserialize(deserializer)? {
        "MARKET" => Ok(OrderKind::Market),
        "LIMIT" | "LIMIT_MAKER" => Ok(OrderKind::Limit),
        "STOP_LOSS" => Ok(OrderKind::StopLoss),
        "STOP_LOSS_LIMIT" => Ok(OrderKind::StopLossLimit),
        "TAKE_PROFIT" => Ok(OrderKind::TakeProfit),
        "TAKE_PROFIT_LIMIT" => Ok(OrderKind::TakeProfitLimit),
        other => Err(serde::de::Error::custom(format!(
            "unknown order type: {other}"
        ))),
    }
}

fn de_time_in_force<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> Result<TimeInForce, D::Error> {
    match <&str as Deserialize>::deserialize(deserializer)? {
        "GTC" => Ok(TimeInForce::Gtc),
        "IOC" => Ok(TimeInForce::Ioc),
        "FOK" => Ok(TimeInForce::Fok),
        other => Err(serde::de::Error::custom(format!(
            "unknown time in force: {other}"
        ))),
    }
}

fn de_opt_epoch_ms<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    Option::<u64>::deserialize(deserializer)?
        .map(|millis| {
            chrono::TimeZone::timestamp_millis_opt(&Utc, millis as i64)
                .single()
                .ok_or_else(|| serde::de::Error::custom("epoch ms out of range"))
        })
        .transpose()
}
