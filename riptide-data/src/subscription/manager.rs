use crate::{
    DataError,
    event::MarketEvent,
    subscription::{
        DataType, FeedEvent, MarketDataConnector, MethodPreference, SubscriberId,
        SubscriptionKey, SubscriptionMethod, SubscriptionRequest, event_identity,
    },
};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use riptide_instrument::exchange::ExchangeId;
use riptide_integration::{
    backoff::ExponentialBackoff,
    channel::{Tx, UnboundedRx},
};
use std::{collections::HashSet, sync::Arc, time::Duration};
use tracing::{debug, warn};

/// REST polling cadence per [`DataType`].
#[derive(Debug, Clone, Copy)]
pub struct PollIntervals {
    pub ticker: Duration,
    pub orderbook: Duration,
    pub trades: Duration,
    pub klines: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            ticker: Duration::from_secs(1),
            orderbook: Duration::from_millis(500),
            trades: Duration::from_secs(2),
            klines: Duration::from_secs(60),
        }
    }
}

impl PollIntervals {
    pub fn for_data_type(&self, data_type: &DataType) -> Duration {
        match data_type {
            DataType::Ticker => self.ticker,
            DataType::OrderBook { .. } => self.orderbook,
            DataType::Trades => self.trades,
            DataType::Klines { .. } => self.klines,
        }
    }
}

/// Consecutive upstream failures after which an
/// [`FeedEvent::UpstreamError`] is reported.
const FAILURES_PER_ERROR_REPORT: u32 = 5;

#[derive(Debug)]
struct SubscriptionEntry {
    ref_count: usize,
    subscribers: HashSet<SubscriberId>,
    method: SubscriptionMethod,
    task: Option<tokio::task::JoinHandle<()>>,
}

/// Owns upstream market data subscriptions, coalescing overlapping requests
/// from multiple strategies behind a single reference-counted upstream per
/// [`SubscriptionKey`].
///
/// Websocket upstreams are preferred where the venue supports them; REST
/// polling is the fallback. A brief websocket/REST overlap during recovery
/// is de-duplicated by `(symbol, exchange, timestamp, sequence)`.
pub struct SubscriptionManager<FeedTx> {
    connectors: FnvHashMap<ExchangeId, Arc<dyn MarketDataConnector>>,
    feed_tx: FeedTx,
    intervals: PollIntervals,
    state: Arc<parking_lot::Mutex<FnvHashMap<SubscriptionKey, SubscriptionEntry>>>,
}

impl<FeedTx> std::fmt::Debug for SubscriptionManager<FeedTx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("connectors", &self.connectors.keys())
            .field("subscriptions", &self.state.lock().len())
            .finish()
    }
}

impl<FeedTx> SubscriptionManager<FeedTx>
where
    FeedTx: Tx<Item = FeedEvent> + Send + Sync + 'static,
{
    pub fn new(
        feed_tx: FeedTx,
        intervals: PollIntervals,
        connectors: impl IntoIterator<Item = Arc<dyn MarketDataConnector>>,
    ) -> Self {
        Self {
            connectors: connectors
                .into_iter()
                .map(|connector| (connector.exchange(), connector))
                .collect(),
            feed_tx,
            intervals,
            state: Arc::new(parking_lot::Mutex::new(FnvHashMap::default())),
        }
    }

    /// Subscribe the provided subscriber to every requested data slice.
    ///
    /// Returns once each upstream is established (new keys) or joined
    /// (already-active keys). Partially-applied requests are not rolled back
    /// on error; callers unsubscribe to release.
    pub async fn subscribe(
        &self,
        subscriber: &SubscriberId,
        requests: impl IntoIterator<Item = SubscriptionRequest>,
    ) -> Result<(), DataError> {
        for request in requests {
            self.subscribe_one(subscriber.clone(), request).await?;
        }
        Ok(())
    }

    async fn subscribe_one(
        &self,
        subscriber: SubscriberId,
        request: SubscriptionRequest,
    ) -> Result<(), DataError> {
        let SubscriptionRequest { key, method } = request;

        let connector = self
            .connectors
            .get(&key.exchange)
            .cloned()
            .ok_or_else(|| DataError::Unsupported {
                exchange: key.exchange,
                message: "no connector registered".to_string(),
            })?;

        let resolved = match method {
            MethodPreference::Websocket => {
                if !connector.supports_websocket(&key) {
                    return Err(DataError::Unsupported {
                        exchange: key.exchange,
                        message: format!("websocket unavailable for {:?}", key.data_type),
                    });
                }
                SubscriptionMethod::Websocket
            }
            MethodPreference::Rest => SubscriptionMethod::Rest,
            MethodPreference::Auto => {
                if connector.supports_websocket(&key) {
                    SubscriptionMethod::Websocket
                } else {
                    SubscriptionMethod::Rest
                }
            }
        };

        // Fast path: upstream already active, join it.
        {
            let mut state = self.state.lock();
            if let Some(entry) = state.get_mut(&key) {
                // Repeat requests from the same subscriber do not inflate
                // the refcount, so unsubscribe can never underflow it
                if entry.subscribers.insert(subscriber.clone()) {
                    entry.ref_count += 1;
                }
                debug!(
                    exchange = %key.exchange,
                    symbol = %key.symbol,
                    data_type = key.data_type.kind_name(),
                    ref_count = entry.ref_count,
                    %subscriber,
                    "joined existing subscription"
                );
                return Ok(());
            }

            // Reserve the key so concurrent subscribers pile onto the
            // refcount rather than racing to open a second upstream.
            state.insert(
                key.clone(),
                SubscriptionEntry {
                    ref_count: 1,
                    subscribers: HashSet::from([subscriber.clone()]),
                    method: resolved,
                    task: None,
                },
            );
        }

        // Establish the upstream outside the lock.
        let initial_stream = match resolved {
            SubscriptionMethod::Websocket => match connector.stream_market_data(&key).await {
                Ok(rx) => Some(rx),
                Err(error) => {
                    self.state.lock().remove(&key);
                    return Err(error);
                }
            },
            SubscriptionMethod::Rest => None,
        };

        let task = tokio::spawn(run_upstream(
            Arc::clone(&connector),
            key.clone(),
            resolved,
            self.feed_tx.clone(),
            self.intervals.for_data_type(&key.data_type),
            initial_stream,
        ));

        let mut state = self.state.lock();
        match state.get_mut(&key) {
            Some(entry) => entry.task = Some(task),
            // Every subscriber left while the upstream was being opened.
            None => task.abort(),
        }

        debug!(
            exchange = %key.exchange,
            symbol = %key.symbol,
            data_type = key.data_type.kind_name(),
            method = %resolved,
            %subscriber,
            "opened subscription upstream"
        );

        Ok(())
    }

    /// Release every subscription owned by the subscriber, closing upstreams
    /// whose reference count reaches zero. Returns the number of upstreams
    /// closed.
    pub fn unsubscribe(&self, subscriber: &SubscriberId) -> usize {
        let mut state = self.state.lock();
        let mut closed = 0;

        state.retain(|key, entry| {
            if !entry.subscribers.remove(subscriber) {
                return true;
            }

            entry.ref_count -= 1;
            if entry.ref_count > 0 {
                return true;
            }

            if let Some(task) = entry.task.take() {
                task.abort();
            }
            debug!(
                exchange = %key.exchange,
                symbol = %key.symbol,
                data_type = key.data_type.kind_name(),
                %subscriber,
                "closed subscription upstream"
            );
            closed += 1;
            false
        });

        closed
    }

    /// Close every upstream. Called on engine shutdown.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        for (_, mut entry) in state.drain() {
            if let Some(task) = entry.task.take() {
                task.abort();
            }
        }
    }

    /// Number of active upstream subscriptions.
    pub fn active_subscriptions(&self) -> usize {
        self.state.lock().len()
    }

    /// Current reference count of the provided key, if active.
    pub fn ref_count(&self, key: &SubscriptionKey) -> Option<usize> {
        self.state.lock().get(key).map(|entry| entry.ref_count)
    }

    /// Transport in use for the provided key, if active.
    pub fn method(&self, key: &SubscriptionKey) -> Option<SubscriptionMethod> {
        self.state.lock().get(key).map(|entry| entry.method)
    }
}

/// Drive one upstream until aborted: forward events in arrival order,
/// reconnect with bounded backoff, and report every
/// [`FAILURES_PER_ERROR_REPORT`]th consecutive failure.
async fn run_upstream<FeedTx>(
    connector: Arc<dyn MarketDataConnector>,
    key: SubscriptionKey,
    method: SubscriptionMethod,
    feed_tx: FeedTx,
    poll_interval: Duration,
    initial_stream: Option<UnboundedRx<MarketEvent>>,
) where
    FeedTx: Tx<Item = FeedEvent> + Send + Sync + 'static,
{
    let mut backoff = ExponentialBackoff::default();
    let mut last_identity: Option<(DateTime<Utc>, Option<u64>)> = None;

    match method {
        SubscriptionMethod::Websocket => {
            let mut stream = initial_stream;
            loop {
                let mut rx = match stream.take() {
                    Some(rx) => rx,
                    None => match connector.stream_market_data(&key).await {
                        Ok(rx) => {
                            backoff.reset();
                            rx
                        }
                        Err(error) => {
                            let delay = backoff.next_delay();
                            report_failures(&feed_tx, &key, &backoff, &error);

                            // Cover the outage with a REST poll; overlap with
                            // the recovering socket is de-duplicated below.
                            if let Ok(events) = connector.fetch_market_data(&key).await {
                                for event in events {
                                    forward(&feed_tx, &mut last_identity, event);
                                }
                            }

                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    },
                };

                while let Some(event) = rx.recv().await {
                    forward(&feed_tx, &mut last_identity, event);
                }

                warn!(
                    exchange = %key.exchange,
                    symbol = %key.symbol,
                    data_type = key.data_type.kind_name(),
                    "market data stream ended - reconnecting"
                );
            }
        }
        SubscriptionMethod::Rest => {
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;

                match connector.fetch_market_data(&key).await {
                    Ok(events) => {
                        backoff.reset();
                        for event in events {
                            forward(&feed_tx, &mut last_identity, event);
                        }
                    }
                    Err(error) => {
                        let delay = backoff.next_delay();
                        report_failures(&feed_tx, &key, &backoff, &error);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}

fn forward<FeedTx>(
    feed_tx: &FeedTx,
    last_identity: &mut Option<(DateTime<Utc>, Option<u64>)>,
    event: MarketEvent,
) where
    FeedTx: Tx<Item = FeedEvent>,
{
    let identity = event_identity(&event);
    if last_identity.as_ref() == Some(&identity) {
        debug!(
            exchange = %event.exchange,
            symbol = %event.symbol,
            "dropped duplicate market event from overlapping upstreams"
        );
        return;
    }
    *last_identity = Some(identity);

    let _ = feed_tx.send(FeedEvent::Market(event));
}

fn report_failures<FeedTx>(
    feed_tx: &FeedTx,
    key: &SubscriptionKey,
    backoff: &ExponentialBackoff,
    error: &DataError,
) where
    FeedTx: Tx<Item = FeedEvent>,
{
    warn!(
        exchange = %key.exchange,
        symbol = %key.symbol,
        data_type = key.data_type.kind_name(),
        consecutive_failures = backoff.consecutive_failures(),
        %error,
        "market data upstream failure"
    );

    if backoff.consecutive_failures() % FAILURES_PER_ERROR_REPORT == 0 {
        let _ = feed_tx.send(FeedEvent::UpstreamError {
            exchange: key.exchange,
            message: error.to_string(),
            consecutive_failures: backoff.consecutive_failures(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::ticker::Ticker;
    use async_trait::async_trait;
    use riptide_instrument::{exchange::ExchangeId, symbol::Symbol};
    use riptide_integration::channel::{UnboundedTx, mpsc_unbounded};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubConnector {
        exchange: ExchangeId,
        websocket: bool,
        streams_opened: AtomicUsize,
        fetches: AtomicUsize,
        stream_txs: parking_lot::Mutex<Vec<UnboundedTx<MarketEvent>>>,
    }

    impl StubConnector {
        fn new(exchange: ExchangeId, websocket: bool) -> Arc<Self> {
            Arc::new(Self {
                exchange,
                websocket,
                streams_opened: AtomicUsize::new(0),
                fetches: AtomicUsize::new(0),
                stream_txs: parking_lot::Mutex::new(Vec::new()),
            })
        }

        fn push(&self, event: MarketEvent) {
            for tx in self.stream_txs.lock().iter() {
                let _ = tx.send(event.clone());
            }
        }
    }

    #[async_trait]
    impl MarketDataConnector for StubConnector {
        fn exchange(&self) -> ExchangeId {
            self.exchange
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn supports_websocket(&self, _: &SubscriptionKey) -> bool {
            self.websocket
        }

        async fn stream_market_data(
            &self,
            _: &SubscriptionKey,
        ) -> Result<UnboundedRx<MarketEvent>, DataError> {
            self.streams_opened.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc_unbounded();
            self.stream_txs.lock().push(tx);
            Ok(rx)
        }

        async fn fetch_market_data(
            &self,
            _: &SubscriptionKey,
        ) -> Result<Vec<MarketEvent>, DataError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        }
    }

    fn ticker_key(exchange: ExchangeId) -> SubscriptionKey {
        SubscriptionKey::new(
            exchange,
            "BTC/USDT".parse::<Symbol>().unwrap(),
            DataType::Ticker,
        )
    }

    fn ticker_event(exchange: ExchangeId, sequence: u64) -> MarketEvent {
        MarketEvent {
            time_exchange: DateTime::<Utc>::MIN_UTC,
            time_received: DateTime::<Utc>::MIN_UTC,
            exchange,
            symbol: "BTC/USDT".parse().unwrap(),
            sequence: Some(sequence),
            kind: Ticker::from_last_price(rust_decimal_macros::dec!(50_000)).into(),
        }
    }

    #[tokio::test]
    async fn test_overlapping_subscriptions_share_one_upstream() {
        let connector = StubConnector::new(ExchangeId::Mock, true);
        let (feed_tx, _feed_rx) = mpsc_unbounded::<FeedEvent>();
        let manager = SubscriptionManager::new(
            feed_tx,
            PollIntervals::default(),
            [Arc::clone(&connector) as Arc<dyn MarketDataConnector>],
        );

        let strategy_a = SubscriberId::new("strategy_a");
        let strategy_b = SubscriberId::new("strategy_b");
        let request = SubscriptionRequest::new(ticker_key(ExchangeId::Mock), MethodPreference::Auto);

        manager
            .subscribe(&strategy_a, [request.clone()])
            .await
            .unwrap();
        manager
            .subscribe(&strategy_b, [request.clone()])
            .await
            .unwrap();

        // One upstream, refcount two
        assert_eq!(connector.streams_opened.load(Ordering::SeqCst), 1);
        assert_eq!(manager.ref_count(&request.key), Some(2));

        // First unsubscribe keeps the upstream alive
        assert_eq!(manager.unsubscribe(&strategy_a), 0);
        assert_eq!(manager.ref_count(&request.key), Some(1));
        assert_eq!(manager.active_subscriptions(), 1);

        // Second unsubscribe closes it
        assert_eq!(manager.unsubscribe(&strategy_b), 1);
        assert_eq!(manager.ref_count(&request.key), None);
        assert_eq!(manager.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_subscriber_is_noop() {
        let connector = StubConnector::new(ExchangeId::Mock, true);
        let (feed_tx, _feed_rx) = mpsc_unbounded::<FeedEvent>();
        let manager = SubscriptionManager::new(
            feed_tx,
            PollIntervals::default(),
            [connector as Arc<dyn MarketDataConnector>],
        );

        assert_eq!(manager.unsubscribe(&SubscriberId::new("ghost")), 0);
    }

    #[tokio::test]
    async fn test_duplicate_events_are_dropped() {
        let connector = StubConnector::new(ExchangeId::Mock, true);
        let (feed_tx, mut feed_rx) = mpsc_unbounded::<FeedEvent>();
        let manager = SubscriptionManager::new(
            feed_tx,
            PollIntervals::default(),
            [Arc::clone(&connector) as Arc<dyn MarketDataConnector>],
        );

        manager
            .subscribe(
                &SubscriberId::new("strategy_a"),
                [SubscriptionRequest::new(
                    ticker_key(ExchangeId::Mock),
                    MethodPreference::Websocket,
                )],
            )
            .await
            .unwrap();

        // Same (timestamp, sequence) twice: second copy is a duplicate
        connector.push(ticker_event(ExchangeId::Mock, 1));
        connector.push(ticker_event(ExchangeId::Mock, 1));
        connector.push(ticker_event(ExchangeId::Mock, 2));

        let first = feed_rx.recv().await.unwrap();
        let second = feed_rx.recv().await.unwrap();
        assert!(matches!(
            first,
            FeedEvent::Market(MarketEvent { sequence: Some(1), .. })
        ));
        assert!(matches!(
            second,
            FeedEvent::Market(MarketEvent { sequence: Some(2), .. })
        ));
        assert!(feed_rx.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_websocket_preference_rejected_without_support() {
        let connector = StubConnector::new(ExchangeId::Other, false);
        let (feed_tx, _feed_rx) = mpsc_unbounded::<FeedEvent>();
        let manager = SubscriptionManager::new(
            feed_tx,
            PollIntervals::default(),
            [connector as Arc<dyn MarketDataConnector>],
        );

        let result = manager
            .subscribe(
                &SubscriberId::new("strategy_a"),
                [SubscriptionRequest::new(
                    ticker_key(ExchangeId::Other),
                    MethodPreference::Websocket,
                )],
            )
            .await;

        assert!(matches!(result, Err(DataError::Unsupported { .. })));
        assert_eq!(manager.active_subscriptions(), 0);
    }
}
