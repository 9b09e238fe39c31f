//! End-to-end scenarios driving the full trading core against the mock
//! exchange: signal to order to fill, reconciliation after lost pushes,
//! terminal absorption, subscription coalescing and pre-trade risk.

mod util;

use riptide::{
    bus::{EngineEvent, EventCategory, EventFilter},
    config::EngineConfig,
    engine::Engine,
    strategy::StrategyParameters,
};
use riptide_execution::{
    client::{AccountUpdate, ExchangeConnector, mock::MockConnector},
    order::{Order, OrderStatus, OrderUpdate, id::StrategyId},
};
use riptide_integration::snapshot::Snapshot;
use riptide_risk::Severity;
use rust_decimal_macros::dec;
use std::{sync::Arc, time::Duration};
use util::{ScriptedStrategy, ticker_event, wait_until};

const WAIT: Duration = Duration::from_secs(5);

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.order_sync.sync_interval_ms = 1_000;
    config
}

fn engine(mock: &MockConnector, config: EngineConfig) -> Engine {
    Engine::builder()
        .config(config)
        .connector(Arc::new(mock.clone()) as Arc<dyn ExchangeConnector>)
        .build()
        .unwrap()
}

async fn start_buy_strategy(engine: &Engine, mock: &MockConnector) -> Order {
    engine
        .start_strategy(
            Box::new(ScriptedStrategy::new(
                "strategy_1",
                "BTC/USDT",
                3,
                dec!(0.01),
                Some(dec!(50200)),
            )),
            StrategyParameters::default(),
        )
        .await
        .unwrap();

    // Feed the scripted tickers; the third triggers the buy
    for (sequence, price) in [dec!(50000), dec!(50100), dec!(50250)].into_iter().enumerate() {
        mock.push_market_event(ticker_event("BTC/USDT", price, sequence as u64 + 1));
    }

    wait_until(WAIT, "order placed", || {
        !engine.orders().open_orders().is_empty()
    })
    .await;

    engine.orders().open_orders().remove(0)
}

fn partial_fill(order: &Order) -> OrderUpdate {
    OrderUpdate {
        status: OrderStatus::PartiallyFilled,
        executed_quantity: dec!(0.005),
        cumulative_quote_quantity: dec!(250.975),
        average_price: Some(dec!(50195)),
        update_time: chrono::Utc::now().max(order.update_time),
        fill: None,
    }
}

fn full_fill(order: &Order) -> OrderUpdate {
    OrderUpdate {
        status: OrderStatus::Filled,
        executed_quantity: dec!(0.01),
        cumulative_quote_quantity: dec!(501.98),
        average_price: Some(dec!(50198)),
        update_time: chrono::Utc::now().max(order.update_time) + chrono::TimeDelta::milliseconds(1),
        fill: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_happy_path_limit_fill() {
    let mock = MockConnector::default();
    let engine = engine(&mock, config());
    let mut rx = engine
        .bus()
        .subscribe("test", EventFilter::categories([EventCategory::Order]));

    engine.start().await.unwrap();
    let placed = start_buy_strategy(&engine, &mock).await;

    assert_eq!(placed.status, OrderStatus::New);
    assert_eq!(placed.price, Some(dec!(50200)));

    // Exchange progresses the order; pushes arrive over the account stream
    mock.exchange_update(&placed.id, partial_fill(&placed)).unwrap();
    wait_until(WAIT, "partial fill applied", || {
        engine.orders().get_order(&placed.id).unwrap().status == OrderStatus::PartiallyFilled
    })
    .await;

    let after_partial = engine.orders().get_order(&placed.id).unwrap();
    mock.exchange_update(&placed.id, full_fill(&after_partial)).unwrap();
    wait_until(WAIT, "full fill applied", || {
        engine.orders().get_order(&placed.id).unwrap().status == OrderStatus::Filled
    })
    .await;

    // Three lifecycle events, in order, with monotone update_time
    let created = rx.recv().await;
    let partially = rx.recv().await;
    let filled = rx.recv().await;

    let EngineEvent::OrderCreated { order: created, .. } = created else {
        panic!("expected OrderCreated, got {created:?}");
    };
    let EngineEvent::OrderPartiallyFilled { order: partial, .. } = partially else {
        panic!("expected OrderPartiallyFilled, got {partially:?}");
    };
    let EngineEvent::OrderFilled { order: filled, .. } = filled else {
        panic!("expected OrderFilled, got {filled:?}");
    };

    assert!(created.update_time <= partial.update_time);
    assert!(partial.update_time <= filled.update_time);
    assert_eq!(filled.average_price, Some(dec!(50198)));
    assert_eq!(filled.executed_quantity, dec!(0.01));

    // The strategy snapshot captured the filled position
    let id = StrategyId::new("strategy_1");
    wait_until(WAIT, "snapshot captured fill", || {
        engine
            .state_manager()
            .load_state(&id)
            .ok()
            .flatten()
            .is_some_and(|state| state.current_position == dec!(0.01))
    })
    .await;
    let state = engine.state_manager().load_state(&id).unwrap().unwrap();
    assert_eq!(state.current_position, dec!(0.01));
    assert_eq!(state.average_price, Some(dec!(50198)));

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missed_push_update_recovered_by_sync() {
    let mock = MockConnector::default();
    let engine = engine(&mock, config());
    let mut rx = engine
        .bus()
        .subscribe("test", EventFilter::categories([EventCategory::Order]));

    engine.start().await.unwrap();
    let placed = start_buy_strategy(&engine, &mock).await;

    // The fill happens on the exchange but the push is lost
    mock.set_suppress_account_push(true);
    mock.exchange_update(&placed.id, full_fill(&placed)).unwrap();

    // Within one sync interval the divergence is observed
    wait_until(Duration::from_secs(5), "sync recovers the fill", || {
        engine.orders().get_order(&placed.id).unwrap().status == OrderStatus::Filled
    })
    .await;

    // The late websocket push finally arrives: no duplicate event
    mock.set_suppress_account_push(false);
    let exchange_truth = mock.order(&placed.id).unwrap();
    mock.push_account_update(AccountUpdate::Order(Snapshot(exchange_truth)));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut filled_events = 0;
    while let Some(event) = rx.try_recv() {
        if matches!(event, EngineEvent::OrderFilled { .. }) {
            filled_events += 1;
        }
    }
    assert_eq!(filled_events, 1, "order_filled must be emitted exactly once");

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_terminal_status_absorbs_late_cancel() {
    let mock = MockConnector::default();
    let engine = engine(&mock, config());
    let mut rx = engine
        .bus()
        .subscribe("test", EventFilter::categories([EventCategory::Order]));

    engine.start().await.unwrap();
    let placed = start_buy_strategy(&engine, &mock).await;

    mock.exchange_update(&placed.id, full_fill(&placed)).unwrap();
    wait_until(WAIT, "fill applied", || {
        engine.orders().get_order(&placed.id).unwrap().status == OrderStatus::Filled
    })
    .await;

    // A late CANCELED snapshot arrives out of order
    let mut cancelled = engine.orders().get_order(&placed.id).unwrap();
    cancelled.status = OrderStatus::Canceled;
    cancelled.update_time += chrono::TimeDelta::seconds(1);
    mock.push_account_update(AccountUpdate::Order(Snapshot(cancelled)));
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Rejected: the order remains FILLED and no cancel event fires
    assert_eq!(
        engine.orders().get_order(&placed.id).unwrap().status,
        OrderStatus::Filled
    );

    let mut filled_events = 0;
    let mut cancelled_events = 0;
    while let Some(event) = rx.try_recv() {
        match event {
            EngineEvent::OrderFilled { .. } => filled_events += 1,
            EngineEvent::OrderCancelled { .. } => cancelled_events += 1,
            _ => {}
        }
    }
    assert_eq!(filled_events, 1);
    assert_eq!(cancelled_events, 0);

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_subscription_coalescing_across_strategies() {
    let mock = MockConnector::default();
    let engine = engine(&mock, config());
    engine.start().await.unwrap();

    // Two strategies over the same (exchange, symbol, ticker) slice
    for id in ["strategy_a", "strategy_b"] {
        engine
            .start_strategy(
                Box::new(ScriptedStrategy::new(id, "BTC/USDT", usize::MAX, dec!(0.01), None)),
                StrategyParameters::default(),
            )
            .await
            .unwrap();
    }

    // One upstream serves both
    assert_eq!(mock.market_streams_opened(), 1);
    assert_eq!(engine.status().active_subscriptions, 1);

    engine.stop_strategy(&StrategyId::new("strategy_a")).await.unwrap();
    assert_eq!(engine.status().active_subscriptions, 1);

    engine.stop_strategy(&StrategyId::new("strategy_b")).await.unwrap();
    wait_until(WAIT, "upstream released", || {
        engine.status().active_subscriptions == 0
    })
    .await;
    assert_eq!(mock.market_streams_opened(), 1);

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_risk_limit_rejects_order_before_exchange() {
    let mock = MockConnector::default();
    let mut config = config();
    config.risk.max_position_size = Some(dec!(0.01));
    let engine = engine(&mock, config);

    let mut rx = engine
        .bus()
        .subscribe("test", EventFilter::categories([EventCategory::Risk]));

    engine.start().await.unwrap();
    engine
        .start_strategy(
            Box::new(ScriptedStrategy::new(
                "strategy_1",
                "BTC/USDT",
                1,
                dec!(0.02),
                None,
            )),
            StrategyParameters::default(),
        )
        .await
        .unwrap();

    mock.push_market_event(ticker_event("BTC/USDT", dec!(50000), 1));

    let event = rx.recv().await;
    let EngineEvent::RiskLimitExceeded { violation, strategy, .. } = event else {
        panic!("expected RiskLimitExceeded, got {event:?}");
    };
    assert_eq!(strategy, StrategyId::new("strategy_1"));
    assert_eq!(violation.severity, Severity::Warning);
    assert_eq!(violation.limit, dec!(0.01));
    assert_eq!(violation.observed, dec!(0.02));

    // Rejected before reaching the exchange: nothing tracked, no position
    assert_eq!(engine.orders().stats().total, 0);
    assert_eq!(
        engine.orders().net_executed(&"BTC/USDT".parse().unwrap()),
        dec!(0)
    );

    engine.stop().await;
}
