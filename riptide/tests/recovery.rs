//! Restart-mid-trade recovery: a crashed engine resumes with correct
//! positions and open orders after reconciling local persistence with
//! exchange truth.

mod util;

use fnv::FnvHashMap;
use riptide::{
    bus::EventBus,
    config::EngineConfig,
    engine::Engine,
    orders::OrderManager,
    state::{IssueLevel, StateManagerConfig, StrategyStateManager},
    store::{OrderStore, StateStore, in_memory::{InMemoryOrderStore, InMemorySnapshotStore, InMemoryStateStore}},
    strategy::StrategyParameters,
};
use riptide_execution::{
    client::{ExchangeConnector, mock::MockConnector},
    order::{OrderStatus, OrderUpdate, id::StrategyId},
};
use riptide_instrument::exchange::ExchangeId;
use rust_decimal_macros::dec;
use std::{sync::Arc, time::Duration};
use util::{ScriptedStrategy, ticker_event, wait_until};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restart_mid_trade_recovers_position_and_orders() {
    let order_store = Arc::new(InMemoryOrderStore::new());
    let state_store = Arc::new(InMemoryStateStore::new());
    let mock = MockConnector::default();
    let strategy_id = StrategyId::new("strategy_1");

    // ---- First life: trade to a partial fill, then die ungracefully ----
    {
        // A long sync interval keeps the first life's orphaned background
        // tasks quiet after the ungraceful drop below
        let mut first_life_config = EngineConfig::default();
        first_life_config.order_sync.sync_interval_ms = 60_000;

        let engine = Engine::builder()
            .config(first_life_config)
            .connector(Arc::new(mock.clone()) as Arc<dyn ExchangeConnector>)
            .order_store(Arc::clone(&order_store) as Arc<dyn OrderStore>)
            .state_store(Arc::clone(&state_store) as Arc<dyn StateStore>)
            .snapshot_store(Arc::new(InMemorySnapshotStore::new()))
            .build()
            .unwrap();

        engine.start().await.unwrap();
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

        for (sequence, price) in [dec!(50000), dec!(50100), dec!(50250)].into_iter().enumerate() {
            mock.push_market_event(ticker_event("BTC/USDT", price, sequence as u64 + 1));
        }
        wait_until(WAIT, "order placed", || {
            !engine.orders().open_orders().is_empty()
        })
        .await;
        let placed = engine.orders().open_orders().remove(0);

        mock.exchange_update(
            &placed.id,
            OrderUpdate {
                status: OrderStatus::PartiallyFilled,
                executed_quantity: dec!(0.005),
                cumulative_quote_quantity: dec!(250.975),
                average_price: Some(dec!(50195)),
                update_time: chrono::Utc::now().max(placed.update_time),
                fill: None,
            },
        )
        .unwrap();

        // The snapshot taken on the fill records the partial position
        wait_until(WAIT, "partial position persisted", || {
            state_store
                .get(&strategy_id)
                .ok()
                .flatten()
                .is_some_and(|state| state.current_position == dec!(0.005))
        })
        .await;

        // Ungraceful stop: the engine is dropped without stop(), no final
        // autosave, no cleanup
        drop(engine);
    }

    // ---- While the process is down, the order fills on the exchange ----
    mock.set_suppress_account_push(true);
    let exchange_order = {
        let persisted = order_store
            .list(&riptide::store::OrderFilter::by_strategy(strategy_id.clone()))
            .unwrap()
            .remove(0);
        mock.exchange_update(
            &persisted.id,
            OrderUpdate {
                status: OrderStatus::Filled,
                executed_quantity: dec!(0.01),
                cumulative_quote_quantity: dec!(501.98),
                average_price: Some(dec!(50198)),
                update_time: chrono::Utc::now(),
                fill: None,
            },
        )
        .unwrap();
        persisted
    };

    // ---- Second life: recovery reconciles persistence with the venue ----
    let state_manager = StrategyStateManager::new(
        Arc::clone(&state_store) as Arc<dyn StateStore>,
        Arc::clone(&order_store) as Arc<dyn OrderStore>,
        StateManagerConfig::default(),
    );
    let bus = Arc::new(EventBus::default());
    let orders = OrderManager::new(
        Arc::clone(&bus),
        Arc::clone(&order_store) as Arc<dyn OrderStore>,
    );
    let mut connectors: FnvHashMap<ExchangeId, Arc<dyn ExchangeConnector>> = FnvHashMap::default();
    connectors.insert(ExchangeId::Mock, Arc::new(mock.clone()));

    let result = state_manager
        .recover(&strategy_id, &connectors, &orders, false)
        .await
        .unwrap();

    // Snapshot still says 0.005; the reconciled trail says 0.01
    assert_eq!(result.state.as_ref().unwrap().current_position, dec!(0.005));
    assert_eq!(result.total_position, dec!(0.01));
    assert_eq!(result.average_price, Some(dec!(50198)));
    assert!(result.open_orders.is_empty(), "the fill closed the order");
    assert_eq!(
        result
            .issues
            .iter()
            .filter(|issue| issue.level == IssueLevel::Info)
            .count(),
        1
    );
    assert!(!result.has_errors());
    assert!(result.recovery_time < Duration::from_secs(60));

    // The order manager now holds the reconciled FILLED order
    assert_eq!(
        orders.get_order(&exchange_order.id).unwrap().status,
        OrderStatus::Filled
    );

    // ---- Full restart through the engine hands the rebuilt context to the
    // strategy before its first analyze ----
    let engine = Engine::builder()
        .config(EngineConfig::default())
        .connector(Arc::new(mock.clone()) as Arc<dyn ExchangeConnector>)
        .order_store(Arc::clone(&order_store) as Arc<dyn OrderStore>)
        .state_store(Arc::clone(&state_store) as Arc<dyn StateStore>)
        .snapshot_store(Arc::new(InMemorySnapshotStore::new()))
        .build()
        .unwrap();
    engine.start().await.unwrap();

    let strategy = ScriptedStrategy::new("strategy_1", "BTC/USDT", 3, dec!(0.01), None);
    let probe = strategy.recovery_probe();
    engine
        .start_strategy(Box::new(strategy), StrategyParameters::default())
        .await
        .unwrap();

    let context = probe.lock().clone().expect("recovery context was delivered");
    assert_eq!(context.position, dec!(0.01));
    assert_eq!(context.average_price, Some(dec!(50198)));
    assert!(context.open_orders.is_empty());

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_recovery_for_same_strategy_is_rejected() {
    let order_store = Arc::new(InMemoryOrderStore::new());
    let state_store = Arc::new(InMemoryStateStore::new());
    let state_manager = Arc::new(StrategyStateManager::new(
        Arc::clone(&state_store) as Arc<dyn StateStore>,
        Arc::clone(&order_store) as Arc<dyn OrderStore>,
        StateManagerConfig::default(),
    ));

    // Seed enough orders that recovery does measurable work
    let mock = MockConnector::default();
    let mut connectors: FnvHashMap<ExchangeId, Arc<dyn ExchangeConnector>> = FnvHashMap::default();
    connectors.insert(ExchangeId::Mock, Arc::new(mock));

    let bus = Arc::new(EventBus::default());
    let orders = Arc::new(OrderManager::new(
        Arc::clone(&bus),
        Arc::clone(&order_store) as Arc<dyn OrderStore>,
    ));

    let id = StrategyId::new("strategy_1");
    let first = state_manager.recover(&id, &connectors, &orders, false);
    let second = state_manager.recover(&id, &connectors, &orders, false);

    let (first, second) = tokio::join!(first, second);
    // With nothing to reconcile both may win the race; at most one loser,
    // and a loser fails with the in-progress error
    match (first, second) {
        (Ok(_), Ok(_)) => {}
        (Ok(_), Err(error)) | (Err(error), Ok(_)) => {
            assert!(matches!(
                error,
                riptide::error::StateError::RecoveryInProgress(_)
            ));
        }
        (Err(first), Err(second)) => panic!("both recoveries failed: {first} / {second}"),
    }
}
