// ─────────────────────────────────────────────────────────────────────────────
// End-to-end walks of the six concrete scenarios from spec §8, each driven
// against an in-memory `SharedSimBroker` so assertions can inspect both the
// manager's registry and the broker's order book after each step.
// ─────────────────────────────────────────────────────────────────────────────
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use order_group_engine::broker::{BrokerOperations, SharedSimBroker};
use order_group_engine::config::EngineConfig;
use order_group_engine::events::RecordingEventSink;
use order_group_engine::group::GroupState;
use order_group_engine::manager::OrderPositionManager;
use order_group_engine::types::{
    CandleMessage, CandleState, Order, OrderRequest, OrderSpec, OrderState, OrderType,
    ProtectivePairSpec, Side, Trade,
};

fn trade_for(order: Order) -> Trade {
    Trade {
        trade_price: order.spec.price,
        trade_volume: order.spec.volume - order.balance,
        order,
        server_time: Utc::now(),
    }
}

fn long_request(
    entry_price: Decimal,
    volume: Decimal,
    pairs: Vec<ProtectivePairSpec>,
) -> OrderRequest {
    OrderRequest::new(
        OrderSpec {
            security: "BTC-USD".into(),
            side: Side::Buy,
            price: entry_price,
            volume,
            order_type: OrderType::Limit,
        },
        pairs,
    )
    .unwrap()
}

fn new_manager(max_concurrent_groups: usize) -> (OrderPositionManager, SharedSimBroker, std::sync::Arc<RecordingEventSink>) {
    let config = EngineConfig::new(max_concurrent_groups, 5, dec!(0.00000001)).unwrap();
    let broker = SharedSimBroker::new();
    let sink = std::sync::Arc::new(RecordingEventSink::default());
    let manager = OrderPositionManager::new(config, Box::new(broker.clone()), Box::new(sink.clone()));
    (manager, broker, sink)
}

/// Scenario 1: basic long, TP fills cleanly — SL is cancelled, group closes.
#[tokio::test]
async fn scenario_1_tp_fills_cleanly() {
    let (mut manager, broker, _sink) = new_manager(5);

    let request = long_request(
        dec!(100),
        dec!(10),
        vec![ProtectivePairSpec {
            stop_loss_price: dec!(95),
            take_profit_price: dec!(110),
            volume: None,
            order_type: OrderType::Limit,
        }],
    );

    let entry = manager.handle_order_request(Some(request)).await.unwrap().unwrap();
    let filled_entry = broker.fill(entry.id, dec!(10));
    manager.on_own_trade_received(trade_for(filled_entry)).await.unwrap();

    let group_id = manager.registry().find_group_by_order(entry.id).unwrap();
    let (sl_id, tp_id) = {
        let group = manager.registry().get(group_id).unwrap();
        assert_eq!(group.state, GroupState::ProtectionActive);
        let slot = group.protective_pairs.values().next().unwrap();
        (slot.sl_order_id.unwrap(), slot.tp_order_id.unwrap())
    };

    let filled_tp = broker.fill(tp_id, dec!(10));
    manager.on_own_trade_received(trade_for(filled_tp)).await.unwrap();

    let group = manager.registry().get(group_id).unwrap();
    assert_eq!(group.state, GroupState::Closed);
    assert!(group.protective_pairs.is_empty());

    let sl_snapshot = broker.0.lock().unwrap().get_order(sl_id).unwrap();
    assert_eq!(sl_snapshot.state, OrderState::Cancelled);
}

/// Scenario 2: entry and TP hit on the same candle — TP is closed
/// synthetically before any resting SL/TP order is ever placed.
#[tokio::test]
async fn scenario_2_same_bar_entry_and_tp() {
    let (mut manager, broker, _sink) = new_manager(5);

    let request = long_request(
        dec!(100),
        dec!(10),
        vec![ProtectivePairSpec {
            stop_loss_price: dec!(95),
            take_profit_price: dec!(105),
            volume: None,
            order_type: OrderType::Market,
        }],
    );

    let entry = manager.handle_order_request(Some(request)).await.unwrap().unwrap();

    let candle = CandleMessage {
        open_time: Utc::now(),
        open: dec!(100),
        high: dec!(106),
        low: dec!(99),
        close: dec!(104),
        state: CandleState::Finished,
    };
    // Cache the candle the same way a market-data feed would before the fill
    // notification arrives.
    manager.check_protection_levels(candle).await.unwrap();

    let orders_before = broker.order_ids().len();
    let filled_entry = broker.fill(entry.id, dec!(10));
    manager.on_own_trade_received(trade_for(filled_entry)).await.unwrap();

    let group_id = manager.registry().find_group_by_order(entry.id).unwrap();
    let group = manager.registry().get(group_id).unwrap();
    assert_eq!(group.state, GroupState::Closed);
    assert!(group.protective_pairs.is_empty());

    // Exactly one new order was placed: the synthetic market close. No
    // resting SL/TP limit orders were ever sent to the broker.
    let orders_after = broker.order_ids().len();
    assert_eq!(orders_after, orders_before + 1);
}

/// Scenario 3: partial fill on SL retries via market order and succeeds.
#[tokio::test]
async fn scenario_3_partial_fill_retry_succeeds() {
    let (mut manager, broker, _sink) = new_manager(5);

    let request = long_request(
        dec!(100),
        dec!(10),
        vec![ProtectivePairSpec {
            stop_loss_price: dec!(95),
            take_profit_price: dec!(110),
            volume: None,
            order_type: OrderType::Limit,
        }],
    );

    let entry = manager.handle_order_request(Some(request)).await.unwrap().unwrap();
    let filled_entry = broker.fill(entry.id, dec!(10));
    manager.on_own_trade_received(trade_for(filled_entry)).await.unwrap();

    let group_id = manager.registry().find_group_by_order(entry.id).unwrap();
    let (sl_id, tp_id) = {
        let group = manager.registry().get(group_id).unwrap();
        let slot = group.protective_pairs.values().next().unwrap();
        (slot.sl_order_id.unwrap(), slot.tp_order_id.unwrap())
    };

    let known_before = broker.order_ids();
    let partial_sl = broker.fill(sl_id, dec!(6)); // balance 4
    manager.on_own_trade_received(trade_for(partial_sl)).await.unwrap();

    let pair_id = {
        let group = manager.registry().get(group_id).unwrap();
        assert_eq!(group.state, GroupState::ProtectionActive);
        *group.protective_pairs.keys().next().unwrap()
    };
    assert_eq!(manager.retry_handler().attempts_for((group_id, pair_id)), 1);

    // TP sibling is untouched — it is not cancelled until the pair is
    // fully closed.
    let tp_snapshot = broker.0.lock().unwrap().get_order(tp_id).unwrap();
    assert_eq!(tp_snapshot.state, OrderState::Active);

    let retry_order_id = *broker
        .order_ids()
        .iter()
        .find(|id| !known_before.contains(id))
        .unwrap();
    let filled_retry = broker.fill(retry_order_id, dec!(4));
    manager.on_own_trade_received(trade_for(filled_retry)).await.unwrap();

    let group = manager.registry().get(group_id).unwrap();
    assert_eq!(group.state, GroupState::Closed);
    let tp_snapshot = broker.0.lock().unwrap().get_order(tp_id).unwrap();
    assert_eq!(tp_snapshot.state, OrderState::Cancelled);
}

/// Scenario 4: every retry partially fills — after 5 attempts, manual
/// intervention is flagged and no further retry order is placed.
#[tokio::test]
async fn scenario_4_retry_exhaustion() {
    let (mut manager, broker, _sink) = new_manager(5);

    let request = long_request(
        dec!(100),
        dec!(10),
        vec![ProtectivePairSpec {
            stop_loss_price: dec!(95),
            take_profit_price: dec!(110),
            volume: None,
            order_type: OrderType::Limit,
        }],
    );

    let entry = manager.handle_order_request(Some(request)).await.unwrap().unwrap();
    let filled_entry = broker.fill(entry.id, dec!(10));
    manager.on_own_trade_received(trade_for(filled_entry)).await.unwrap();

    let group_id = manager.registry().find_group_by_order(entry.id).unwrap();
    let mut current_sl_id = {
        let group = manager.registry().get(group_id).unwrap();
        let slot = group.protective_pairs.values().next().unwrap();
        slot.sl_order_id.unwrap()
    };
    let pair_id = {
        let group = manager.registry().get(group_id).unwrap();
        *group.protective_pairs.keys().next().unwrap()
    };

    for attempt in 1..=5u32 {
        let known_before = broker.order_ids();
        let balance_before = broker.0.lock().unwrap().get_order(current_sl_id).unwrap().balance;
        // Fill all but a small remainder, so the order stays partially
        // filled and the residual keeps shrinking across retries.
        let remainder = balance_before / dec!(2);
        let partial = broker.fill(current_sl_id, balance_before - remainder);
        manager.on_own_trade_received(trade_for(partial)).await.unwrap();

        assert_eq!(manager.retry_handler().attempts_for((group_id, pair_id)), attempt);

        if attempt < 5 {
            assert!(!manager.retry_handler().requires_manual_intervention());
            current_sl_id = *broker
                .order_ids()
                .iter()
                .find(|id| !known_before.contains(id))
                .expect("a new retry order should have been placed");
        } else {
            assert!(manager.retry_handler().requires_manual_intervention());
            let new_orders: Vec<_> = broker
                .order_ids()
                .into_iter()
                .filter(|id| !known_before.contains(id))
                .collect();
            assert!(new_orders.is_empty(), "no retry order should be placed past the cap");
        }
    }

    // The pair is still open — manual intervention took over, the group
    // never auto-closes on exhaustion.
    let group = manager.registry().get(group_id).unwrap();
    assert_eq!(group.state, GroupState::ProtectionActive);
}

/// Scenario 5: capacity rejection — the (N+1)-th distinct signal is dropped.
#[tokio::test]
async fn scenario_5_capacity_rejection() {
    let (mut manager, _broker, sink) = new_manager(2);

    let r1 = long_request(
        dec!(100),
        dec!(10),
        vec![ProtectivePairSpec {
            stop_loss_price: dec!(95),
            take_profit_price: dec!(110),
            volume: None,
            order_type: OrderType::Limit,
        }],
    );
    let r2 = long_request(
        dec!(200),
        dec!(5),
        vec![ProtectivePairSpec {
            stop_loss_price: dec!(190),
            take_profit_price: dec!(220),
            volume: None,
            order_type: OrderType::Limit,
        }],
    );
    let r3 = long_request(
        dec!(300),
        dec!(1),
        vec![ProtectivePairSpec {
            stop_loss_price: dec!(290),
            take_profit_price: dec!(330),
            volume: None,
            order_type: OrderType::Limit,
        }],
    );

    assert!(manager.handle_order_request(Some(r1)).await.unwrap().is_some());
    assert!(manager.handle_order_request(Some(r2)).await.unwrap().is_some());
    assert!(manager.handle_order_request(Some(r3)).await.unwrap().is_none());

    assert_eq!(manager.registry().active_count(), 2);
    let events = sink.events.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e, order_group_engine::events::Event::MaxConcurrentGroupsReached { max: 2 })));
}

/// Scenario 6: multiple pairs, one exits — its sibling is cancelled, the
/// other pair stays resting and the group does not close.
#[tokio::test]
async fn scenario_6_multi_pair_partial_exit() {
    let (mut manager, broker, _sink) = new_manager(5);

    let request = long_request(
        dec!(100),
        dec!(10),
        vec![
            ProtectivePairSpec {
                stop_loss_price: dec!(95),
                take_profit_price: dec!(105),
                volume: Some(dec!(5)),
                order_type: OrderType::Limit,
            },
            ProtectivePairSpec {
                stop_loss_price: dec!(90),
                take_profit_price: dec!(115),
                volume: Some(dec!(5)),
                order_type: OrderType::Limit,
            },
        ],
    );

    let entry = manager.handle_order_request(Some(request)).await.unwrap().unwrap();
    let filled_entry = broker.fill(entry.id, dec!(10));
    manager.on_own_trade_received(trade_for(filled_entry)).await.unwrap();

    let group_id = manager.registry().find_group_by_order(entry.id).unwrap();
    let group = manager.registry().get(group_id).unwrap();
    assert_eq!(group.state, GroupState::ProtectionActive);
    assert_eq!(group.protective_pairs.len(), 2);

    let (near_tp_id, near_sl_id) = {
        let slot = group
            .protective_pairs
            .values()
            .find(|s| s.spec.take_profit_price == dec!(105))
            .unwrap();
        (slot.tp_order_id.unwrap(), slot.sl_order_id.unwrap())
    };

    let filled_tp = broker.fill(near_tp_id, dec!(5));
    manager.on_own_trade_received(trade_for(filled_tp)).await.unwrap();

    let group = manager.registry().get(group_id).unwrap();
    assert_eq!(group.state, GroupState::ProtectionActive);
    assert_eq!(group.protective_pairs.len(), 1);

    let sl_snapshot = broker.0.lock().unwrap().get_order(near_sl_id).unwrap();
    assert_eq!(sl_snapshot.state, OrderState::Cancelled);

    let remaining_slot = group.protective_pairs.values().next().unwrap();
    assert_eq!(remaining_slot.spec.take_profit_price, dec!(115));
}

/// A Market-typed pair never gets a resting SL/TP order placed at the
/// broker — even on an ordinary (non-same-bar) entry fill — and is closed
/// only by a later candle crossing its level synthetically.
#[tokio::test]
async fn market_pair_never_rests_and_closes_via_later_candle() {
    let (mut manager, broker, _sink) = new_manager(5);

    let request = long_request(
        dec!(100),
        dec!(10),
        vec![ProtectivePairSpec {
            stop_loss_price: dec!(95),
            take_profit_price: dec!(110),
            volume: None,
            order_type: OrderType::Market,
        }],
    );

    let entry = manager.handle_order_request(Some(request)).await.unwrap().unwrap();
    let orders_before_fill = broker.order_ids().len();
    let filled_entry = broker.fill(entry.id, dec!(10));
    manager.on_own_trade_received(trade_for(filled_entry)).await.unwrap();

    let group_id = manager.registry().find_group_by_order(entry.id).unwrap();
    let group = manager.registry().get(group_id).unwrap();
    assert_eq!(group.state, GroupState::ProtectionActive);
    let slot = group.protective_pairs.values().next().unwrap();
    assert!(slot.sl_order_id.is_none());
    assert!(slot.tp_order_id.is_none());
    // No new order reached the broker for the Market-typed pair.
    assert_eq!(broker.order_ids().len(), orders_before_fill);

    let candle = CandleMessage {
        open_time: Utc::now(),
        open: dec!(102),
        high: dec!(111),
        low: dec!(101),
        close: dec!(109),
        state: CandleState::Finished,
    };
    let hit = manager.check_protection_levels(candle).await.unwrap();
    assert!(hit);

    let group = manager.registry().get(group_id).unwrap();
    assert_eq!(group.state, GroupState::Closed);
    // Exactly one recovery market order was placed to flatten the position.
    assert_eq!(broker.order_ids().len(), orders_before_fill + 1);
}
