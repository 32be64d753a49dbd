// ─────────────────────────────────────────────────────────────────────────────
// order-group-engine: Order Group Lifecycle Engine demo harness
//
// This binary is a thin driver, not the engine itself — it wires an
// `OrderPositionManager` to an in-memory `SimBroker` and replays a handful of
// signals and candles so the lifecycle is observable end to end. A real
// backtester replaces `SimBroker` with its own broker adapter and feeds the
// same three callbacks (`handle_order_request`, `on_own_trade_received`,
// `check_protection_levels`) from its own market-data/order-event loop. The
// exact-equality `SignalDeduplicator` (C1) sits in front of the manager, not
// inside it: the strategy runs it over its own indicator output and only
// calls `handle_order_request` once a signal passes, per the signal →
// Deduplicator → OrderRequest → Manager data flow.
// ─────────────────────────────────────────────────────────────────────────────
use order_group_engine::broker::SimBroker;
use order_group_engine::config::EngineConfig;
use order_group_engine::dedup::SignalDeduplicator;
use order_group_engine::events::LoggingEventSink;
use order_group_engine::manager::OrderPositionManager;
use order_group_engine::types::{
    CandleMessage, CandleState, OrderRequest, OrderSpec, OrderType, ProtectivePairSpec, Side,
};

use rust_decimal_macros::dec;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();
    log::info!("order-group-engine demo harness starting…");

    let config = EngineConfig::default();
    log::info!(
        "  max_concurrent_groups={} max_retry_attempts={} match_tolerance={}",
        config.max_concurrent_groups,
        config.max_retry_attempts,
        config.match_tolerance
    );

    let broker = Box::new(SimBroker::new());
    let events = Box::new(LoggingEventSink);
    let mut manager = OrderPositionManager::new(config, broker, events);
    let mut dedup = SignalDeduplicator::new();

    let request = OrderRequest::new(
        OrderSpec {
            security: "BTC-USD".into(),
            side: Side::Buy,
            price: dec!(100),
            volume: dec!(10),
            order_type: OrderType::Limit,
        },
        vec![ProtectivePairSpec {
            stop_loss_price: dec!(95),
            take_profit_price: dec!(110),
            volume: None,
            order_type: OrderType::Limit,
        }],
    )
    .expect("sample signal is well-formed");

    if dedup.is_duplicate(request.signal_key()) {
        log::info!("signal is an exact repeat of the last one seen — dropped before reaching the manager");
    } else {
        match manager.handle_order_request(Some(request)).await {
            Ok(Some(entry)) => log::info!("entry order placed: {} @ {}", entry.id, entry.spec.price),
            Ok(None) => log::info!("signal dropped (matches a pending group or at capacity)"),
            Err(e) => log::error!("failed to handle order request: {}", e),
        }
    }

    let candle = CandleMessage {
        open_time: chrono::Utc::now(),
        open: dec!(100),
        high: dec!(101),
        low: dec!(99),
        close: dec!(100.5),
        state: CandleState::Finished,
    };
    match manager.check_protection_levels(candle).await {
        Ok(hit) => log::info!("protection check: hit={}", hit),
        Err(e) => log::error!("protection check failed: {}", e),
    }

    log::info!("shutting down — flattening any open groups.");
    if let Err(e) = manager.close_all_positions().await {
        log::error!("close_all_positions failed: {}", e);
    }
    manager.reset();
    dedup.reset();
    log::info!("done.");
}
