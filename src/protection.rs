// ─────────────────────────────────────────────────────────────────────────────
// protection.rs — Candle Protection Checker (C5)
//
// For pairs configured with `Market` protection (no resting limit orders),
// detects SL/TP crossings from finished candle OHLC and closes the position
// synthetically. `Limit` pairs are skipped: they fill organically through the
// broker, and a parallel synthetic fill here would double-close the position.
// Grounded on `Position::is_tp_hit`/`is_sl_hit` in the pre-existing exchange
// module, generalized from a single current price to an OHLC range.
// ─────────────────────────────────────────────────────────────────────────────
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::broker::BrokerOperations;
use crate::error::EngineError;
use crate::events::{Event, EventSink};
use crate::group::{OrderGroup, PairSlot};
use crate::registry::OrderRegistry;
use crate::types::{CandleMessage, CandleState, OrderSpec, OrderType, PairId, Side};

fn sl_hit(side: Side, candle: &CandleMessage, sl_price: Decimal) -> bool {
    match side {
        Side::Buy => candle.low <= sl_price,
        Side::Sell => candle.high >= sl_price,
    }
}

fn tp_hit(side: Side, candle: &CandleMessage, tp_price: Decimal) -> bool {
    match side {
        Side::Buy => candle.high >= tp_price,
        Side::Sell => candle.low <= tp_price,
    }
}

/// Closes a pair whose protection level was hit on `candle`. Cancels
/// whichever sibling is still active, places a recovery market order unless
/// a sibling already fully filled, then removes the pair from the group.
async fn close_pair_on_candle_hit(
    group: &mut OrderGroup,
    pair_id: PairId,
    broker: &mut dyn BrokerOperations,
    events: &dyn EventSink,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    let slot: PairSlot = group
        .protective_pairs
        .get(&pair_id)
        .expect("pair_id must exist in group")
        .clone();

    let sl_order = slot.sl_order_id.and_then(|id| broker.get_order(id));
    let tp_order = slot.tp_order_id.and_then(|id| broker.get_order(id));
    let already_closed = sl_order.as_ref().is_some_and(|o| o.is_fully_filled())
        || tp_order.as_ref().is_some_and(|o| o.is_fully_filled());

    if !already_closed {
        if let Some(o) = &sl_order {
            if o.is_active() {
                broker.cancel_order(o.id).await?;
            }
        }
        if let Some(o) = &tp_order {
            if o.is_active() {
                broker.cancel_order(o.id).await?;
            }
        }

        let volume = slot.volume(group.entry_volume);
        let recovery_side = group.entry_side.opposite();
        broker
            .place_order(OrderSpec::market(group.security.clone(), recovery_side, volume))
            .await?;
    }

    group.remove_pair(pair_id, now);
    if group.is_closed() {
        events.on_event(Event::GroupCompleted {
            group_id: group.group_id,
        });
    }
    Ok(())
}

/// Scans every `EntryFilled` or `ProtectionActive` group's `Market`-typed
/// pairs against `candle`'s OHLC. `EntryFilled` groups are included so the
/// manager's same-bar check (run right after an entry fill, before any
/// protective order is placed) can close a pair purely from its spec — the
/// pair's `sl_order_id`/`tp_order_id` are `None` at that point, and
/// `close_pair_on_candle_hit` already treats an absent order as nothing to
/// cancel. On the first SL/TP crossing found, closes that pair and returns
/// `true` — matching the spec's "first hit wins" contract for a single
/// `check_protection_levels` call.
pub async fn check_protection_levels(
    registry: &mut OrderRegistry,
    broker: &mut dyn BrokerOperations,
    candle: &CandleMessage,
    events: &dyn EventSink,
    now: DateTime<Utc>,
) -> Result<bool, EngineError> {
    if candle.state != CandleState::Finished {
        return Ok(false);
    }

    let hit = registry
        .active_groups()
        .filter(|g| {
            matches!(
                g.state,
                crate::group::GroupState::EntryFilled | crate::group::GroupState::ProtectionActive
            )
        })
        .find_map(|g| {
            g.protective_pairs.iter().find_map(|(pair_id, slot)| {
                if slot.spec.order_type != OrderType::Market {
                    return None;
                }
                if sl_hit(g.entry_side, candle, slot.spec.stop_loss_price)
                    || tp_hit(g.entry_side, candle, slot.spec.take_profit_price)
                {
                    Some((g.group_id, *pair_id))
                } else {
                    None
                }
            })
        });

    let Some((group_id, pair_id)) = hit else {
        return Ok(false);
    };

    let group = registry.get_mut(group_id).expect("group found during scan must still exist");
    close_pair_on_candle_hit(group, pair_id, broker, events, now).await?;
    Ok(true)
}
