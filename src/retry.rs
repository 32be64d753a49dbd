// ─────────────────────────────────────────────────────────────────────────────
// retry.rs — Partial-Fill Retry Handler (C4)
//
// A resting protective order may fill for less than the pair's volume. The
// residual must close promptly; retries are strictly market orders so the
// residual is guaranteed to close even at an unfavourable price. The attempt
// ceiling bounds the cost of an infinite partial-fill loop — generalizes the
// cancel-to-fill-ratio guard's role in the pre-existing `SessionStats`.
// ─────────────────────────────────────────────────────────────────────────────
use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::error::EngineError;
use crate::events::{Event, EventSink};
use crate::types::{GroupId, OrderId, PairId, Side, Trade};

pub const MAX_RETRY_ATTEMPTS: u32 = 5;

pub type RetryKey = (GroupId, PairId);

#[derive(Debug, Clone, Default)]
struct RetryEntry {
    attempts: u32,
    current_order_id: Option<OrderId>,
}

/// Outcome of feeding a retry order's fill back through the handler.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryFillOutcome {
    /// The retry order itself was only partially filled; another retry was
    /// placed (or the attempt cap was hit — check the event sink).
    StillPending,
    /// The retry order is fully filled; the orchestrator should finalise
    /// this pair (cancel the sibling, remove the pair).
    Finalize { group_id: GroupId, pair_id: PairId },
}

#[derive(Debug)]
pub struct PartialFillRetryHandler {
    entries: HashMap<RetryKey, RetryEntry>,
    requires_manual_intervention: bool,
    max_attempts: u32,
}

impl Default for PartialFillRetryHandler {
    fn default() -> Self {
        Self::new(MAX_RETRY_ATTEMPTS)
    }
}

impl PartialFillRetryHandler {
    /// `max_attempts` is normally `EngineConfig::max_retry_attempts`, which
    /// defaults to the spec's `MAX_RETRY_ATTEMPTS` constant but can be
    /// narrowed or widened per host.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            entries: HashMap::new(),
            requires_manual_intervention: false,
            max_attempts,
        }
    }

    pub fn requires_manual_intervention(&self) -> bool {
        self.requires_manual_intervention
    }

    pub fn attempts_for(&self, key: RetryKey) -> u32 {
        self.entries.get(&key).map(|e| e.attempts).unwrap_or(0)
    }

    /// Increments the attempt counter for `key`. If it reaches
    /// `MAX_RETRY_ATTEMPTS`, sets the manual-intervention flag, emits
    /// `MaxRetryReached`, and returns `Ok(None)` without placing an order.
    /// Otherwise calls `place_market(side, remaining_volume, previous_order_id)`
    /// — `previous_order_id` is the retry order from the prior round still
    /// resting at the broker, if any, so the caller can cancel it before
    /// replacing it; a fresh partial fill on the *original* protective order
    /// (round one) is the caller's responsibility to cancel before calling
    /// this at all, since that order was never tracked here. Records the
    /// resulting order under `key` and returns `Ok(Some(order_id))`.
    pub async fn initiate_retry<F, Fut>(
        &mut self,
        key: RetryKey,
        remaining_volume: Decimal,
        side: Side,
        place_market: F,
        events: &dyn EventSink,
    ) -> Result<Option<OrderId>, EngineError>
    where
        F: FnOnce(Side, Decimal, Option<OrderId>) -> Fut,
        Fut: std::future::Future<Output = Result<OrderId, EngineError>>,
    {
        let entry = self.entries.entry(key).or_default();
        entry.attempts += 1;
        let attempt = entry.attempts;
        let previous_order_id = entry.current_order_id;

        if attempt >= self.max_attempts {
            self.requires_manual_intervention = true;
            events.on_event(Event::MaxRetryReached {
                group_id: key.0,
                pair_id: key.1,
            });
            return Ok(None);
        }

        let order_id = place_market(side, remaining_volume, previous_order_id).await?;
        self.entries.get_mut(&key).unwrap().current_order_id = Some(order_id);
        events.on_event(Event::PartialFillRetry {
            group_id: key.0,
            pair_id: key.1,
            attempt,
        });
        Ok(Some(order_id))
    }

    /// Feeds a fill of the current retry order for `key`. If residual volume
    /// remains, recurses into `initiate_retry` with the new residual; once
    /// the retry order is fully filled, discards bookkeeping for `key` and
    /// reports `Finalize` so the orchestrator can close out the pair.
    pub async fn handle_retry_fill<F, Fut>(
        &mut self,
        key: RetryKey,
        trade: &Trade,
        side: Side,
        place_market: F,
        events: &dyn EventSink,
    ) -> Result<RetryFillOutcome, EngineError>
    where
        F: FnOnce(Side, Decimal, Option<OrderId>) -> Fut,
        Fut: std::future::Future<Output = Result<OrderId, EngineError>>,
    {
        if trade.order.balance > Decimal::ZERO {
            self.initiate_retry(key, trade.order.balance, side, place_market, events)
                .await?;
            return Ok(RetryFillOutcome::StillPending);
        }

        self.entries.remove(&key);
        Ok(RetryFillOutcome::Finalize {
            group_id: key.0,
            pair_id: key.1,
        })
    }

    /// Identifies the retry key (if any) whose current retry order is
    /// `order_id` — used by the manager to route an incoming trade.
    pub fn find_key_by_order(&self, order_id: OrderId) -> Option<RetryKey> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.current_order_id == Some(order_id))
            .map(|(key, _)| *key)
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.requires_manual_intervention = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingEventSink;
    use rust_decimal_macros::dec;

    fn key() -> RetryKey {
        (GroupId::new(), PairId::new())
    }

    #[tokio::test]
    async fn exhausts_after_five_attempts() {
        let mut handler = PartialFillRetryHandler::new(5);
        let sink = RecordingEventSink::default();
        let key = key();

        for _ in 0..4 {
            let result = handler
                .initiate_retry(key, dec!(1), Side::Sell, |_, _, _| async { Ok(OrderId::new()) }, &sink)
                .await
                .unwrap();
            assert!(result.is_some());
            assert!(!handler.requires_manual_intervention());
        }

        let result = handler
            .initiate_retry(key, dec!(1), Side::Sell, |_, _, _| async { Ok(OrderId::new()) }, &sink)
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(handler.requires_manual_intervention());
        assert_eq!(handler.attempts_for(key), 5);

        let events = sink.events.lock().unwrap();
        assert!(matches!(events.last(), Some(Event::MaxRetryReached { .. })));
    }

    #[tokio::test]
    async fn full_fill_finalizes_and_clears_bookkeeping() {
        let mut handler = PartialFillRetryHandler::new(5);
        let sink = RecordingEventSink::default();
        let key = key();

        let order_id = handler
            .initiate_retry(key, dec!(4), Side::Sell, |_, _, _| async { Ok(OrderId::new()) }, &sink)
            .await
            .unwrap()
            .unwrap();

        let filled_order = crate::types::Order {
            id: order_id,
            spec: crate::types::OrderSpec::market("BTC-USD", Side::Sell, dec!(4)),
            balance: Decimal::ZERO,
            state: crate::types::OrderState::Done,
        };
        let trade = Trade {
            order: filled_order,
            trade_price: dec!(95),
            trade_volume: dec!(4),
            server_time: chrono::Utc::now(),
        };

        let outcome = handler
            .handle_retry_fill(key, &trade, Side::Sell, |_, _, _| async { Ok(OrderId::new()) }, &sink)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RetryFillOutcome::Finalize {
                group_id: key.0,
                pair_id: key.1
            }
        );
        assert_eq!(handler.attempts_for(key), 0);
        assert!(handler.find_key_by_order(order_id).is_none());
    }
}
