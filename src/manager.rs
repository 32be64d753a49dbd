// ─────────────────────────────────────────────────────────────────────────────
// manager.rs — Order Position Manager (C6)
//
// Top-level orchestrator: holds the registry, the retry handler, the broker
// port, and the last-seen candle (for the same-bar protection check after an
// entry fill). Generalizes the shape of the pre-existing `MmExecutionEngine`
// orchestrator — config + dependencies as fields, narrow async methods driven
// by the surrounding event pump, with every halt/cap/retry condition reported
// through the event sink rather than returned as an error the caller must
// handle.
// ─────────────────────────────────────────────────────────────────────────────
use chrono::Utc;
use rust_decimal::Decimal;

use crate::broker::BrokerOperations;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{Event, EventSink};
use crate::group::GroupState;
use crate::protection;
use crate::registry::OrderRegistry;
use crate::retry::{PartialFillRetryHandler, RetryFillOutcome};
use crate::types::{
    CandleMessage, GroupId, Order, OrderId, OrderRequest, OrderSpec, OrderType, PairId, Side, Trade,
};

pub struct OrderPositionManager {
    config: EngineConfig,
    registry: OrderRegistry,
    retry_handler: PartialFillRetryHandler,
    broker: Box<dyn BrokerOperations>,
    events: Box<dyn EventSink>,
    last_candle: Option<CandleMessage>,
}

impl OrderPositionManager {
    pub fn new(config: EngineConfig, broker: Box<dyn BrokerOperations>, events: Box<dyn EventSink>) -> Self {
        let registry = OrderRegistry::new(config.max_concurrent_groups);
        Self {
            config,
            registry,
            retry_handler: PartialFillRetryHandler::new(config.max_retry_attempts),
            broker,
            events,
            last_candle: None,
        }
    }

    pub fn registry(&self) -> &OrderRegistry {
        &self.registry
    }

    pub fn retry_handler(&self) -> &PartialFillRetryHandler {
        &self.retry_handler
    }

    // ─── 4.6.1 handle_order_request ────────────────────────────────────────

    /// `request = None` cancels every `Pending` group. Otherwise registers a
    /// new group unless an identical signal is already pending (group-level
    /// dedup) or the registry is at capacity.
    ///
    /// Exact-equality signal dedup (C1, `SignalDeduplicator`) is not
    /// consulted here — per spec §4.1/§6's data flow, the strategy applies
    /// it upstream, before a signal is ever turned into an `OrderRequest`.
    /// Only the group-level `matches` check (spec §3) happens inside the
    /// manager.
    pub async fn handle_order_request(
        &mut self,
        request: Option<OrderRequest>,
    ) -> Result<Option<Order>, EngineError> {
        let Some(request) = request else {
            return self.cancel_all_pending().await.map(|_| None);
        };

        if let Some(group_id) = self
            .registry
            .find_matching_pending_group(&request, self.config.match_tolerance)
        {
            self.events.on_event(Event::OrderRejected {
                reason: format!("duplicate signal matches pending group {}", group_id),
            });
            return Ok(None);
        }

        if self.registry.is_full() {
            self.events.on_event(Event::MaxConcurrentGroupsReached {
                max: self.config.max_concurrent_groups,
            });
            return Ok(None);
        }

        let entry_order = self.broker.place_order(request.order.clone()).await?;
        let group_id = self.registry.register_group(
            entry_order.id,
            request.order.side,
            request.order.price,
            request.order.volume,
            request.order.security.clone(),
            &request,
            Utc::now(),
        )?;
        self.events.on_event(Event::OrderActivated {
            group_id,
            order_id: entry_order.id,
        });

        Ok(Some(entry_order))
    }

    async fn cancel_all_pending(&mut self) -> Result<(), EngineError> {
        let pending: Vec<(GroupId, OrderId)> = self
            .registry
            .active_groups()
            .filter(|g| g.state == GroupState::Pending)
            .map(|g| (g.group_id, g.entry_order_id))
            .collect();

        for (group_id, entry_order_id) in pending {
            self.broker.cancel_order(entry_order_id).await?;
            if let Some(group) = self.registry.get_mut(group_id) {
                group.close(Utc::now());
            }
            self.events.on_event(Event::GroupCancelled { group_id });
        }
        Ok(())
    }

    // ─── 4.6.2 on_own_trade_received ───────────────────────────────────────

    pub async fn on_own_trade_received(&mut self, trade: Trade) -> Result<(), EngineError> {
        if let Some(retry_key) = self.retry_handler.find_key_by_order(trade.order.id) {
            return self.handle_retry_trade(retry_key, trade).await;
        }

        let Some(group_id) = self.registry.find_group_by_order(trade.order.id) else {
            // Orphan trade: defensive, logged only (spec §7).
            log::debug!("orphan trade for unknown order {}", trade.order.id);
            return Ok(());
        };

        let is_entry = self
            .registry
            .get(group_id)
            .map(|g| g.entry_order_id == trade.order.id)
            .unwrap_or(false);

        if is_entry {
            self.handle_entry_fill(group_id, trade).await
        } else {
            self.handle_protective_fill(group_id, trade).await
        }
    }

    async fn handle_retry_trade(
        &mut self,
        retry_key: (GroupId, PairId),
        trade: Trade,
    ) -> Result<(), EngineError> {
        let side = trade.order.spec.side;
        let broker = &mut self.broker;
        let events = self.events.as_ref();
        let outcome = self
            .retry_handler
            .handle_retry_fill(retry_key, &trade, side, |side, volume, previous_order_id| {
                let security = trade.order.spec.security.clone();
                async move {
                    if let Some(previous_order_id) = previous_order_id {
                        broker.cancel_order(previous_order_id).await?;
                    }
                    broker
                        .place_order(OrderSpec::market(security, side, volume))
                        .await
                        .map(|order| order.id)
                }
            }, events)
            .await?;

        if let RetryFillOutcome::Finalize { group_id, pair_id } = outcome {
            self.cancel_pair_siblings(group_id, pair_id).await?;
            self.finalize_pair(group_id, pair_id).await?;
        }
        Ok(())
    }

    /// Cancels whichever of a pair's original SL/TP orders are still Active.
    /// Used both by the direct full-fill path (where the filled leg is known
    /// and only its sibling needs cancelling) and by retry completion (where
    /// the filled order is a market retry order never recorded in the slot —
    /// the superseded original leg was already cancelled when the retry was
    /// initiated, so this only ever finds the untouched sibling still open).
    async fn cancel_pair_siblings(&mut self, group_id: GroupId, pair_id: PairId) -> Result<(), EngineError> {
        let (sl_order_id, tp_order_id) = {
            let group = self.registry.get(group_id).expect("group must exist");
            let slot = &group.protective_pairs[&pair_id];
            (slot.sl_order_id, slot.tp_order_id)
        };
        for order_id in [sl_order_id, tp_order_id].into_iter().flatten() {
            if let Some(order) = self.broker.get_order(order_id) {
                if order.is_active() {
                    self.broker.cancel_order(order_id).await?;
                }
            }
        }
        Ok(())
    }

    async fn handle_entry_fill(&mut self, group_id: GroupId, trade: Trade) -> Result<(), EngineError> {
        if trade.order.balance > Decimal::ZERO {
            // Entry partial fill: wait for full fill. Never enters retry
            // machinery, never triggers protective placement (spec §4.6.2).
            return Ok(());
        }

        let now = Utc::now();
        let group = self.registry.get_mut(group_id).expect("group must exist");
        group.mark_entry_filled(now);

        // Same-bar protection check: a candle may fill the entry and cross a
        // Market-typed TP/SL within the same interval. Must run before any
        // protective order is placed, or we'd rest orders on a position
        // already beyond its exit levels.
        if let Some(candle) = self.last_candle.clone() {
            let hit = protection::check_protection_levels(
                &mut self.registry,
                self.broker.as_mut(),
                &candle,
                self.events.as_ref(),
                now,
            )
            .await?;
            if hit {
                return Ok(());
            }
        }

        self.place_protective_orders(group_id).await
    }

    async fn place_protective_orders(&mut self, group_id: GroupId) -> Result<(), EngineError> {
        let (security, entry_volume, entry_side, pair_ids): (String, Decimal, Side, Vec<PairId>) = {
            let group = self.registry.get(group_id).expect("group must exist");
            (
                group.security.clone(),
                group.entry_volume,
                group.entry_side,
                group.protective_pairs.keys().copied().collect(),
            )
        };
        let exit_side = entry_side.opposite();

        for pair_id in pair_ids {
            let spec = {
                let group = self.registry.get(group_id).expect("group must exist");
                group.protective_pairs[&pair_id].spec.clone()
            };

            // Market-typed pairs never rest at the broker — a Market order
            // fills immediately, so placing one here would instantly
            // execute both legs and double-close the position. These are
            // left unplaced; the candle checker (C5) closes them
            // synthetically once the OHLC crosses the level (spec §4.5).
            if spec.order_type == OrderType::Market {
                continue;
            }
            let volume = spec.resolved_volume(entry_volume);

            let sl_order = self
                .broker
                .place_order(OrderSpec {
                    security: security.clone(),
                    side: exit_side,
                    price: spec.stop_loss_price,
                    volume,
                    order_type: spec.order_type,
                })
                .await?;
            let tp_order = self
                .broker
                .place_order(OrderSpec {
                    security: security.clone(),
                    side: exit_side,
                    price: spec.take_profit_price,
                    volume,
                    order_type: spec.order_type,
                })
                .await?;

            let group = self.registry.get_mut(group_id).expect("group must exist");
            group.set_pair_orders(pair_id, sl_order.id, tp_order.id);
            self.events.on_event(Event::OrderActivated {
                group_id,
                order_id: sl_order.id,
            });
            self.events.on_event(Event::OrderActivated {
                group_id,
                order_id: tp_order.id,
            });
        }

        self.registry
            .get_mut(group_id)
            .expect("group must exist")
            .mark_protection_active();
        Ok(())
    }

    async fn handle_protective_fill(&mut self, group_id: GroupId, trade: Trade) -> Result<(), EngineError> {
        let pair_id = {
            let group = self.registry.get(group_id).expect("group must exist");
            let (pair_id, _slot) = group
                .find_pair_by_order(trade.order.id)
                .expect("trade routed to group must match a pair");
            pair_id
        };

        if trade.order.balance > Decimal::ZERO {
            // The order that just partially filled is superseded by the
            // market retry about to be placed; cancel it so it can't keep
            // resting and double-close the residual.
            if self.broker.get_order(trade.order.id).is_some_and(|o| o.is_active()) {
                self.broker.cancel_order(trade.order.id).await?;
            }

            let key = (group_id, pair_id);
            let side = trade.order.spec.side;
            let security = trade.order.spec.security.clone();
            let remaining = trade.order.balance;
            let broker = &mut self.broker;
            let events = self.events.as_ref();
            self.retry_handler
                .initiate_retry(
                    key,
                    remaining,
                    side,
                    |side, volume, previous_order_id| async move {
                        if let Some(previous_order_id) = previous_order_id {
                            broker.cancel_order(previous_order_id).await?;
                        }
                        broker
                            .place_order(OrderSpec::market(security, side, volume))
                            .await
                            .map(|order| order.id)
                    },
                    events,
                )
                .await?;
            // Sibling is not cancelled yet — the pair isn't fully closed.
            return Ok(());
        }

        self.cancel_pair_siblings(group_id, pair_id).await?;
        self.finalize_pair(group_id, pair_id).await
    }

    async fn finalize_pair(&mut self, group_id: GroupId, pair_id: PairId) -> Result<(), EngineError> {
        let now = Utc::now();
        let group = self.registry.get_mut(group_id).expect("group must exist");
        group.remove_pair(pair_id, now);
        if group.is_closed() {
            self.events.on_event(Event::GroupCompleted { group_id });
        }
        Ok(())
    }

    // ─── 4.6.3 on_order_state_changed ──────────────────────────────────────

    /// Non-trade lifecycle transitions for the entry order only: expiry
    /// untouched, or outright failure.
    pub async fn on_order_state_changed(&mut self, order: Order) -> Result<(), EngineError> {
        let Some(group_id) = self.registry.find_group_by_order(order.id) else {
            return Ok(());
        };
        let is_entry = self
            .registry
            .get(group_id)
            .map(|g| g.entry_order_id == order.id)
            .unwrap_or(false);
        if !is_entry {
            return Ok(());
        }

        let expired_untouched = order.is_untouched_expiry();
        let failed = order.state == crate::types::OrderState::Failed;
        if !expired_untouched && !failed {
            return Ok(());
        }

        let now = Utc::now();
        let pair_ids: Vec<PairId> = {
            let group = self.registry.get(group_id).expect("group must exist");
            group.protective_pairs.keys().copied().collect()
        };
        // Defensive: a Pending group should have no protective orders placed
        // yet, but cancel any that erroneously exist before closing.
        for pair_id in &pair_ids {
            let (sl, tp) = {
                let group = self.registry.get(group_id).expect("group must exist");
                let slot = &group.protective_pairs[pair_id];
                (slot.sl_order_id, slot.tp_order_id)
            };
            for order_id in [sl, tp].into_iter().flatten() {
                if let Some(o) = self.broker.get_order(order_id) {
                    if o.is_active() {
                        self.broker.cancel_order(order_id).await?;
                    }
                }
            }
        }

        let group = self.registry.get_mut(group_id).expect("group must exist");
        group.protective_pairs.clear();
        group.close(now);
        self.events.on_event(Event::GroupCancelled { group_id });
        Ok(())
    }

    // ─── 4.6.4 check_protection_levels ─────────────────────────────────────

    pub async fn check_protection_levels(&mut self, candle: CandleMessage) -> Result<bool, EngineError> {
        self.last_candle = Some(candle.clone());
        protection::check_protection_levels(
            &mut self.registry,
            self.broker.as_mut(),
            &candle,
            self.events.as_ref(),
            Utc::now(),
        )
        .await
    }

    // ─── 4.6.5 close_all_positions ──────────────────────────────────────────

    pub async fn close_all_positions(&mut self) -> Result<(), EngineError> {
        let now = Utc::now();
        let group_ids: Vec<GroupId> = self.registry.active_groups().map(|g| g.group_id).collect();

        for group_id in group_ids {
            let (entry_order_id, state, security, entry_side, total_volume, order_ids): (
                OrderId,
                GroupState,
                String,
                Side,
                Decimal,
                Vec<OrderId>,
            ) = {
                let group = self.registry.get(group_id).expect("group must exist");
                let order_ids = group
                    .protective_pairs
                    .values()
                    .flat_map(|slot| [slot.sl_order_id, slot.tp_order_id])
                    .flatten()
                    .collect();
                (
                    group.entry_order_id,
                    group.state,
                    group.security.clone(),
                    group.entry_side,
                    group.total_open_volume(),
                    order_ids,
                )
            };

            if let Some(entry) = self.broker.get_order(entry_order_id) {
                if entry.is_active() {
                    self.broker.cancel_order(entry_order_id).await?;
                }
            }
            for order_id in order_ids {
                if let Some(o) = self.broker.get_order(order_id) {
                    if o.is_active() {
                        self.broker.cancel_order(order_id).await?;
                    }
                }
            }

            if matches!(state, GroupState::EntryFilled | GroupState::ProtectionActive)
                && total_volume > Decimal::ZERO
            {
                let flatten_side = entry_side.opposite();
                self.broker
                    .place_order(OrderSpec::market(security, flatten_side, total_volume))
                    .await?;
            }

            let group = self.registry.get_mut(group_id).expect("group must exist");
            group.protective_pairs.clear();
            group.close(now);
            self.events.on_event(Event::GroupCancelled { group_id });
        }
        Ok(())
    }

    // ─── 4.6.6 reset ─────────────────────────────────────────────────────────

    pub fn reset(&mut self) {
        self.registry.reset();
        self.retry_handler.reset();
        self.last_candle = None;
    }
}
