// ─────────────────────────────────────────────────────────────────────────────
// group.rs — Order Group (C2)
//
// An entry order plus its protective pairs, tracked jointly. Owned
// exclusively by the registry; mutation happens through narrow methods here
// rather than field access, so the Pending/EntryFilled/ProtectionActive/Closed
// invariants (spec §3) stay enforced in one place.
// ─────────────────────────────────────────────────────────────────────────────
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{GroupId, OrderId, PairId, ProtectivePairSpec, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupState {
    Pending,
    EntryFilled,
    ProtectionActive,
    Closed,
}

/// The live state of one protective pair within a group. `sl_order_id` /
/// `tp_order_id` are populated once the corresponding order has been placed
/// — both are `None` while the group is `Pending`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairSlot {
    pub sl_order_id: Option<OrderId>,
    pub tp_order_id: Option<OrderId>,
    pub spec: ProtectivePairSpec,
}

impl PairSlot {
    pub fn new(spec: ProtectivePairSpec) -> Self {
        Self {
            sl_order_id: None,
            tp_order_id: None,
            spec,
        }
    }

    pub fn volume(&self, entry_volume: Decimal) -> Decimal {
        self.spec.resolved_volume(entry_volume)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderGroup {
    pub group_id: GroupId,
    pub security: String,
    pub entry_order_id: OrderId,
    pub entry_side: Side,
    pub entry_price: Decimal,
    pub entry_volume: Decimal,
    pub protective_pairs: HashMap<PairId, PairSlot>,
    pub state: GroupState,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl OrderGroup {
    pub fn new(
        group_id: GroupId,
        security: String,
        entry_order_id: OrderId,
        entry_side: Side,
        entry_price: Decimal,
        entry_volume: Decimal,
        pairs: Vec<ProtectivePairSpec>,
        now: DateTime<Utc>,
    ) -> Self {
        let protective_pairs = pairs
            .into_iter()
            .map(|spec| (PairId::new(), PairSlot::new(spec)))
            .collect();
        Self {
            group_id,
            security,
            entry_order_id,
            entry_side,
            entry_price,
            entry_volume,
            protective_pairs,
            state: GroupState::Pending,
            created_at: now,
            activated_at: None,
            completed_at: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == GroupState::Closed
    }

    /// Entry fully filled: advance Pending → EntryFilled.
    pub fn mark_entry_filled(&mut self, now: DateTime<Utc>) {
        self.state = GroupState::EntryFilled;
        self.activated_at = Some(now);
    }

    /// All protective orders placed: advance EntryFilled → ProtectionActive.
    pub fn mark_protection_active(&mut self) {
        self.state = GroupState::ProtectionActive;
    }

    /// Populate a pair's order-id slots once the broker has placed them.
    pub fn set_pair_orders(&mut self, pair_id: PairId, sl: OrderId, tp: OrderId) {
        if let Some(slot) = self.protective_pairs.get_mut(&pair_id) {
            slot.sl_order_id = Some(sl);
            slot.tp_order_id = Some(tp);
        }
    }

    /// Remove a pair (fully exited, cancelled, or market-recovered). If no
    /// pairs remain, the group closes.
    pub fn remove_pair(&mut self, pair_id: PairId, now: DateTime<Utc>) {
        self.protective_pairs.remove(&pair_id);
        if self.protective_pairs.is_empty() {
            self.close(now);
        }
    }

    pub fn close(&mut self, now: DateTime<Utc>) {
        self.state = GroupState::Closed;
        self.completed_at = Some(now);
    }

    /// Finds the pair slot (if any) whose SL or TP order matches `order_id`.
    pub fn find_pair_by_order(&self, order_id: OrderId) -> Option<(PairId, &PairSlot)> {
        self.protective_pairs.iter().find_map(|(pid, slot)| {
            if slot.sl_order_id == Some(order_id) || slot.tp_order_id == Some(order_id) {
                Some((*pid, slot))
            } else {
                None
            }
        })
    }

    pub fn contains_order(&self, order_id: OrderId) -> bool {
        self.entry_order_id == order_id
            || self
                .protective_pairs
                .values()
                .any(|slot| slot.sl_order_id == Some(order_id) || slot.tp_order_id == Some(order_id))
    }

    /// Total open volume across all remaining pairs — used by
    /// `close_all_positions` to flatten the group in one market order.
    pub fn total_open_volume(&self) -> Decimal {
        self.protective_pairs
            .values()
            .map(|slot| slot.volume(self.entry_volume))
            .sum()
    }

    /// Group-level dedup match (spec §3): same side, same volume, same pair
    /// count, entry price within `tolerance`, and pair specs equal once both
    /// sides are sorted by (SL, TP).
    pub fn matches(
        &self,
        entry_side: Side,
        entry_price: Decimal,
        entry_volume: Decimal,
        pairs: &[ProtectivePairSpec],
        tolerance: Decimal,
    ) -> bool {
        if self.entry_side != entry_side
            || self.entry_volume != entry_volume
            || self.protective_pairs.len() != pairs.len()
        {
            return false;
        }
        if (self.entry_price - entry_price).abs() > tolerance {
            return false;
        }

        let mut existing: Vec<&ProtectivePairSpec> =
            self.protective_pairs.values().map(|s| &s.spec).collect();
        existing.sort_by(|a, b| {
            (a.stop_loss_price, a.take_profit_price).cmp(&(b.stop_loss_price, b.take_profit_price))
        });
        let mut incoming: Vec<&ProtectivePairSpec> = pairs.iter().collect();
        incoming.sort_by(|a, b| {
            (a.stop_loss_price, a.take_profit_price).cmp(&(b.stop_loss_price, b.take_profit_price))
        });

        existing
            .iter()
            .zip(incoming.iter())
            .all(|(a, b)| {
                a.stop_loss_price == b.stop_loss_price
                    && a.take_profit_price == b.take_profit_price
                    && a.resolved_volume(self.entry_volume) == b.resolved_volume(entry_volume)
            })
    }
}
