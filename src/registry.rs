// ─────────────────────────────────────────────────────────────────────────────
// registry.rs — Order Registry (C3)
//
// Owns every active group; nothing outside this module mutates an
// `OrderGroup` directly. Generalizes the shape of the old `InternalInventory`
// `HashMap`-owned entity store, but keyed by a generated `GroupId` rather than
// the coin name.
// ─────────────────────────────────────────────────────────────────────────────
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::EngineError;
use crate::group::OrderGroup;
use crate::types::{GroupId, OrderId, OrderRequest, Side};

#[derive(Debug, Default)]
pub struct OrderRegistry {
    groups: HashMap<GroupId, OrderGroup>,
    max_concurrent_groups: usize,
}

impl OrderRegistry {
    pub fn new(max_concurrent_groups: usize) -> Self {
        Self {
            groups: HashMap::new(),
            max_concurrent_groups,
        }
    }

    pub fn active_count(&self) -> usize {
        self.groups.values().filter(|g| !g.is_closed()).count()
    }

    pub fn is_full(&self) -> bool {
        self.active_count() >= self.max_concurrent_groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Registers a new group for `request`, keyed by the entry order the
    /// caller already placed at the broker. Fails closed: a capacity or
    /// volume violation leaves the registry untouched.
    pub fn register_group(
        &mut self,
        entry_order_id: OrderId,
        entry_side: Side,
        entry_price: Decimal,
        entry_volume: Decimal,
        security: String,
        request: &OrderRequest,
        now: DateTime<Utc>,
    ) -> Result<GroupId, EngineError> {
        if self.is_full() {
            return Err(EngineError::CapacityExceeded {
                max: self.max_concurrent_groups,
            });
        }

        if request.protective_pairs.len() > 1 {
            let sum: Decimal = request
                .protective_pairs
                .iter()
                .map(|p| p.resolved_volume(entry_volume))
                .sum();
            if sum != entry_volume {
                return Err(EngineError::VolumeMismatch {
                    sum,
                    entry_volume,
                });
            }
        }

        let group_id = GroupId::new();
        let group = OrderGroup::new(
            group_id,
            security,
            entry_order_id,
            entry_side,
            entry_price,
            entry_volume,
            request.protective_pairs.clone(),
            now,
        );
        self.groups.insert(group_id, group);
        Ok(group_id)
    }

    pub fn get(&self, group_id: GroupId) -> Option<&OrderGroup> {
        self.groups.get(&group_id)
    }

    pub fn get_mut(&mut self, group_id: GroupId) -> Option<&mut OrderGroup> {
        self.groups.get_mut(&group_id)
    }

    /// Ordered-undefined snapshot of every non-closed group.
    pub fn active_groups(&self) -> impl Iterator<Item = &OrderGroup> {
        self.groups.values().filter(|g| !g.is_closed())
    }

    pub fn active_groups_mut(&mut self) -> impl Iterator<Item = &mut OrderGroup> {
        self.groups.values_mut().filter(|g| !g.is_closed())
    }

    /// First non-closed, `Pending` group whose entry/pairs match `request`
    /// within `tolerance` — the group-level half of deduplication.
    pub fn find_matching_pending_group(
        &self,
        request: &OrderRequest,
        tolerance: Decimal,
    ) -> Option<GroupId> {
        self.groups
            .values()
            .find(|g| {
                g.state == crate::group::GroupState::Pending
                    && g.matches(
                        request.order.side,
                        request.order.price,
                        request.order.volume,
                        &request.protective_pairs,
                        tolerance,
                    )
            })
            .map(|g| g.group_id)
    }

    pub fn find_group_by_order(&self, order_id: OrderId) -> Option<GroupId> {
        self.groups
            .values()
            .find(|g| g.contains_order(order_id))
            .map(|g| g.group_id)
    }

    /// Drops every group, regardless of state.
    pub fn reset(&mut self) {
        self.groups.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderSpec, OrderType, ProtectivePairSpec};
    use rust_decimal_macros::dec;

    fn sample_request() -> OrderRequest {
        OrderRequest::new(
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
        .unwrap()
    }

    #[test]
    fn capacity_is_enforced() {
        let mut registry = OrderRegistry::new(2);
        let request = sample_request();
        let now = Utc::now();

        registry
            .register_group(OrderId::new(), Side::Buy, dec!(100), dec!(10), "BTC-USD".into(), &request, now)
            .unwrap();
        registry
            .register_group(OrderId::new(), Side::Buy, dec!(100), dec!(10), "BTC-USD".into(), &request, now)
            .unwrap();

        let err = registry
            .register_group(OrderId::new(), Side::Buy, dec!(100), dec!(10), "BTC-USD".into(), &request, now)
            .unwrap_err();
        assert_eq!(err, EngineError::CapacityExceeded { max: 2 });
        assert_eq!(registry.active_count(), 2);
    }

    #[test]
    fn closing_a_group_frees_capacity() {
        let mut registry = OrderRegistry::new(1);
        let request = sample_request();
        let now = Utc::now();

        let group_id = registry
            .register_group(OrderId::new(), Side::Buy, dec!(100), dec!(10), "BTC-USD".into(), &request, now)
            .unwrap();

        assert!(registry.is_full());
        registry.get_mut(group_id).unwrap().close(now);
        assert!(!registry.is_full());

        registry
            .register_group(OrderId::new(), Side::Buy, dec!(100), dec!(10), "BTC-USD".into(), &request, now)
            .unwrap();
        assert!(registry.is_full());
    }

    #[test]
    fn find_matching_pending_group_requires_pending_state() {
        let mut registry = OrderRegistry::new(5);
        let request = sample_request();
        let now = Utc::now();

        let group_id = registry
            .register_group(OrderId::new(), Side::Buy, dec!(100), dec!(10), "BTC-USD".into(), &request, now)
            .unwrap();

        let tolerance = dec!(0.00000001);
        assert_eq!(
            registry.find_matching_pending_group(&request, tolerance),
            Some(group_id)
        );

        registry.get_mut(group_id).unwrap().mark_entry_filled(now);
        assert_eq!(registry.find_matching_pending_group(&request, tolerance), None);
    }

    #[test]
    fn reset_drops_all_groups() {
        let mut registry = OrderRegistry::new(5);
        let request = sample_request();
        registry
            .register_group(OrderId::new(), Side::Buy, dec!(100), dec!(10), "BTC-USD".into(), &request, Utc::now())
            .unwrap();
        registry.reset();
        assert_eq!(registry.len(), 0);
    }
}
