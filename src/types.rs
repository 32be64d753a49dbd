// ─────────────────────────────────────────────────────────────────────────────
// types.rs — core value types shared by every component (spec §3).
//
// Everything here is an exact-decimal value type. No f64 anywhere — prices,
// volumes and balances are compared bit-exact (SignalKey equality, the
// match-tolerance check in registry.rs) and float error would silently break
// both.
// ─────────────────────────────────────────────────────────────────────────────
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies a registered [`crate::group::OrderGroup`]. Generated at
/// `register_group` time, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(pub Uuid);

impl GroupId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one protective pair within a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairId(pub Uuid);

impl PairId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PairId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PairId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a live order at the broker. Assigned by
/// [`crate::broker::BrokerOperations::place_order`] — the core never
/// compares orders by reference, only by this id (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub Uuid);

impl OrderId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    Active,
    Done,
    Failed,
    Cancelled,
}

/// What the core asks the broker to place (spec §6, "order specification
/// format"). `price` is `Decimal::ZERO` for `Market` orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSpec {
    pub security: String,
    pub side: Side,
    pub price: Decimal,
    pub volume: Decimal,
    pub order_type: OrderType,
}

impl OrderSpec {
    pub fn market(security: impl Into<String>, side: Side, volume: Decimal) -> Self {
        Self {
            security: security.into(),
            side,
            price: Decimal::ZERO,
            volume,
            order_type: OrderType::Market,
        }
    }
}

/// A live broker-side order handle. The broker owns canonical state; the
/// core only ever holds this as a read-only snapshot returned from
/// `place_order`, a trade, or a state-change callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub spec: OrderSpec,
    /// Remaining unfilled volume. Zero once fully filled.
    pub balance: Decimal,
    pub state: OrderState,
}

impl Order {
    pub fn is_fully_filled(&self) -> bool {
        self.state == OrderState::Done && self.balance.is_zero()
    }

    pub fn is_untouched_expiry(&self) -> bool {
        self.state == OrderState::Done && self.balance == self.spec.volume
    }

    pub fn is_active(&self) -> bool {
        self.state == OrderState::Active
    }
}

/// Fill notification (spec §3). `order` is the post-trade snapshot: its
/// `balance` already reflects this fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub order: Order,
    pub trade_price: Decimal,
    pub trade_volume: Decimal,
    pub server_time: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandleState {
    Active,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleMessage {
    pub open_time: chrono::DateTime<chrono::Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub state: CandleState,
}

/// Exact-equality dedup key (spec §3). Indicator output is deterministic per
/// bar, so unlike the registry's `matches` tolerance check, no epsilon is
/// used here — a genuinely new signal always differs in at least one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalKey {
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
}

/// One stop-loss/take-profit tuple attached to an entry (spec §3).
/// `volume` of `None` means "defaults to the entry's volume" — resolved at
/// registration time in `OrderRequest::validate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectivePairSpec {
    pub stop_loss_price: Decimal,
    pub take_profit_price: Decimal,
    pub volume: Option<Decimal>,
    pub order_type: OrderType,
}

impl ProtectivePairSpec {
    /// `entry_volume` resolves an unset `volume` to the entry's own volume.
    pub fn resolved_volume(&self, entry_volume: Decimal) -> Decimal {
        self.volume.unwrap_or(entry_volume)
    }
}

/// A signal translated into broker orders to place (spec §3). Constructed
/// via [`OrderRequest::new`], which enforces the pair-volume invariant —
/// there is no other way to build one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub order: OrderSpec,
    pub protective_pairs: Vec<ProtectivePairSpec>,
}

impl OrderRequest {
    pub fn new(
        order: OrderSpec,
        protective_pairs: Vec<ProtectivePairSpec>,
    ) -> Result<Self, crate::error::EngineError> {
        use crate::error::EngineError;

        if protective_pairs.is_empty() {
            return Err(EngineError::InvalidSignal(
                "protective_pairs must be non-empty".into(),
            ));
        }
        if order.volume <= Decimal::ZERO {
            return Err(EngineError::InvalidSignal(
                "entry volume must be positive".into(),
            ));
        }
        for pair in &protective_pairs {
            let vol = pair.resolved_volume(order.volume);
            if vol <= Decimal::ZERO {
                return Err(EngineError::InvalidSignal(
                    "protective pair volume must be positive".into(),
                ));
            }
            match order.side {
                Side::Buy => {
                    if !(pair.stop_loss_price < order.price && order.price < pair.take_profit_price)
                    {
                        return Err(EngineError::InvalidSignal(format!(
                            "long pair must satisfy sl < entry < tp, got sl={} entry={} tp={}",
                            pair.stop_loss_price, order.price, pair.take_profit_price
                        )));
                    }
                }
                Side::Sell => {
                    if !(pair.stop_loss_price > order.price && order.price > pair.take_profit_price)
                    {
                        return Err(EngineError::InvalidSignal(format!(
                            "short pair must satisfy tp < entry < sl, got tp={} entry={} sl={}",
                            pair.take_profit_price, order.price, pair.stop_loss_price
                        )));
                    }
                }
            }
        }

        if protective_pairs.len() > 1 {
            let sum: Decimal = protective_pairs
                .iter()
                .map(|p| p.resolved_volume(order.volume))
                .sum();
            if sum != order.volume {
                return Err(EngineError::VolumeMismatch {
                    sum,
                    entry_volume: order.volume,
                });
            }
        } else {
            let only = &protective_pairs[0];
            if only.resolved_volume(order.volume) > order.volume {
                return Err(EngineError::VolumeMismatch {
                    sum: only.resolved_volume(order.volume),
                    entry_volume: order.volume,
                });
            }
        }

        Ok(Self {
            order,
            protective_pairs,
        })
    }

    pub fn signal_key(&self) -> SignalKey {
        SignalKey {
            entry_price: self.order.price,
            stop_loss: self.protective_pairs[0].stop_loss_price,
            take_profit: self.protective_pairs[0].take_profit_price,
        }
    }
}
