// ─────────────────────────────────────────────────────────────────────────────
// broker.rs — Broker Operations Port (C7)
//
// Abstraction the core consumes from the environment, generalizing the old
// `ExchangeClient` trait + `SimExchange` pair: the core places/cancels orders
// and reads back order state through this port only, never inspecting broker
// internals.
// ─────────────────────────────────────────────────────────────────────────────
use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::EngineError;
use crate::types::{Order, OrderId, OrderSpec, OrderState};

#[async_trait]
pub trait BrokerOperations: Send + Sync {
    /// Places `spec` and returns a live order handle.
    async fn place_order(&mut self, spec: OrderSpec) -> Result<Order, EngineError>;

    /// Best-effort cancellation. The broker emits a follow-up state change;
    /// this call does not itself guarantee the order is done cancelling.
    async fn cancel_order(&mut self, order_id: OrderId) -> Result<(), EngineError>;

    /// Current snapshot of a previously-placed order, if still known.
    fn get_order(&self, order_id: OrderId) -> Option<Order>;
}

/// In-memory broker double used by tests. Orders placed through it start
/// `Active`; tests drive fills and cancellations explicitly via `fill` /
/// `expire` / `cancel_order`, generalizing the role `SimExchange` played for
/// the market-maker code.
#[derive(Debug, Default)]
pub struct SimBroker {
    orders: HashMap<OrderId, Order>,
}

impl SimBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every order id known to this broker, in no particular order. Useful
    /// for tests that need to find an order placed internally by the
    /// engine (e.g. a retry market order) without a direct handle to it.
    pub fn order_ids(&self) -> Vec<OrderId> {
        self.orders.keys().copied().collect()
    }

    /// Applies a partial or full fill of `volume` to `order_id`, returning
    /// the updated order. Panics if the order is unknown or overfilled —
    /// both are test-harness bugs, not runtime conditions.
    pub fn fill(&mut self, order_id: OrderId, volume: Decimal) -> Order {
        let order = self.orders.get_mut(&order_id).expect("unknown order in SimBroker::fill");
        assert!(volume <= order.balance, "fill exceeds remaining balance");
        order.balance -= volume;
        if order.balance.is_zero() {
            order.state = OrderState::Done;
        }
        order.clone()
    }

    /// Marks an order `Done` with its full original volume untouched — the
    /// "entry expired without fill" edge case.
    pub fn expire_untouched(&mut self, order_id: OrderId) -> Order {
        let order = self
            .orders
            .get_mut(&order_id)
            .expect("unknown order in SimBroker::expire_untouched");
        order.state = OrderState::Done;
        order.clone()
    }

    pub fn fail(&mut self, order_id: OrderId) -> Order {
        let order = self
            .orders
            .get_mut(&order_id)
            .expect("unknown order in SimBroker::fail");
        order.state = OrderState::Failed;
        order.clone()
    }
}

#[async_trait]
impl BrokerOperations for SimBroker {
    async fn place_order(&mut self, spec: OrderSpec) -> Result<Order, EngineError> {
        let order = Order {
            id: OrderId::new(),
            balance: spec.volume,
            spec,
            state: OrderState::Active,
        };
        self.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn cancel_order(&mut self, order_id: OrderId) -> Result<(), EngineError> {
        if let Some(order) = self.orders.get_mut(&order_id) {
            if order.state == OrderState::Active {
                order.state = OrderState::Cancelled;
            }
        }
        Ok(())
    }

    fn get_order(&self, order_id: OrderId) -> Option<Order> {
        self.orders.get(&order_id).cloned()
    }
}

/// Thread-safe handle onto a `SimBroker`, shared between the manager (which
/// owns a `Box<dyn BrokerOperations>`) and a test that wants to drive fills
/// and inspect order state from outside. Locking is synchronous — `SimBroker`
/// never awaits inside a call, so there's no risk of holding the lock across
/// a yield point.
#[derive(Clone, Default)]
pub struct SharedSimBroker(pub std::sync::Arc<std::sync::Mutex<SimBroker>>);

impl SharedSimBroker {
    pub fn new() -> Self {
        Self(std::sync::Arc::new(std::sync::Mutex::new(SimBroker::new())))
    }

    pub fn fill(&self, order_id: OrderId, volume: Decimal) -> Order {
        self.0.lock().unwrap().fill(order_id, volume)
    }

    pub fn expire_untouched(&self, order_id: OrderId) -> Order {
        self.0.lock().unwrap().expire_untouched(order_id)
    }

    pub fn fail(&self, order_id: OrderId) -> Order {
        self.0.lock().unwrap().fail(order_id)
    }

    pub fn order_ids(&self) -> Vec<OrderId> {
        self.0.lock().unwrap().order_ids()
    }
}

#[async_trait]
impl BrokerOperations for SharedSimBroker {
    async fn place_order(&mut self, spec: OrderSpec) -> Result<Order, EngineError> {
        let order = Order {
            id: OrderId::new(),
            balance: spec.volume,
            spec,
            state: OrderState::Active,
        };
        self.0.lock().unwrap().orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn cancel_order(&mut self, order_id: OrderId) -> Result<(), EngineError> {
        let mut inner = self.0.lock().unwrap();
        if let Some(order) = inner.orders.get_mut(&order_id) {
            if order.state == OrderState::Active {
                order.state = OrderState::Cancelled;
            }
        }
        Ok(())
    }

    fn get_order(&self, order_id: OrderId) -> Option<Order> {
        self.0.lock().unwrap().orders.get(&order_id).cloned()
    }
}
