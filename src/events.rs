// ─────────────────────────────────────────────────────────────────────────────
// events.rs — Event Bus (C9)
//
// The pre-existing repository logged halts/caps/retries directly via
// `log::warn!`/`log::error!` call sites scattered through `execution.rs`.
// Here those become typed `Event` variants delivered through an `EventSink`
// trait — fire-and-forget, subscribers must not block — with a
// `LoggingEventSink` default that reproduces the old logging behaviour.
// ─────────────────────────────────────────────────────────────────────────────
use crate::types::{GroupId, OrderId, PairId};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    OrderActivated { group_id: GroupId, order_id: OrderId },
    GroupCompleted { group_id: GroupId },
    GroupCancelled { group_id: GroupId },
    OrderRejected { reason: String },
    PartialFillRetry { group_id: GroupId, pair_id: PairId, attempt: u32 },
    MaxRetryReached { group_id: GroupId, pair_id: PairId },
    MaxConcurrentGroupsReached { max: usize },
}

/// Subscriber trait for the event bus. Implementations must not block — the
/// core calls this synchronously from inside its event handlers.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: Event);
}

/// Default sink: forwards every event to the `log` crate at the level the
/// pre-existing code used for the equivalent condition.
#[derive(Debug, Default)]
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn on_event(&self, event: Event) {
        match event {
            Event::OrderActivated { group_id, order_id } => {
                log::info!("[GROUP {}] order {} activated", group_id, order_id)
            }
            Event::GroupCompleted { group_id } => {
                log::info!("[GROUP {}] completed", group_id)
            }
            Event::GroupCancelled { group_id } => {
                log::info!("[GROUP {}] cancelled", group_id)
            }
            Event::OrderRejected { reason } => {
                log::warn!("[ORDER] rejected: {}", reason)
            }
            Event::PartialFillRetry {
                group_id,
                pair_id,
                attempt,
            } => log::warn!(
                "[RETRY] group={} pair={} attempt={} — placing market retry",
                group_id,
                pair_id,
                attempt
            ),
            Event::MaxRetryReached { group_id, pair_id } => log::error!(
                "[RETRY] group={} pair={} exhausted retry attempts — manual intervention required",
                group_id,
                pair_id
            ),
            Event::MaxConcurrentGroupsReached { max } => {
                log::warn!("[REGISTRY] at capacity ({} groups) — signal dropped", max)
            }
        }
    }
}

/// Test/no-op sink that records events for assertions instead of logging.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    pub events: std::sync::Mutex<Vec<Event>>,
}

impl EventSink for RecordingEventSink {
    fn on_event(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl<T: EventSink + ?Sized> EventSink for std::sync::Arc<T> {
    fn on_event(&self, event: Event) {
        (**self).on_event(event)
    }
}
