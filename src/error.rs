use crate::types::{GroupId, OrderId, PairId};
use thiserror::Error;

/// The engine's error taxonomy (spec §7). Construction-time validation
/// failures (`VolumeMismatch`, `InvalidSignal`) are returned from the call
/// that triggered them; the rest are runtime conditions reported through the
/// event bus and never interrupt the event loop — callers that do receive
/// one of those variants directly (e.g. a broker adapter bubbling up a
/// network failure) should log and continue, not unwind.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("pair volumes do not sum to entry volume ({sum} != {entry_volume})")]
    VolumeMismatch {
        sum: rust_decimal::Decimal,
        entry_volume: rust_decimal::Decimal,
    },

    #[error("registry is at capacity ({max} non-closed groups)")]
    CapacityExceeded { max: usize },

    #[error("signal duplicates the pending group {0}")]
    DuplicateSignal(GroupId),

    #[error("retry attempts exhausted for group {group_id} pair {pair_id}")]
    PartialFillRetryExhausted { group_id: GroupId, pair_id: PairId },

    #[error("group {0} entry expired or failed before fill")]
    EntryExpiredOrFailed(GroupId),

    #[error("trade referenced unknown order {0}")]
    OrphanTrade(OrderId),

    #[error("invalid signal: {0}")]
    InvalidSignal(String),

    #[error("broker operation failed: {0}")]
    BrokerError(String),
}
