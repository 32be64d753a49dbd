// ─────────────────────────────────────────────────────────────────────────────
// dedup.rs — Signal Deduplicator (C1)
//
// Indicators emit a persistent value across every finished candle until the
// underlying condition changes; without this filter the strategy would submit
// an identical OrderRequest every bar. Equality is bit-exact — deterministic
// indicator output never needs an epsilon.
// ─────────────────────────────────────────────────────────────────────────────
use crate::types::SignalKey;

#[derive(Debug, Default)]
pub struct SignalDeduplicator {
    last: Option<SignalKey>,
}

impl SignalDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true iff `key` exactly equals the last key observed.
    /// Otherwise stores `key` and returns false.
    pub fn is_duplicate(&mut self, key: SignalKey) -> bool {
        if self.last == Some(key) {
            return true;
        }
        self.last = Some(key);
        false
    }

    /// Clears the stored key. Called by the strategy on position close.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn key(entry: i64, sl: i64, tp: i64) -> SignalKey {
        SignalKey {
            entry_price: rust_decimal::Decimal::from(entry),
            stop_loss: rust_decimal::Decimal::from(sl),
            take_profit: rust_decimal::Decimal::from(tp),
        }
    }

    #[test]
    fn first_signal_is_never_a_duplicate() {
        let mut dedup = SignalDeduplicator::new();
        assert!(!dedup.is_duplicate(key(100, 95, 110)));
    }

    #[test]
    fn repeated_signal_is_duplicate() {
        let mut dedup = SignalDeduplicator::new();
        assert!(!dedup.is_duplicate(key(100, 95, 110)));
        assert!(dedup.is_duplicate(key(100, 95, 110)));
        assert!(dedup.is_duplicate(key(100, 95, 110)));
    }

    #[test]
    fn changed_signal_is_not_duplicate() {
        let mut dedup = SignalDeduplicator::new();
        assert!(!dedup.is_duplicate(key(100, 95, 110)));
        assert!(!dedup.is_duplicate(key(101, 95, 110)));
    }

    #[test]
    fn tiny_decimal_difference_is_not_a_duplicate() {
        let mut dedup = SignalDeduplicator::new();
        let a = SignalKey {
            entry_price: dec!(100.00000000),
            stop_loss: dec!(95),
            take_profit: dec!(110),
        };
        let b = SignalKey {
            entry_price: dec!(100.00000001),
            stop_loss: dec!(95),
            take_profit: dec!(110),
        };
        assert!(!dedup.is_duplicate(a));
        assert!(!dedup.is_duplicate(b));
    }

    #[test]
    fn reset_clears_stored_key() {
        let mut dedup = SignalDeduplicator::new();
        assert!(!dedup.is_duplicate(key(100, 95, 110)));
        dedup.reset();
        assert!(!dedup.is_duplicate(key(100, 95, 110)));
    }
}
