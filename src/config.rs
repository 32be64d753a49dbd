use crate::error::EngineError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Tunables for the [`crate::manager::OrderPositionManager`], published once at
/// construction time. Same shape as the old `MmEngineConfig`/`RiskConfig`: a
/// plain struct with a `Default` impl, validated before use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of non-`Closed` groups the registry will hold at once.
    pub max_concurrent_groups: usize,
    /// Attempt ceiling for the partial-fill retry handler.
    pub max_retry_attempts: u32,
    /// Absolute-difference tolerance used when matching an incoming
    /// `OrderRequest` against an already-registered group's entry price.
    pub match_tolerance: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_groups: 5,
            max_retry_attempts: 5,
            match_tolerance: Decimal::new(1, 8), // 1e-8
        }
    }
}

impl EngineConfig {
    /// Builds a config, rejecting parameter combinations that can never be
    /// satisfied (zero capacity, non-positive tolerance).
    pub fn new(
        max_concurrent_groups: usize,
        max_retry_attempts: u32,
        match_tolerance: Decimal,
    ) -> Result<Self, EngineError> {
        if max_concurrent_groups == 0 {
            return Err(EngineError::InvalidSignal(
                "max_concurrent_groups must be > 0".into(),
            ));
        }
        if max_retry_attempts == 0 {
            return Err(EngineError::InvalidSignal(
                "max_retry_attempts must be > 0".into(),
            ));
        }
        if match_tolerance <= Decimal::ZERO {
            return Err(EngineError::InvalidSignal(
                "match_tolerance must be positive".into(),
            ));
        }
        Ok(Self {
            max_concurrent_groups,
            max_retry_attempts,
            match_tolerance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn default_matches_spec_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrent_groups, 5);
        assert_eq!(config.max_retry_attempts, 5);
        assert_eq!(config.match_tolerance, dec!(0.00000001));
    }

    #[test]
    fn rejects_zero_capacity() {
        assert!(EngineConfig::new(0, 5, dec!(0.00000001)).is_err());
    }

    #[test]
    fn rejects_zero_retry_attempts() {
        assert!(EngineConfig::new(5, 0, dec!(0.00000001)).is_err());
    }

    #[test]
    fn rejects_non_positive_tolerance() {
        assert!(EngineConfig::new(5, 5, dec!(0)).is_err());
        assert!(EngineConfig::new(5, 5, dec!(-1)).is_err());
    }
}
