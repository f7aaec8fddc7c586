//! Pattern detection strategies.
//!
//! Provides:
//! - `PatternDetector` trait for pluggable detection
//! - one primary backend per pattern type
//! - deterministic statistical fallbacks installed when a primary backend is unavailable

use rulewise_types::{DetectionConfig, FeatureVector, IntelResult, Pattern, PatternType};

pub mod anomaly;
pub mod behavioral;
pub mod fallback;
pub mod semantic;
pub mod structural;
pub mod temporal;

pub use anomaly::IsolationForestDetector;
pub use behavioral::SequenceMiningDetector;
pub use fallback::{
    HourOfDayDetector, KeywordFrequencyDetector, QuantileBucketDetector, TokenFrequencyDetector,
    ZScoreOutlierDetector,
};
pub use semantic::TfIdfSemanticDetector;
pub use structural::DbscanStructuralDetector;
pub use temporal::TimeSeriesDetector;

// ── Trait ────────────────────────────────────────────────────────────────

/// Pluggable pattern detection strategy.
///
/// Detectors are pure over their input: the same features and configuration
/// always produce the same patterns (modulo fresh pattern IDs).
pub trait PatternDetector: Send + Sync {
    /// The pattern class this detector emits.
    fn pattern_type(&self) -> PatternType;

    /// Backend name, recorded in detection metadata.
    fn backend(&self) -> &str;

    /// Whether this backend can run under `config`.
    ///
    /// Returning `ModelUnavailable` makes the registry install the fallback.
    fn check_available(&self, _config: &DetectionConfig) -> IntelResult<()> {
        Ok(())
    }

    fn detect(
        &self,
        features: &[FeatureVector],
        config: &DetectionConfig,
    ) -> IntelResult<Vec<Pattern>>;
}

// ── Helpers ─────────────────────────────────────────────────────────────

/// Minimum support count for a fraction of `n` items, never below 2.
pub(crate) fn support_floor(n: usize, fraction: f64) -> usize {
    let raw = (fraction.max(0.0) * n as f64).ceil() as usize;
    raw.max(2)
}

/// Round to six decimals so characteristic values hash stably.
pub(crate) fn round6(value: f64) -> f64 {
    if value.is_finite() {
        (value * 1e6).round() / 1e6
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn support_floor_has_minimum_two() {
        assert_eq!(support_floor(5, 0.1), 2);
        assert_eq!(support_floor(100, 0.1), 10);
        assert_eq!(support_floor(101, 0.1), 11);
        assert_eq!(support_floor(0, 0.5), 2);
    }

    #[test]
    fn round6_is_stable() {
        assert_eq!(round6(0.1 + 0.2), 0.3);
        assert_eq!(round6(f64::NAN), 0.0);
    }
}
