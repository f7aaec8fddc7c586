use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of entries in [`FeatureVector::numeric_profile`].
pub const NUMERIC_PROFILE_WIDTH: usize = 6;

/// Index of the complexity score within the structural projection.
pub const STRUCTURAL_COMPLEXITY_INDEX: usize = 4;

/// Parallel feature projections of a single record.
///
/// Ephemeral: recomputed for every detection call and never persisted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Every numeric leaf of the record, in deterministic key order.
    pub numeric: Vec<f64>,
    /// `[size, depth, key_entropy, value_type_entropy, complexity, type_count]`.
    pub structural: Vec<f64>,
    /// Concatenation of every string leaf.
    pub text: String,
    /// Behavioral token sequence.
    pub token_sequence: Vec<String>,
    pub timestamp: Option<DateTime<Utc>>,
    /// Position of the source record within its batch.
    pub source_ref: usize,
}

impl FeatureVector {
    /// Fixed-width summary of the numeric leaves:
    /// `[count, sum, mean, min, max, std_dev]`. All zeros when there are none.
    pub fn numeric_profile(&self) -> [f64; NUMERIC_PROFILE_WIDTH] {
        let values: Vec<f64> = self.numeric.iter().copied().filter(|v| v.is_finite()).collect();
        if values.is_empty() {
            return [0.0; NUMERIC_PROFILE_WIDTH];
        }
        let n = values.len() as f64;
        let sum: f64 = values.iter().sum();
        let mean = sum / n;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        [n, sum, mean, min, max, var.sqrt()]
    }

    /// Mean of the numeric leaves, if any.
    pub fn numeric_mean(&self) -> Option<f64> {
        let profile = self.numeric_profile();
        if profile[0] > 0.0 {
            Some(profile[2])
        } else {
            None
        }
    }

    pub fn complexity(&self) -> f64 {
        self.structural
            .get(STRUCTURAL_COMPLEXITY_INDEX)
            .copied()
            .unwrap_or(0.0)
    }

    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_profile_summarizes_leaves() {
        let fv = FeatureVector {
            numeric: vec![1.0, 2.0, 3.0, f64::NAN],
            ..FeatureVector::default()
        };
        let p = fv.numeric_profile();
        assert_eq!(p[0], 3.0);
        assert_eq!(p[1], 6.0);
        assert_eq!(p[2], 2.0);
        assert_eq!(p[3], 1.0);
        assert_eq!(p[4], 3.0);
        assert!((p[5] - (2.0f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn empty_profile_is_zero() {
        let fv = FeatureVector::default();
        assert_eq!(fv.numeric_profile(), [0.0; NUMERIC_PROFILE_WIDTH]);
        assert!(fv.numeric_mean().is_none());
        assert_eq!(fv.complexity(), 0.0);
    }
}
