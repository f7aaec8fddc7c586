//! Pattern type definitions.
//!
//! A [`Pattern`] is a confidence-scored observation extracted from a batch of
//! records. Detectors create patterns; only the post-processor mutates their
//! significance, stamping and hash fields afterwards.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Identifiers ─────────────────────────────────────────────────────────

/// Globally unique pattern identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatternId(pub Uuid);

impl PatternId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PatternId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pat-{}", self.0)
    }
}

// ── Pattern Type ────────────────────────────────────────────────────────

/// The five classes of pattern the engine detects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Structural,
    Behavioral,
    Semantic,
    Temporal,
    Anomaly,
}

impl PatternType {
    /// All pattern types in canonical order.
    pub fn all() -> [PatternType; 5] {
        [
            PatternType::Structural,
            PatternType::Behavioral,
            PatternType::Semantic,
            PatternType::Temporal,
            PatternType::Anomaly,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::Structural => "structural",
            PatternType::Behavioral => "behavioral",
            PatternType::Semantic => "semantic",
            PatternType::Temporal => "temporal",
            PatternType::Anomaly => "anomaly",
        }
    }

    /// Parse a pattern type from its snake_case name.
    pub fn parse(name: &str) -> Option<PatternType> {
        match name.trim().to_ascii_lowercase().as_str() {
            "structural" => Some(PatternType::Structural),
            "behavioral" | "behavioural" => Some(PatternType::Behavioral),
            "semantic" => Some(PatternType::Semantic),
            "temporal" => Some(PatternType::Temporal),
            "anomaly" | "anomalous" => Some(PatternType::Anomaly),
            _ => None,
        }
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Pattern ─────────────────────────────────────────────────────────────

/// A detected pattern.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pattern {
    pub pattern_id: PatternId,
    pub pattern_type: PatternType,
    /// Detector-specific refinement, e.g. `"cluster"`, `"state_transition"`, `"burst"`.
    pub subtype: String,
    pub description: String,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    pub characteristics: BTreeMap<String, serde_json::Value>,
    /// Always within `[0, 1]`. Zero until the post-processor scores the pattern.
    pub statistical_significance: f64,
    pub detected_at: DateTime<Utc>,
    /// Dedup key over type + characteristics + batch. Empty until stamped.
    pub data_hash: String,
}

impl Pattern {
    pub fn new(
        pattern_type: PatternType,
        subtype: impl Into<String>,
        description: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            pattern_id: PatternId::new(),
            pattern_type,
            subtype: subtype.into(),
            description: description.into(),
            confidence: clamp_unit(confidence),
            characteristics: BTreeMap::new(),
            statistical_significance: 0.0,
            detected_at: Utc::now(),
            data_hash: String::new(),
        }
    }

    pub fn with_characteristic(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.characteristics.insert(key.into(), value.into());
        self
    }

    /// Number of records supporting this pattern, if the detector recorded one.
    pub fn support(&self) -> Option<u64> {
        self.characteristics.get("support").and_then(|v| v.as_u64())
    }

    pub fn set_confidence(&mut self, confidence: f64) {
        self.confidence = clamp_unit(confidence);
    }

    pub fn set_significance(&mut self, significance: f64) {
        self.statistical_significance = clamp_unit(significance);
    }

    /// Ranking key used by the post-processor.
    pub fn rank_score(&self) -> f64 {
        self.confidence * self.statistical_significance
    }

    /// Content signature over type, subtype and characteristics.
    ///
    /// Two patterns with equal signatures describe the same observation.
    pub fn signature(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.pattern_type.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(self.subtype.as_bytes());
        hasher.update(b"|");
        // BTreeMap serializes in key order, so the digest is stable.
        let encoded = serde_json::to_vec(&self.characteristics).unwrap_or_default();
        hasher.update(&encoded);
        hasher.finalize().to_hex().to_string()
    }

    /// Compute the batch-scoped data hash.
    pub fn compute_data_hash(&self, batch_hash: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.signature().as_bytes());
        hasher.update(b"|");
        hasher.update(batch_hash.as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

/// Clamp a score into `[0, 1]`, mapping NaN to zero.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn confidence_is_clamped() {
        let p = Pattern::new(PatternType::Anomaly, "outlier_group", "x", 1.7);
        assert_eq!(p.confidence, 1.0);
        let p = Pattern::new(PatternType::Anomaly, "outlier_group", "x", -0.2);
        assert_eq!(p.confidence, 0.0);
        let p = Pattern::new(PatternType::Anomaly, "outlier_group", "x", f64::NAN);
        assert_eq!(p.confidence, 0.0);
    }

    #[test]
    fn signature_ignores_identity_and_description() {
        let a = Pattern::new(PatternType::Behavioral, "frequent_sequence", "first", 0.8)
            .with_characteristic("sequence", vec!["login", "view"]);
        let b = Pattern::new(PatternType::Behavioral, "frequent_sequence", "second", 0.9)
            .with_characteristic("sequence", vec!["login", "view"]);
        assert_ne!(a.pattern_id, b.pattern_id);
        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn signature_differs_on_characteristics() {
        let a = Pattern::new(PatternType::Structural, "cluster", "", 0.8)
            .with_characteristic("cluster_id", 0);
        let b = Pattern::new(PatternType::Structural, "cluster", "", 0.8)
            .with_characteristic("cluster_id", 1);
        assert_ne!(a.signature(), b.signature());
    }

    #[test]
    fn data_hash_is_batch_scoped() {
        let p = Pattern::new(PatternType::Temporal, "burst", "", 0.8);
        assert_ne!(p.compute_data_hash("batch-a"), p.compute_data_hash("batch-b"));
        assert_eq!(p.compute_data_hash("batch-a"), p.compute_data_hash("batch-a"));
    }

    #[test]
    fn pattern_type_parse_roundtrip() {
        for t in PatternType::all() {
            assert_eq!(PatternType::parse(t.as_str()), Some(t));
        }
        assert_eq!(PatternType::parse("nonsense"), None);
    }

    #[test]
    fn support_reads_characteristic() {
        let p = Pattern::new(PatternType::Structural, "cluster", "", 0.9)
            .with_characteristic("support", 42u64);
        assert_eq!(p.support(), Some(42));
    }

    proptest! {
        #[test]
        fn scores_always_in_unit_interval(c in proptest::num::f64::ANY, s in proptest::num::f64::ANY) {
            let mut p = Pattern::new(PatternType::Semantic, "theme", "", c);
            p.set_significance(s);
            prop_assert!((0.0..=1.0).contains(&p.confidence));
            prop_assert!((0.0..=1.0).contains(&p.statistical_significance));
        }
    }
}
