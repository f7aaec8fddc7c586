//! Rule configuration and rule-modification types.
//!
//! The engine never owns the authoritative rule configuration; it reads a
//! snapshot from the rule store and proposes a new parameter map.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pattern::PatternType;

/// Parameter name → value map of a rule.
pub type Parameters = BTreeMap<String, f64>;

/// Snapshot of a rule's configuration as held by the rule store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleConfiguration {
    pub rule_id: String,
    pub parameters: Parameters,
    pub version: u64,
}

impl RuleConfiguration {
    pub fn new(rule_id: impl Into<String>, parameters: Parameters) -> Self {
        Self {
            rule_id: rule_id.into(),
            parameters,
            version: 1,
        }
    }
}

// ── Constraints ─────────────────────────────────────────────────────────

/// Inclusive allowed range of a single parameter.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterRange {
    pub min: f64,
    pub max: f64,
}

impl ParameterRange {
    /// Build a range, swapping the bounds if they are reversed.
    pub fn new(min: f64, max: f64) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    /// Map a unit-interval position onto the range.
    pub fn lerp(&self, t: f64) -> f64 {
        self.min + self.width() * t
    }
}

/// Hard constraints applied to an optimization run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default)]
    pub parameter_ranges: BTreeMap<String, ParameterRange>,
    #[serde(default)]
    pub max_execution_time: Option<f64>,
    #[serde(default)]
    pub max_resource_usage: Option<f64>,
    #[serde(default)]
    pub min_accuracy: Option<f64>,
    #[serde(default)]
    pub min_reliability: Option<f64>,
}

impl Constraints {
    pub fn with_range(mut self, parameter: impl Into<String>, min: f64, max: f64) -> Self {
        self.parameter_ranges
            .insert(parameter.into(), ParameterRange::new(min, max));
        self
    }

    pub fn with_max_resource_usage(mut self, ceiling: f64) -> Self {
        self.max_resource_usage = Some(ceiling);
        self
    }

    pub fn with_max_execution_time(mut self, ceiling: f64) -> Self {
        self.max_execution_time = Some(ceiling);
        self
    }

    pub fn with_min_accuracy(mut self, floor: f64) -> Self {
        self.min_accuracy = Some(floor);
        self
    }
}

// ── Rule modifications ──────────────────────────────────────────────────

/// A rule modification synthesized from one pattern.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleModification {
    /// Structural: bound the shape of accepted records.
    ThresholdConstraint {
        field: String,
        lower: f64,
        upper: f64,
    },
    /// Behavioral: guard on an observed action sequence.
    SequenceGuard {
        sequence: Vec<String>,
        min_probability: f64,
    },
    /// Semantic: filter on keywords and named entities.
    KeywordFilter {
        keywords: Vec<String>,
        entities: Vec<String>,
        sentiment: Option<String>,
    },
    /// Temporal: restrict or schedule evaluation windows.
    SchedulingWindow {
        period_secs: Option<f64>,
        window_start: Option<DateTime<Utc>>,
        window_end: Option<DateTime<Utc>>,
        peak_hour: Option<u32>,
    },
    /// Anomaly: guard against outlier records.
    OutlierGuard {
        score_threshold: f64,
        max_group_size: u64,
    },
}

impl RuleModification {
    /// Key identifying which aspect of a rule this modification touches.
    ///
    /// Two fragments for the same rule with equal keys conflict; the merge
    /// keeps the more confident one.
    pub fn merge_key(&self) -> String {
        match self {
            RuleModification::ThresholdConstraint { field, .. } => format!("threshold:{}", field),
            RuleModification::SequenceGuard { sequence, .. } => {
                format!("sequence:{}", sequence.join(">"))
            }
            RuleModification::KeywordFilter { keywords, entities, .. } => {
                let mut terms: Vec<&str> = keywords
                    .iter()
                    .chain(entities.iter())
                    .map(String::as_str)
                    .collect();
                terms.sort_unstable();
                format!("keywords:{}", terms.join(","))
            }
            RuleModification::SchedulingWindow { peak_hour, period_secs, .. } => match (peak_hour, period_secs) {
                (Some(h), _) => format!("schedule:hour:{}", h),
                (None, Some(_)) => "schedule:period".to_string(),
                (None, None) => "schedule:window".to_string(),
            },
            RuleModification::OutlierGuard { .. } => "outlier_guard".to_string(),
        }
    }
}

/// One rule-modification fragment derived from a pattern.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleFragment {
    pub rule_id: String,
    pub pattern_type: PatternType,
    pub source_pattern: String,
    pub modification: RuleModification,
    pub confidence: f64,
}

/// Merged set of fragments targeting one rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveRule {
    pub rule_id: String,
    pub fragments: Vec<RuleFragment>,
    /// Mean confidence of the retained fragments.
    pub confidence: f64,
}

/// Context passed to the adaptive rule generator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuleContext {
    /// Rule that patterns without an explicit `rule_id` characteristic target.
    pub default_rule_id: String,
    /// Fragments below this confidence are dropped.
    #[serde(default)]
    pub min_confidence: f64,
}

impl RuleContext {
    pub fn new(default_rule_id: impl Into<String>) -> Self {
        Self {
            default_rule_id: default_rule_id.into(),
            min_confidence: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_normalizes_bounds() {
        let r = ParameterRange::new(5.0, 1.0);
        assert_eq!(r.min, 1.0);
        assert_eq!(r.max, 5.0);
        assert!(r.contains(3.0));
        assert_eq!(r.clamp(9.0), 5.0);
        assert_eq!(r.lerp(0.5), 3.0);
    }

    #[test]
    fn keyword_merge_key_is_order_independent() {
        let a = RuleModification::KeywordFilter {
            keywords: vec!["refund".into(), "delay".into()],
            entities: vec![],
            sentiment: None,
        };
        let b = RuleModification::KeywordFilter {
            keywords: vec!["delay".into(), "refund".into()],
            entities: vec![],
            sentiment: Some("negative".into()),
        };
        assert_eq!(a.merge_key(), b.merge_key());
    }

    #[test]
    fn constraints_builder() {
        let c = Constraints::default()
            .with_range("threshold", 0.1, 1.0)
            .with_max_resource_usage(80.0);
        assert_eq!(c.parameter_ranges.len(), 1);
        assert_eq!(c.max_resource_usage, Some(80.0));
    }
}
