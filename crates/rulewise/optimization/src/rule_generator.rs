//! Pattern → rule-modification synthesis.
//!
//! Each pattern type has a [`RuleTemplate`]; the generator looks the
//! template up by type, so supporting a new pattern type means registering
//! one more template.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use rulewise_types::{
    AdaptiveRule, Pattern, PatternType, RuleContext, RuleFragment, RuleModification,
};

/// Turns one pattern into zero or more modifications.
pub trait RuleTemplate: Send + Sync {
    fn pattern_type(&self) -> PatternType;

    fn synthesize(&self, pattern: &Pattern) -> Vec<RuleModification>;
}

fn f64_of(pattern: &Pattern, key: &str) -> Option<f64> {
    pattern.characteristics.get(key).and_then(Value::as_f64)
}

fn strings_of(pattern: &Pattern, key: &str) -> Vec<String> {
    match pattern.characteristics.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn time_of(pattern: &Pattern, key: &str) -> Option<DateTime<Utc>> {
    pattern
        .characteristics
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

// ── Templates ───────────────────────────────────────────────────────

/// Structural fields a threshold constraint may bound.
const BOUNDED_FIELDS: [&str; 3] = ["size", "depth", "complexity"];

/// Structural: accept records within the cluster's observed shape.
#[derive(Debug, Default)]
pub struct ThresholdTemplate;

impl RuleTemplate for ThresholdTemplate {
    fn pattern_type(&self) -> PatternType {
        PatternType::Structural
    }

    fn synthesize(&self, pattern: &Pattern) -> Vec<RuleModification> {
        let Some(Value::Object(profile)) = pattern.characteristics.get("profile") else {
            return Vec::new();
        };
        BOUNDED_FIELDS
            .iter()
            .filter_map(|field| {
                let summary = profile.get(*field)?;
                let lower = summary.get("min")?.as_f64()?;
                let upper = summary.get("max")?.as_f64()?;
                Some(RuleModification::ThresholdConstraint {
                    field: (*field).to_string(),
                    lower,
                    upper,
                })
            })
            .collect()
    }
}

/// Behavioral: guard on the observed action sequence.
#[derive(Debug, Default)]
pub struct SequenceGuardTemplate;

impl RuleTemplate for SequenceGuardTemplate {
    fn pattern_type(&self) -> PatternType {
        PatternType::Behavioral
    }

    fn synthesize(&self, pattern: &Pattern) -> Vec<RuleModification> {
        let sequence = strings_of(pattern, "sequence");
        if sequence.is_empty() {
            return Vec::new();
        }
        let min_probability = f64_of(pattern, "probability")
            .or_else(|| f64_of(pattern, "frequency"))
            .unwrap_or(pattern.confidence);
        vec![RuleModification::SequenceGuard {
            sequence,
            min_probability,
        }]
    }
}

/// Semantic: filter on theme keywords or a recurring entity.
#[derive(Debug, Default)]
pub struct KeywordFilterTemplate;

impl RuleTemplate for KeywordFilterTemplate {
    fn pattern_type(&self) -> PatternType {
        PatternType::Semantic
    }

    fn synthesize(&self, pattern: &Pattern) -> Vec<RuleModification> {
        let keywords = strings_of(pattern, "keywords");
        let entities = strings_of(pattern, "entity");
        if keywords.is_empty() && entities.is_empty() {
            return Vec::new();
        }
        let sentiment = pattern
            .characteristics
            .get("sentiment")
            .and_then(Value::as_str)
            .map(str::to_string);
        vec![RuleModification::KeywordFilter {
            keywords,
            entities,
            sentiment,
        }]
    }
}

/// Temporal: schedule evaluation around the observed rhythm.
#[derive(Debug, Default)]
pub struct SchedulingTemplate;

impl RuleTemplate for SchedulingTemplate {
    fn pattern_type(&self) -> PatternType {
        PatternType::Temporal
    }

    fn synthesize(&self, pattern: &Pattern) -> Vec<RuleModification> {
        let period_secs = f64_of(pattern, "period_secs");
        let peak_hour = pattern
            .characteristics
            .get("peak_hour")
            .and_then(Value::as_u64)
            .map(|h| h as u32);
        let window_start = time_of(pattern, "window_start");
        let window_end = time_of(pattern, "window_end");
        if period_secs.is_none() && peak_hour.is_none() && window_start.is_none() {
            // Trends carry no schedulable shape.
            return Vec::new();
        }
        vec![RuleModification::SchedulingWindow {
            period_secs,
            window_start,
            window_end,
            peak_hour,
        }]
    }
}

/// Anomaly: guard against records scoring like the flagged group.
#[derive(Debug, Default)]
pub struct OutlierGuardTemplate;

impl RuleTemplate for OutlierGuardTemplate {
    fn pattern_type(&self) -> PatternType {
        PatternType::Anomaly
    }

    fn synthesize(&self, pattern: &Pattern) -> Vec<RuleModification> {
        let Some(score_threshold) = f64_of(pattern, "score_threshold") else {
            return Vec::new();
        };
        let max_group_size = pattern
            .characteristics
            .get("group_size")
            .and_then(Value::as_u64)
            .or_else(|| pattern.support())
            .unwrap_or(0);
        vec![RuleModification::OutlierGuard {
            score_threshold,
            max_group_size,
        }]
    }
}

// ── Generator ───────────────────────────────────────────────────────

/// Synthesizes adaptive rules from patterns. Side-effect free.
#[derive(Clone)]
pub struct AdaptiveRuleGenerator {
    templates: BTreeMap<PatternType, Arc<dyn RuleTemplate>>,
}

impl std::fmt::Debug for AdaptiveRuleGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveRuleGenerator")
            .field("templates", &self.templates.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for AdaptiveRuleGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl AdaptiveRuleGenerator {
    pub fn new() -> Self {
        let mut generator = Self {
            templates: BTreeMap::new(),
        };
        generator.register(Arc::new(ThresholdTemplate));
        generator.register(Arc::new(SequenceGuardTemplate));
        generator.register(Arc::new(KeywordFilterTemplate));
        generator.register(Arc::new(SchedulingTemplate));
        generator.register(Arc::new(OutlierGuardTemplate));
        generator
    }

    pub fn register(&mut self, template: Arc<dyn RuleTemplate>) {
        self.templates.insert(template.pattern_type(), template);
    }

    pub fn generate(&self, patterns: &[Pattern], context: &RuleContext) -> Vec<AdaptiveRule> {
        // rule_id → merge_key → fragment
        let mut merged: BTreeMap<String, BTreeMap<String, RuleFragment>> = BTreeMap::new();

        for pattern in patterns {
            if pattern.confidence < context.min_confidence {
                continue;
            }
            let Some(template) = self.templates.get(&pattern.pattern_type) else {
                continue;
            };
            let rule_id = pattern
                .characteristics
                .get("rule_id")
                .and_then(Value::as_str)
                .unwrap_or(context.default_rule_id.as_str())
                .to_string();

            for modification in template.synthesize(pattern) {
                let fragment = RuleFragment {
                    rule_id: rule_id.clone(),
                    pattern_type: pattern.pattern_type,
                    source_pattern: pattern.signature(),
                    modification,
                    confidence: pattern.confidence,
                };
                let key = fragment.modification.merge_key();
                let slot = merged.entry(rule_id.clone()).or_default();
                match slot.get(&key) {
                    Some(existing) if existing.confidence >= fragment.confidence => {}
                    _ => {
                        slot.insert(key, fragment);
                    }
                }
            }
        }

        let mut rules: Vec<AdaptiveRule> = merged
            .into_iter()
            .map(|(rule_id, fragments)| {
                let fragments: Vec<RuleFragment> = fragments.into_values().collect();
                let confidence =
                    fragments.iter().map(|f| f.confidence).sum::<f64>() / fragments.len() as f64;
                AdaptiveRule {
                    rule_id,
                    fragments,
                    confidence,
                }
            })
            .collect();
        rules.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.rule_id.cmp(&b.rule_id))
        });
        debug!(rules = rules.len(), patterns = patterns.len(), "Adaptive rules generated");
        rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cluster(confidence: f64, size_max: f64) -> Pattern {
        Pattern::new(PatternType::Structural, "cluster", "c", confidence)
            .with_characteristic(
                "profile",
                json!({
                    "size": {"mean": 4.0, "min": 2.0, "max": size_max},
                    "key_entropy": {"mean": 1.0, "min": 1.0, "max": 1.0},
                }),
            )
            .with_characteristic("support", 30u64)
    }

    #[test]
    fn one_template_per_pattern_type() {
        let cases = vec![
            cluster(0.9, 6.0),
            Pattern::new(PatternType::Behavioral, "state_transition", "t", 0.8)
                .with_characteristic("sequence", json!(["login", "view"]))
                .with_characteristic("probability", 0.75),
            Pattern::new(PatternType::Semantic, "theme", "s", 0.8)
                .with_characteristic("keywords", json!(["refund", "late"]))
                .with_characteristic("sentiment", "negative"),
            Pattern::new(PatternType::Temporal, "seasonal", "h", 0.8)
                .with_characteristic("peak_hour", 14u64),
            Pattern::new(PatternType::Anomaly, "outlier_group", "a", 0.8)
                .with_characteristic("score_threshold", 0.62)
                .with_characteristic("group_size", 4u64),
        ];
        let rules = AdaptiveRuleGenerator::new().generate(&cases, &RuleContext::new("r1"));
        assert_eq!(rules.len(), 1);
        let kinds: Vec<String> = rules[0]
            .fragments
            .iter()
            .map(|f| f.modification.merge_key())
            .collect();
        assert!(kinds.contains(&"threshold:size".to_string()));
        assert!(kinds.contains(&"sequence:login>view".to_string()));
        assert!(kinds.contains(&"keywords:late,refund".to_string()));
        assert!(kinds.contains(&"schedule:hour:14".to_string()));
        assert!(kinds.contains(&"outlier_guard".to_string()));
    }

    #[test]
    fn conflicting_fragments_keep_highest_confidence() {
        let rules = AdaptiveRuleGenerator::new()
            .generate(&[cluster(0.7, 6.0), cluster(0.95, 9.0)], &RuleContext::new("r1"));
        let fragment = &rules[0].fragments[0];
        assert_eq!(fragment.confidence, 0.95);
        assert!(matches!(
            fragment.modification,
            RuleModification::ThresholdConstraint { upper, .. } if upper == 9.0
        ));
    }

    #[test]
    fn rule_id_characteristic_overrides_context() {
        let routed = cluster(0.6, 5.0).with_characteristic("rule_id", "fraud-check");
        let rules = AdaptiveRuleGenerator::new()
            .generate(&[cluster(0.9, 6.0), routed], &RuleContext::new("default"));
        let ids: Vec<&str> = rules.iter().map(|r| r.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["default", "fraud-check"]);
    }

    #[test]
    fn trends_and_low_confidence_patterns_produce_nothing() {
        let trend = Pattern::new(PatternType::Temporal, "trend", "t", 0.9)
            .with_characteristic("direction", "increasing");
        let mut context = RuleContext::new("r1");
        context.min_confidence = 0.8;
        let rules = AdaptiveRuleGenerator::new().generate(&[trend, cluster(0.5, 6.0)], &context);
        assert!(rules.is_empty());
    }
}
