//! Knowledge base: a bounded, decaying memory of detected patterns.
//!
//! Writers take the single write lock for the whole mutation; readers get
//! cloned snapshots.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use rulewise_types::{
    BoundedBuffer, IntelError, IntelResult, KnowledgeConfig, Pattern, PatternType,
};

/// A pattern the engine has seen at least once, with its learned weight.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KnownPattern {
    pub signature: String,
    pub pattern: Pattern,
    /// Relevance weight in `[0, 1]`.
    pub weight: f64,
    pub observations: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub positive_feedback: u64,
    pub negative_feedback: u64,
}

impl KnownPattern {
    /// Rule targeted by the pattern, if it names one.
    pub fn rule_id(&self) -> Option<&str> {
        self.pattern
            .characteristics
            .get("rule_id")
            .and_then(|v| v.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Feedback {
    pub signature: String,
    pub useful: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Outcome of one refresh pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RefreshSummary {
    pub decayed: usize,
    pub feedback_applied: usize,
    pub pruned: usize,
    pub evicted_over_capacity: usize,
    pub remaining: usize,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KnowledgeStatistics {
    pub known_patterns: usize,
    pub by_type: BTreeMap<String, usize>,
    pub mean_weight: f64,
    pub pattern_buffer_len: usize,
    pub pattern_buffer_capacity: usize,
    pub feedback_pending: usize,
    pub total_ingested: u64,
    pub buffer_evictions: u64,
    pub last_refresh: Option<DateTime<Utc>>,
}

struct KnowledgeState {
    known_patterns: BTreeMap<String, KnownPattern>,
    /// type → subtype → signatures
    hierarchy: BTreeMap<PatternType, BTreeMap<String, BTreeSet<String>>>,
    pattern_buffer: BoundedBuffer<Pattern>,
    feedback_buffer: BoundedBuffer<Feedback>,
    total_ingested: u64,
    last_refresh: Option<DateTime<Utc>>,
}

impl KnowledgeState {
    /// Drop the lowest-weight patterns until at most `cap` remain.
    fn evict_over_capacity(&mut self, cap: usize) -> usize {
        let excess = self.known_patterns.len().saturating_sub(cap);
        if excess == 0 {
            return 0;
        }
        let mut by_weight: Vec<(f64, String)> = self
            .known_patterns
            .values()
            .map(|k| (k.weight, k.signature.clone()))
            .collect();
        by_weight.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        let mut evicted = 0;
        for (_, signature) in by_weight.into_iter().take(excess) {
            if let Some(known) = self.known_patterns.remove(&signature) {
                self.unlink(&known);
                evicted += 1;
            }
        }
        evicted
    }

    fn unlink(&mut self, known: &KnownPattern) {
        if let Some(subtypes) = self.hierarchy.get_mut(&known.pattern.pattern_type) {
            if let Some(sigs) = subtypes.get_mut(&known.pattern.subtype) {
                sigs.remove(&known.signature);
                if sigs.is_empty() {
                    subtypes.remove(&known.pattern.subtype);
                }
            }
            if subtypes.is_empty() {
                self.hierarchy.remove(&known.pattern.pattern_type);
            }
        }
    }
}

pub struct KnowledgeBase {
    config: KnowledgeConfig,
    state: RwLock<KnowledgeState>,
}

impl KnowledgeBase {
    pub fn new(config: KnowledgeConfig) -> Self {
        let state = KnowledgeState {
            known_patterns: BTreeMap::new(),
            hierarchy: BTreeMap::new(),
            pattern_buffer: BoundedBuffer::new(config.pattern_buffer_size),
            feedback_buffer: BoundedBuffer::new(config.feedback_buffer_size),
            total_ingested: 0,
            last_refresh: None,
        };
        Self {
            config,
            state: RwLock::new(state),
        }
    }

    /// Record a batch of post-processed patterns. Returns how many were new.
    ///
    /// The `max_known_patterns` bound holds after every call.
    pub fn ingest(&self, patterns: &[Pattern]) -> IntelResult<usize> {
        let mut guard = self
            .state
            .write()
            .map_err(|_| IntelError::Lock("knowledge base".into()))?;
        let state = &mut *guard;
        let mut new = 0;
        for pattern in patterns {
            let signature = pattern.signature();
            state.pattern_buffer.push(pattern.clone());
            state.total_ingested += 1;

            match state.known_patterns.get_mut(&signature) {
                Some(known) => {
                    known.observations += 1;
                    known.last_seen = pattern.detected_at;
                    known.weight = known.weight.max(pattern.confidence);
                    known.pattern = pattern.clone();
                }
                None => {
                    new += 1;
                    state
                        .hierarchy
                        .entry(pattern.pattern_type)
                        .or_default()
                        .entry(pattern.subtype.clone())
                        .or_default()
                        .insert(signature.clone());
                    state.known_patterns.insert(
                        signature.clone(),
                        KnownPattern {
                            signature,
                            pattern: pattern.clone(),
                            weight: pattern.confidence,
                            observations: 1,
                            first_seen: pattern.detected_at,
                            last_seen: pattern.detected_at,
                            positive_feedback: 0,
                            negative_feedback: 0,
                        },
                    );
                }
            }
        }
        let evicted = state.evict_over_capacity(self.config.max_known_patterns);
        debug!(ingested = patterns.len(), new, evicted, "knowledge base updated");
        Ok(new)
    }

    /// Queue feedback for the next refresh. Returns whether the signature is known.
    pub fn record_feedback(&self, signature: &str, useful: bool) -> IntelResult<bool> {
        let mut state = self
            .state
            .write()
            .map_err(|_| IntelError::Lock("knowledge base".into()))?;
        let known = state.known_patterns.contains_key(signature);
        state.feedback_buffer.push(Feedback {
            signature: signature.to_string(),
            useful,
            recorded_at: Utc::now(),
        });
        Ok(known)
    }

    /// Decay weights, apply queued feedback, prune weak patterns and enforce
    /// the capacity bound.
    pub fn refresh(&self) -> IntelResult<RefreshSummary> {
        let mut state = self
            .state
            .write()
            .map_err(|_| IntelError::Lock("knowledge base".into()))?;
        let mut summary = RefreshSummary::default();

        for known in state.known_patterns.values_mut() {
            known.weight *= self.config.decay_rate;
            summary.decayed += 1;
        }

        for feedback in state.feedback_buffer.drain() {
            if let Some(known) = state.known_patterns.get_mut(&feedback.signature) {
                if feedback.useful {
                    known.weight = (known.weight + self.config.feedback_step).min(1.0);
                    known.positive_feedback += 1;
                } else {
                    known.weight = (known.weight - self.config.feedback_step).max(0.0);
                    known.negative_feedback += 1;
                }
                summary.feedback_applied += 1;
            }
        }

        let weak: Vec<String> = state
            .known_patterns
            .values()
            .filter(|k| k.weight < self.config.prune_threshold)
            .map(|k| k.signature.clone())
            .collect();
        for signature in weak {
            if let Some(known) = state.known_patterns.remove(&signature) {
                state.unlink(&known);
                summary.pruned += 1;
            }
        }

        summary.evicted_over_capacity = state.evict_over_capacity(self.config.max_known_patterns);

        summary.remaining = state.known_patterns.len();
        state.last_refresh = Some(Utc::now());
        info!(
            decayed = summary.decayed,
            feedback = summary.feedback_applied,
            pruned = summary.pruned,
            evicted = summary.evicted_over_capacity,
            remaining = summary.remaining,
            "knowledge base refreshed"
        );
        Ok(summary)
    }

    /// Known patterns that target `rule_id` or no rule at all, strongest first.
    pub fn relevant_patterns(&self, rule_id: &str, limit: usize) -> IntelResult<Vec<KnownPattern>> {
        let state = self
            .state
            .read()
            .map_err(|_| IntelError::Lock("knowledge base".into()))?;
        let mut relevant: Vec<KnownPattern> = state
            .known_patterns
            .values()
            .filter(|k| k.rule_id().map(|r| r == rule_id).unwrap_or(true))
            .cloned()
            .collect();
        relevant.sort_by(|a, b| {
            b.weight
                .total_cmp(&a.weight)
                .then_with(|| a.signature.cmp(&b.signature))
        });
        relevant.truncate(limit);
        Ok(relevant)
    }

    pub fn get(&self, signature: &str) -> IntelResult<Option<KnownPattern>> {
        let state = self
            .state
            .read()
            .map_err(|_| IntelError::Lock("knowledge base".into()))?;
        Ok(state.known_patterns.get(signature).cloned())
    }

    /// Subtype → pattern count for one type.
    pub fn hierarchy(&self, pattern_type: PatternType) -> IntelResult<BTreeMap<String, usize>> {
        let state = self
            .state
            .read()
            .map_err(|_| IntelError::Lock("knowledge base".into()))?;
        Ok(state
            .hierarchy
            .get(&pattern_type)
            .map(|subtypes| {
                subtypes
                    .iter()
                    .map(|(s, sigs)| (s.clone(), sigs.len()))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// The most recent `n` ingested patterns, oldest first.
    pub fn recent_patterns(&self, n: usize) -> IntelResult<Vec<Pattern>> {
        let state = self
            .state
            .read()
            .map_err(|_| IntelError::Lock("knowledge base".into()))?;
        Ok(state.pattern_buffer.recent(n).cloned().collect())
    }

    pub fn statistics(&self) -> IntelResult<KnowledgeStatistics> {
        let state = self
            .state
            .read()
            .map_err(|_| IntelError::Lock("knowledge base".into()))?;
        let mut by_type = BTreeMap::new();
        for known in state.known_patterns.values() {
            *by_type
                .entry(known.pattern.pattern_type.to_string())
                .or_insert(0usize) += 1;
        }
        let weights: Vec<f64> = state.known_patterns.values().map(|k| k.weight).collect();
        Ok(KnowledgeStatistics {
            known_patterns: state.known_patterns.len(),
            by_type,
            mean_weight: rulewise_types::stats::mean(&weights),
            pattern_buffer_len: state.pattern_buffer.len(),
            pattern_buffer_capacity: state.pattern_buffer.capacity(),
            feedback_pending: state.feedback_buffer.len(),
            total_ingested: state.total_ingested,
            buffer_evictions: state.pattern_buffer.evicted(),
            last_refresh: state.last_refresh,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(t: PatternType, subtype: &str, confidence: f64, tag: u64) -> Pattern {
        Pattern::new(t, subtype, "", confidence).with_characteristic("tag", tag)
    }

    #[test]
    fn ingest_tracks_observations_and_hierarchy() {
        let kb = KnowledgeBase::new(KnowledgeConfig::default());
        let p = pattern(PatternType::Temporal, "burst", 0.8, 1);
        assert_eq!(kb.ingest(&[p.clone(), p.clone()]).unwrap(), 1);
        let known = kb.get(&p.signature()).unwrap().unwrap();
        assert_eq!(known.observations, 2);
        assert_eq!(kb.hierarchy(PatternType::Temporal).unwrap()["burst"], 1);
        let stats = kb.statistics().unwrap();
        assert_eq!(stats.known_patterns, 1);
        assert_eq!(stats.total_ingested, 2);
    }

    #[test]
    fn buffer_is_bounded() {
        let kb = KnowledgeBase::new(KnowledgeConfig {
            pattern_buffer_size: 3,
            ..KnowledgeConfig::default()
        });
        let patterns: Vec<Pattern> = (0..5)
            .map(|i| pattern(PatternType::Anomaly, "outlier_group", 0.9, i))
            .collect();
        kb.ingest(&patterns).unwrap();
        let recent = kb.recent_patterns(10).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].characteristics["tag"], serde_json::json!(2));
        assert_eq!(kb.statistics().unwrap().buffer_evictions, 2);
    }

    #[test]
    fn refresh_decays_applies_feedback_and_prunes() {
        let kb = KnowledgeBase::new(KnowledgeConfig {
            decay_rate: 0.5,
            prune_threshold: 0.3,
            feedback_step: 0.2,
            ..KnowledgeConfig::default()
        });
        let keep = pattern(PatternType::Structural, "cluster", 0.8, 1);
        let drop = pattern(PatternType::Structural, "cluster", 0.8, 2);
        kb.ingest(&[keep.clone(), drop.clone()]).unwrap();
        assert!(kb.record_feedback(&keep.signature(), true).unwrap());
        assert!(!kb.record_feedback("unknown", true).unwrap());

        let summary = kb.refresh().unwrap();
        assert_eq!(summary.decayed, 2);
        assert_eq!(summary.feedback_applied, 1);
        // keep: 0.8*0.5 + 0.2 = 0.6; drop: 0.4, both survive
        assert_eq!(summary.pruned, 0);

        let summary = kb.refresh().unwrap();
        // keep: 0.3 survives at the threshold; drop: 0.2 pruned
        assert_eq!(summary.pruned, 1);
        assert_eq!(summary.remaining, 1);
        assert!(kb.get(&drop.signature()).unwrap().is_none());
        assert_eq!(kb.hierarchy(PatternType::Structural).unwrap()["cluster"], 1);
    }

    #[test]
    fn capacity_holds_on_ingest_and_evicts_weakest() {
        let kb = KnowledgeBase::new(KnowledgeConfig {
            max_known_patterns: 2,
            decay_rate: 1.0,
            ..KnowledgeConfig::default()
        });
        kb.ingest(&[
            pattern(PatternType::Semantic, "theme", 0.9, 1),
            pattern(PatternType::Semantic, "theme", 0.5, 2),
            pattern(PatternType::Semantic, "theme", 0.7, 3),
        ])
        .unwrap();
        assert_eq!(kb.statistics().unwrap().known_patterns, 2);
        assert!(kb.get(&pattern(PatternType::Semantic, "theme", 0.5, 2).signature()).unwrap().is_none());
        assert_eq!(kb.hierarchy(PatternType::Semantic).unwrap()["theme"], 2);

        kb.ingest(&[pattern(PatternType::Semantic, "theme", 0.6, 4)]).unwrap();
        assert_eq!(kb.statistics().unwrap().known_patterns, 2);

        let summary = kb.refresh().unwrap();
        assert_eq!(summary.evicted_over_capacity, 0);
        let weights: Vec<f64> = kb
            .relevant_patterns("any", 10)
            .unwrap()
            .iter()
            .map(|k| k.weight)
            .collect();
        assert_eq!(weights, vec![0.9, 0.7]);
    }

    #[test]
    fn relevance_respects_rule_scope() {
        let kb = KnowledgeBase::new(KnowledgeConfig::default());
        kb.ingest(&[
            pattern(PatternType::Anomaly, "outlier_group", 0.9, 1).with_characteristic("rule_id", "r1"),
            pattern(PatternType::Anomaly, "outlier_group", 0.9, 2).with_characteristic("rule_id", "r2"),
            pattern(PatternType::Anomaly, "outlier_group", 0.8, 3),
        ])
        .unwrap();
        assert_eq!(kb.relevant_patterns("r1", 10).unwrap().len(), 2);
        assert_eq!(kb.relevant_patterns("r1", 1).unwrap().len(), 1);
    }
}
