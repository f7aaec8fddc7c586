//! Post-processing of raw detector output into the ranked pattern list.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use rulewise_types::{DetectionConfig, Pattern, PatternType};

/// Counters describing one post-processing pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PostProcessStats {
    pub raw: usize,
    pub duplicates_removed: usize,
    pub below_confidence: usize,
    pub truncated: usize,
}

#[derive(Clone, Debug)]
pub struct PatternPostProcessor {
    min_confidence: f64,
    max_patterns: usize,
}

impl PatternPostProcessor {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            min_confidence: config.min_pattern_confidence,
            max_patterns: config.max_patterns_per_analysis,
        }
    }

    /// Dedup, filter, score, rank, truncate and stamp.
    ///
    /// `total_records` is the batch size the support fractions refer to.
    pub fn process(
        &self,
        raw: Vec<Pattern>,
        batch_hash: &str,
        total_records: usize,
    ) -> (Vec<Pattern>, PostProcessStats) {
        let mut stats = PostProcessStats {
            raw: raw.len(),
            ..PostProcessStats::default()
        };

        // Dedup by signature, keeping the most confident copy.
        let mut unique: BTreeMap<String, Pattern> = BTreeMap::new();
        for pattern in raw {
            let signature = pattern.signature();
            match unique.get(&signature) {
                Some(existing) if existing.confidence >= pattern.confidence => {
                    stats.duplicates_removed += 1;
                }
                Some(_) => {
                    stats.duplicates_removed += 1;
                    unique.insert(signature, pattern);
                }
                None => {
                    unique.insert(signature, pattern);
                }
            }
        }

        let mut kept: Vec<(String, Pattern)> = Vec::with_capacity(unique.len());
        for (signature, pattern) in unique {
            if pattern.confidence < self.min_confidence {
                stats.below_confidence += 1;
            } else {
                kept.push((signature, pattern));
            }
        }

        let mut per_type: BTreeMap<PatternType, usize> = BTreeMap::new();
        for (_, p) in &kept {
            *per_type.entry(p.pattern_type).or_default() += 1;
        }
        for (_, p) in kept.iter_mut() {
            let k = per_type.get(&p.pattern_type).copied().unwrap_or(1);
            let significance = significance(p, k, total_records);
            p.set_significance(significance);
        }

        kept.sort_by(|(sa, a), (sb, b)| rank_order(a, sa, b, sb));
        if kept.len() > self.max_patterns {
            stats.truncated = kept.len() - self.max_patterns;
            kept.truncate(self.max_patterns);
        }

        let now = Utc::now();
        let patterns: Vec<Pattern> = kept
            .into_iter()
            .map(|(_, mut p)| {
                p.detected_at = now;
                p.data_hash = p.compute_data_hash(batch_hash);
                p
            })
            .collect();

        debug!(
            raw = stats.raw,
            kept = patterns.len(),
            duplicates = stats.duplicates_removed,
            filtered = stats.below_confidence,
            "post-processing complete"
        );
        (patterns, stats)
    }
}

/// Ranking comparator: score descending, then type, subtype and signature.
fn rank_order(a: &Pattern, sig_a: &str, b: &Pattern, sig_b: &str) -> Ordering {
    b.rank_score()
        .total_cmp(&a.rank_score())
        .then(a.pattern_type.cmp(&b.pattern_type))
        .then_with(|| a.subtype.cmp(&b.subtype))
        .then_with(|| sig_a.cmp(sig_b))
}

/// One-proportion z-test of the pattern's support fraction against a uniform
/// share over the `k` patterns of its type, mapped into `[0, 1)`.
pub fn significance(pattern: &Pattern, k: usize, total_records: usize) -> f64 {
    let n = total_records.max(1) as f64;
    let observed = match pattern.support() {
        Some(s) => (s as f64 / n).min(1.0),
        None => pattern.confidence,
    };
    let p0 = 1.0 / (k as f64 + 1.0);
    let se = (p0 * (1.0 - p0) / n).sqrt();
    if se <= 0.0 {
        return 0.0;
    }
    let z = (observed - p0) / se;
    1.0 - (-z * z / 2.0).exp()
}
