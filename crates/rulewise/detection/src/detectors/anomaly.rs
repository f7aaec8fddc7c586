//! Isolation-forest outlier scoring over z-normalized numeric profiles.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use tracing::debug;

use rulewise_types::stats::zscore_columns;
use rulewise_types::{
    DetectionConfig, FeatureVector, IntelError, IntelResult, Pattern, PatternType,
};

use super::{round6, PatternDetector};

const MIN_RECORDS: usize = 10;

#[derive(Debug, Default, Clone)]
pub struct IsolationForestDetector;

impl PatternDetector for IsolationForestDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::Anomaly
    }

    fn backend(&self) -> &str {
        "isolation_forest"
    }

    fn check_available(&self, config: &DetectionConfig) -> IntelResult<()> {
        if config.isolation_trees == 0 {
            return Err(IntelError::ModelUnavailable(
                "isolation forest configured with zero trees".into(),
            ));
        }
        if config.isolation_sample_size < 2 {
            return Err(IntelError::ModelUnavailable(
                "isolation forest sample size must be at least 2".into(),
            ));
        }
        Ok(())
    }

    fn detect(
        &self,
        features: &[FeatureVector],
        config: &DetectionConfig,
    ) -> IntelResult<Vec<Pattern>> {
        self.check_available(config)?;
        let n = features.len();
        if n < MIN_RECORDS {
            return Ok(Vec::new());
        }

        let rows: Vec<Vec<f64>> = features
            .iter()
            .map(|f| f.numeric_profile().to_vec())
            .collect();
        let points = zscore_columns(&rows);
        if points.iter().all(|p| p.iter().all(|v| *v == 0.0)) {
            return Ok(Vec::new());
        }

        let forest = IsolationForest::fit(
            &points,
            config.isolation_trees,
            config.isolation_sample_size,
            config.seed,
        );
        let scores: Vec<f64> = points.iter().map(|p| forest.score(p)).collect();
        let flagged = top_fraction(&scores, config.contamination_rate);
        debug!(records = n, flagged = flagged.len(), "isolation scoring complete");

        Ok(group_outliers(&flagged, &scores, features, "isolation_forest"))
    }
}

/// Indices of the `round(fraction·n)` highest scores, ascending.
pub(crate) fn top_fraction(scores: &[f64], fraction: f64) -> Vec<usize> {
    let n = scores.len();
    let count = ((fraction.clamp(0.0, 1.0) * n as f64).round() as usize).min(n);
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
    let mut flagged: Vec<usize> = order.into_iter().take(count).collect();
    flagged.sort_unstable();
    flagged
}

/// Group adjacent flagged positions into one pattern each.
pub(crate) fn group_outliers(
    flagged: &[usize],
    scores: &[f64],
    features: &[FeatureVector],
    method: &str,
) -> Vec<Pattern> {
    let total = features.len().max(1);
    let threshold = flagged
        .iter()
        .map(|&i| scores[i])
        .fold(f64::INFINITY, f64::min);

    let mut groups: Vec<Vec<usize>> = Vec::new();
    for &i in flagged {
        match groups.last_mut() {
            Some(g) if g.last().map(|&l| l + 1 == i).unwrap_or(false) => g.push(i),
            _ => groups.push(vec![i]),
        }
    }

    groups
        .into_iter()
        .map(|g| {
            let size = g.len();
            let group_scores: Vec<f64> = g.iter().map(|&i| scores[i]).collect();
            let max_score = group_scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let mean_score = group_scores.iter().sum::<f64>() / size as f64;
            let refs: Vec<u64> = g.iter().map(|&i| features[i].source_ref as u64).collect();
            Pattern::new(
                PatternType::Anomaly,
                "outlier_group",
                format!(
                    "{} anomalous record(s) starting at position {}",
                    size, refs[0]
                ),
                1.0 - size as f64 / total as f64,
            )
            .with_characteristic("record_refs", refs)
            .with_characteristic("group_size", size as u64)
            .with_characteristic("support", size as u64)
            .with_characteristic("mean_score", round6(mean_score))
            .with_characteristic("max_score", round6(max_score))
            .with_characteristic("score_threshold", round6(threshold))
            .with_characteristic("method", method)
        })
        .collect()
}

// ── Isolation forest ────────────────────────────────────────────────────

enum Node {
    Leaf { size: usize },
    Split { feature: usize, value: f64, left: Box<Node>, right: Box<Node> },
}

pub struct IsolationForest {
    trees: Vec<Node>,
    sample_size: usize,
}

impl IsolationForest {
    pub fn fit(points: &[Vec<f64>], n_trees: usize, sample_size: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let psi = sample_size.min(points.len()).max(2);
        let height_limit = (psi as f64).log2().ceil() as usize;
        let trees = (0..n_trees)
            .map(|_| {
                let idx = if points.len() <= psi {
                    (0..points.len()).collect::<Vec<_>>()
                } else {
                    sample(&mut rng, points.len(), psi).into_vec()
                };
                build(points, idx, 0, height_limit, &mut rng)
            })
            .collect();
        Self {
            trees,
            sample_size: psi,
        }
    }

    /// Anomaly score in `(0, 1]`; higher is more anomalous.
    pub fn score(&self, point: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let mean_path = self
            .trees
            .iter()
            .map(|t| path_length(t, point, 0))
            .sum::<f64>()
            / self.trees.len() as f64;
        2f64.powf(-mean_path / average_path(self.sample_size))
    }
}

fn build(points: &[Vec<f64>], idx: Vec<usize>, depth: usize, limit: usize, rng: &mut StdRng) -> Node {
    if idx.len() <= 1 || depth >= limit {
        return Node::Leaf { size: idx.len() };
    }
    let width = points[idx[0]].len();
    let splittable: Vec<(usize, f64, f64)> = (0..width)
        .filter_map(|f| {
            let lo = idx.iter().map(|&i| points[i][f]).fold(f64::INFINITY, f64::min);
            let hi = idx.iter().map(|&i| points[i][f]).fold(f64::NEG_INFINITY, f64::max);
            (hi > lo).then_some((f, lo, hi))
        })
        .collect();
    if splittable.is_empty() {
        return Node::Leaf { size: idx.len() };
    }
    let (feature, lo, hi) = splittable[rng.gen_range(0..splittable.len())];
    let value = rng.gen_range(lo..hi);
    let (left, right): (Vec<usize>, Vec<usize>) =
        idx.into_iter().partition(|&i| points[i][feature] < value);
    Node::Split {
        feature,
        value,
        left: Box::new(build(points, left, depth + 1, limit, rng)),
        right: Box::new(build(points, right, depth + 1, limit, rng)),
    }
}

fn path_length(node: &Node, point: &[f64], depth: usize) -> f64 {
    match node {
        Node::Leaf { size } => depth as f64 + average_path(*size),
        Node::Split { feature, value, left, right } => {
            let next = if point.get(*feature).copied().unwrap_or(0.0) < *value {
                left
            } else {
                right
            };
            path_length(next, point, depth + 1)
        }
    }
}

/// Average unsuccessful-search path length of a BST with `n` nodes.
fn average_path(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + 0.577_215_664_9) - 2.0 * (n - 1.0) / n
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fv(values: Vec<f64>, i: usize) -> FeatureVector {
        FeatureVector {
            numeric: values,
            source_ref: i,
            ..FeatureVector::default()
        }
    }

    fn batch() -> Vec<FeatureVector> {
        let mut rng = StdRng::seed_from_u64(3);
        let mut features: Vec<FeatureVector> = (0..190)
            .map(|i| fv(vec![rng.gen_range(9.0..11.0), rng.gen_range(4.0..6.0)], i))
            .collect();
        for i in 190..200 {
            features.push(fv(vec![500.0 + i as f64, -300.0], i));
        }
        features
    }

    #[test]
    fn flags_contamination_fraction() {
        let patterns = IsolationForestDetector
            .detect(&batch(), &DetectionConfig::default())
            .unwrap();
        let flagged: u64 = patterns.iter().filter_map(|p| p.support()).sum();
        assert_eq!(flagged, 20);
    }

    #[test]
    fn extreme_block_is_one_confident_group() {
        let config = DetectionConfig {
            contamination_rate: 0.05,
            ..DetectionConfig::default()
        };
        let patterns = IsolationForestDetector.detect(&batch(), &config).unwrap();
        assert_eq!(patterns.len(), 1);
        let p = &patterns[0];
        assert_eq!(p.characteristics["group_size"], serde_json::json!(10));
        assert!((p.confidence - 0.95).abs() < 1e-9);
        assert_eq!(p.characteristics["record_refs"][0], serde_json::json!(190));
    }

    #[test]
    fn deterministic_for_fixed_seed() {
        let a = IsolationForestDetector
            .detect(&batch(), &DetectionConfig::default())
            .unwrap();
        let b = IsolationForestDetector
            .detect(&batch(), &DetectionConfig::default())
            .unwrap();
        let sig = |ps: &[Pattern]| ps.iter().map(Pattern::signature).collect::<Vec<_>>();
        assert_eq!(sig(&a), sig(&b));
    }

    #[test]
    fn zero_trees_is_unavailable() {
        let config = DetectionConfig {
            isolation_trees: 0,
            ..DetectionConfig::default()
        };
        assert!(matches!(
            IsolationForestDetector.detect(&batch(), &config),
            Err(IntelError::ModelUnavailable(_))
        ));
    }

    #[test]
    fn top_fraction_rounds() {
        let scores = [0.1, 0.9, 0.5, 0.8];
        assert_eq!(top_fraction(&scores, 0.5), vec![1, 3]);
        assert!(top_fraction(&scores, 0.0).is_empty());
    }
}
