//! Structural clustering over the shape projection of each record.

use std::collections::BTreeMap;

use serde_json::json;
use tracing::debug;

use rulewise_types::stats::{euclidean, mean, zscore_columns};
use rulewise_types::{
    DetectionConfig, FeatureVector, IntelError, IntelResult, Pattern, PatternType,
};

use super::{round6, PatternDetector};

const STRUCTURAL_NAMES: [&str; 6] = [
    "size",
    "depth",
    "key_entropy",
    "value_type_entropy",
    "complexity",
    "type_count",
];

/// DBSCAN over z-normalized structural vectors.
///
/// Each dense cluster becomes one `cluster` pattern; noise points are
/// excluded. Confidence blends cohesion with the silhouette score.
#[derive(Debug, Default, Clone)]
pub struct DbscanStructuralDetector;

impl PatternDetector for DbscanStructuralDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::Structural
    }

    fn backend(&self) -> &str {
        "dbscan"
    }

    fn check_available(&self, config: &DetectionConfig) -> IntelResult<()> {
        if !(config.clustering_eps.is_finite() && config.clustering_eps > 0.0) {
            return Err(IntelError::ModelUnavailable(format!(
                "dbscan requires a positive radius, got {}",
                config.clustering_eps
            )));
        }
        if config.clustering_min_samples == 0 {
            return Err(IntelError::ModelUnavailable(
                "dbscan requires min_samples >= 1".into(),
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
        if n < config.clustering_min_samples.max(2) {
            return Ok(Vec::new());
        }

        let raw: Vec<Vec<f64>> = features.iter().map(|f| f.structural.clone()).collect();
        let points = zscore_columns(&raw);
        let labels = dbscan(&points, config.clustering_eps, config.clustering_min_samples);

        let mut clusters: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (i, label) in labels.iter().enumerate() {
            if let Some(c) = label {
                clusters.entry(*c).or_default().push(i);
            }
        }
        let noise = labels.iter().filter(|l| l.is_none()).count();
        debug!(clusters = clusters.len(), noise, "structural clustering complete");

        let silhouettes = if clusters.len() > 1 {
            Some(silhouette_by_cluster(&points, &clusters))
        } else {
            None
        };

        let mut patterns = Vec::with_capacity(clusters.len());
        for (cluster_id, members) in &clusters {
            let centroid = centroid(&points, members);
            let mean_distance = mean(
                &members
                    .iter()
                    .map(|&i| euclidean(&points[i], &centroid))
                    .collect::<Vec<_>>(),
            );
            let cohesion = 1.0 / (1.0 + mean_distance);
            let confidence = match &silhouettes {
                Some(s) => {
                    let sil = s.get(cluster_id).copied().unwrap_or(0.0);
                    0.6 * cohesion + 0.4 * sil.max(0.0)
                }
                None => cohesion,
            };

            let mut profile = serde_json::Map::new();
            for (dim, name) in STRUCTURAL_NAMES.iter().enumerate() {
                let column: Vec<f64> = members
                    .iter()
                    .map(|&i| raw[i].get(dim).copied().unwrap_or(0.0))
                    .collect();
                let lo = column.iter().copied().fold(f64::INFINITY, f64::min);
                let hi = column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                profile.insert(
                    (*name).to_string(),
                    json!({"mean": round6(mean(&column)), "min": round6(lo), "max": round6(hi)}),
                );
            }

            let pattern = Pattern::new(
                PatternType::Structural,
                "cluster",
                format!(
                    "Structural cluster {} of {} records sharing a common shape",
                    cluster_id,
                    members.len()
                ),
                confidence,
            )
            .with_characteristic("cluster_id", *cluster_id as u64)
            .with_characteristic("support", members.len() as u64)
            .with_characteristic("fraction", round6(members.len() as f64 / n as f64))
            .with_characteristic("cohesion", round6(cohesion))
            .with_characteristic("profile", serde_json::Value::Object(profile))
            .with_characteristic("noise_points", noise as u64);
            patterns.push(pattern);
        }

        Ok(patterns)
    }
}

// ── DBSCAN ──────────────────────────────────────────────────────────────

/// Label every point with its cluster, or `None` for noise.
///
/// Clusters are numbered in order of their first core point, so labels are
/// deterministic for a given input order.
pub fn dbscan(points: &[Vec<f64>], eps: f64, min_samples: usize) -> Vec<Option<usize>> {
    let n = points.len();
    let neighbours: Vec<Vec<usize>> = (0..n)
        .map(|i| {
            (0..n)
                .filter(|&j| euclidean(&points[i], &points[j]) <= eps)
                .collect()
        })
        .collect();

    let mut labels: Vec<Option<usize>> = vec![None; n];
    let mut visited = vec![false; n];
    let mut next_cluster = 0;

    for i in 0..n {
        if visited[i] {
            continue;
        }
        visited[i] = true;
        if neighbours[i].len() < min_samples {
            continue;
        }

        let cluster = next_cluster;
        next_cluster += 1;
        labels[i] = Some(cluster);

        let mut frontier: Vec<usize> = neighbours[i].clone();
        let mut cursor = 0;
        while cursor < frontier.len() {
            let j = frontier[cursor];
            cursor += 1;
            if labels[j].is_none() {
                labels[j] = Some(cluster);
            }
            if visited[j] {
                continue;
            }
            visited[j] = true;
            if neighbours[j].len() >= min_samples {
                frontier.extend(neighbours[j].iter().copied());
            }
        }
    }

    labels
}

fn centroid(points: &[Vec<f64>], members: &[usize]) -> Vec<f64> {
    let width = points.first().map(Vec::len).unwrap_or(0);
    let mut c = vec![0.0; width];
    for &i in members {
        for (d, v) in points[i].iter().enumerate() {
            c[d] += v;
        }
    }
    let n = members.len().max(1) as f64;
    c.iter_mut().for_each(|v| *v /= n);
    c
}

/// Mean silhouette coefficient per cluster.
fn silhouette_by_cluster(
    points: &[Vec<f64>],
    clusters: &BTreeMap<usize, Vec<usize>>,
) -> BTreeMap<usize, f64> {
    let mean_distance = |i: usize, members: &[usize]| -> f64 {
        let others: Vec<f64> = members
            .iter()
            .filter(|&&j| j != i)
            .map(|&j| euclidean(&points[i], &points[j]))
            .collect();
        mean(&others)
    };

    clusters
        .iter()
        .map(|(id, members)| {
            let scores: Vec<f64> = members
                .iter()
                .map(|&i| {
                    let a = mean_distance(i, members);
                    let b = clusters
                        .iter()
                        .filter(|(other, _)| *other != id)
                        .map(|(_, m)| mean_distance(i, m))
                        .fold(f64::INFINITY, f64::min);
                    let denom = a.max(b);
                    if denom <= 0.0 || !denom.is_finite() {
                        0.0
                    } else {
                        (b - a) / denom
                    }
                })
                .collect();
            (*id, mean(&scores))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fv(structural: Vec<f64>) -> FeatureVector {
        FeatureVector {
            structural,
            ..FeatureVector::default()
        }
    }

    #[test]
    fn dbscan_separates_two_blobs_and_noise() {
        let mut points = Vec::new();
        for i in 0..6 {
            points.push(vec![0.0 + i as f64 * 0.01, 0.0]);
        }
        for i in 0..6 {
            points.push(vec![10.0 + i as f64 * 0.01, 10.0]);
        }
        points.push(vec![50.0, -50.0]);
        let labels = dbscan(&points, 0.5, 3);
        assert!(labels[..6].iter().all(|l| *l == Some(0)));
        assert!(labels[6..12].iter().all(|l| *l == Some(1)));
        assert_eq!(labels[12], None);
    }

    #[test]
    fn two_shapes_give_two_confident_clusters() {
        let mut features = Vec::new();
        for _ in 0..40 {
            features.push(fv(vec![5.0, 1.0, 2.0, 0.9, 1.5, 2.0]));
        }
        for _ in 0..40 {
            features.push(fv(vec![20.0, 3.0, 3.5, 1.5, 2.9, 4.0]));
        }
        let patterns = DbscanStructuralDetector
            .detect(&features, &DetectionConfig::default())
            .unwrap();
        assert_eq!(patterns.len(), 2);
        for p in &patterns {
            assert!(p.confidence >= 0.7, "confidence {}", p.confidence);
            assert_eq!(p.support(), Some(40));
        }
    }

    #[test]
    fn non_positive_radius_is_unavailable() {
        let config = DetectionConfig {
            clustering_eps: 0.0,
            ..DetectionConfig::default()
        };
        assert!(matches!(
            DbscanStructuralDetector.check_available(&config),
            Err(IntelError::ModelUnavailable(_))
        ));
    }

    #[test]
    fn too_few_records_yield_nothing() {
        let features = vec![fv(vec![1.0; 6]); 2];
        let patterns = DbscanStructuralDetector
            .detect(&features, &DetectionConfig::default())
            .unwrap();
        assert!(patterns.is_empty());
    }
}
