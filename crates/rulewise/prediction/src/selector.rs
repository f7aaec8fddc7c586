use serde::{Deserialize, Serialize};

use rulewise_types::stats::pearson;

/// Keeps the `k` columns most correlated (in absolute value) with the target.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureSelector {
    /// Selected column indices, ascending.
    pub indices: Vec<usize>,
    /// |r| for every input column.
    pub scores: Vec<f64>,
}

impl FeatureSelector {
    pub fn fit(rows: &[Vec<f64>], target: &[f64], k: usize) -> Self {
        let width = rows.first().map(Vec::len).unwrap_or(0);
        let scores: Vec<f64> = (0..width)
            .map(|c| {
                let column: Vec<f64> = rows.iter().map(|r| r[c]).collect();
                pearson(&column, target).abs()
            })
            .collect();

        let mut ranked: Vec<usize> = (0..width).collect();
        ranked.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
        let mut indices: Vec<usize> = ranked.into_iter().take(k.max(1).min(width)).collect();
        indices.sort_unstable();
        Self { indices, scores }
    }

    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        self.indices
            .iter()
            .map(|&i| row.get(i).copied().unwrap_or(0.0))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_most_informative_columns() {
        let rows: Vec<Vec<f64>> = (0..20)
            .map(|i| vec![(i % 3) as f64, i as f64, ((i * 7) % 5) as f64])
            .collect();
        let target: Vec<f64> = (0..20).map(|i| 2.0 * i as f64 + 1.0).collect();
        let selector = FeatureSelector::fit(&rows, &target, 1);
        assert_eq!(selector.indices, vec![1]);
        assert_eq!(selector.transform(&[9.0, 8.0, 7.0]), vec![8.0]);
        assert!((selector.scores[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn k_is_bounded_by_width() {
        let rows = vec![vec![1.0, 2.0], vec![2.0, 1.0]];
        let selector = FeatureSelector::fit(&rows, &[1.0, 2.0], 10);
        assert_eq!(selector.indices, vec![0, 1]);
    }
}
