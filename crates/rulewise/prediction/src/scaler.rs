use serde::{Deserialize, Serialize};

use rulewise_types::stats::{mean, std_dev};

/// Per-column standardization fitted on training rows.
///
/// Non-finite inputs (missing features) map to the column mean, i.e. zero
/// after scaling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(rows: &[Vec<f64>]) -> Self {
        let width = rows.first().map(Vec::len).unwrap_or(0);
        let mut means = Vec::with_capacity(width);
        let mut stds = Vec::with_capacity(width);
        for col in 0..width {
            let column: Vec<f64> = rows
                .iter()
                .filter_map(|r| r.get(col).copied())
                .filter(|v| v.is_finite())
                .collect();
            means.push(mean(&column));
            let s = std_dev(&column);
            stds.push(if s > 1e-12 { s } else { 1.0 });
        }
        Self { means, stds }
    }

    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        self.means
            .iter()
            .zip(self.stds.iter())
            .enumerate()
            .map(|(i, (m, s))| match row.get(i) {
                Some(v) if v.is_finite() => (v - m) / s,
                _ => 0.0,
            })
            .collect()
    }

    pub fn width(&self) -> usize {
        self.means.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standardizes_and_imputes() {
        let scaler = StandardScaler::fit(&[vec![1.0, 5.0], vec![3.0, 5.0]]);
        assert_eq!(scaler.transform(&[1.0, 5.0]), vec![-1.0, 0.0]);
        assert_eq!(scaler.transform(&[f64::NAN, 7.0]), vec![0.0, 2.0]);
        assert_eq!(scaler.transform(&[3.0]), vec![1.0, 0.0]);
    }
}
