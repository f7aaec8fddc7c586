//! Closed-form ridge regression.

use serde::{Deserialize, Serialize};

use rulewise_types::stats::mean;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RidgeRegressor {
    pub weights: Vec<f64>,
    pub intercept: f64,
}

impl RidgeRegressor {
    /// Solve `(XᵀX + αI) w = Xᵀy` on centered data.
    pub fn fit(rows: &[Vec<f64>], target: &[f64], alpha: f64) -> Self {
        let n = rows.len().min(target.len());
        let width = rows.first().map(Vec::len).unwrap_or(0);
        let y_mean = mean(&target[..n]);
        if n == 0 || width == 0 {
            return Self {
                weights: vec![0.0; width],
                intercept: y_mean,
            };
        }

        let x_means: Vec<f64> = (0..width)
            .map(|c| rows[..n].iter().map(|r| r[c]).sum::<f64>() / n as f64)
            .collect();

        let mut gram = vec![vec![0.0; width]; width];
        let mut rhs = vec![0.0; width];
        for (row, y) in rows[..n].iter().zip(target[..n].iter()) {
            let xc: Vec<f64> = row.iter().zip(x_means.iter()).map(|(x, m)| x - m).collect();
            let yc = y - y_mean;
            for i in 0..width {
                rhs[i] += xc[i] * yc;
                for j in 0..width {
                    gram[i][j] += xc[i] * xc[j];
                }
            }
        }
        for (i, row) in gram.iter_mut().enumerate() {
            row[i] += alpha.max(1e-9);
        }

        let weights = solve(gram, rhs).unwrap_or_else(|| vec![0.0; width]);
        let intercept = y_mean
            - weights
                .iter()
                .zip(x_means.iter())
                .map(|(w, m)| w * m)
                .sum::<f64>();
        Self { weights, intercept }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        self.intercept
            + self
                .weights
                .iter()
                .zip(row.iter())
                .map(|(w, x)| w * x)
                .sum::<f64>()
    }
}

/// Gaussian elimination with partial pivoting. `None` when singular.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}
