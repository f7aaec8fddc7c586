//! Small numeric helpers shared by the detectors, the predictor and the
//! candidate strategies. Degenerate inputs return zeros rather than NaN.

/// Arithmetic mean; zero for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance.
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

/// Standardize every column of a row-major matrix to zero mean and unit
/// variance. Constant columns become all zeros.
pub fn zscore_columns(rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut out: Vec<Vec<f64>> = rows.iter().map(|_| vec![0.0; width]).collect();
    for col in 0..width {
        let column: Vec<f64> = rows
            .iter()
            .map(|r| r.get(col).copied().filter(|v| v.is_finite()).unwrap_or(0.0))
            .collect();
        let m = mean(&column);
        let s = std_dev(&column);
        if s < 1e-12 {
            continue;
        }
        for (row, v) in out.iter_mut().zip(column.iter()) {
            row[col] = (v - m) / s;
        }
    }
    out
}

pub fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Cosine similarity; zero when either vector has no magnitude.
pub fn cosine(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if na < 1e-12 || nb < 1e-12 {
        0.0
    } else {
        dot / (na * nb)
    }
}

/// Pearson correlation; zero when either series is constant.
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return 0.0;
    }
    let (x, y) = (&x[..n], &y[..n]);
    let mx = mean(x);
    let my = mean(y);
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for i in 0..n {
        let dx = x[i] - mx;
        let dy = y[i] - my;
        cov += dx * dy;
        vx += dx * dx;
        vy += dy * dy;
    }
    if vx < 1e-12 || vy < 1e-12 {
        0.0
    } else {
        cov / (vx.sqrt() * vy.sqrt())
    }
}

/// Least-squares line through `(x, y)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

pub fn linear_fit(x: &[f64], y: &[f64]) -> LinearFit {
    let n = x.len().min(y.len());
    let flat = LinearFit {
        slope: 0.0,
        intercept: mean(&y[..n]),
        r_squared: 0.0,
    };
    if n < 2 {
        return flat;
    }
    let mx = mean(&x[..n]);
    let my = mean(&y[..n]);
    let sxx: f64 = x[..n].iter().map(|v| (v - mx).powi(2)).sum();
    if sxx < 1e-12 {
        return flat;
    }
    let sxy: f64 = (0..n).map(|i| (x[i] - mx) * (y[i] - my)).sum();
    let slope = sxy / sxx;
    let intercept = my - slope * mx;
    let ss_tot: f64 = y[..n].iter().map(|v| (v - my).powi(2)).sum();
    let ss_res: f64 = (0..n)
        .map(|i| (y[i] - (slope * x[i] + intercept)).powi(2))
        .sum();
    let r_squared = if ss_tot < 1e-12 {
        0.0
    } else {
        (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
    };
    LinearFit {
        slope,
        intercept,
        r_squared,
    }
}

/// Coefficient of variation `std / |mean|`; infinite for a zero mean.
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    let m = mean(values);
    if m.abs() < 1e-12 {
        return f64::INFINITY;
    }
    std_dev(values) / m.abs()
}
