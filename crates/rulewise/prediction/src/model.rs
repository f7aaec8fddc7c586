//! Per-metric regression models and the ensemble that bundles them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use rulewise_types::stats::{mean, variance};
use rulewise_types::{
    IntelError, IntelResult, Parameters, PerformanceMetric, PerformanceSample, PredictionConfig,
};

use crate::ridge::RidgeRegressor;
use crate::scaler::StandardScaler;
use crate::selector::FeatureSelector;

/// Prefix that separates context features from rule parameters.
pub const CONTEXT_PREFIX: &str = "ctx:";

/// Two-sided 95% normal quantile.
const Z_95: f64 = 1.96;

// ── Feature schema ──────────────────────────────────────────────────

/// Ordered input columns shared by every model of an ensemble.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub names: Vec<String>,
    pub version: String,
}

impl FeatureSchema {
    pub fn from_samples(samples: &[PerformanceSample]) -> Self {
        let mut params = std::collections::BTreeSet::new();
        let mut ctx = std::collections::BTreeSet::new();
        for sample in samples {
            params.extend(sample.configuration.keys().cloned());
            ctx.extend(sample.context.keys().map(|k| format!("{}{}", CONTEXT_PREFIX, k)));
        }
        Self::new(params.into_iter().chain(ctx).collect())
    }

    pub fn new(names: Vec<String>) -> Self {
        let version = blake3::hash(names.join("\n").as_bytes()).to_hex()[..16].to_string();
        Self { names, version }
    }

    /// Parameter columns, without the context ones.
    pub fn parameters(&self) -> impl Iterator<Item = &str> {
        self.names
            .iter()
            .map(String::as_str)
            .filter(|n| !n.starts_with(CONTEXT_PREFIX))
    }

    /// Missing entries become NaN and are imputed by the scaler.
    pub fn vectorize(&self, parameters: &Parameters, context: &BTreeMap<String, f64>) -> Vec<f64> {
        self.names
            .iter()
            .map(|name| match name.strip_prefix(CONTEXT_PREFIX) {
                Some(key) => context.get(key).copied().unwrap_or(f64::NAN),
                None => parameters.get(name).copied().unwrap_or(f64::NAN),
            })
            .collect()
    }
}

// ── Metric model ────────────────────────────────────────────────────

/// Point estimate and spread for one metric.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricEstimate {
    pub mean: f64,
    pub std_dev: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricModel {
    pub metric: PerformanceMetric,
    pub trained_at: DateTime<Utc>,
    pub feature_schema_version: String,
    /// Training R², clipped to [0, 1].
    pub accuracy_estimate: f64,
    pub sample_count: usize,
    pub scaler: StandardScaler,
    pub selector: FeatureSelector,
    pub members: Vec<RidgeRegressor>,
    pub residual_std: f64,
}

impl MetricModel {
    pub fn train(
        metric: PerformanceMetric,
        schema: &FeatureSchema,
        rows: &[Vec<f64>],
        target: &[f64],
        config: &PredictionConfig,
        rng: &mut StdRng,
    ) -> Self {
        let scaler = StandardScaler::fit(rows);
        let scaled: Vec<Vec<f64>> = rows.iter().map(|r| scaler.transform(r)).collect();
        let selector = FeatureSelector::fit(&scaled, target, config.max_selected_features);
        let selected: Vec<Vec<f64>> = scaled.iter().map(|r| selector.transform(r)).collect();

        let n = selected.len();
        let members = (0..config.ensemble_members.max(1))
            .map(|_| {
                let (xs, ys): (Vec<Vec<f64>>, Vec<f64>) = (0..n)
                    .map(|_| {
                        let i = rng.gen_range(0..n);
                        (selected[i].clone(), target[i])
                    })
                    .unzip();
                RidgeRegressor::fit(&xs, &ys, config.ridge_alpha)
            })
            .collect::<Vec<_>>();

        let mut model = Self {
            metric,
            trained_at: Utc::now(),
            feature_schema_version: schema.version.clone(),
            accuracy_estimate: 0.0,
            sample_count: n,
            scaler,
            selector,
            members,
            residual_std: 0.0,
        };

        let fitted: Vec<f64> = selected.iter().map(|r| model.member_mean(r)).collect();
        let residuals: Vec<f64> = fitted.iter().zip(target).map(|(f, y)| y - f).collect();
        let ss_res: f64 = residuals.iter().map(|r| r * r).sum();
        let y_mean = mean(target);
        let ss_tot: f64 = target.iter().map(|y| (y - y_mean).powi(2)).sum();
        model.residual_std = if n > 1 { (ss_res / (n - 1) as f64).sqrt() } else { 0.0 };
        model.accuracy_estimate = if ss_tot > 1e-12 {
            (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
        } else if ss_res <= 1e-12 {
            1.0
        } else {
            0.0
        };
        model
    }

    fn member_mean(&self, selected: &[f64]) -> f64 {
        let preds: Vec<f64> = self.members.iter().map(|m| m.predict(selected)).collect();
        mean(&preds)
    }

    pub fn estimate(&self, row: &[f64]) -> MetricEstimate {
        let selected = self.selector.transform(&self.scaler.transform(row));
        let preds: Vec<f64> = self.members.iter().map(|m| m.predict(&selected)).collect();
        let raw = mean(&preds);
        let std_dev = (self.residual_std.powi(2) + variance(&preds)).max(0.0).sqrt();
        let bound = |v: f64| match self.metric {
            PerformanceMetric::Accuracy | PerformanceMetric::Reliability => v.clamp(0.0, 1.0),
            PerformanceMetric::ExecutionTime | PerformanceMetric::ResourceUsage => v.max(0.0),
        };
        MetricEstimate {
            mean: bound(raw),
            std_dev,
            lower: bound(raw - Z_95 * std_dev),
            upper: bound(raw + Z_95 * std_dev),
        }
    }
}

// ── Ensemble ────────────────────────────────────────────────────────

/// Output of [`ModelEnsemble::predict`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformancePrediction {
    pub predictions: BTreeMap<PerformanceMetric, f64>,
    pub confidence_intervals: BTreeMap<PerformanceMetric, (f64, f64)>,
    pub std_devs: BTreeMap<PerformanceMetric, f64>,
    /// Per-metric model confidence.
    pub model_confidence: BTreeMap<PerformanceMetric, f64>,
    /// Mean of `model_confidence`.
    pub confidence: f64,
    pub feature_schema_version: String,
}

impl PerformancePrediction {
    pub fn get(&self, metric: PerformanceMetric) -> f64 {
        self.predictions.get(&metric).copied().unwrap_or(0.0)
    }
}

/// Metadata reported by engine insights and saved next to artifacts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub trained_at: DateTime<Utc>,
    pub sample_count: usize,
    pub feature_schema_version: String,
    pub features: Vec<String>,
    pub accuracy_estimates: BTreeMap<PerformanceMetric, f64>,
}

/// One trained model per metric over a shared feature schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelEnsemble {
    pub schema: FeatureSchema,
    pub models: BTreeMap<PerformanceMetric, MetricModel>,
    pub trained_at: DateTime<Utc>,
    pub sample_count: usize,
}

impl ModelEnsemble {
    pub fn train(samples: &[PerformanceSample], config: &PredictionConfig) -> IntelResult<Self> {
        if samples.len() < 2 {
            return Err(IntelError::DataInsufficient {
                samples: samples.len(),
                minimum: 2,
            });
        }
        let schema = FeatureSchema::from_samples(samples);
        let rows: Vec<Vec<f64>> = samples
            .iter()
            .map(|s| schema.vectorize(&s.configuration, &s.context))
            .collect();

        let mut rng = StdRng::seed_from_u64(config.seed);
        let models = PerformanceMetric::all()
            .into_iter()
            .map(|metric| {
                let target: Vec<f64> = samples.iter().map(|s| metric.observe(s)).collect();
                (
                    metric,
                    MetricModel::train(metric, &schema, &rows, &target, config, &mut rng),
                )
            })
            .collect();

        Ok(Self {
            schema,
            models,
            trained_at: Utc::now(),
            sample_count: samples.len(),
        })
    }

    pub fn predict(
        &self,
        parameters: &Parameters,
        context: &BTreeMap<String, f64>,
    ) -> PerformancePrediction {
        let row = self.schema.vectorize(parameters, context);
        let mut prediction = PerformancePrediction {
            predictions: BTreeMap::new(),
            confidence_intervals: BTreeMap::new(),
            std_devs: BTreeMap::new(),
            model_confidence: BTreeMap::new(),
            confidence: 0.0,
            feature_schema_version: self.schema.version.clone(),
        };
        for (metric, model) in &self.models {
            let est = model.estimate(&row);
            prediction.predictions.insert(*metric, est.mean);
            prediction.confidence_intervals.insert(*metric, (est.lower, est.upper));
            prediction.std_devs.insert(*metric, est.std_dev);
            prediction.model_confidence.insert(*metric, model.accuracy_estimate);
        }
        let confs: Vec<f64> = prediction.model_confidence.values().copied().collect();
        prediction.confidence = mean(&confs);
        prediction
    }

    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            trained_at: self.trained_at,
            sample_count: self.sample_count,
            feature_schema_version: self.schema.version.clone(),
            features: self.schema.names.clone(),
            accuracy_estimates: self
                .models
                .iter()
                .map(|(m, model)| (*m, model.accuracy_estimate))
                .collect(),
        }
    }

    /// Whether every given parameter is a column of this ensemble.
    pub fn covers(&self, parameters: &Parameters) -> bool {
        parameters.keys().all(|k| self.schema.names.contains(k))
    }

    pub fn to_bytes(&self) -> IntelResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> IntelResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
