//! Candidate scoring against the performance models.

use std::collections::BTreeMap;

use tracing::debug;

use rulewise_prediction::{ModelEnsemble, PerformancePrediction};
use rulewise_types::stats::mean;
use rulewise_types::{
    ImprovementWeights, OptimizationCandidate, Parameters, PerformanceMetric, PerformanceSample,
    TargetMetric,
};

use crate::strategies::Surrogate;

/// Key of the aggregate delta in `predicted_improvements`.
pub const OVERALL_SCORE: &str = "overall_score";

/// Lower-is-better metrics are mapped through `1 / (1 + x)`.
fn inverse(value: f64) -> f64 {
    (1.0 / (1.0 + value.max(0.0))).clamp(0.0, 1.0)
}

pub fn weighted_score(
    weights: &ImprovementWeights,
    execution_time: f64,
    accuracy: f64,
    resource_usage: f64,
    reliability: f64,
) -> f64 {
    weights.execution_time * inverse(execution_time)
        + weights.accuracy * accuracy
        + weights.resource_usage * inverse(resource_usage)
        + weights.reliability * reliability
}

pub fn observed_score(sample: &PerformanceSample, weights: &ImprovementWeights) -> f64 {
    weighted_score(
        weights,
        sample.execution_time,
        sample.accuracy,
        sample.resource_usage,
        if sample.success { 1.0 } else { 0.0 },
    )
}

pub fn predicted_score(prediction: &PerformancePrediction, weights: &ImprovementWeights) -> f64 {
    weighted_score(
        weights,
        prediction.get(PerformanceMetric::ExecutionTime),
        prediction.get(PerformanceMetric::Accuracy),
        prediction.get(PerformanceMetric::ResourceUsage),
        prediction.get(PerformanceMetric::Reliability),
    )
}

/// Weights for an optimization target.
pub fn weights_for(configured: &ImprovementWeights, target: TargetMetric) -> ImprovementWeights {
    match target.metric() {
        Some(metric) => configured.focused_on(metric),
        None => *configured,
    }
}

/// Mean of every context key across the history.
pub fn mean_context(history: &[PerformanceSample]) -> BTreeMap<String, f64> {
    let mut columns: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for sample in history {
        for (k, v) in &sample.context {
            columns.entry(k.clone()).or_default().push(*v);
        }
    }
    columns.into_iter().map(|(k, v)| (k, mean(&v))).collect()
}

// ── Surrogate ───────────────────────────────────────────────────────

/// Scores parameter sets with a trained ensemble.
pub struct EnsembleSurrogate<'a> {
    ensemble: &'a ModelEnsemble,
    weights: ImprovementWeights,
    context: BTreeMap<String, f64>,
}

impl<'a> EnsembleSurrogate<'a> {
    pub fn new(
        ensemble: &'a ModelEnsemble,
        weights: ImprovementWeights,
        context: BTreeMap<String, f64>,
    ) -> Self {
        Self {
            ensemble,
            weights,
            context,
        }
    }
}

impl Surrogate for EnsembleSurrogate<'_> {
    fn score(&self, parameters: &Parameters) -> Option<(f64, f64)> {
        let prediction = self.ensemble.predict(parameters, &self.context);
        let mean = predicted_score(&prediction, &self.weights);
        // First-order propagation of each metric's spread into the score.
        let variance: f64 = PerformanceMetric::all()
            .into_iter()
            .map(|metric| {
                let std = prediction.std_devs.get(&metric).copied().unwrap_or(0.0);
                let slope = match metric {
                    PerformanceMetric::ExecutionTime | PerformanceMetric::ResourceUsage => {
                        inverse(prediction.get(metric)).powi(2)
                    }
                    PerformanceMetric::Accuracy | PerformanceMetric::Reliability => 1.0,
                };
                (self.weights.weight(metric) * slope * std).powi(2)
            })
            .sum();
        Some((mean, variance.sqrt()))
    }
}

// ── Evaluator ───────────────────────────────────────────────────────

/// Predicted state of the current configuration.
#[derive(Clone, Debug)]
pub struct Baseline {
    pub prediction: PerformancePrediction,
    pub score: f64,
}

#[derive(Clone, Debug)]
pub struct CandidateEvaluator {
    weights: ImprovementWeights,
}

impl CandidateEvaluator {
    pub fn new(weights: ImprovementWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &ImprovementWeights {
        &self.weights
    }

    pub fn baseline(
        &self,
        parameters: &Parameters,
        ensemble: &ModelEnsemble,
        context: &BTreeMap<String, f64>,
    ) -> Baseline {
        let prediction = ensemble.predict(parameters, context);
        let score = predicted_score(&prediction, &self.weights);
        Baseline { prediction, score }
    }

    /// Fill in predictions and scores; the result is sorted best first.
    pub fn evaluate(
        &self,
        candidates: Vec<OptimizationCandidate>,
        ensemble: &ModelEnsemble,
        context: &BTreeMap<String, f64>,
    ) -> Vec<OptimizationCandidate> {
        let mut evaluated: Vec<OptimizationCandidate> = candidates
            .into_iter()
            .map(|mut candidate| {
                let prediction = ensemble.predict(&candidate.parameters, context);
                candidate.improvement_score = predicted_score(&prediction, &self.weights);
                candidate.confidence = prediction.confidence;
                candidate.predicted_metrics = prediction.predictions;
                candidate
            })
            .collect();
        evaluated.sort_by(|a, b| {
            b.improvement_score
                .total_cmp(&a.improvement_score)
                .then_with(|| a.parameter_key().cmp(&b.parameter_key()))
        });
        debug!(candidates = evaluated.len(), "Candidates evaluated");
        evaluated
    }

    /// Per-metric deltas versus the baseline, plus `overall_score`.
    pub fn improvements(
        &self,
        baseline: &Baseline,
        candidate: &OptimizationCandidate,
    ) -> BTreeMap<String, f64> {
        let mut deltas: BTreeMap<String, f64> = PerformanceMetric::all()
            .into_iter()
            .map(|metric| {
                let after = candidate.predicted_metrics.get(&metric).copied().unwrap_or(0.0);
                let before = baseline.prediction.get(metric);
                (metric.as_str().to_string(), after - before)
            })
            .collect();
        deltas.insert(
            OVERALL_SCORE.to_string(),
            candidate.improvement_score - baseline.score,
        );
        deltas
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rulewise_types::{GenerationStrategy, PredictionConfig};

    fn history() -> Vec<PerformanceSample> {
        (0..60)
            .map(|i| {
                let mut p = Parameters::new();
                let threshold = 0.3 + (i % 5) as f64 * 0.1;
                p.insert("threshold".into(), threshold);
                PerformanceSample::new(p)
                    .with_metrics(1.0, 0.5, 0.5 + threshold * 0.5)
                    .with_context("load", 2.0)
            })
            .collect()
    }

    fn candidate(threshold: f64) -> OptimizationCandidate {
        let mut p = Parameters::new();
        p.insert("threshold".into(), threshold);
        OptimizationCandidate::new("r", p, GenerationStrategy::Random)
    }

    #[test]
    fn score_matches_formula() {
        let w = ImprovementWeights::default();
        let s = weighted_score(&w, 1.0, 0.8, 0.0, 1.0);
        assert!((s - (0.3 * 0.5 + 0.4 * 0.8 + 0.2 * 1.0 + 0.1)).abs() < 1e-12);
    }

    #[test]
    fn single_target_reshapes_weights() {
        let w = weights_for(&ImprovementWeights::default(), TargetMetric::Accuracy);
        assert!((w.accuracy - 0.7).abs() < 1e-12);
        let overall = weights_for(&ImprovementWeights::default(), TargetMetric::OverallPerformance);
        assert_eq!(overall, ImprovementWeights::default());
    }

    #[test]
    fn evaluation_is_sorted_and_reports_deltas() {
        let ensemble = ModelEnsemble::train(&history(), &PredictionConfig::default()).unwrap();
        let evaluator = CandidateEvaluator::new(ImprovementWeights::default());
        let context = mean_context(&history());
        assert_eq!(context["load"], 2.0);

        let ranked = evaluator.evaluate(
            vec![candidate(0.4), candidate(0.7), candidate(0.5)],
            &ensemble,
            &context,
        );
        for pair in ranked.windows(2) {
            assert!(pair[0].improvement_score >= pair[1].improvement_score);
        }
        assert_eq!(ranked[0].parameters["threshold"], 0.7);

        let mut current = Parameters::new();
        current.insert("threshold".into(), 0.4);
        let baseline = evaluator.baseline(&current, &ensemble, &context);
        let deltas = evaluator.improvements(&baseline, &ranked[0]);
        assert!(deltas["accuracy"] > 0.1);
        assert!(deltas[OVERALL_SCORE] > 0.04);
    }

    #[test]
    fn surrogate_reports_spread() {
        let ensemble = ModelEnsemble::train(&history(), &PredictionConfig::default()).unwrap();
        let surrogate =
            EnsembleSurrogate::new(&ensemble, ImprovementWeights::default(), BTreeMap::new());
        let (mean, std) = surrogate.score(&candidate(0.6).parameters).unwrap();
        assert!(mean > 0.0 && std >= 0.0);
    }
}
