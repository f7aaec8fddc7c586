//! Candidate generation strategies.
//!
//! Each strategy proposes raw parameter sets; the generator clamps, tags
//! and deduplicates them.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;

use rulewise_types::stats::{euclidean, pearson};
use rulewise_types::{
    GenerationStrategy, ImprovementWeights, OptimizationConfig, ParameterRange, Parameters,
    Pattern, PatternType, PerformanceSample,
};

use crate::evaluator::observed_score;

/// Correlations weaker than this give no gradient direction.
const MIN_CORRELATION: f64 = 0.05;

const GRADIENT_MULTIPLIERS: [f64; 3] = [0.5, 1.0, 2.0];

/// Fraction of the range a pattern nudge moves a parameter.
const PATTERN_NUDGE: f64 = 0.1;

/// Predicts the improvement score of a parameter set with its uncertainty.
pub trait Surrogate: Send + Sync {
    /// `(mean, std)` of the predicted score, or `None` if the set cannot be scored.
    fn score(&self, parameters: &Parameters) -> Option<(f64, f64)>;
}

/// Everything a strategy may look at.
pub struct GenerationRequest<'a> {
    pub rule_id: &'a str,
    pub current: &'a Parameters,
    pub ranges: &'a BTreeMap<String, ParameterRange>,
    pub history: &'a [PerformanceSample],
    pub weights: ImprovementWeights,
    pub patterns: &'a [Pattern],
    pub surrogate: Option<&'a dyn Surrogate>,
}

pub trait CandidateStrategy: Send + Sync {
    fn kind(&self) -> GenerationStrategy;

    fn propose(
        &self,
        request: &GenerationRequest<'_>,
        config: &OptimizationConfig,
    ) -> Vec<Parameters>;
}

/// Deterministic RNG per (seed, rule, strategy).
fn rng_for(config: &OptimizationConfig, rule_id: &str, kind: GenerationStrategy) -> StdRng {
    let mut hasher = blake3::Hasher::new();
    hasher.update(rule_id.as_bytes());
    hasher.update(b"|");
    hasher.update(kind.as_str().as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    StdRng::seed_from_u64(config.seed ^ u64::from_le_bytes(bytes))
}

fn uniform_draw(ranges: &BTreeMap<String, ParameterRange>, rng: &mut StdRng) -> Parameters {
    ranges
        .iter()
        .map(|(name, range)| (name.clone(), range.lerp(rng.gen::<f64>())))
        .collect()
}

// ── Gradient ────────────────────────────────────────────────────────

/// Steps along the sign of each parameter's correlation with the score.
#[derive(Debug, Default)]
pub struct GradientStrategy;

impl CandidateStrategy for GradientStrategy {
    fn kind(&self) -> GenerationStrategy {
        GenerationStrategy::Gradient
    }

    fn propose(&self, request: &GenerationRequest<'_>, config: &OptimizationConfig) -> Vec<Parameters> {
        if request.history.len() < 3 {
            return Vec::new();
        }
        let scores: Vec<f64> = request
            .history
            .iter()
            .map(|s| observed_score(s, &request.weights))
            .collect();

        let mut directions: BTreeMap<&str, f64> = BTreeMap::new();
        for (name, range) in request.ranges {
            let Some(&current) = request.current.get(name) else {
                continue;
            };
            if range.width() <= 0.0 {
                continue;
            }
            let values: Vec<f64> = request
                .history
                .iter()
                .map(|s| s.configuration.get(name).copied().unwrap_or(current))
                .collect();
            let r = pearson(&values, &scores);
            if r.abs() >= MIN_CORRELATION {
                directions.insert(name.as_str(), r.signum());
            }
        }
        if directions.is_empty() {
            return Vec::new();
        }

        let step = |params: &mut Parameters, name: &str, direction: f64, multiplier: f64| {
            if let (Some(range), Some(value)) = (request.ranges.get(name), params.get_mut(name)) {
                *value = range.clamp(*value + direction * config.gradient_step * multiplier * range.width());
            }
        };

        let mut proposals = Vec::new();
        for multiplier in GRADIENT_MULTIPLIERS {
            let mut params = request.current.clone();
            for (name, direction) in &directions {
                step(&mut params, name, *direction, multiplier);
            }
            proposals.push(params);
        }
        if directions.len() > 1 {
            for (name, direction) in &directions {
                let mut params = request.current.clone();
                step(&mut params, name, *direction, 1.0);
                proposals.push(params);
            }
        }
        proposals
    }
}

// ── Random ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct RandomStrategy;

impl CandidateStrategy for RandomStrategy {
    fn kind(&self) -> GenerationStrategy {
        GenerationStrategy::Random
    }

    fn propose(&self, request: &GenerationRequest<'_>, config: &OptimizationConfig) -> Vec<Parameters> {
        let mut rng = rng_for(config, request.rule_id, self.kind());
        (0..config.random_candidates)
            .map(|_| uniform_draw(request.ranges, &mut rng))
            .collect()
    }
}

// ── Bayesian ────────────────────────────────────────────────────────

/// Upper-confidence-bound selection over a random proposal pool.
#[derive(Debug, Default)]
pub struct BayesianStrategy;

impl BayesianStrategy {
    /// Distance to the nearest explored configuration, in range-normalized units.
    fn novelty(request: &GenerationRequest<'_>, params: &Parameters) -> f64 {
        let normalize = |p: &Parameters| -> Vec<f64> {
            request
                .ranges
                .iter()
                .map(|(name, range)| {
                    let v = p.get(name).copied().unwrap_or(range.min);
                    if range.width() > 0.0 {
                        (v - range.min) / range.width()
                    } else {
                        0.0
                    }
                })
                .collect()
        };
        let candidate = normalize(params);
        request
            .history
            .iter()
            .map(|s| euclidean(&candidate, &normalize(&s.configuration)))
            .fold(f64::INFINITY, f64::min)
            .min(1.0e6)
    }
}

impl CandidateStrategy for BayesianStrategy {
    fn kind(&self) -> GenerationStrategy {
        GenerationStrategy::Bayesian
    }

    fn propose(&self, request: &GenerationRequest<'_>, config: &OptimizationConfig) -> Vec<Parameters> {
        let mut rng = rng_for(config, request.rule_id, self.kind());
        let mut pool: Vec<(f64, Parameters)> = (0..config.bayesian_pool_size)
            .map(|_| {
                let params = uniform_draw(request.ranges, &mut rng);
                let acquisition = match request.surrogate.and_then(|s| s.score(&params)) {
                    Some((mean, std)) => mean + config.bayesian_kappa * std,
                    None => config.bayesian_kappa * Self::novelty(request, &params),
                };
                (acquisition, params)
            })
            .collect();
        pool.sort_by(|a, b| b.0.total_cmp(&a.0));
        pool.into_iter()
            .take(config.bayesian_candidates)
            .map(|(_, params)| params)
            .collect()
    }
}

// ── Pattern-informed ────────────────────────────────────────────────

/// Nudges parameters whose names match what a known pattern says about the rule.
#[derive(Debug, Default)]
pub struct PatternInformedStrategy;

fn name_has(name: &str, needles: &[&str]) -> bool {
    let lower = name.to_ascii_lowercase();
    needles.iter().any(|n| lower.contains(n))
}

fn profile_max(pattern: &Pattern, field: &str) -> Option<f64> {
    pattern
        .characteristics
        .get("profile")?
        .get(field)?
        .get("max")?
        .as_f64()
}

impl PatternInformedStrategy {
    fn nudge(pattern: &Pattern, name: &str, value: f64, range: &ParameterRange) -> Option<f64> {
        let step = PATTERN_NUDGE * range.width();
        match pattern.pattern_type {
            PatternType::Anomaly if name_has(name, &["threshold", "tolerance"]) => Some(value - step),
            PatternType::Temporal if name_has(name, &["window", "interval", "period"]) => pattern
                .characteristics
                .get("period_secs")
                .and_then(Value::as_f64),
            PatternType::Structural if name_has(name, &["depth"]) => profile_max(pattern, "depth"),
            PatternType::Structural if name_has(name, &["size", "limit"]) => {
                profile_max(pattern, "size")
            }
            PatternType::Behavioral | PatternType::Semantic if name_has(name, &["sensitivity"]) => {
                Some(value + step)
            }
            _ => None,
        }
    }
}

impl CandidateStrategy for PatternInformedStrategy {
    fn kind(&self) -> GenerationStrategy {
        GenerationStrategy::PatternBased
    }

    fn propose(&self, request: &GenerationRequest<'_>, _config: &OptimizationConfig) -> Vec<Parameters> {
        request
            .patterns
            .iter()
            .filter_map(|pattern| {
                let mut params = request.current.clone();
                let mut changed = false;
                for (name, range) in request.ranges {
                    let Some(value) = params.get_mut(name) else {
                        continue;
                    };
                    if let Some(next) = Self::nudge(pattern, name, *value, range) {
                        let next = range.clamp(next);
                        if (next - *value).abs() > f64::EPSILON {
                            *value = next;
                            changed = true;
                        }
                    }
                }
                changed.then_some(params)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ranges() -> BTreeMap<String, ParameterRange> {
        let mut r = BTreeMap::new();
        r.insert("threshold".to_string(), ParameterRange::new(0.0, 1.0));
        r.insert("window_secs".to_string(), ParameterRange::new(60.0, 7200.0));
        r
    }

    fn current() -> Parameters {
        let mut p = Parameters::new();
        p.insert("threshold".into(), 0.5);
        p.insert("window_secs".into(), 600.0);
        p
    }

    /// Accuracy rises with threshold; window is noise.
    fn history() -> Vec<PerformanceSample> {
        (0..40)
            .map(|i| {
                let mut p = current();
                let t = 0.3 + (i % 5) as f64 * 0.1;
                p.insert("threshold".into(), t);
                p.insert("window_secs".into(), 600.0);
                PerformanceSample::new(p).with_metrics(1.0, 1.0, t)
            })
            .collect()
    }

    fn request<'a>(
        current: &'a Parameters,
        ranges: &'a BTreeMap<String, ParameterRange>,
        history: &'a [PerformanceSample],
        patterns: &'a [Pattern],
    ) -> GenerationRequest<'a> {
        GenerationRequest {
            rule_id: "r1",
            current,
            ranges,
            history,
            weights: ImprovementWeights::default(),
            patterns,
            surrogate: None,
        }
    }

    #[test]
    fn gradient_follows_correlation() {
        let (c, r, h) = (current(), ranges(), history());
        let proposals = GradientStrategy.propose(&request(&c, &r, &h, &[]), &OptimizationConfig::default());
        let thresholds: Vec<f64> = proposals.iter().map(|p| p["threshold"]).collect();
        assert_eq!(thresholds.len(), 3);
        assert!((thresholds[0] - 0.6).abs() < 1e-9);
        assert!((thresholds[1] - 0.7).abs() < 1e-9);
        assert!((thresholds[2] - 0.9).abs() < 1e-9);
        // Constant column carries no direction.
        assert!(proposals.iter().all(|p| p["window_secs"] == 600.0));
    }

    #[test]
    fn random_is_seeded_and_in_range() {
        let (c, r, h) = (current(), ranges(), history());
        let config = OptimizationConfig::default();
        let a = RandomStrategy.propose(&request(&c, &r, &h, &[]), &config);
        let b = RandomStrategy.propose(&request(&c, &r, &h, &[]), &config);
        assert_eq!(a, b);
        assert_eq!(a.len(), config.random_candidates);
        assert!(a.iter().all(|p| r.iter().all(|(k, range)| range.contains(p[k]))));
    }

    struct PreferHigh;

    impl Surrogate for PreferHigh {
        fn score(&self, parameters: &Parameters) -> Option<(f64, f64)> {
            Some((parameters["threshold"], 0.0))
        }
    }

    #[test]
    fn bayesian_keeps_best_acquisition() {
        let (c, r, h) = (current(), ranges(), history());
        let config = OptimizationConfig::default();
        let mut req = request(&c, &r, &h, &[]);
        req.surrogate = Some(&PreferHigh);
        let proposals = BayesianStrategy.propose(&req, &config);
        assert_eq!(proposals.len(), config.bayesian_candidates);
        for pair in proposals.windows(2) {
            assert!(pair[0]["threshold"] >= pair[1]["threshold"]);
        }

        req.surrogate = None;
        let exploratory = BayesianStrategy.propose(&req, &config);
        assert_eq!(exploratory.len(), config.bayesian_candidates);
    }

    #[test]
    fn patterns_nudge_matching_parameters() {
        let (c, r, h) = (current(), ranges(), history());
        let patterns = vec![
            Pattern::new(PatternType::Anomaly, "outlier_group", "a", 0.9),
            Pattern::new(PatternType::Temporal, "periodic", "p", 0.9)
                .with_characteristic("period_secs", 3600.0),
            Pattern::new(PatternType::Structural, "cluster", "c", 0.9)
                .with_characteristic("profile", json!({"size": {"max": 4.0}})),
        ];
        let proposals = PatternInformedStrategy
            .propose(&request(&c, &r, &h, &patterns), &OptimizationConfig::default());
        assert_eq!(proposals.len(), 2);
        assert!((proposals[0]["threshold"] - 0.4).abs() < 1e-9);
        assert_eq!(proposals[1]["window_secs"], 3600.0);
    }
}
