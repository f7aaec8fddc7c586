use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use rulewise_types::{
    Constraints, GenerationStrategy, OptimizationCandidate, OptimizationConfig, ParameterRange,
    Parameters, PerformanceSample,
};

use crate::strategies::{
    BayesianStrategy, CandidateStrategy, GenerationRequest, GradientStrategy,
    PatternInformedStrategy, RandomStrategy,
};

/// Half-width of an inferred range, relative to the current value.
const INFERRED_SPREAD: f64 = 0.5;

/// Runs every registered strategy and merges their proposals.
#[derive(Clone)]
pub struct CandidateGenerator {
    config: OptimizationConfig,
    strategies: BTreeMap<GenerationStrategy, Arc<dyn CandidateStrategy>>,
}

impl std::fmt::Debug for CandidateGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandidateGenerator")
            .field("strategies", &self.strategies.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CandidateGenerator {
    pub fn new(config: OptimizationConfig) -> Self {
        let mut generator = Self {
            config,
            strategies: BTreeMap::new(),
        };
        generator.register(Arc::new(GradientStrategy));
        generator.register(Arc::new(RandomStrategy));
        generator.register(Arc::new(BayesianStrategy));
        generator.register(Arc::new(PatternInformedStrategy));
        generator
    }

    pub fn register(&mut self, strategy: Arc<dyn CandidateStrategy>) {
        self.strategies.insert(strategy.kind(), strategy);
    }

    pub fn strategies(&self) -> Vec<GenerationStrategy> {
        self.strategies.keys().copied().collect()
    }

    /// Allowed range per current parameter.
    ///
    /// Explicit constraint ranges win. Otherwise the range spans the observed
    /// history and the current value ±50%.
    pub fn resolve_ranges(
        current: &Parameters,
        constraints: &Constraints,
        history: &[PerformanceSample],
    ) -> BTreeMap<String, ParameterRange> {
        current
            .iter()
            .map(|(name, &value)| {
                if let Some(range) = constraints.parameter_ranges.get(name) {
                    return (name.clone(), *range);
                }
                let half = if value.abs() > f64::EPSILON {
                    value.abs() * INFERRED_SPREAD
                } else {
                    INFERRED_SPREAD
                };
                let (lo, hi) = history
                    .iter()
                    .filter_map(|s| s.configuration.get(name).copied())
                    .filter(|v| v.is_finite())
                    .fold((value - half, value + half), |(lo, hi), v| (lo.min(v), hi.max(v)));
                (name.clone(), ParameterRange::new(lo, hi))
            })
            .collect()
    }

    /// Candidates from every strategy, clamped to range and deduplicated.
    ///
    /// Proposals equal to the current configuration are dropped.
    pub fn generate(&self, request: &GenerationRequest<'_>) -> Vec<OptimizationCandidate> {
        let current_key = OptimizationCandidate::new(
            request.rule_id,
            request.current.clone(),
            GenerationStrategy::Random,
        )
        .parameter_key();
        let mut seen: HashSet<String> = HashSet::from([current_key]);
        let mut candidates = Vec::new();

        for (kind, strategy) in &self.strategies {
            let proposals = strategy.propose(request, &self.config);
            let mut kept = 0usize;
            for proposal in proposals {
                let parameters: Parameters = request
                    .current
                    .iter()
                    .map(|(name, current)| {
                        let value = proposal.get(name).copied().unwrap_or(*current);
                        let value = match request.ranges.get(name) {
                            Some(range) => range.clamp(value),
                            None => value,
                        };
                        (name.clone(), value)
                    })
                    .collect();
                let candidate = OptimizationCandidate::new(request.rule_id, parameters, *kind);
                if seen.insert(candidate.parameter_key()) {
                    candidates.push(candidate);
                    kept += 1;
                }
            }
            debug!(strategy = %kind, kept, "Strategy proposals merged");
        }
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rulewise_types::{ImprovementWeights, Pattern};

    fn current() -> Parameters {
        let mut p = Parameters::new();
        p.insert("threshold".into(), 0.5);
        p.insert("batch_size".into(), 100.0);
        p
    }

    fn history() -> Vec<PerformanceSample> {
        (0..30)
            .map(|i| {
                let mut p = current();
                let t = 0.2 + (i % 4) as f64 * 0.1;
                p.insert("threshold".into(), t);
                PerformanceSample::new(p).with_metrics(1.0, 1.0, t)
            })
            .collect()
    }

    #[test]
    fn ranges_prefer_constraints_then_history() {
        let constraints = Constraints::default().with_range("batch_size", 10.0, 500.0);
        let ranges = CandidateGenerator::resolve_ranges(&current(), &constraints, &history());
        assert_eq!(ranges["batch_size"], ParameterRange::new(10.0, 500.0));
        // history reaches 0.2, current ±50% reaches 0.75
        assert!((ranges["threshold"].min - 0.2).abs() < 1e-9);
        assert!((ranges["threshold"].max - 0.75).abs() < 1e-9);
    }

    #[test]
    fn zero_valued_parameters_get_unit_spread() {
        let mut p = Parameters::new();
        p.insert("offset".into(), 0.0);
        let ranges = CandidateGenerator::resolve_ranges(&p, &Constraints::default(), &[]);
        assert_eq!(ranges["offset"], ParameterRange::new(-0.5, 0.5));
    }

    #[test]
    fn candidates_are_unique_clamped_and_tagged() {
        let generator = CandidateGenerator::new(OptimizationConfig::default());
        assert_eq!(generator.strategies().len(), 4);

        let (current, history) = (current(), history());
        let ranges = CandidateGenerator::resolve_ranges(&current, &Constraints::default(), &history);
        let patterns: Vec<Pattern> = Vec::new();
        let request = GenerationRequest {
            rule_id: "r1",
            current: &current,
            ranges: &ranges,
            history: &history,
            weights: ImprovementWeights::default(),
            patterns: &patterns,
            surrogate: None,
        };
        let candidates = generator.generate(&request);
        assert!(!candidates.is_empty());

        let keys: HashSet<String> = candidates.iter().map(|c| c.parameter_key()).collect();
        assert_eq!(keys.len(), candidates.len());
        for c in &candidates {
            assert_eq!(c.rule_id, "r1");
            assert_ne!(c.parameters, current);
            for (name, value) in &c.parameters {
                assert!(ranges[name].contains(*value));
            }
        }
        assert!(candidates
            .iter()
            .any(|c| c.generation_strategy == GenerationStrategy::Gradient));
        assert!(candidates
            .iter()
            .any(|c| c.generation_strategy == GenerationStrategy::Bayesian));
    }

    proptest::proptest! {
        #[test]
        fn proposals_never_leave_their_ranges(
            threshold in 0.05f64..0.95,
            batch in 1.0f64..1000.0,
            seed in 0u64..1000,
        ) {
            let config = OptimizationConfig {
                seed,
                ..OptimizationConfig::default()
            };
            let generator = CandidateGenerator::new(config);
            let mut current = Parameters::new();
            current.insert("threshold".into(), threshold);
            current.insert("batch_size".into(), batch);
            let ranges =
                CandidateGenerator::resolve_ranges(&current, &Constraints::default(), &history());
            let request = GenerationRequest {
                rule_id: "r",
                current: &current,
                ranges: &ranges,
                history: &history(),
                weights: ImprovementWeights::default(),
                patterns: &[],
                surrogate: None,
            };
            for candidate in generator.generate(&request) {
                proptest::prop_assert_eq!(candidate.parameters.len(), current.len());
                for (name, value) in &candidate.parameters {
                    proptest::prop_assert!(ranges[name].contains(*value));
                }
            }
        }
    }
}
