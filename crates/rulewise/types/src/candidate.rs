use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metrics::PerformanceMetric;
use crate::rule::Parameters;

/// Strategy that proposed a candidate configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStrategy {
    Gradient,
    Random,
    Bayesian,
    PatternBased,
}

impl GenerationStrategy {
    pub fn all() -> [GenerationStrategy; 4] {
        [
            GenerationStrategy::Gradient,
            GenerationStrategy::Random,
            GenerationStrategy::Bayesian,
            GenerationStrategy::PatternBased,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStrategy::Gradient => "gradient",
            GenerationStrategy::Random => "random",
            GenerationStrategy::Bayesian => "bayesian",
            GenerationStrategy::PatternBased => "pattern_based",
        }
    }
}

impl fmt::Display for GenerationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A proposed parameter set for one rule.
///
/// `predicted_metrics`, `improvement_score` and `confidence` are filled in by
/// the evaluator; strategies leave them empty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizationCandidate {
    pub candidate_id: Uuid,
    pub rule_id: String,
    pub parameters: Parameters,
    pub generation_strategy: GenerationStrategy,
    #[serde(default)]
    pub predicted_metrics: BTreeMap<PerformanceMetric, f64>,
    #[serde(default)]
    pub improvement_score: f64,
    #[serde(default)]
    pub confidence: f64,
}

impl OptimizationCandidate {
    pub fn new(
        rule_id: impl Into<String>,
        parameters: Parameters,
        generation_strategy: GenerationStrategy,
    ) -> Self {
        Self {
            candidate_id: Uuid::new_v4(),
            rule_id: rule_id.into(),
            parameters,
            generation_strategy,
            predicted_metrics: BTreeMap::new(),
            improvement_score: 0.0,
            confidence: 0.0,
        }
    }

    /// Canonical key of the parameter set, used to drop duplicates.
    ///
    /// Values are rounded to 1e-9 so float noise does not defeat dedup.
    pub fn parameter_key(&self) -> String {
        self.parameters
            .iter()
            .map(|(k, v)| format!("{}={:.9}", k, v))
            .collect::<Vec<_>>()
            .join(";")
    }
}
