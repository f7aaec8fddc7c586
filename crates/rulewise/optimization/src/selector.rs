use rulewise_types::{Constraints, OptimizationCandidate, PerformanceMetric};

/// Reasons a candidate breaks the hard constraints, empty when it satisfies them.
pub fn constraint_violations(
    candidate: &OptimizationCandidate,
    constraints: &Constraints,
) -> Vec<String> {
    let predicted = |m: PerformanceMetric| candidate.predicted_metrics.get(&m).copied();
    let mut violations = Vec::new();

    for (name, range) in &constraints.parameter_ranges {
        if let Some(value) = candidate.parameters.get(name) {
            if !range.contains(*value) {
                violations.push(format!(
                    "{}={} outside [{}, {}]",
                    name, value, range.min, range.max
                ));
            }
        }
    }
    let ceilings = [
        (PerformanceMetric::ExecutionTime, constraints.max_execution_time),
        (PerformanceMetric::ResourceUsage, constraints.max_resource_usage),
    ];
    for (metric, ceiling) in ceilings {
        if let (Some(limit), Some(value)) = (ceiling, predicted(metric)) {
            if value > limit {
                violations.push(format!("{} {:.4} > {}", metric, value, limit));
            }
        }
    }
    let floors = [
        (PerformanceMetric::Accuracy, constraints.min_accuracy),
        (PerformanceMetric::Reliability, constraints.min_reliability),
    ];
    for (metric, floor) in floors {
        if let (Some(limit), Some(value)) = (floor, predicted(metric)) {
            if value < limit {
                violations.push(format!("{} {:.4} < {}", metric, value, limit));
            }
        }
    }
    violations
}

/// Picks the best-ranked candidate that satisfies the hard constraints.
#[derive(Clone, Debug, Default)]
pub struct CandidateSelector;

impl CandidateSelector {
    /// `ranked` must already be sorted best first.
    pub fn select<'a>(
        &self,
        ranked: &'a [OptimizationCandidate],
        constraints: &Constraints,
    ) -> Option<&'a OptimizationCandidate> {
        ranked
            .iter()
            .find(|c| constraint_violations(c, constraints).is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rulewise_types::{GenerationStrategy, Parameters};

    fn candidate(score: f64, time: f64, batch: f64) -> OptimizationCandidate {
        let mut p = Parameters::new();
        p.insert("batch_size".into(), batch);
        let mut c = OptimizationCandidate::new("r", p, GenerationStrategy::Random);
        c.improvement_score = score;
        c.predicted_metrics.insert(PerformanceMetric::ExecutionTime, time);
        c.predicted_metrics.insert(PerformanceMetric::Accuracy, 0.9);
        c
    }

    #[test]
    fn skips_candidates_breaking_constraints() {
        let ranked = vec![
            candidate(0.9, 5.0, 100.0),
            candidate(0.8, 1.0, 900.0),
            candidate(0.7, 1.0, 100.0),
        ];
        let constraints = Constraints::default()
            .with_max_execution_time(2.0)
            .with_range("batch_size", 10.0, 500.0);
        let chosen = CandidateSelector.select(&ranked, &constraints).unwrap();
        assert_eq!(chosen.improvement_score, 0.7);
    }

    #[test]
    fn none_when_everything_is_filtered() {
        let ranked = vec![candidate(0.9, 1.0, 100.0)];
        let constraints = Constraints::default().with_min_accuracy(0.95);
        assert!(CandidateSelector.select(&ranked, &constraints).is_none());
        assert_eq!(constraint_violations(&ranked[0], &constraints).len(), 1);
    }
}
