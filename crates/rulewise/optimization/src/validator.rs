use std::collections::BTreeMap;

use rulewise_types::{
    OptimizationCandidate, OptimizationConfig, ParameterRange, Parameters, ValidationCheck,
    ValidationResult,
};

/// Last gate before a candidate reaches the rule store.
#[derive(Clone, Debug)]
pub struct OptimizationValidator {
    improvement_threshold: f64,
    max_relative_change: f64,
}

fn check(name: &str, failures: Vec<String>) -> ValidationCheck {
    ValidationCheck {
        name: name.to_string(),
        passed: failures.is_empty(),
        detail: (!failures.is_empty()).then(|| failures.join(", ")),
    }
}

/// Denominator of the relative-change check: the larger of the baseline
/// magnitude and the range width, so zero baselines stay measurable.
fn change_scale(old: f64, range: Option<&ParameterRange>) -> f64 {
    let scale = range.map_or(0.0, ParameterRange::width).max(old.abs());
    if scale > 1e-9 {
        scale
    } else {
        1.0
    }
}

impl OptimizationValidator {
    pub fn new(config: &OptimizationConfig) -> Self {
        Self {
            improvement_threshold: config.improvement_threshold,
            max_relative_change: config.max_relative_change,
        }
    }

    pub fn validate(
        &self,
        candidate: &OptimizationCandidate,
        baseline: &Parameters,
        ranges: &BTreeMap<String, ParameterRange>,
        baseline_score: f64,
    ) -> ValidationResult {
        let params = &candidate.parameters;

        let non_finite = params
            .iter()
            .filter(|(_, v)| !v.is_finite())
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let out_of_range = params
            .iter()
            .filter_map(|(k, v)| {
                let range = ranges.get(k)?;
                (!range.contains(*v)).then(|| format!("{}={} not in [{}, {}]", k, v, range.min, range.max))
            })
            .collect();

        let unknown = params
            .keys()
            .filter(|k| !baseline.contains_key(*k))
            .cloned()
            .collect();

        let too_far = params
            .iter()
            .filter_map(|(k, v)| {
                let old = baseline.get(k)?;
                let relative = (v - old).abs() / change_scale(*old, ranges.get(k));
                (relative > self.max_relative_change)
                    .then(|| format!("{} changes by {:.1}%", k, relative * 100.0))
            })
            .collect();

        let predicted_improvement = candidate.improvement_score - baseline_score;
        let weak = if predicted_improvement.is_finite()
            && predicted_improvement >= self.improvement_threshold
        {
            Vec::new()
        } else {
            vec![format!(
                "predicted improvement {:.4} < {}",
                predicted_improvement, self.improvement_threshold
            )]
        };

        let checks = vec![
            check("finite_values", non_finite),
            check("within_range", out_of_range),
            check("known_parameters", unknown),
            check("relative_change", too_far),
            check("improvement_threshold", weak),
        ];
        ValidationResult {
            approved: checks.iter().all(|c| c.passed),
            checks,
            predicted_improvement,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rulewise_types::GenerationStrategy;

    fn baseline() -> Parameters {
        let mut p = Parameters::new();
        p.insert("threshold".into(), 0.5);
        p
    }

    fn ranges() -> BTreeMap<String, ParameterRange> {
        let mut r = BTreeMap::new();
        r.insert("threshold".to_string(), ParameterRange::new(0.0, 1.0));
        r
    }

    fn candidate(params: Parameters, score: f64) -> OptimizationCandidate {
        let mut c = OptimizationCandidate::new("r", params, GenerationStrategy::Gradient);
        c.improvement_score = score;
        c
    }

    #[test]
    fn approves_sound_candidate() {
        let mut p = baseline();
        p.insert("threshold".into(), 0.7);
        let validator = OptimizationValidator::new(&OptimizationConfig::default());
        let result = validator.validate(&candidate(p, 0.80), &baseline(), &ranges(), 0.70);
        assert!(result.approved, "{:?}", result.failure_summary());
        assert!((result.predicted_improvement - 0.10).abs() < 1e-12);
    }

    #[test]
    fn rejects_small_improvement() {
        let mut p = baseline();
        p.insert("threshold".into(), 0.55);
        let validator = OptimizationValidator::new(&OptimizationConfig::default());
        let result = validator.validate(&candidate(p, 0.72), &baseline(), &ranges(), 0.70);
        assert!(!result.approved);
        assert!(result.failure_summary().unwrap().starts_with("improvement_threshold"));
    }

    #[test]
    fn zero_baseline_is_measured_against_its_range() {
        let mut base = baseline();
        base.insert("offset".into(), 0.0);
        let mut r = ranges();
        r.insert("offset".to_string(), ParameterRange::new(-0.1, 0.1));

        let mut p = base.clone();
        p.insert("offset".into(), 0.01);
        let validator = OptimizationValidator::new(&OptimizationConfig::default());
        let result = validator.validate(&candidate(p, 0.9), &base, &r, 0.5);
        assert!(result.approved, "{:?}", result.failure_summary());

        assert_eq!(change_scale(0.0, None), 1.0);
        assert_eq!(change_scale(0.0, Some(&ParameterRange::new(-0.1, 0.1))), 0.2);
        assert_eq!(change_scale(4.0, Some(&ParameterRange::new(3.0, 5.0))), 4.0);
    }

    #[test]
    fn flags_every_structural_problem() {
        let mut p = Parameters::new();
        p.insert("threshold".into(), 1.6);
        p.insert("ghost".into(), f64::NAN);
        let validator = OptimizationValidator::new(&OptimizationConfig::default());
        let result = validator.validate(&candidate(p, 0.9), &baseline(), &ranges(), 0.1);
        let failed: Vec<&str> = result
            .checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(
            failed,
            vec!["finite_values", "within_range", "known_parameters", "relative_change"]
        );
    }
}
