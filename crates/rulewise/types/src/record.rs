//! Optimization outcomes and the audit record kept for each run.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::candidate::OptimizationCandidate;
use crate::metrics::TargetMetric;
use crate::rule::Parameters;

/// Terminal status of an optimization run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStatus {
    InsufficientData,
    ValidationFailed,
    Completed,
    Failed,
}

impl OptimizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationStatus::InsufficientData => "insufficient_data",
            OptimizationStatus::ValidationFailed => "validation_failed",
            OptimizationStatus::Completed => "completed",
            OptimizationStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for OptimizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named validator check.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationCheck {
    pub name: String,
    pub passed: bool,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Result of validating a selected candidate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub approved: bool,
    pub checks: Vec<ValidationCheck>,
    /// Predicted improvement of the overall score over the baseline.
    pub predicted_improvement: f64,
}

impl ValidationResult {
    /// Human-readable summary of the failed checks.
    pub fn failure_summary(&self) -> Option<String> {
        let failed: Vec<String> = self
            .checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| match &c.detail {
                Some(d) => format!("{}: {}", c.name, d),
                None => c.name.clone(),
            })
            .collect();
        if failed.is_empty() {
            None
        } else {
            Some(failed.join("; "))
        }
    }
}

/// Audit record of one optimization run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRecord {
    pub optimization_id: Uuid,
    pub rule_id: String,
    pub target_metric: TargetMetric,
    pub baseline_config: Parameters,
    pub selected_candidate: Option<OptimizationCandidate>,
    pub predicted_improvement: Option<f64>,
    pub validation_result: Option<ValidationResult>,
    pub status: OptimizationStatus,
    pub applied_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl OptimizationRecord {
    pub fn new(
        optimization_id: Uuid,
        rule_id: impl Into<String>,
        target_metric: TargetMetric,
        baseline_config: Parameters,
        status: OptimizationStatus,
    ) -> Self {
        Self {
            optimization_id,
            rule_id: rule_id.into(),
            target_metric,
            baseline_config,
            selected_candidate: None,
            predicted_improvement: None,
            validation_result: None,
            status,
            applied_at: None,
            created_at: Utc::now(),
            error: None,
        }
    }
}

/// What `optimize_rule_parameters` hands back to the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizationOutcome {
    pub optimization_id: Uuid,
    pub rule_id: String,
    pub status: OptimizationStatus,
    pub optimized_parameters: Option<Parameters>,
    /// Per-metric deltas plus `overall_score`.
    pub predicted_improvements: Option<BTreeMap<String, f64>>,
    pub confidence: Option<f64>,
    pub error: Option<String>,
}

impl OptimizationOutcome {
    /// An outcome with no candidate attached.
    pub fn bare(
        optimization_id: Uuid,
        rule_id: impl Into<String>,
        status: OptimizationStatus,
        error: Option<String>,
    ) -> Self {
        Self {
            optimization_id,
            rule_id: rule_id.into(),
            status,
            optimized_parameters: None,
            predicted_improvements: None,
            confidence: None,
            error,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == OptimizationStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&OptimizationStatus::InsufficientData).unwrap();
        assert_eq!(json, "\"insufficient_data\"");
        assert_eq!(OptimizationStatus::ValidationFailed.to_string(), "validation_failed");
    }

    #[test]
    fn failure_summary_lists_failed_checks() {
        let result = ValidationResult {
            approved: false,
            checks: vec![
                ValidationCheck { name: "finite".into(), passed: true, detail: None },
                ValidationCheck {
                    name: "improvement".into(),
                    passed: false,
                    detail: Some("0.01 < 0.05".into()),
                },
            ],
            predicted_improvement: 0.01,
        };
        assert_eq!(result.failure_summary().unwrap(), "improvement: 0.01 < 0.05");
    }

    #[test]
    fn bare_outcome_has_no_parameters() {
        let o = OptimizationOutcome::bare(
            Uuid::new_v4(),
            "r1",
            OptimizationStatus::Failed,
            Some("boom".into()),
        );
        assert!(o.optimized_parameters.is_none());
        assert!(!o.is_completed());
    }
}
