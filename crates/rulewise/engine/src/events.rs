//! Notifications published by the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rulewise_detection::RefreshSummary;
use rulewise_types::OptimizationStatus;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    PatternsDetected {
        batch_hash: String,
        pattern_count: usize,
        degraded: bool,
    },
    OptimizationFinished {
        optimization_id: Uuid,
        rule_id: String,
        status: OptimizationStatus,
    },
    RuleRolledBack {
        rule_id: String,
        reason: String,
    },
    ModelsRetrained {
        sample_count: usize,
        feature_schema_version: String,
    },
    KnowledgeRefreshed {
        summary: RefreshSummary,
    },
    RegressionDetected {
        rule_id: String,
        baseline_score: f64,
        observed_score: f64,
        detected_at: DateTime<Utc>,
    },
}

impl EngineEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::PatternsDetected { .. } => "patterns_detected",
            EngineEvent::OptimizationFinished { .. } => "optimization_finished",
            EngineEvent::RuleRolledBack { .. } => "rule_rolled_back",
            EngineEvent::ModelsRetrained { .. } => "models_retrained",
            EngineEvent::KnowledgeRefreshed { .. } => "knowledge_refreshed",
            EngineEvent::RegressionDetected { .. } => "regression_detected",
        }
    }
}
