//! The public engine handle.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::info;

use rulewise_detection::{DetectionReport, DetectorRegistry, KnowledgeStatistics, RefreshSummary};
use rulewise_prediction::{ModelInfo, PerformancePrediction};
use rulewise_types::{
    AdaptiveRule, Constraints, IntelError, IntelResult, OptimizationOutcome, OptimizationRecord,
    Parameters, Pattern, PatternType, RuleContext, TargetMetric,
};

use crate::collaborators::Collaborators;
use crate::config::EngineConfig;
use crate::service::{DetectionOptions, EngineCore, MonitoringSummary};
use crate::events::EngineEvent;
use crate::metrics::MetricsSnapshot;
use crate::scheduler::LearningLoops;

/// Everything `get_pattern_insights` reports.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PatternInsights {
    pub metrics: MetricsSnapshot,
    pub pattern_statistics: KnowledgeStatistics,
    pub model_info: Option<ModelInfo>,
    pub configuration: EngineConfig,
    /// Pattern type → backend currently registered.
    pub detectors: BTreeMap<String, String>,
    pub fallback_detectors: Vec<PatternType>,
    pub watched_rules: BTreeMap<String, TargetMetric>,
    pub flagged_rules: Vec<String>,
    pub monitored_rules: Vec<String>,
    pub active_optimizations: usize,
    pub worker_pool_size: usize,
    pub worker_pool_available: usize,
    pub learning_loops_running: bool,
}

/// Adaptive pattern intelligence and rule optimization engine.
///
/// Cheap to share behind an `Arc`; every operation takes `&self`.
pub struct PatternIntelligenceEngine {
    core: Arc<EngineCore>,
    loops: Mutex<Option<LearningLoops>>,
}

impl std::fmt::Debug for PatternIntelligenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternIntelligenceEngine")
            .field("detectors", &self.core.detectors)
            .field("running", &self.is_running())
            .finish()
    }
}

impl PatternIntelligenceEngine {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> IntelResult<Self> {
        let detectors = DetectorRegistry::new(&config.detection);
        Self::with_detectors(config, collaborators, detectors)
    }

    /// Build an engine around a caller-supplied detector registry.
    pub fn with_detectors(
        config: EngineConfig,
        collaborators: Collaborators,
        detectors: DetectorRegistry,
    ) -> IntelResult<Self> {
        config.validate()?;
        info!(
            detectors = detectors.len(),
            workers = config.runtime.worker_pool_size,
            "Pattern intelligence engine created"
        );
        Ok(Self {
            core: Arc::new(EngineCore::new(config, collaborators, detectors)),
            loops: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.core.config
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Start the learning loops. Calling it again while running is a no-op.
    pub fn start(&self) -> IntelResult<()> {
        let mut loops = self
            .loops
            .lock()
            .map_err(|_| IntelError::Lock("learning loops".into()))?;
        if loops.is_none() {
            *loops = Some(LearningLoops::spawn(self.core.clone())?);
        }
        Ok(())
    }

    pub fn stop(&self) -> IntelResult<()> {
        let mut loops = self
            .loops
            .lock()
            .map_err(|_| IntelError::Lock("learning loops".into()))?;
        if let Some(mut running) = loops.take() {
            running.stop();
            info!("Learning loops stopped");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.loops.lock().map(|l| l.is_some()).unwrap_or(false)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.core.subscribe()
    }

    // ── Operations ──────────────────────────────────────────────────

    /// Detect patterns of the requested types; an empty slice means all types.
    pub async fn detect_patterns(
        &self,
        records: Vec<Value>,
        pattern_types: &[PatternType],
        options: DetectionOptions,
    ) -> IntelResult<DetectionReport> {
        self.core
            .detect_patterns(records, pattern_types, &options)
            .await
    }

    pub fn generate_adaptive_rules(
        &self,
        patterns: &[Pattern],
        context: &RuleContext,
    ) -> Vec<AdaptiveRule> {
        self.core.generate_adaptive_rules(patterns, context)
    }

    /// Never fails; the status and error of the run are in the outcome.
    pub async fn optimize_rule_parameters(
        &self,
        rule_id: &str,
        target: TargetMetric,
        constraints: Constraints,
    ) -> OptimizationOutcome {
        self.core
            .optimize_rule_parameters(rule_id, target, constraints)
            .await
    }

    pub async fn predict_rule_performance(
        &self,
        parameters: Parameters,
        context: BTreeMap<String, f64>,
    ) -> IntelResult<PerformancePrediction> {
        self.core
            .predict_rule_performance(parameters, context)
            .await
    }

    pub fn get_pattern_insights(&self) -> IntelResult<PatternInsights> {
        let core = &self.core;
        let mut flagged: Vec<String> = core.flagged.iter().map(|e| e.key().clone()).collect();
        flagged.sort();
        let mut monitored: Vec<String> = core.monitors.iter().map(|e| e.key().clone()).collect();
        monitored.sort();

        Ok(PatternInsights {
            metrics: core.metrics.snapshot(),
            pattern_statistics: core.knowledge.statistics()?,
            model_info: core.predictor.model_info()?,
            configuration: core.config.clone(),
            detectors: core.detectors.backends(),
            fallback_detectors: core.detectors.fallbacks().to_vec(),
            watched_rules: core
                .watched
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            flagged_rules: flagged,
            monitored_rules: monitored,
            active_optimizations: core.active.len(),
            worker_pool_size: core.pool.size(),
            worker_pool_available: core.pool.available(),
            learning_loops_running: self.is_running(),
        })
    }

    // ── Learning ────────────────────────────────────────────────────

    /// Mark a known pattern useful or not; returns false for unknown signatures.
    pub fn record_feedback(&self, signature: &str, useful: bool) -> IntelResult<bool> {
        self.core.knowledge.record_feedback(signature, useful)
    }

    /// Recorded runs, oldest first, optionally for one rule.
    pub fn optimization_history(&self, rule_id: Option<&str>) -> IntelResult<Vec<OptimizationRecord>> {
        self.core.optimization_history(rule_id)
    }

    /// Include a rule in the periodic optimization sweep.
    pub fn watch_rule(&self, rule_id: impl Into<String>, target: TargetMetric) {
        self.core.watched.insert(rule_id.into(), target);
    }

    pub fn unwatch_rule(&self, rule_id: &str) -> bool {
        self.core.flagged.remove(rule_id);
        self.core.watched.remove(rule_id).is_some()
    }

    pub async fn retrain_models(&self) -> IntelResult<ModelInfo> {
        self.core.retrain_models().await
    }

    pub async fn restore_models(&self) -> IntelResult<Option<ModelInfo>> {
        self.core.restore_models().await
    }

    pub fn refresh_knowledge(&self) -> IntelResult<RefreshSummary> {
        self.core.refresh_knowledge()
    }

    pub async fn monitor_performance(&self) -> IntelResult<MonitoringSummary> {
        self.core.monitor_performance().await
    }

    pub async fn run_optimization_sweep(&self) -> Vec<OptimizationOutcome> {
        self.core.run_optimization_sweep().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{InMemoryHistorySource, InMemoryRuleStore};
    use rulewise_types::{OptimizationStatus, PerformanceSample, RuleConfiguration};

    fn engine() -> PatternIntelligenceEngine {
        PatternIntelligenceEngine::new(EngineConfig::default(), Collaborators::in_memory()).unwrap()
    }

    #[test]
    fn start_requires_a_runtime() {
        let engine = engine();
        let err = engine.start().unwrap_err();
        assert!(matches!(err, IntelError::SchedulerUnavailable(_)));
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_halts() {
        let engine = engine();
        engine.start().unwrap();
        engine.start().unwrap();
        assert!(engine.is_running());
        assert!(engine.get_pattern_insights().unwrap().learning_loops_running);
        engine.stop().unwrap();
        assert!(!engine.is_running());
        engine.stop().unwrap();
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.detection.contamination_rate = 0.9;
        let err = PatternIntelligenceEngine::new(config, Collaborators::in_memory()).unwrap_err();
        assert!(matches!(err, IntelError::Config(_)));
    }

    #[tokio::test]
    async fn prediction_needs_trained_models() {
        let err = engine()
            .predict_rule_performance(Parameters::new(), BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IntelError::ModelUnavailable(_)));
    }

    #[tokio::test]
    async fn watched_rules_are_swept() {
        let store = Arc::new(InMemoryRuleStore::new());
        let history = Arc::new(InMemoryHistorySource::new());
        let mut params = Parameters::new();
        params.insert("threshold".into(), 0.5);
        store.insert(RuleConfiguration::new("r1", params.clone())).await;
        history
            .record("r1", PerformanceSample::new(params).with_metrics(1.0, 0.5, 0.8))
            .await;

        let engine = PatternIntelligenceEngine::new(
            EngineConfig::default(),
            Collaborators::new(store, history),
        )
        .unwrap();
        engine.watch_rule("r1", TargetMetric::Accuracy);
        let outcomes = engine.run_optimization_sweep().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].status, OptimizationStatus::InsufficientData);

        assert!(engine.unwatch_rule("r1"));
        assert!(engine.run_optimization_sweep().await.is_empty());
        assert_eq!(engine.optimization_history(Some("r1")).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn retraining_without_history_is_insufficient() {
        let err = engine().retrain_models().await.unwrap_err();
        assert!(matches!(err, IntelError::DataInsufficient { samples: 0, .. }));
        assert!(engine().restore_models().await.unwrap().is_none());
    }
}
