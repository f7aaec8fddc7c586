//! Shared state behind the engine handle and its learning loops.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use rulewise_detection::{
    batch_hash, DetectionMetadata, DetectionReport, DetectorRegistry, FeatureExtractor,
    KnowledgeBase, PatternPostProcessor, RefreshSummary,
};
use rulewise_optimization::{AdaptiveRuleGenerator, CandidateGenerator, OptimizationValidator};
use rulewise_prediction::{ModelInfo, PerformancePrediction, PerformancePredictor};
use rulewise_types::{
    AdaptiveRule, BoundedBuffer, DetectionConfig, ImprovementWeights, IntelError, IntelResult,
    OptimizationRecord, Parameters, Pattern, PatternType, RuleContext, TargetMetric,
};

use crate::collaborators::Collaborators;
use crate::config::EngineConfig;
use crate::events::EngineEvent;
use crate::metrics::EngineMetrics;
use crate::worker::WorkerPool;

/// Model registry key of the engine-wide ensemble.
pub const ENSEMBLE_MODEL_TYPE: &str = "performance_ensemble";

/// Per-call switches of `detect_patterns`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionOptions {
    /// Look up and store the report in the detection cache.
    #[serde(default = "default_true")]
    pub use_cache: bool,

    /// Ingest the ranked patterns into the knowledge base.
    #[serde(default = "default_true")]
    pub update_knowledge: bool,

    /// Tag every pattern with this `rule_id` characteristic.
    #[serde(default)]
    pub rule_id: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            update_knowledge: true,
            rule_id: None,
        }
    }
}

impl DetectionOptions {
    pub fn for_rule(rule_id: impl Into<String>) -> Self {
        Self {
            rule_id: Some(rule_id.into()),
            ..Self::default()
        }
    }

    pub fn uncached() -> Self {
        Self {
            use_cache: false,
            ..Self::default()
        }
    }
}

/// Post-apply watch over a rule, checked by the monitoring loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MonitoringHook {
    pub optimization_id: uuid::Uuid,
    pub target: TargetMetric,
    pub weights: ImprovementWeights,
    pub applied_at: DateTime<Utc>,
    /// Mean observed score of the history the optimization ran on.
    pub baseline_score: f64,
    pub predicted_score: f64,
}

/// Result of one monitoring pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitoringSummary {
    pub checked: usize,
    pub awaiting_samples: usize,
    pub regressions: Vec<String>,
}

pub(crate) struct EngineCore {
    pub(crate) config: EngineConfig,
    pub(crate) collaborators: Collaborators,
    detection_config: Arc<DetectionConfig>,
    extractor: FeatureExtractor,
    pub(crate) detectors: DetectorRegistry,
    post_processor: PatternPostProcessor,
    pub(crate) knowledge: KnowledgeBase,
    rule_generator: AdaptiveRuleGenerator,
    pub(crate) candidate_generator: CandidateGenerator,
    pub(crate) validator: OptimizationValidator,
    pub(crate) predictor: Arc<PerformancePredictor>,
    pub(crate) pool: WorkerPool,
    pub(crate) metrics: EngineMetrics,
    events: broadcast::Sender<EngineEvent>,
    /// Rules with an optimization in flight.
    pub(crate) active: DashMap<String, ()>,
    records: Mutex<BoundedBuffer<OptimizationRecord>>,
    pub(crate) watched: DashMap<String, TargetMetric>,
    /// Rules whose monitoring found a regression.
    pub(crate) flagged: DashMap<String, TargetMetric>,
    pub(crate) monitors: DashMap<String, MonitoringHook>,
}

impl EngineCore {
    pub(crate) fn new(
        config: EngineConfig,
        collaborators: Collaborators,
        detectors: DetectorRegistry,
    ) -> Self {
        let (events, _) = broadcast::channel(config.runtime.event_channel_capacity.max(1));
        Self {
            detection_config: Arc::new(config.detection.clone()),
            extractor: FeatureExtractor::new(config.detection.max_sequence_length),
            detectors,
            post_processor: PatternPostProcessor::new(&config.detection),
            knowledge: KnowledgeBase::new(config.knowledge.clone()),
            rule_generator: AdaptiveRuleGenerator::new(),
            candidate_generator: CandidateGenerator::new(config.optimization.clone()),
            validator: OptimizationValidator::new(&config.optimization),
            predictor: Arc::new(PerformancePredictor::new(config.prediction.clone())),
            pool: WorkerPool::new(config.runtime.worker_pool_size),
            metrics: EngineMetrics::default(),
            events,
            active: DashMap::new(),
            records: Mutex::new(BoundedBuffer::new(config.optimization.max_history_records)),
            watched: DashMap::new(),
            flagged: DashMap::new(),
            monitors: DashMap::new(),
            collaborators,
            config,
        }
    }

    pub(crate) fn publish(&self, event: EngineEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub(crate) fn history_window(&self) -> Duration {
        Duration::from_secs(self.config.optimization.history_window_secs)
    }

    // ── Detection ───────────────────────────────────────────────────

    #[instrument(skip(self, records, options), fields(records = records.len()))]
    pub(crate) async fn detect_patterns(
        &self,
        records: Vec<Value>,
        pattern_types: &[PatternType],
        options: &DetectionOptions,
    ) -> IntelResult<DetectionReport> {
        let started = Instant::now();
        EngineMetrics::incr(&self.metrics.detections);

        let records = Arc::new(records);
        let hash = {
            let records = records.clone();
            self.pool.run(move || batch_hash(&records)).await?
        };
        let detectors = self.detectors.select(pattern_types);
        let cache_key = format!(
            "rulewise:detect:{}:{}:{}",
            hash,
            detectors
                .iter()
                .map(|d| d.backend().to_string())
                .collect::<Vec<_>>()
                .join(","),
            options.rule_id.as_deref().unwrap_or("-")
        );

        if options.use_cache {
            if let Some(report) = self.cached_report(&cache_key).await {
                EngineMetrics::incr(&self.metrics.detection_cache_hits);
                debug!(batch_hash = %hash, "Detection cache hit");
                return Ok(report);
            }
        }

        let features = {
            let records = records.clone();
            let extractor = self.extractor.clone();
            Arc::new(self.pool.run(move || extractor.extract_batch(&records)).await?)
        };

        let runs = detectors.into_iter().map(|detector| {
            let features = features.clone();
            let config = self.detection_config.clone();
            let pool = &self.pool;
            async move {
                let pattern_type = detector.pattern_type();
                let backend = detector.backend().to_string();
                let result = pool
                    .run(move || detector.detect(&features, &config))
                    .await
                    .and_then(|r| r);
                (pattern_type, backend, result)
            }
        });

        let mut metadata = DetectionMetadata {
            batch_hash: hash.clone(),
            record_count: records.len(),
            ..DetectionMetadata::default()
        };
        let mut raw: Vec<Pattern> = Vec::new();
        for (pattern_type, backend, result) in join_all(runs).await {
            metadata
                .detectors_run
                .insert(pattern_type.to_string(), backend.clone());
            match result {
                Ok(patterns) => {
                    metadata
                        .raw_counts
                        .insert(pattern_type.to_string(), patterns.len());
                    raw.extend(patterns);
                }
                Err(e) => {
                    warn!(%pattern_type, %backend, error = %e, "Detector failed");
                    EngineMetrics::incr(&self.metrics.detector_failures);
                    metadata.raw_counts.insert(pattern_type.to_string(), 0);
                    metadata.errors.insert(backend, e.to_string());
                }
            }
        }

        if let Some(rule_id) = &options.rule_id {
            for pattern in &mut raw {
                pattern
                    .characteristics
                    .insert("rule_id".into(), Value::String(rule_id.clone()));
            }
        }

        let (patterns, stats) = self.post_processor.process(raw, &hash, records.len());
        metadata.post_processing = stats;

        if options.update_knowledge {
            let new = self.knowledge.ingest(&patterns)?;
            debug!(new, "Knowledge base updated");
        }

        metadata.duration_ms = started.elapsed().as_millis() as u64;
        let report = DetectionReport { patterns, metadata };

        if options.use_cache {
            self.store_report(&cache_key, &report).await;
        }

        EngineMetrics::add(&self.metrics.patterns_detected, report.patterns.len() as u64);
        info!(
            batch_hash = %hash,
            patterns = report.patterns.len(),
            failures = report.metadata.errors.len(),
            "Patterns detected"
        );
        self.publish(EngineEvent::PatternsDetected {
            batch_hash: hash,
            pattern_count: report.patterns.len(),
            degraded: report.is_degraded(),
        });
        Ok(report)
    }

    async fn cached_report(&self, key: &str) -> Option<DetectionReport> {
        let cache = self.collaborators.cache.as_ref()?;
        match cache.get(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<DetectionReport>(&bytes) {
                Ok(mut report) => {
                    report.metadata.cache_hit = true;
                    Some(report)
                }
                Err(e) => {
                    warn!(error = %e, "Discarding undecodable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Detection cache lookup failed");
                None
            }
        }
    }

    async fn store_report(&self, key: &str, report: &DetectionReport) {
        let Some(cache) = self.collaborators.cache.as_ref() else {
            return;
        };
        let ttl = Duration::from_secs(self.config.runtime.cache_ttl_secs);
        let stored = match serde_json::to_vec(report) {
            Ok(bytes) => cache.set(key, bytes, ttl).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = stored {
            warn!(error = %e, "Detection cache store failed");
        }
    }

    // ── Rules and prediction ────────────────────────────────────────

    pub(crate) fn generate_adaptive_rules(
        &self,
        patterns: &[Pattern],
        context: &RuleContext,
    ) -> Vec<AdaptiveRule> {
        self.rule_generator.generate(patterns, context)
    }

    pub(crate) async fn predict_rule_performance(
        &self,
        parameters: Parameters,
        context: BTreeMap<String, f64>,
    ) -> IntelResult<PerformancePrediction> {
        let ensemble = self.predictor.ensemble()?.ok_or_else(|| {
            IntelError::ModelUnavailable("performance models have not been trained".into())
        })?;
        self.pool
            .run(move || ensemble.predict(&parameters, &context))
            .await
    }

    // ── Knowledge ───────────────────────────────────────────────────

    pub(crate) fn refresh_knowledge(&self) -> IntelResult<RefreshSummary> {
        let summary = self.knowledge.refresh()?;
        EngineMetrics::incr(&self.metrics.knowledge_refreshes);
        debug!(
            pruned = summary.pruned,
            remaining = summary.remaining,
            "Knowledge base refreshed"
        );
        self.publish(EngineEvent::KnowledgeRefreshed {
            summary: summary.clone(),
        });
        Ok(summary)
    }

    // ── Records ─────────────────────────────────────────────────────

    pub(crate) fn push_record(&self, record: OptimizationRecord) -> IntelResult<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| IntelError::Lock("optimization history".into()))?;
        records.push(record);
        Ok(())
    }

    pub(crate) fn optimization_history(
        &self,
        rule_id: Option<&str>,
    ) -> IntelResult<Vec<OptimizationRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| IntelError::Lock("optimization history".into()))?;
        Ok(records
            .iter()
            .filter(|r| rule_id.map_or(true, |id| r.rule_id == id))
            .cloned()
            .collect())
    }

    // ── Model lifecycle ─────────────────────────────────────────────

    /// Retrain the engine-wide ensemble from the history of every known rule.
    #[instrument(skip(self))]
    pub(crate) async fn retrain_models(&self) -> IntelResult<ModelInfo> {
        let minimum = self.config.optimization.min_optimization_samples;
        let window = self.history_window();
        let rule_ids = self.collaborators.history.rule_ids().await?;

        let mut samples = Vec::new();
        for rule_id in &rule_ids {
            samples.extend(
                self.collaborators
                    .history
                    .get_performance_samples(rule_id, window)
                    .await?,
            );
        }
        if samples.len() < minimum {
            return Err(IntelError::DataInsufficient {
                samples: samples.len(),
                minimum,
            });
        }

        let predictor = self.predictor.clone();
        let ensemble = self
            .pool
            .run(move || predictor.retrain(&samples, minimum))
            .await??;
        let info = ensemble.info();
        EngineMetrics::incr(&self.metrics.models_trained);

        if let Some(registry) = self.collaborators.models.as_ref() {
            let metrics: BTreeMap<String, f64> = info
                .accuracy_estimates
                .iter()
                .map(|(m, v)| (m.as_str().to_string(), *v))
                .collect();
            let bytes = ensemble.to_bytes()?;
            if let Err(e) = registry.save(ENSEMBLE_MODEL_TYPE, bytes, metrics).await {
                warn!(error = %e, "Saving model artifact failed");
            }
        }

        self.publish(EngineEvent::ModelsRetrained {
            sample_count: info.sample_count,
            feature_schema_version: info.feature_schema_version.clone(),
        });
        Ok(info)
    }

    /// Install the last saved ensemble, if the registry has one.
    pub(crate) async fn restore_models(&self) -> IntelResult<Option<ModelInfo>> {
        let Some(registry) = self.collaborators.models.as_ref() else {
            return Ok(None);
        };
        match registry.load(ENSEMBLE_MODEL_TYPE).await? {
            Some(bytes) => {
                let info = self.predictor.import(&bytes)?;
                info!(schema = %info.feature_schema_version, "Performance models restored");
                Ok(Some(info))
            }
            None => Ok(None),
        }
    }

    /// Target metric of each rule the sweep should optimize.
    pub(crate) fn sweep_targets(&self) -> BTreeMap<String, TargetMetric> {
        let mut targets: BTreeMap<String, TargetMetric> = self
            .watched
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        for entry in self.flagged.iter() {
            targets.insert(entry.key().clone(), *entry.value());
        }
        targets.retain(|rule_id, _| !self.active.contains_key(rule_id));
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_options_default_from_empty_json() {
        let options: DetectionOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, DetectionOptions::default());
        assert!(options.use_cache && options.update_knowledge);
        assert_eq!(DetectionOptions::for_rule("r").rule_id.as_deref(), Some("r"));
        assert!(!DetectionOptions::uncached().use_cache);
    }
}
