//! Optimization pipeline: history, scoped models, candidates, validation and apply.

use std::collections::BTreeMap;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use rulewise_optimization::{
    mean_context, observed_score, weights_for, Baseline, CandidateEvaluator, CandidateGenerator,
    CandidateSelector, EnsembleSurrogate, GenerationRequest,
};
use rulewise_types::stats::mean;
use rulewise_types::{
    Constraints, IntelError, IntelResult, OptimizationCandidate, OptimizationOutcome,
    OptimizationRecord, OptimizationStatus, ParameterRange, Parameters, TargetMetric,
};

use crate::service::{EngineCore, MonitoringHook, MonitoringSummary};
use crate::events::EngineEvent;
use crate::metrics::EngineMetrics;

/// Knowledge base patterns handed to the pattern-informed strategy.
const RELEVANT_PATTERN_LIMIT: usize = 20;

/// Marks a rule busy for as long as it is held.
struct ActiveGuard<'a> {
    active: &'a DashMap<String, ()>,
    rule_id: String,
}

impl<'a> ActiveGuard<'a> {
    fn acquire(active: &'a DashMap<String, ()>, rule_id: &str) -> Option<Self> {
        match active.entry(rule_id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(Self {
                    active,
                    rule_id: rule_id.to_string(),
                })
            }
        }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.rule_id);
    }
}

/// Everything computed off the async runtime for one run.
struct Evaluation {
    ranges: BTreeMap<String, ParameterRange>,
    baseline: Baseline,
    ranked: Vec<OptimizationCandidate>,
    evaluator: CandidateEvaluator,
}

impl EngineCore {
    /// Run one optimization for `rule_id`. Failures are reported in the outcome.
    #[instrument(skip(self, target, constraints), fields(target = %target))]
    pub(crate) async fn optimize_rule_parameters(
        &self,
        rule_id: &str,
        target: TargetMetric,
        constraints: Constraints,
    ) -> OptimizationOutcome {
        let optimization_id = Uuid::new_v4();
        EngineMetrics::incr(&self.metrics.optimizations_started);

        let Some(_guard) = ActiveGuard::acquire(&self.active, rule_id) else {
            warn!(rule_id, "Optimization already running, request rejected");
            EngineMetrics::incr(&self.metrics.optimizations_rejected);
            return OptimizationOutcome::bare(
                optimization_id,
                rule_id,
                OptimizationStatus::Failed,
                Some(IntelError::OptimizationInProgress(rule_id.to_string()).to_string()),
            );
        };

        let outcome = match self
            .run_optimization(optimization_id, rule_id, target, &constraints)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(rule_id, error = %e, "Optimization failed");
                let mut record = OptimizationRecord::new(
                    optimization_id,
                    rule_id,
                    target,
                    Parameters::new(),
                    OptimizationStatus::Failed,
                );
                record.error = Some(e.to_string());
                self.finish(record);
                OptimizationOutcome::bare(
                    optimization_id,
                    rule_id,
                    OptimizationStatus::Failed,
                    Some(e.to_string()),
                )
            }
        };

        self.publish(EngineEvent::OptimizationFinished {
            optimization_id,
            rule_id: rule_id.to_string(),
            status: outcome.status,
        });
        outcome
    }

    async fn run_optimization(
        &self,
        optimization_id: Uuid,
        rule_id: &str,
        target: TargetMetric,
        constraints: &Constraints,
    ) -> IntelResult<OptimizationOutcome> {
        let minimum = self.config.optimization.min_optimization_samples;
        let baseline_config = self
            .collaborators
            .rule_store
            .get_configuration(rule_id)
            .await?;
        let current = baseline_config.parameters.clone();
        let samples = self
            .collaborators
            .history
            .get_performance_samples(rule_id, self.history_window())
            .await?;

        if samples.len() < minimum {
            let reason = IntelError::DataInsufficient {
                samples: samples.len(),
                minimum,
            }
            .to_string();
            info!(rule_id, samples = samples.len(), minimum, "Not enough history to optimize");
            let mut record = OptimizationRecord::new(
                optimization_id,
                rule_id,
                target,
                current,
                OptimizationStatus::InsufficientData,
            );
            record.error = Some(reason.clone());
            self.finish(record);
            return Ok(OptimizationOutcome::bare(
                optimization_id,
                rule_id,
                OptimizationStatus::InsufficientData,
                Some(reason),
            ));
        }

        let weights = weights_for(&self.config.optimization.weights, target);
        let baseline_observed = mean(
            &samples
                .iter()
                .map(|s| observed_score(s, &weights))
                .collect::<Vec<_>>(),
        );
        let patterns: Vec<_> = self
            .knowledge
            .relevant_patterns(rule_id, RELEVANT_PATTERN_LIMIT)?
            .into_iter()
            .map(|known| known.pattern)
            .collect();

        let evaluation = {
            let predictor = self.predictor.clone();
            let generator = self.candidate_generator.clone();
            let rule = rule_id.to_string();
            let current = current.clone();
            let constraints = constraints.clone();
            self.pool
                .run(move || -> IntelResult<Evaluation> {
                    let ensemble = predictor.retrain_scoped(&rule, &samples, minimum)?;
                    let context = mean_context(&samples);
                    let ranges = CandidateGenerator::resolve_ranges(&current, &constraints, &samples);
                    let surrogate = EnsembleSurrogate::new(&ensemble, weights, context.clone());
                    let request = GenerationRequest {
                        rule_id: &rule,
                        current: &current,
                        ranges: &ranges,
                        history: &samples,
                        weights,
                        patterns: &patterns,
                        surrogate: Some(&surrogate),
                    };
                    let candidates = generator.generate(&request);
                    let evaluator = CandidateEvaluator::new(weights);
                    let baseline = evaluator.baseline(&current, &ensemble, &context);
                    let ranked = evaluator.evaluate(candidates, &ensemble, &context);
                    Ok(Evaluation {
                        ranges,
                        baseline,
                        ranked,
                        evaluator,
                    })
                })
                .await??
        };
        debug!(
            rule_id,
            candidates = evaluation.ranked.len(),
            baseline_score = evaluation.baseline.score,
            "Candidates ranked"
        );

        let Some(selected) = CandidateSelector.select(&evaluation.ranked, constraints) else {
            let reason = "no candidate satisfies the constraints".to_string();
            let mut record = OptimizationRecord::new(
                optimization_id,
                rule_id,
                target,
                current,
                OptimizationStatus::ValidationFailed,
            );
            record.error = Some(reason.clone());
            self.finish(record);
            return Ok(OptimizationOutcome::bare(
                optimization_id,
                rule_id,
                OptimizationStatus::ValidationFailed,
                Some(reason),
            ));
        };
        let selected = selected.clone();

        let validation = self.validator.validate(
            &selected,
            &current,
            &evaluation.ranges,
            evaluation.baseline.score,
        );
        let improvements = evaluation.evaluator.improvements(&evaluation.baseline, &selected);

        let mut record = OptimizationRecord::new(
            optimization_id,
            rule_id,
            target,
            current.clone(),
            OptimizationStatus::ValidationFailed,
        );
        record.selected_candidate = Some(selected.clone());
        record.predicted_improvement = Some(validation.predicted_improvement);
        record.validation_result = Some(validation.clone());

        if !validation.approved {
            let reason = validation
                .failure_summary()
                .unwrap_or_else(|| "validation rejected the candidate".to_string());
            info!(rule_id, %reason, "Candidate rejected by validation");
            record.error = Some(reason.clone());
            self.finish(record);
            return Ok(OptimizationOutcome {
                optimization_id,
                rule_id: rule_id.to_string(),
                status: OptimizationStatus::ValidationFailed,
                optimized_parameters: None,
                predicted_improvements: Some(improvements),
                confidence: Some(selected.confidence),
                error: Some(reason),
            });
        }

        match self
            .collaborators
            .rule_store
            .update_configuration(rule_id, &selected.parameters)
            .await
        {
            Ok(applied) => {
                let applied_at = Utc::now();
                self.monitors.insert(
                    rule_id.to_string(),
                    MonitoringHook {
                        optimization_id,
                        target,
                        weights,
                        applied_at,
                        baseline_score: baseline_observed,
                        predicted_score: selected.improvement_score,
                    },
                );
                self.flagged.remove(rule_id);
                info!(
                    rule_id,
                    version = applied.version,
                    improvement = validation.predicted_improvement,
                    strategy = %selected.generation_strategy,
                    "Optimized configuration applied"
                );
                record.status = OptimizationStatus::Completed;
                record.applied_at = Some(applied_at);
                self.finish(record);
                Ok(OptimizationOutcome {
                    optimization_id,
                    rule_id: rule_id.to_string(),
                    status: OptimizationStatus::Completed,
                    optimized_parameters: Some(selected.parameters.clone()),
                    predicted_improvements: Some(improvements),
                    confidence: Some(selected.confidence),
                    error: None,
                })
            }
            Err(e) => {
                error!(rule_id, error = %e, "Applying configuration failed");
                self.rollback(rule_id, &current, &e.to_string()).await;
                record.status = OptimizationStatus::Failed;
                record.error = Some(e.to_string());
                self.finish(record);
                Ok(OptimizationOutcome {
                    optimization_id,
                    rule_id: rule_id.to_string(),
                    status: OptimizationStatus::Failed,
                    optimized_parameters: None,
                    predicted_improvements: Some(improvements),
                    confidence: Some(selected.confidence),
                    error: Some(e.to_string()),
                })
            }
        }
    }

    /// Put the baseline back if a failed apply left the rule changed.
    async fn rollback(&self, rule_id: &str, baseline: &Parameters, reason: &str) {
        let store = &self.collaborators.rule_store;
        let current = match store.get_configuration(rule_id).await {
            Ok(config) => config.parameters,
            Err(e) => {
                error!(rule_id, error = %e, "Rollback could not read the rule");
                return;
            }
        };
        if &current == baseline {
            debug!(rule_id, "Rule unchanged, nothing to roll back");
            return;
        }
        match store.update_configuration(rule_id, baseline).await {
            Ok(_) => {
                EngineMetrics::incr(&self.metrics.rollbacks);
                warn!(rule_id, reason, "Rule rolled back to baseline");
                self.publish(EngineEvent::RuleRolledBack {
                    rule_id: rule_id.to_string(),
                    reason: reason.to_string(),
                });
            }
            Err(e) => error!(rule_id, error = %e, "Rollback failed"),
        }
    }

    fn finish(&self, record: OptimizationRecord) {
        let counter = match record.status {
            OptimizationStatus::Completed => &self.metrics.optimizations_completed,
            OptimizationStatus::InsufficientData => &self.metrics.insufficient_data,
            OptimizationStatus::ValidationFailed | OptimizationStatus::Failed => {
                &self.metrics.optimizations_failed
            }
        };
        EngineMetrics::incr(counter);
        if let Err(e) = self.push_record(record) {
            error!(error = %e, "Optimization record dropped");
        }
    }

    // ── Loops ───────────────────────────────────────────────────────

    /// Optimize every watched or regressed rule that is not already busy.
    pub(crate) async fn run_optimization_sweep(&self) -> Vec<OptimizationOutcome> {
        let targets = self.sweep_targets();
        let mut outcomes = Vec::with_capacity(targets.len());
        for (rule_id, target) in targets {
            let outcome = self
                .optimize_rule_parameters(&rule_id, target, Constraints::default())
                .await;
            debug!(rule_id = %rule_id, status = %outcome.status, "Sweep optimization finished");
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Compare post-apply samples with the baseline of each applied optimization.
    pub(crate) async fn monitor_performance(&self) -> IntelResult<MonitoringSummary> {
        let tolerance = self.config.scheduler.regression_tolerance;
        let hooks: Vec<(String, MonitoringHook)> = self
            .monitors
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut summary = MonitoringSummary::default();
        for (rule_id, hook) in hooks {
            summary.checked += 1;
            let scores: Vec<f64> = self
                .collaborators
                .history
                .get_performance_samples(&rule_id, self.history_window())
                .await?
                .iter()
                .filter(|s| s.timestamp >= hook.applied_at)
                .map(|s| observed_score(s, &hook.weights))
                .collect();
            if scores.is_empty() {
                summary.awaiting_samples += 1;
                continue;
            }

            let observed = mean(&scores);
            if observed < hook.baseline_score - tolerance {
                warn!(
                    rule_id = %rule_id,
                    baseline = hook.baseline_score,
                    observed,
                    "Performance regression after optimization"
                );
                EngineMetrics::incr(&self.metrics.regressions_detected);
                self.monitors.remove(&rule_id);
                self.flagged.insert(rule_id.clone(), hook.target);
                self.publish(EngineEvent::RegressionDetected {
                    rule_id: rule_id.clone(),
                    baseline_score: hook.baseline_score,
                    observed_score: observed,
                    detected_at: Utc::now(),
                });
                summary.regressions.push(rule_id);
            }
        }
        Ok(summary)
    }
}
