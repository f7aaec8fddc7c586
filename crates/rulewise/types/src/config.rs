//! Sub-configurations consumed by the detection, prediction, optimization
//! and scheduling layers.
//!
//! Every field has a serde default, so partial config files and sparse
//! environment overrides deserialize cleanly.

use serde::{Deserialize, Serialize};

use crate::metrics::PerformanceMetric;

/// Pattern detection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Patterns below this confidence are dropped by the post-processor
    #[serde(default = "default_min_pattern_confidence")]
    pub min_pattern_confidence: f64,

    /// Cap on ranked patterns returned per analysis
    #[serde(default = "default_max_patterns")]
    pub max_patterns_per_analysis: usize,

    /// DBSCAN neighbourhood radius in z-score units
    #[serde(default = "default_clustering_eps")]
    pub clustering_eps: f64,

    /// DBSCAN core-point neighbourhood size
    #[serde(default = "default_clustering_min_samples")]
    pub clustering_min_samples: usize,

    /// Longest mined subsequence
    #[serde(default = "default_max_ngram_length")]
    pub max_ngram_length: usize,

    /// Minimum support as a fraction of sequences
    #[serde(default = "default_min_frequency_threshold")]
    pub min_frequency_threshold: f64,

    /// Transitions at or below this probability are not emitted
    #[serde(default = "default_transition_floor")]
    pub transition_probability_floor: f64,

    /// Token sequences are truncated to this length
    #[serde(default = "default_max_sequence_length")]
    pub max_sequence_length: usize,

    /// Expected anomalous fraction
    #[serde(default = "default_contamination_rate")]
    pub contamination_rate: f64,

    /// Isolation forest size; zero disables the forest backend
    #[serde(default = "default_isolation_trees")]
    pub isolation_trees: usize,

    /// Sub-sample size per isolation tree
    #[serde(default = "default_isolation_sample_size")]
    pub isolation_sample_size: usize,

    /// Upper bound on semantic clusters
    #[serde(default = "default_semantic_max_clusters")]
    pub semantic_max_clusters: usize,

    /// Keywords reported per semantic cluster
    #[serde(default = "default_top_keywords")]
    pub top_keywords: usize,

    /// Seed for every stochastic detector
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_pattern_confidence: default_min_pattern_confidence(),
            max_patterns_per_analysis: default_max_patterns(),
            clustering_eps: default_clustering_eps(),
            clustering_min_samples: default_clustering_min_samples(),
            max_ngram_length: default_max_ngram_length(),
            min_frequency_threshold: default_min_frequency_threshold(),
            transition_probability_floor: default_transition_floor(),
            max_sequence_length: default_max_sequence_length(),
            contamination_rate: default_contamination_rate(),
            isolation_trees: default_isolation_trees(),
            isolation_sample_size: default_isolation_sample_size(),
            semantic_max_clusters: default_semantic_max_clusters(),
            top_keywords: default_top_keywords(),
            seed: default_seed(),
        }
    }
}

/// Weights of the improvement score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImprovementWeights {
    #[serde(default = "default_w_time")]
    pub execution_time: f64,
    #[serde(default = "default_w_accuracy")]
    pub accuracy: f64,
    #[serde(default = "default_w_resource")]
    pub resource_usage: f64,
    #[serde(default = "default_w_reliability")]
    pub reliability: f64,
}

impl ImprovementWeights {
    pub fn weight(&self, metric: PerformanceMetric) -> f64 {
        match metric {
            PerformanceMetric::ExecutionTime => self.execution_time,
            PerformanceMetric::Accuracy => self.accuracy,
            PerformanceMetric::ResourceUsage => self.resource_usage,
            PerformanceMetric::Reliability => self.reliability,
        }
    }

    /// Reshape the weights around a single target metric: the target gets
    /// 0.7 and the rest share 0.3 in proportion to their configured weight.
    pub fn focused_on(&self, target: PerformanceMetric) -> ImprovementWeights {
        let others: f64 = PerformanceMetric::all()
            .into_iter()
            .filter(|m| *m != target)
            .map(|m| self.weight(m).max(0.0))
            .sum();
        let share = |m: PerformanceMetric| {
            if m == target {
                0.7
            } else if others > 0.0 {
                0.3 * self.weight(m).max(0.0) / others
            } else {
                0.1
            }
        };
        ImprovementWeights {
            execution_time: share(PerformanceMetric::ExecutionTime),
            accuracy: share(PerformanceMetric::Accuracy),
            resource_usage: share(PerformanceMetric::ResourceUsage),
            reliability: share(PerformanceMetric::Reliability),
        }
    }
}

impl Default for ImprovementWeights {
    fn default() -> Self {
        Self {
            execution_time: default_w_time(),
            accuracy: default_w_accuracy(),
            resource_usage: default_w_resource(),
            reliability: default_w_reliability(),
        }
    }
}

/// Rule optimization configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationConfig {
    /// Samples required before optimizing or retraining
    #[serde(default = "default_min_optimization_samples")]
    pub min_optimization_samples: usize,

    /// Minimum predicted overall improvement over the baseline
    #[serde(default = "default_improvement_threshold")]
    pub improvement_threshold: f64,

    /// Largest allowed |new - old| / max(|old|, range width) per parameter
    #[serde(default = "default_max_relative_change")]
    pub max_relative_change: f64,

    /// How far back the execution history is read
    #[serde(default = "default_history_window")]
    pub history_window_secs: u64,

    #[serde(default = "default_random_candidates")]
    pub random_candidates: usize,

    #[serde(default = "default_bayesian_candidates")]
    pub bayesian_candidates: usize,

    /// Random proposals scored by the acquisition function
    #[serde(default = "default_bayesian_pool")]
    pub bayesian_pool_size: usize,

    /// Exploration weight of the acquisition function
    #[serde(default = "default_bayesian_kappa")]
    pub bayesian_kappa: f64,

    /// Gradient step as a fraction of the range width
    #[serde(default = "default_gradient_step")]
    pub gradient_step: f64,

    #[serde(default)]
    pub weights: ImprovementWeights,

    /// Bounded optimization record history
    #[serde(default = "default_max_history_records")]
    pub max_history_records: usize,

    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            min_optimization_samples: default_min_optimization_samples(),
            improvement_threshold: default_improvement_threshold(),
            max_relative_change: default_max_relative_change(),
            history_window_secs: default_history_window(),
            random_candidates: default_random_candidates(),
            bayesian_candidates: default_bayesian_candidates(),
            bayesian_pool_size: default_bayesian_pool(),
            bayesian_kappa: default_bayesian_kappa(),
            gradient_step: default_gradient_step(),
            weights: ImprovementWeights::default(),
            max_history_records: default_max_history_records(),
            seed: default_seed(),
        }
    }
}

/// Performance predictor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionConfig {
    /// Bootstrap replicas per metric
    #[serde(default = "default_ensemble_members")]
    pub ensemble_members: usize,

    /// Ridge L2 penalty
    #[serde(default = "default_ridge_alpha")]
    pub ridge_alpha: f64,

    /// Features kept by the selector
    #[serde(default = "default_max_selected_features")]
    pub max_selected_features: usize,

    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            ensemble_members: default_ensemble_members(),
            ridge_alpha: default_ridge_alpha(),
            max_selected_features: default_max_selected_features(),
            seed: default_seed(),
        }
    }
}

/// Knowledge base configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    #[serde(default = "default_pattern_buffer")]
    pub pattern_buffer_size: usize,

    #[serde(default = "default_feedback_buffer")]
    pub feedback_buffer_size: usize,

    #[serde(default = "default_max_known_patterns")]
    pub max_known_patterns: usize,

    /// Multiplicative weight decay per refresh
    #[serde(default = "default_decay_rate")]
    pub decay_rate: f64,

    /// Known patterns whose weight falls below this are pruned
    #[serde(default = "default_prune_threshold")]
    pub prune_threshold: f64,

    /// Weight change applied per feedback entry
    #[serde(default = "default_feedback_step")]
    pub feedback_step: f64,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            pattern_buffer_size: default_pattern_buffer(),
            feedback_buffer_size: default_feedback_buffer(),
            max_known_patterns: default_max_known_patterns(),
            decay_rate: default_decay_rate(),
            prune_threshold: default_prune_threshold(),
            feedback_step: default_feedback_step(),
        }
    }
}

/// Background loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_optimization_interval")]
    pub optimization_interval_secs: u64,

    #[serde(default = "default_retrain_interval")]
    pub retrain_interval_secs: u64,

    #[serde(default = "default_learning_interval")]
    pub learning_interval_secs: u64,

    #[serde(default = "default_monitoring_interval")]
    pub monitoring_interval_secs: u64,

    /// Allowed drop of the observed score below the baseline
    #[serde(default = "default_regression_tolerance")]
    pub regression_tolerance: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            optimization_interval_secs: default_optimization_interval(),
            retrain_interval_secs: default_retrain_interval(),
            learning_interval_secs: default_learning_interval(),
            monitoring_interval_secs: default_monitoring_interval(),
            regression_tolerance: default_regression_tolerance(),
        }
    }
}

// Default value helpers
fn default_min_pattern_confidence() -> f64 {
    0.7
}

fn default_max_patterns() -> usize {
    100
}

fn default_clustering_eps() -> f64 {
    0.5
}

fn default_clustering_min_samples() -> usize {
    5
}

fn default_max_ngram_length() -> usize {
    4
}

fn default_min_frequency_threshold() -> f64 {
    0.1
}

fn default_transition_floor() -> f64 {
    0.1
}

fn default_max_sequence_length() -> usize {
    50
}

fn default_contamination_rate() -> f64 {
    0.1
}

fn default_isolation_trees() -> usize {
    100
}

fn default_isolation_sample_size() -> usize {
    256
}

fn default_semantic_max_clusters() -> usize {
    10
}

fn default_top_keywords() -> usize {
    5
}

fn default_seed() -> u64 {
    42
}

fn default_w_time() -> f64 {
    0.3
}

fn default_w_accuracy() -> f64 {
    0.4
}

fn default_w_resource() -> f64 {
    0.2
}

fn default_w_reliability() -> f64 {
    0.1
}

fn default_min_optimization_samples() -> usize {
    100
}

fn default_improvement_threshold() -> f64 {
    0.05
}

fn default_max_relative_change() -> f64 {
    1.0
}

fn default_history_window() -> u64 {
    30 * 24 * 3600
}

fn default_random_candidates() -> usize {
    10
}

fn default_bayesian_candidates() -> usize {
    5
}

fn default_bayesian_pool() -> usize {
    50
}

fn default_bayesian_kappa() -> f64 {
    1.0
}

fn default_gradient_step() -> f64 {
    0.2
}

fn default_max_history_records() -> usize {
    1000
}

fn default_ensemble_members() -> usize {
    5
}

fn default_ridge_alpha() -> f64 {
    1.0
}

fn default_max_selected_features() -> usize {
    10
}

fn default_pattern_buffer() -> usize {
    1000
}

fn default_feedback_buffer() -> usize {
    500
}

fn default_max_known_patterns() -> usize {
    5000
}

fn default_decay_rate() -> f64 {
    0.95
}

fn default_prune_threshold() -> f64 {
    0.3
}

fn default_feedback_step() -> f64 {
    0.1
}

fn default_optimization_interval() -> u64 {
    3600
}

fn default_retrain_interval() -> u64 {
    6 * 3600
}

fn default_learning_interval() -> u64 {
    1800
}

fn default_monitoring_interval() -> u64 {
    300
}

fn default_regression_tolerance() -> f64 {
    0.05
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_uses_defaults() {
        let d: DetectionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(d, DetectionConfig::default());
        assert_eq!(d.min_pattern_confidence, 0.7);
        assert_eq!(d.max_patterns_per_analysis, 100);

        let o: OptimizationConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(o.min_optimization_samples, 100);
        assert_eq!(o.weights.accuracy, 0.4);
    }

    #[test]
    fn focused_weights_sum_to_one() {
        let w = ImprovementWeights::default().focused_on(PerformanceMetric::Accuracy);
        assert!((w.accuracy - 0.7).abs() < 1e-12);
        let total = w.execution_time + w.accuracy + w.resource_usage + w.reliability;
        assert!((total - 1.0).abs() < 1e-12);
        // 0.3 split 0.3 : 0.2 : 0.1
        assert!((w.execution_time - 0.15).abs() < 1e-12);
        assert!((w.resource_usage - 0.10).abs() < 1e-12);
        assert!((w.reliability - 0.05).abs() < 1e-12);
    }

    #[test]
    fn partial_override() {
        let k: KnowledgeConfig = serde_json::from_str(r#"{"decay_rate": 0.5}"#).unwrap();
        assert_eq!(k.decay_rate, 0.5);
        assert_eq!(k.prune_threshold, 0.3);
    }
}
