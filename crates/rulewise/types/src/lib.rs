//! Rulewise Types - shared data model of the pattern intelligence engine
//!
//! Patterns, feature vectors, rule configurations, optimization candidates
//! and records, the error taxonomy, and the sub-configurations of every
//! engine layer. No behaviour lives here beyond small helpers.

#![deny(unsafe_code)]

pub mod buffer;
pub mod candidate;
pub mod config;
pub mod error;
pub mod features;
pub mod metrics;
pub mod pattern;
pub mod record;
pub mod rule;
pub mod stats;

pub use buffer::BoundedBuffer;
pub use candidate::{GenerationStrategy, OptimizationCandidate};
pub use config::{
    DetectionConfig, ImprovementWeights, KnowledgeConfig, OptimizationConfig, PredictionConfig,
    SchedulerConfig,
};
pub use error::{IntelError, IntelResult};
pub use features::{FeatureVector, NUMERIC_PROFILE_WIDTH, STRUCTURAL_COMPLEXITY_INDEX};
pub use metrics::{PerformanceMetric, PerformanceSample, TargetMetric};
pub use pattern::{clamp_unit, Pattern, PatternId, PatternType};
pub use record::{
    OptimizationOutcome, OptimizationRecord, OptimizationStatus, ValidationCheck,
    ValidationResult,
};
pub use rule::{
    AdaptiveRule, Constraints, ParameterRange, Parameters, RuleConfiguration, RuleContext,
    RuleFragment, RuleModification,
};
