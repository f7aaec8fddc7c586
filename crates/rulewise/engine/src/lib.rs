//! Rulewise Engine - pattern intelligence as a service
//!
//! The engine provides:
//! - Pattern detection over raw records, fanned out on a bounded worker pool
//! - Adaptive rule synthesis from detected patterns
//! - Model-guided rule parameter optimization with validation and rollback
//! - Continuous learning loops for retraining, knowledge upkeep and monitoring
//!
//! Everything external (rule storage, execution history, caching, model
//! persistence) is reached through the traits in [`collaborators`].

#![deny(unsafe_code)]

pub mod collaborators;
pub mod config;
mod engine;
pub mod events;
pub mod metrics;
mod optimizer;
mod scheduler;
mod service;
pub mod telemetry;
pub mod worker;

pub use collaborators::{
    Collaborators, DetectionCache, ExecutionHistorySource, InMemoryDetectionCache,
    InMemoryHistorySource, InMemoryModelRegistry, InMemoryRuleStore, ModelRegistry, RuleStore,
};
pub use config::{EngineConfig, LoggingConfig, RuntimeConfig};
pub use engine::{PatternInsights, PatternIntelligenceEngine};
pub use events::EngineEvent;
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use service::{DetectionOptions, MonitoringHook, MonitoringSummary, ENSEMBLE_MODEL_TYPE};
pub use worker::WorkerPool;
