//! Rulewise Prediction - performance forecasting for rule configurations
//!
//! One bagged ridge ensemble per metric (execution time, accuracy, resource
//! usage, reliability) over a shared schema of rule parameters and context
//! features. Trained ensembles are immutable and swapped in whole.

#![deny(unsafe_code)]

pub mod model;
pub mod predictor;
pub mod ridge;
pub mod scaler;
pub mod selector;

pub use model::{
    FeatureSchema, MetricEstimate, MetricModel, ModelEnsemble, ModelInfo, PerformancePrediction,
    CONTEXT_PREFIX,
};
pub use predictor::PerformancePredictor;
