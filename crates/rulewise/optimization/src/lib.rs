//! Rulewise Optimization - adaptive rules and parameter search
//!
//! Candidate search runs in four steps. The generator merges proposals
//! from the registered strategies. The evaluator scores them with the
//! performance models. The selector applies hard constraints, and the
//! validator gates the winner before anything is written to a rule store.

#![deny(unsafe_code)]

pub mod evaluator;
pub mod generator;
pub mod rule_generator;
pub mod selector;
pub mod strategies;
pub mod validator;

pub use evaluator::{
    mean_context, observed_score, predicted_score, weighted_score, weights_for, Baseline,
    CandidateEvaluator, EnsembleSurrogate, OVERALL_SCORE,
};
pub use generator::CandidateGenerator;
pub use rule_generator::{AdaptiveRuleGenerator, RuleTemplate};
pub use selector::{constraint_violations, CandidateSelector};
pub use strategies::{CandidateStrategy, GenerationRequest, Surrogate};
pub use validator::OptimizationValidator;
