//! Rulewise Detection - from raw records to ranked patterns
//!
//! ```text
//!   records ──► FeatureExtractor ──► DetectorRegistry ──► PatternPostProcessor ──► KnowledgeBase
//!                                    (5 strategies,        (dedup, filter, rank,
//!                                     fallbacks)            truncate, stamp)
//! ```
//!
//! Everything here is synchronous and CPU-bound; the engine decides where it
//! runs.

#![deny(unsafe_code)]

pub mod detectors;
pub mod features;
pub mod knowledge;
pub mod postprocess;
pub mod registry;
pub mod report;

pub use detectors::PatternDetector;
pub use features::{batch_hash, FeatureExtractor};
pub use knowledge::{Feedback, KnowledgeBase, KnowledgeStatistics, KnownPattern, RefreshSummary};
pub use postprocess::{PatternPostProcessor, PostProcessStats};
pub use registry::{backend_pair, standard_backends, BackendPair, DetectorRegistry};
pub use report::{DetectionMetadata, DetectionReport};
