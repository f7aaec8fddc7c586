use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use rulewise_types::Pattern;

use crate::postprocess::PostProcessStats;

/// Bookkeeping for one `detect_patterns` call.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DetectionMetadata {
    pub batch_hash: String,
    pub record_count: usize,
    /// Pattern type → backend that ran.
    pub detectors_run: BTreeMap<String, String>,
    /// Pattern type → raw pattern count before post-processing.
    pub raw_counts: BTreeMap<String, usize>,
    /// Backend → failure reason. A failed detector contributes no patterns.
    pub errors: BTreeMap<String, String>,
    pub post_processing: PostProcessStats,
    pub duration_ms: u64,
    pub cache_hit: bool,
}

/// Ranked patterns plus the metadata of the run that produced them.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DetectionReport {
    pub patterns: Vec<Pattern>,
    pub metadata: DetectionMetadata,
}

impl DetectionReport {
    pub fn is_degraded(&self) -> bool {
        !self.metadata.errors.is_empty()
    }
}
