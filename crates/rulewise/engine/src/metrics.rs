//! Engine counters reported through insights.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub detections: AtomicU64,
    pub detection_cache_hits: AtomicU64,
    pub patterns_detected: AtomicU64,
    pub detector_failures: AtomicU64,
    pub optimizations_started: AtomicU64,
    pub optimizations_completed: AtomicU64,
    pub optimizations_failed: AtomicU64,
    pub optimizations_rejected: AtomicU64,
    pub insufficient_data: AtomicU64,
    pub rollbacks: AtomicU64,
    pub models_trained: AtomicU64,
    pub knowledge_refreshes: AtomicU64,
    pub regressions_detected: AtomicU64,
}

/// Point-in-time copy of [`EngineMetrics`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub detections: u64,
    pub detection_cache_hits: u64,
    pub patterns_detected: u64,
    pub detector_failures: u64,
    pub optimizations_started: u64,
    pub optimizations_completed: u64,
    pub optimizations_failed: u64,
    pub optimizations_rejected: u64,
    pub insufficient_data: u64,
    pub rollbacks: u64,
    pub models_trained: u64,
    pub knowledge_refreshes: u64,
    pub regressions_detected: u64,
}

impl EngineMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            detections: load(&self.detections),
            detection_cache_hits: load(&self.detection_cache_hits),
            patterns_detected: load(&self.patterns_detected),
            detector_failures: load(&self.detector_failures),
            optimizations_started: load(&self.optimizations_started),
            optimizations_completed: load(&self.optimizations_completed),
            optimizations_failed: load(&self.optimizations_failed),
            optimizations_rejected: load(&self.optimizations_rejected),
            insufficient_data: load(&self.insufficient_data),
            rollbacks: load(&self.rollbacks),
            models_trained: load(&self.models_trained),
            knowledge_refreshes: load(&self.knowledge_refreshes),
            regressions_detected: load(&self.regressions_detected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let metrics = EngineMetrics::default();
        EngineMetrics::incr(&metrics.detections);
        EngineMetrics::add(&metrics.patterns_detected, 7);
        let snap = metrics.snapshot();
        assert_eq!(snap.detections, 1);
        assert_eq!(snap.patterns_detected, 7);
        assert_eq!(snap.rollbacks, 0);
    }
}
