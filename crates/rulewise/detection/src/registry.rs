//! Detector registry keyed by pattern type.
//!
//! Backend selection happens once, at construction: a primary backend that
//! reports `ModelUnavailable` for the active configuration is replaced by
//! its deterministic fallback.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use rulewise_types::{DetectionConfig, PatternType};

use crate::detectors::{
    DbscanStructuralDetector, HourOfDayDetector, IsolationForestDetector,
    KeywordFrequencyDetector, PatternDetector, QuantileBucketDetector, SequenceMiningDetector,
    TfIdfSemanticDetector, TimeSeriesDetector, TokenFrequencyDetector, ZScoreOutlierDetector,
};

#[derive(Clone)]
pub struct DetectorRegistry {
    detectors: BTreeMap<PatternType, Arc<dyn PatternDetector>>,
    fallbacks: Vec<PatternType>,
}

/// A primary backend and the fallback that replaces it when unavailable.
pub type BackendPair = (Arc<dyn PatternDetector>, Arc<dyn PatternDetector>);

/// The built-in backends, one pair per pattern type.
pub fn standard_backends() -> Vec<BackendPair> {
    vec![
        backend_pair(DbscanStructuralDetector, QuantileBucketDetector),
        backend_pair(SequenceMiningDetector, TokenFrequencyDetector),
        backend_pair(TfIdfSemanticDetector, KeywordFrequencyDetector),
        backend_pair(TimeSeriesDetector, HourOfDayDetector),
        backend_pair(IsolationForestDetector, ZScoreOutlierDetector),
    ]
}

pub fn backend_pair(
    primary: impl PatternDetector + 'static,
    fallback: impl PatternDetector + 'static,
) -> BackendPair {
    (Arc::new(primary), Arc::new(fallback))
}

impl DetectorRegistry {
    /// Build the standard registry for `config`, installing fallbacks where
    /// a primary backend is unavailable.
    pub fn new(config: &DetectionConfig) -> Self {
        Self::from_backends(config, standard_backends())
    }

    /// Build a registry from backend pairs. Every detector goes through
    /// [`register`](Self::register); later pairs replace earlier ones of the
    /// same pattern type.
    pub fn from_backends(
        config: &DetectionConfig,
        backends: impl IntoIterator<Item = BackendPair>,
    ) -> Self {
        let mut registry = Self::empty();
        for (primary, fallback) in backends {
            let pattern_type = primary.pattern_type();
            match primary.check_available(config) {
                Ok(()) => {
                    debug!(%pattern_type, backend = primary.backend(), "detector ready");
                    registry.register(primary);
                }
                Err(e) => {
                    warn!(
                        %pattern_type,
                        primary = primary.backend(),
                        fallback = fallback.backend(),
                        reason = %e,
                        "primary detector unavailable, using fallback"
                    );
                    registry.register(fallback);
                    registry.fallbacks.push(pattern_type);
                }
            }
        }
        registry
    }

    /// A registry with no detectors.
    pub fn empty() -> Self {
        Self {
            detectors: BTreeMap::new(),
            fallbacks: Vec::new(),
        }
    }

    /// Install a detector for its pattern type, returning the one it replaced.
    pub fn register(
        &mut self,
        detector: Arc<dyn PatternDetector>,
    ) -> Option<Arc<dyn PatternDetector>> {
        let pattern_type = detector.pattern_type();
        self.fallbacks.retain(|t| *t != pattern_type);
        self.detectors.insert(pattern_type, detector)
    }

    pub fn get(&self, pattern_type: PatternType) -> Option<Arc<dyn PatternDetector>> {
        self.detectors.get(&pattern_type).cloned()
    }

    /// Detectors for the requested types, in canonical type order.
    /// An empty request selects every registered detector.
    pub fn select(&self, requested: &[PatternType]) -> Vec<Arc<dyn PatternDetector>> {
        self.detectors
            .iter()
            .filter(|(t, _)| requested.is_empty() || requested.contains(t))
            .map(|(_, d)| Arc::clone(d))
            .collect()
    }

    /// Active backend name per pattern type.
    pub fn backends(&self) -> BTreeMap<String, String> {
        self.detectors
            .iter()
            .map(|(t, d)| (t.to_string(), d.backend().to_string()))
            .collect()
    }

    /// Pattern types currently served by a fallback.
    pub fn fallbacks(&self) -> &[PatternType] {
        &self.fallbacks
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

impl fmt::Debug for DetectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectorRegistry")
            .field("backends", &self.backends())
            .field("fallbacks", &self.fallbacks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rulewise_types::{FeatureVector, IntelError, IntelResult, Pattern};

    struct Custom;

    impl PatternDetector for Custom {
        fn pattern_type(&self) -> PatternType {
            PatternType::Semantic
        }
        fn backend(&self) -> &str {
            "custom"
        }
        fn detect(&self, _: &[FeatureVector], _: &DetectionConfig) -> IntelResult<Vec<Pattern>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn default_registry_uses_primaries() {
        let registry = DetectorRegistry::new(&DetectionConfig::default());
        assert_eq!(registry.len(), 5);
        assert!(registry.fallbacks().is_empty());
        assert_eq!(registry.backends()["anomaly"], "isolation_forest");
    }

    #[test]
    fn unavailable_primaries_fall_back() {
        let config = DetectionConfig {
            isolation_trees: 0,
            clustering_eps: -1.0,
            ..DetectionConfig::default()
        };
        let registry = DetectorRegistry::new(&config);
        assert_eq!(registry.len(), 5);
        assert_eq!(
            registry.fallbacks(),
            &[PatternType::Structural, PatternType::Anomaly]
        );
        assert_eq!(registry.backends()["anomaly"], "zscore");
        assert_eq!(registry.backends()["structural"], "quantile_bucket");
    }

    struct Unavailable;

    impl PatternDetector for Unavailable {
        fn pattern_type(&self) -> PatternType {
            PatternType::Semantic
        }
        fn backend(&self) -> &str {
            "unavailable"
        }
        fn check_available(&self, _: &DetectionConfig) -> IntelResult<()> {
            Err(IntelError::ModelUnavailable("no vocabulary".into()))
        }
        fn detect(&self, _: &[FeatureVector], _: &DetectionConfig) -> IntelResult<Vec<Pattern>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn custom_pairs_share_the_registration_path() {
        let mut backends = standard_backends();
        backends.push(backend_pair(Unavailable, Custom));
        let registry = DetectorRegistry::from_backends(&DetectionConfig::default(), backends);
        assert_eq!(registry.len(), 5);
        assert_eq!(registry.backends()["semantic"], "custom");
        assert_eq!(registry.fallbacks(), &[PatternType::Semantic]);

        let mut registry = registry;
        registry.register(Arc::new(Custom));
        assert!(registry.fallbacks().is_empty());
    }

    #[test]
    fn register_replaces_and_select_filters() {
        let mut registry = DetectorRegistry::new(&DetectionConfig::default());
        let previous = registry.register(Arc::new(Custom));
        assert_eq!(previous.map(|d| d.backend().to_string()).as_deref(), Some("tfidf_kmeans"));
        let selected = registry.select(&[PatternType::Semantic, PatternType::Anomaly]);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].backend(), "custom");
        assert_eq!(registry.select(&[]).len(), 5);
    }
}
