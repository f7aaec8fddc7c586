use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use rulewise_types::{
    IntelError, IntelResult, Parameters, PerformanceSample, PredictionConfig,
};

use crate::model::{ModelEnsemble, ModelInfo, PerformancePrediction};

/// Holds the engine-wide ensemble plus one ensemble per optimized rule.
///
/// Readers clone the `Arc` under a short read lock and predict without
/// holding it. Training happens off-lock; installing is a single swap.
pub struct PerformancePredictor {
    config: PredictionConfig,
    global: RwLock<Option<Arc<ModelEnsemble>>>,
    scoped: RwLock<BTreeMap<String, Arc<ModelEnsemble>>>,
}

impl PerformancePredictor {
    pub fn new(config: PredictionConfig) -> Self {
        Self {
            config,
            global: RwLock::new(None),
            scoped: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &PredictionConfig {
        &self.config
    }

    pub fn ensemble(&self) -> IntelResult<Option<Arc<ModelEnsemble>>> {
        let guard = self
            .global
            .read()
            .map_err(|_| IntelError::Lock("predictor".into()))?;
        Ok(guard.clone())
    }

    pub fn scoped_ensemble(&self, rule_id: &str) -> IntelResult<Option<Arc<ModelEnsemble>>> {
        let guard = self
            .scoped
            .read()
            .map_err(|_| IntelError::Lock("predictor".into()))?;
        Ok(guard.get(rule_id).cloned())
    }

    /// Predict every metric with the engine-wide ensemble.
    pub fn predict(
        &self,
        parameters: &Parameters,
        context: &BTreeMap<String, f64>,
    ) -> IntelResult<PerformancePrediction> {
        let ensemble = self
            .ensemble()?
            .ok_or_else(|| IntelError::ModelUnavailable("predictor has not been trained".into()))?;
        Ok(ensemble.predict(parameters, context))
    }

    /// Train a fresh engine-wide ensemble and install it.
    ///
    /// Returns the ensemble this call installed, which a later swap may
    /// already have replaced.
    pub fn retrain(
        &self,
        samples: &[PerformanceSample],
        min_samples: usize,
    ) -> IntelResult<Arc<ModelEnsemble>> {
        let ensemble = Arc::new(self.fit(samples, min_samples)?);
        self.install(ensemble.clone())?;
        info!(
            samples = ensemble.sample_count,
            schema = %ensemble.info().feature_schema_version,
            "Performance models retrained"
        );
        Ok(ensemble)
    }

    /// Train an ensemble for one rule's history and install it under that rule.
    pub fn retrain_scoped(
        &self,
        rule_id: &str,
        samples: &[PerformanceSample],
        min_samples: usize,
    ) -> IntelResult<Arc<ModelEnsemble>> {
        let ensemble = Arc::new(self.fit(samples, min_samples)?);
        {
            let mut guard = self
                .scoped
                .write()
                .map_err(|_| IntelError::Lock("predictor".into()))?;
            guard.insert(rule_id.to_string(), ensemble.clone());
        }
        debug!(rule_id, samples = samples.len(), "Rule-scoped models retrained");
        Ok(ensemble)
    }

    pub fn install(&self, ensemble: Arc<ModelEnsemble>) -> IntelResult<()> {
        let mut guard = self
            .global
            .write()
            .map_err(|_| IntelError::Lock("predictor".into()))?;
        *guard = Some(ensemble);
        Ok(())
    }

    /// Restore the engine-wide ensemble from a serialized artifact.
    pub fn import(&self, bytes: &[u8]) -> IntelResult<ModelInfo> {
        let ensemble = ModelEnsemble::from_bytes(bytes)?;
        let info = ensemble.info();
        self.install(Arc::new(ensemble))?;
        Ok(info)
    }

    pub fn model_info(&self) -> IntelResult<Option<ModelInfo>> {
        Ok(self.ensemble()?.map(|e| e.info()))
    }

    fn fit(&self, samples: &[PerformanceSample], min_samples: usize) -> IntelResult<ModelEnsemble> {
        let minimum = min_samples.max(2);
        if samples.len() < minimum {
            return Err(IntelError::DataInsufficient {
                samples: samples.len(),
                minimum,
            });
        }
        ModelEnsemble::train(samples, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rulewise_types::PerformanceMetric;

    fn samples(n: usize) -> Vec<PerformanceSample> {
        (0..n)
            .map(|i| {
                let mut p = Parameters::new();
                p.insert("batch_size".into(), 10.0 + i as f64);
                PerformanceSample::new(p).with_metrics(1.0 + i as f64 * 0.1, 0.5, 0.8)
            })
            .collect()
    }

    #[test]
    fn predict_before_training_is_unavailable() {
        let predictor = PerformancePredictor::new(PredictionConfig::default());
        let err = predictor.predict(&Parameters::new(), &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, IntelError::ModelUnavailable(_)));
        assert!(predictor.model_info().unwrap().is_none());
    }

    #[test]
    fn retrain_enforces_minimum_and_installs() {
        let predictor = PerformancePredictor::new(PredictionConfig::default());
        let err = predictor.retrain(&samples(5), 10).unwrap_err();
        assert_eq!(err, IntelError::DataInsufficient { samples: 5, minimum: 10 });

        let installed = predictor.retrain(&samples(30), 10).unwrap();
        assert_eq!(installed.info().sample_count, 30);
        let mut p = Parameters::new();
        p.insert("batch_size".into(), 20.0);
        let prediction = predictor.predict(&p, &BTreeMap::new()).unwrap();
        assert!((prediction.get(PerformanceMetric::ExecutionTime) - 2.0).abs() < 0.1);
    }

    #[test]
    fn readers_keep_their_snapshot_across_swaps() {
        let predictor = PerformancePredictor::new(PredictionConfig::default());
        let first = predictor.retrain(&samples(20), 2).unwrap();
        let before = predictor.ensemble().unwrap().unwrap();
        let second = predictor.retrain(&samples(40), 2).unwrap();
        let after = predictor.ensemble().unwrap().unwrap();
        assert_eq!(before.sample_count, 20);
        assert_eq!(after.sample_count, 40);
        // Each call hands back its own artifact, not whatever is current.
        assert_eq!(first.sample_count, 20);
        assert!(Arc::ptr_eq(&second, &after));
        assert!(!Arc::ptr_eq(&first, &after));
    }

    #[test]
    fn scoped_models_are_independent() {
        let predictor = PerformancePredictor::new(PredictionConfig::default());
        predictor.retrain_scoped("rule-a", &samples(12), 2).unwrap();
        assert!(predictor.scoped_ensemble("rule-a").unwrap().is_some());
        assert!(predictor.scoped_ensemble("rule-b").unwrap().is_none());
        assert!(predictor.ensemble().unwrap().is_none());
    }

    #[test]
    fn import_restores_exported_artifact() {
        let source = PerformancePredictor::new(PredictionConfig::default());
        source.retrain(&samples(25), 2).unwrap();
        let bytes = source.ensemble().unwrap().unwrap().to_bytes().unwrap();

        let target = PerformancePredictor::new(PredictionConfig::default());
        let info = target.import(&bytes).unwrap();
        assert_eq!(info.sample_count, 25);
        assert!(target.predict(&Parameters::new(), &BTreeMap::new()).is_ok());
    }
}
