//! Contracts with the systems the engine reads from and writes to.
//!
//! Provides:
//! - `RuleStore` for reading and updating rule configurations
//! - `ExecutionHistorySource` for historical performance samples
//! - `DetectionCache` for memoizing detection reports
//! - `ModelRegistry` for persisting trained model artifacts
//!
//! plus in-memory implementations used by tests and the CLI.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tokio::time::Instant;

use rulewise_types::{IntelError, IntelResult, Parameters, PerformanceSample, RuleConfiguration};

/// Authoritative store of rule configurations.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn get_configuration(&self, rule_id: &str) -> IntelResult<RuleConfiguration>;

    /// Replace a rule's parameters; the returned configuration carries the new version.
    async fn update_configuration(
        &self,
        rule_id: &str,
        parameters: &Parameters,
    ) -> IntelResult<RuleConfiguration>;
}

/// Source of historical rule executions.
#[async_trait]
pub trait ExecutionHistorySource: Send + Sync {
    /// Samples of `rule_id` no older than `window`, oldest first.
    async fn get_performance_samples(
        &self,
        rule_id: &str,
        window: Duration,
    ) -> IntelResult<Vec<PerformanceSample>>;

    /// Rules that have any recorded history.
    async fn rule_ids(&self) -> IntelResult<Vec<String>>;
}

/// Key/value cache with per-entry TTL.
#[async_trait]
pub trait DetectionCache: Send + Sync {
    async fn get(&self, key: &str) -> IntelResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> IntelResult<()>;
}

/// Persistent home of trained model artifacts.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    async fn save(
        &self,
        model_type: &str,
        bytes: Vec<u8>,
        metrics: BTreeMap<String, f64>,
    ) -> IntelResult<()>;

    async fn load(&self, model_type: &str) -> IntelResult<Option<Vec<u8>>>;
}

/// The collaborators an engine is constructed with.
#[derive(Clone)]
pub struct Collaborators {
    pub rule_store: Arc<dyn RuleStore>,
    pub history: Arc<dyn ExecutionHistorySource>,
    pub cache: Option<Arc<dyn DetectionCache>>,
    pub models: Option<Arc<dyn ModelRegistry>>,
}

impl Collaborators {
    pub fn new(rule_store: Arc<dyn RuleStore>, history: Arc<dyn ExecutionHistorySource>) -> Self {
        Self {
            rule_store,
            history,
            cache: None,
            models: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn DetectionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_model_registry(mut self, models: Arc<dyn ModelRegistry>) -> Self {
        self.models = Some(models);
        self
    }

    /// Fresh in-memory collaborators for every contract.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryRuleStore::new()),
            Arc::new(InMemoryHistorySource::new()),
        )
        .with_cache(Arc::new(InMemoryDetectionCache::new()))
        .with_model_registry(Arc::new(InMemoryModelRegistry::new()))
    }
}

// ── In-memory rule store ────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemoryRuleStore {
    rules: RwLock<HashMap<String, RuleConfiguration>>,
    reject_updates: AtomicBool,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, configuration: RuleConfiguration) {
        let mut rules = self.rules.write().await;
        rules.insert(configuration.rule_id.clone(), configuration);
    }

    /// Make every subsequent update fail, as an unreachable store would.
    pub fn reject_updates(&self, reject: bool) {
        self.reject_updates.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn get_configuration(&self, rule_id: &str) -> IntelResult<RuleConfiguration> {
        let rules = self.rules.read().await;
        rules
            .get(rule_id)
            .cloned()
            .ok_or_else(|| IntelError::Collaborator(format!("unknown rule {}", rule_id)))
    }

    async fn update_configuration(
        &self,
        rule_id: &str,
        parameters: &Parameters,
    ) -> IntelResult<RuleConfiguration> {
        if self.reject_updates.load(Ordering::SeqCst) {
            return Err(IntelError::ApplyFailure {
                rule_id: rule_id.to_string(),
                reason: "rule store rejected the update".into(),
            });
        }
        let mut rules = self.rules.write().await;
        let entry = rules
            .entry(rule_id.to_string())
            .or_insert_with(|| RuleConfiguration {
                rule_id: rule_id.to_string(),
                parameters: Parameters::new(),
                version: 0,
            });
        entry.parameters = parameters.clone();
        entry.version += 1;
        Ok(entry.clone())
    }
}

// ── In-memory history ───────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemoryHistorySource {
    samples: RwLock<HashMap<String, Vec<PerformanceSample>>>,
}

impl InMemoryHistorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, rule_id: &str, sample: PerformanceSample) {
        let mut samples = self.samples.write().await;
        samples.entry(rule_id.to_string()).or_default().push(sample);
    }

    pub async fn extend(&self, rule_id: &str, batch: impl IntoIterator<Item = PerformanceSample>) {
        let mut samples = self.samples.write().await;
        samples.entry(rule_id.to_string()).or_default().extend(batch);
    }
}

#[async_trait]
impl ExecutionHistorySource for InMemoryHistorySource {
    async fn get_performance_samples(
        &self,
        rule_id: &str,
        window: Duration,
    ) -> IntelResult<Vec<PerformanceSample>> {
        let cutoff = chrono::Duration::from_std(window)
            .ok()
            .and_then(|w| Utc::now().checked_sub_signed(w));
        let samples = self.samples.read().await;
        let mut out: Vec<PerformanceSample> = samples
            .get(rule_id)
            .map(|all| {
                all.iter()
                    .filter(|s| cutoff.map_or(true, |c| s.timestamp >= c))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by_key(|s| s.timestamp);
        Ok(out)
    }

    async fn rule_ids(&self) -> IntelResult<Vec<String>> {
        let samples = self.samples.read().await;
        let mut ids: Vec<String> = samples.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

// ── In-memory cache ─────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemoryDetectionCache {
    entries: RwLock<HashMap<String, (Vec<u8>, Instant)>>,
}

impl InMemoryDetectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl DetectionCache for InMemoryDetectionCache {
    async fn get(&self, key: &str) -> IntelResult<Option<Vec<u8>>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|(_, expires)| Instant::now() < *expires)
            .map(|(bytes, _)| bytes.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> IntelResult<()> {
        let mut entries = self.entries.write().await;
        entries.retain(|_, (_, expires)| Instant::now() < *expires);
        entries.insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }
}

// ── In-memory model registry ────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemoryModelRegistry {
    artifacts: RwLock<HashMap<String, (Vec<u8>, BTreeMap<String, f64>)>>,
}

impl InMemoryModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn metrics(&self, model_type: &str) -> Option<BTreeMap<String, f64>> {
        let artifacts = self.artifacts.read().await;
        artifacts.get(model_type).map(|(_, m)| m.clone())
    }
}

#[async_trait]
impl ModelRegistry for InMemoryModelRegistry {
    async fn save(
        &self,
        model_type: &str,
        bytes: Vec<u8>,
        metrics: BTreeMap<String, f64>,
    ) -> IntelResult<()> {
        let mut artifacts = self.artifacts.write().await;
        artifacts.insert(model_type.to_string(), (bytes, metrics));
        Ok(())
    }

    async fn load(&self, model_type: &str) -> IntelResult<Option<Vec<u8>>> {
        let artifacts = self.artifacts.read().await;
        Ok(artifacts.get(model_type).map(|(b, _)| b.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rule_store_bumps_version_and_can_reject() {
        let store = InMemoryRuleStore::new();
        let mut params = Parameters::new();
        params.insert("threshold".into(), 0.5);
        store.insert(RuleConfiguration::new("r1", params.clone())).await;

        params.insert("threshold".into(), 0.6);
        let updated = store.update_configuration("r1", &params).await.unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(store.get_configuration("r1").await.unwrap().parameters, params);

        store.reject_updates(true);
        let err = store.update_configuration("r1", &params).await.unwrap_err();
        assert!(matches!(err, IntelError::ApplyFailure { .. }));
        assert!(store.get_configuration("missing").await.is_err());
    }

    #[tokio::test]
    async fn history_respects_window() {
        let history = InMemoryHistorySource::new();
        let old = PerformanceSample::new(Parameters::new())
            .with_timestamp(Utc::now() - chrono::Duration::days(40));
        history.record("r1", old).await;
        history.record("r1", PerformanceSample::new(Parameters::new())).await;

        let recent = history
            .get_performance_samples("r1", Duration::from_secs(30 * 86_400))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(history.rule_ids().await.unwrap(), vec!["r1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_entries_expire() {
        let cache = InMemoryDetectionCache::new();
        cache.set("k", b"v".to_vec(), Duration::from_secs(10)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn model_registry_round_trips() {
        let registry = InMemoryModelRegistry::new();
        let mut metrics = BTreeMap::new();
        metrics.insert("accuracy".to_string(), 0.9);
        registry.save("ensemble", vec![1, 2, 3], metrics).await.unwrap();
        assert_eq!(registry.load("ensemble").await.unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(registry.metrics("ensemble").await.unwrap()["accuracy"], 0.9);
        assert_eq!(registry.load("other").await.unwrap(), None);
    }
}
