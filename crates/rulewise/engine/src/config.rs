//! Configuration for the pattern intelligence engine

use serde::{Deserialize, Serialize};

use rulewise_types::{
    DetectionConfig, IntelError, IntelResult, KnowledgeConfig, OptimizationConfig,
    PredictionConfig, SchedulerConfig,
};

/// Main engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Pattern detection
    #[serde(default)]
    pub detection: DetectionConfig,

    /// Rule optimization
    #[serde(default)]
    pub optimization: OptimizationConfig,

    /// Performance prediction
    #[serde(default)]
    pub prediction: PredictionConfig,

    /// Knowledge base
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// Continuous learning loops
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Runtime resources
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Runtime resource configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Concurrent CPU-bound tasks
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Detection cache entry lifetime
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Capacity of the event broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            cache_ttl_secs: default_cache_ttl(),
            event_channel_capacity: default_event_capacity(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_worker_pool_size() -> usize {
    4
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_event_capacity() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_string()
}

impl EngineConfig {
    /// Load configuration: defaults, then an optional file, then `RULEWISE__*`
    /// environment variables (`RULEWISE__RUNTIME__WORKER_POOL_SIZE=8`).
    pub fn load(path: Option<&str>) -> IntelResult<Self> {
        let config_err = |e: config::ConfigError| IntelError::Config(e.to_string());

        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&EngineConfig::default()).map_err(config_err)?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("RULEWISE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let loaded: EngineConfig = builder
            .build()
            .map_err(config_err)?
            .try_deserialize()
            .map_err(config_err)?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject values no component can run with.
    pub fn validate(&self) -> IntelResult<()> {
        if self.runtime.worker_pool_size == 0 {
            return Err(IntelError::Config("runtime.worker_pool_size must be > 0".into()));
        }
        if !(0.0..=0.5).contains(&self.detection.contamination_rate) {
            return Err(IntelError::Config(
                "detection.contamination_rate must be within [0, 0.5]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.detection.min_pattern_confidence) {
            return Err(IntelError::Config(
                "detection.min_pattern_confidence must be within [0, 1]".into(),
            ));
        }
        if self.knowledge.pattern_buffer_size == 0 || self.knowledge.feedback_buffer_size == 0 {
            return Err(IntelError::Config("knowledge buffers must have capacity".into()));
        }
        let intervals = [
            self.scheduler.optimization_interval_secs,
            self.scheduler.retrain_interval_secs,
            self.scheduler.learning_interval_secs,
            self.scheduler.monitoring_interval_secs,
        ];
        if intervals.contains(&0) {
            return Err(IntelError::Config("scheduler intervals must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.runtime.worker_pool_size, 4);
        assert_eq!(config.optimization.min_optimization_samples, 100);
        assert_eq!(config.detection.min_pattern_confidence, 0.7);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = EngineConfig::load(None).unwrap();
        assert_eq!(config.runtime.cache_ttl_secs, 3600);
        assert_eq!(config.scheduler.monitoring_interval_secs, 300);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"runtime": {"worker_pool_size": 2}}"#).unwrap();
        assert_eq!(config.runtime.worker_pool_size, 2);
        assert_eq!(config.runtime.cache_ttl_secs, 3600);
        assert_eq!(config.knowledge.decay_rate, 0.95);
    }

    #[test]
    fn test_validate_rejects_zero_pool() {
        let mut config = EngineConfig::default();
        config.runtime.worker_pool_size = 0;
        assert!(matches!(config.validate(), Err(IntelError::Config(_))));
    }
}
