use thiserror::Error;

/// Errors raised by the pattern intelligence engine.
///
/// Expected business outcomes of an optimization run (`insufficient_data`,
/// `validation_failed`) are reported as [`crate::OptimizationStatus`] values;
/// these variants are the internal taxonomy the engine maps onto them.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IntelError {
    #[error("insufficient data: {samples} samples < minimum {minimum}")]
    DataInsufficient { samples: usize, minimum: usize },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("detector '{detector}' failed: {reason}")]
    DetectorFailure { detector: String, reason: String },

    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("apply failed for rule {rule_id}: {reason}")]
    ApplyFailure { rule_id: String, reason: String },

    #[error("collaborator error: {0}")]
    Collaborator(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("worker pool error: {0}")]
    WorkerPool(String),

    #[error("optimization already in progress for rule {0}")]
    OptimizationInProgress(String),

    #[error("scheduler unavailable: {0}")]
    SchedulerUnavailable(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("lock poisoned: {0}")]
    Lock(String),
}

impl From<serde_json::Error> for IntelError {
    fn from(e: serde_json::Error) -> Self {
        IntelError::Serialization(e.to_string())
    }
}

/// Convenience alias for engine results.
pub type IntelResult<T> = Result<T, IntelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = IntelError::DataInsufficient {
            samples: 50,
            minimum: 100,
        };
        assert!(e.to_string().contains("50"));
        assert!(e.to_string().contains("100"));

        let e = IntelError::DetectorFailure {
            detector: "semantic".into(),
            reason: "empty corpus".into(),
        };
        assert!(e.to_string().contains("semantic"));
        assert!(e.to_string().contains("empty corpus"));

        let e = IntelError::OptimizationInProgress("rule-7".into());
        assert!(e.to_string().contains("rule-7"));
    }

    #[test]
    fn serde_error_conversion() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: IntelError = parse.unwrap_err().into();
        assert!(matches!(err, IntelError::Serialization(_)));
    }
}
