use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rule::Parameters;

/// Metrics forecast by the performance predictor, one model each.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceMetric {
    ExecutionTime,
    Accuracy,
    ResourceUsage,
    Reliability,
}

impl PerformanceMetric {
    pub fn all() -> [PerformanceMetric; 4] {
        [
            PerformanceMetric::ExecutionTime,
            PerformanceMetric::Accuracy,
            PerformanceMetric::ResourceUsage,
            PerformanceMetric::Reliability,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PerformanceMetric::ExecutionTime => "execution_time",
            PerformanceMetric::Accuracy => "accuracy",
            PerformanceMetric::ResourceUsage => "resource_usage",
            PerformanceMetric::Reliability => "reliability",
        }
    }

    /// Whether larger observed values are better.
    pub fn higher_is_better(&self) -> bool {
        matches!(self, PerformanceMetric::Accuracy | PerformanceMetric::Reliability)
    }

    /// Read this metric's observed value from a sample.
    pub fn observe(&self, sample: &PerformanceSample) -> f64 {
        match self {
            PerformanceMetric::ExecutionTime => sample.execution_time,
            PerformanceMetric::Accuracy => sample.accuracy,
            PerformanceMetric::ResourceUsage => sample.resource_usage,
            PerformanceMetric::Reliability => {
                if sample.success {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

impl fmt::Display for PerformanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an optimization run is trying to improve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMetric {
    ExecutionTime,
    Accuracy,
    ResourceUsage,
    Reliability,
    OverallPerformance,
}

impl TargetMetric {
    /// The single metric targeted, or `None` for overall performance.
    pub fn metric(&self) -> Option<PerformanceMetric> {
        match self {
            TargetMetric::ExecutionTime => Some(PerformanceMetric::ExecutionTime),
            TargetMetric::Accuracy => Some(PerformanceMetric::Accuracy),
            TargetMetric::ResourceUsage => Some(PerformanceMetric::ResourceUsage),
            TargetMetric::Reliability => Some(PerformanceMetric::Reliability),
            TargetMetric::OverallPerformance => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetMetric::ExecutionTime => "execution_time",
            TargetMetric::Accuracy => "accuracy",
            TargetMetric::ResourceUsage => "resource_usage",
            TargetMetric::Reliability => "reliability",
            TargetMetric::OverallPerformance => "overall_performance",
        }
    }

    pub fn parse(name: &str) -> Option<TargetMetric> {
        match name.trim().to_ascii_lowercase().as_str() {
            "execution_time" => Some(TargetMetric::ExecutionTime),
            "accuracy" => Some(TargetMetric::Accuracy),
            "resource_usage" => Some(TargetMetric::ResourceUsage),
            "reliability" => Some(TargetMetric::Reliability),
            "overall_performance" | "overall" => Some(TargetMetric::OverallPerformance),
            _ => None,
        }
    }
}

impl fmt::Display for TargetMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One historical execution of a rule and the configuration in force at the time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub timestamp: DateTime<Utc>,
    pub execution_time: f64,
    pub resource_usage: f64,
    pub accuracy: f64,
    pub success: bool,
    pub configuration: Parameters,
    /// Environmental context (load, data volume, ...).
    #[serde(default)]
    pub context: BTreeMap<String, f64>,
}

impl PerformanceSample {
    pub fn new(configuration: Parameters) -> Self {
        Self {
            timestamp: Utc::now(),
            execution_time: 0.0,
            resource_usage: 0.0,
            accuracy: 0.0,
            success: true,
            configuration,
            context: BTreeMap::new(),
        }
    }

    pub fn with_metrics(mut self, execution_time: f64, resource_usage: f64, accuracy: f64) -> Self {
        self.execution_time = execution_time;
        self.resource_usage = resource_usage;
        self.accuracy = accuracy;
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: f64) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reliability_reads_success_flag() {
        let ok = PerformanceSample::new(Parameters::new());
        let failed = PerformanceSample::new(Parameters::new()).with_success(false);
        assert_eq!(PerformanceMetric::Reliability.observe(&ok), 1.0);
        assert_eq!(PerformanceMetric::Reliability.observe(&failed), 0.0);
    }

    #[test]
    fn target_metric_parse() {
        assert_eq!(
            TargetMetric::parse("overall_performance"),
            Some(TargetMetric::OverallPerformance)
        );
        assert_eq!(
            TargetMetric::parse("accuracy").and_then(|t| t.metric()),
            Some(PerformanceMetric::Accuracy)
        );
        assert!(TargetMetric::OverallPerformance.metric().is_none());
    }
}
