//! Deterministic statistical detectors used when a primary backend cannot
//! run under the current configuration.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Timelike;
use serde_json::json;

use rulewise_types::stats::{mean, std_dev, zscore_columns};
use rulewise_types::{DetectionConfig, FeatureVector, IntelResult, Pattern, PatternType};

use super::anomaly::group_outliers;
use super::semantic::{sentiment_label, tokenize};
use super::{round6, support_floor, PatternDetector};

// ── Structural ──────────────────────────────────────────────────────────

/// Buckets records into complexity quartiles.
#[derive(Debug, Default, Clone)]
pub struct QuantileBucketDetector;

impl PatternDetector for QuantileBucketDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::Structural
    }

    fn backend(&self) -> &str {
        "quantile_bucket"
    }

    fn detect(
        &self,
        features: &[FeatureVector],
        config: &DetectionConfig,
    ) -> IntelResult<Vec<Pattern>> {
        let n = features.len();
        if n < 4 {
            return Ok(Vec::new());
        }
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            features[a]
                .complexity()
                .total_cmp(&features[b].complexity())
                .then(a.cmp(&b))
        });
        let floor = support_floor(n, config.min_frequency_threshold);

        let mut patterns = Vec::new();
        for (quartile, chunk) in order.chunks(n.div_ceil(4)).enumerate() {
            if chunk.len() < floor {
                continue;
            }
            let complexity: Vec<f64> = chunk.iter().map(|&i| features[i].complexity()).collect();
            let size: Vec<f64> = chunk
                .iter()
                .map(|&i| features[i].structural.first().copied().unwrap_or(0.0))
                .collect();
            let depth: Vec<f64> = chunk
                .iter()
                .map(|&i| features[i].structural.get(1).copied().unwrap_or(0.0))
                .collect();
            let spread = std_dev(&complexity);
            let confidence = 1.0 / (1.0 + spread);

            patterns.push(
                Pattern::new(
                    PatternType::Structural,
                    "quantile_bucket",
                    format!("Complexity quartile {} of {} records", quartile + 1, chunk.len()),
                    confidence,
                )
                .with_characteristic("quartile", quartile as u64 + 1)
                .with_characteristic("support", chunk.len() as u64)
                .with_characteristic(
                    "profile",
                    json!({
                        "complexity": range_summary(&complexity),
                        "size": range_summary(&size),
                        "depth": range_summary(&depth),
                    }),
                ),
            );
        }
        Ok(patterns)
    }
}

fn range_summary(values: &[f64]) -> serde_json::Value {
    let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    json!({"mean": round6(mean(values)), "min": round6(lo), "max": round6(hi)})
}

// ── Behavioral ──────────────────────────────────────────────────────────

/// Single-token document frequency over behavioral sequences.
#[derive(Debug, Default, Clone)]
pub struct TokenFrequencyDetector;

impl PatternDetector for TokenFrequencyDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::Behavioral
    }

    fn backend(&self) -> &str {
        "token_frequency"
    }

    fn detect(
        &self,
        features: &[FeatureVector],
        config: &DetectionConfig,
    ) -> IntelResult<Vec<Pattern>> {
        let sequences: Vec<&Vec<String>> = features
            .iter()
            .map(|f| &f.token_sequence)
            .filter(|s| !s.is_empty())
            .collect();
        let docs: Vec<BTreeSet<&str>> = sequences
            .iter()
            .map(|s| s.iter().map(String::as_str).collect())
            .collect();
        Ok(frequency_patterns(&docs, config, |token, count, frequency| {
            Pattern::new(
                PatternType::Behavioral,
                "frequent_token",
                format!("Action '{}' appears in {} sequences", token, count),
                frequency,
            )
            .with_characteristic("sequence", vec![token])
        }))
    }
}

// ── Semantic ────────────────────────────────────────────────────────────

/// Keyword document frequency over record text.
#[derive(Debug, Default, Clone)]
pub struct KeywordFrequencyDetector;

impl PatternDetector for KeywordFrequencyDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::Semantic
    }

    fn backend(&self) -> &str {
        "keyword_frequency"
    }

    fn detect(
        &self,
        features: &[FeatureVector],
        config: &DetectionConfig,
    ) -> IntelResult<Vec<Pattern>> {
        let tokenized: Vec<Vec<String>> = features
            .iter()
            .filter(|f| f.has_text())
            .map(|f| tokenize(&f.text))
            .collect();
        let docs: Vec<BTreeSet<&str>> = tokenized
            .iter()
            .map(|d| d.iter().map(String::as_str).collect())
            .collect();
        Ok(frequency_patterns(&docs, config, |keyword, count, frequency| {
            let owned = keyword.to_string();
            let sentiment = sentiment_label(std::iter::once(&owned));
            Pattern::new(
                PatternType::Semantic,
                "keyword",
                format!("Keyword '{}' appears in {} records", keyword, count),
                frequency,
            )
            .with_characteristic("keywords", vec![keyword])
            .with_characteristic("sentiment", sentiment)
        }))
    }
}

/// Shared document-frequency scan: one pattern per term meeting the floor.
fn frequency_patterns<F>(docs: &[BTreeSet<&str>], config: &DetectionConfig, make: F) -> Vec<Pattern>
where
    F: Fn(&str, usize, f64) -> Pattern,
{
    let n = docs.len();
    if n < 2 {
        return Vec::new();
    }
    let floor = support_floor(n, config.min_frequency_threshold);
    let mut df: BTreeMap<&str, usize> = BTreeMap::new();
    for doc in docs {
        for term in doc {
            *df.entry(*term).or_default() += 1;
        }
    }
    df.into_iter()
        .filter(|(_, c)| *c >= floor)
        .map(|(term, count)| {
            let frequency = count as f64 / n as f64;
            make(term, count, frequency)
                .with_characteristic("support", count as u64)
                .with_characteristic("frequency", round6(frequency))
        })
        .collect()
}

// ── Temporal ────────────────────────────────────────────────────────────

/// Hour-of-day concentration without any span requirement.
#[derive(Debug, Default, Clone)]
pub struct HourOfDayDetector;

impl PatternDetector for HourOfDayDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::Temporal
    }

    fn backend(&self) -> &str {
        "hour_of_day"
    }

    fn detect(
        &self,
        features: &[FeatureVector],
        config: &DetectionConfig,
    ) -> IntelResult<Vec<Pattern>> {
        let hours: Vec<u32> = features
            .iter()
            .filter_map(|f| f.timestamp.map(|t| t.hour()))
            .collect();
        if hours.len() < 3 {
            return Ok(Vec::new());
        }
        let mut histogram = [0usize; 24];
        for h in &hours {
            histogram[*h as usize] += 1;
        }
        let floor = support_floor(hours.len(), config.min_frequency_threshold);
        let total = hours.len() as f64;
        Ok(histogram
            .iter()
            .enumerate()
            .filter(|(_, &c)| c >= floor)
            .map(|(hour, &count)| {
                let share = count as f64 / total;
                Pattern::new(
                    PatternType::Temporal,
                    "hour_of_day",
                    format!("{:.0}% of records fall in hour {:02}:00 UTC", share * 100.0, hour),
                    share,
                )
                .with_characteristic("peak_hour", hour as u64)
                .with_characteristic("share", round6(share))
                .with_characteristic("support", count as u64)
            })
            .collect())
    }
}

// ── Anomaly ─────────────────────────────────────────────────────────────

const Z_LIMIT: f64 = 3.0;

/// Flags records whose largest profile z-score exceeds 3.
#[derive(Debug, Default, Clone)]
pub struct ZScoreOutlierDetector;

impl PatternDetector for ZScoreOutlierDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::Anomaly
    }

    fn backend(&self) -> &str {
        "zscore"
    }

    fn detect(
        &self,
        features: &[FeatureVector],
        _config: &DetectionConfig,
    ) -> IntelResult<Vec<Pattern>> {
        if features.len() < 3 {
            return Ok(Vec::new());
        }
        let rows: Vec<Vec<f64>> = features
            .iter()
            .map(|f| f.numeric_profile().to_vec())
            .collect();
        let scores: Vec<f64> = zscore_columns(&rows)
            .iter()
            .map(|r| r.iter().map(|v| v.abs()).fold(0.0, f64::max))
            .collect();
        let flagged: Vec<usize> = (0..scores.len()).filter(|&i| scores[i] > Z_LIMIT).collect();
        Ok(group_outliers(&flagged, &scores, features, "zscore"))
    }
}
