//! Behavioral mining over token sequences: frequent contiguous
//! subsequences and first-order state transitions.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use rulewise_types::{DetectionConfig, FeatureVector, IntelResult, Pattern, PatternType};

use super::{round6, support_floor, PatternDetector};

#[derive(Debug, Default, Clone)]
pub struct SequenceMiningDetector;

impl PatternDetector for SequenceMiningDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::Behavioral
    }

    fn backend(&self) -> &str {
        "sequence_mining"
    }

    fn detect(
        &self,
        features: &[FeatureVector],
        config: &DetectionConfig,
    ) -> IntelResult<Vec<Pattern>> {
        let sequences: Vec<&[String]> = features
            .iter()
            .map(|f| f.token_sequence.as_slice())
            .filter(|s| s.len() >= 2)
            .collect();
        if sequences.len() < 2 {
            return Ok(Vec::new());
        }

        let mut patterns = frequent_subsequences(&sequences, config);
        patterns.extend(transitions(&sequences, config));
        debug!(
            sequences = sequences.len(),
            patterns = patterns.len(),
            "behavioral mining complete"
        );
        Ok(patterns)
    }
}

fn frequent_subsequences(sequences: &[&[String]], config: &DetectionConfig) -> Vec<Pattern> {
    let total = sequences.len();
    let floor = support_floor(total, config.min_frequency_threshold);
    let max_len = config.max_ngram_length.max(2);

    // Support counts each subsequence once per sequence.
    let mut support: BTreeMap<Vec<String>, usize> = BTreeMap::new();
    for seq in sequences {
        let mut seen: BTreeSet<&[String]> = BTreeSet::new();
        for len in 2..=max_len.min(seq.len()) {
            for window in seq.windows(len) {
                seen.insert(window);
            }
        }
        for gram in seen {
            *support.entry(gram.to_vec()).or_default() += 1;
        }
    }

    let frequent: BTreeMap<Vec<String>, usize> =
        support.into_iter().filter(|(_, s)| *s >= floor).collect();

    // Keep only closed subsequences: drop a gram when a longer frequent gram
    // contains it with the same support.
    let closed: Vec<(&Vec<String>, &usize)> = frequent
        .iter()
        .filter(|(gram, count)| {
            !frequent.iter().any(|(other, other_count)| {
                other.len() > gram.len()
                    && other_count == *count
                    && other.windows(gram.len()).any(|w| w == gram.as_slice())
            })
        })
        .collect();

    closed
        .into_iter()
        .map(|(gram, &count)| {
            let frequency = count as f64 / total as f64;
            Pattern::new(
                PatternType::Behavioral,
                "frequent_sequence",
                format!(
                    "Sequence {} occurs in {:.0}% of sequences",
                    gram.join(" -> "),
                    frequency * 100.0
                ),
                frequency,
            )
            .with_characteristic("sequence", gram.clone())
            .with_characteristic("length", gram.len() as u64)
            .with_characteristic("support", count as u64)
            .with_characteristic("frequency", round6(frequency))
        })
        .collect()
}

fn transitions(sequences: &[&[String]], config: &DetectionConfig) -> Vec<Pattern> {
    let mut counts: BTreeMap<(&str, &str), usize> = BTreeMap::new();
    let mut outgoing: BTreeMap<&str, usize> = BTreeMap::new();
    for seq in sequences {
        for pair in seq.windows(2) {
            *counts.entry((pair[0].as_str(), pair[1].as_str())).or_default() += 1;
            *outgoing.entry(pair[0].as_str()).or_default() += 1;
        }
    }

    counts
        .into_iter()
        .filter(|(_, count)| *count >= 2)
        .filter_map(|((from, to), count)| {
            let total = outgoing.get(from).copied().unwrap_or(0);
            if total == 0 {
                return None;
            }
            let probability = count as f64 / total as f64;
            if probability <= config.transition_probability_floor {
                return None;
            }
            Some(
                Pattern::new(
                    PatternType::Behavioral,
                    "state_transition",
                    format!("{} -> {} with probability {:.2}", from, to, probability),
                    probability,
                )
                .with_characteristic("from", from)
                .with_characteristic("to", to)
                .with_characteristic("sequence", vec![from, to])
                .with_characteristic("probability", round6(probability))
                .with_characteristic("support", count as u64),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(tokens: &[&str]) -> FeatureVector {
        FeatureVector {
            token_sequence: tokens.iter().map(|t| t.to_string()).collect(),
            ..FeatureVector::default()
        }
    }

    #[test]
    fn finds_common_flow() {
        let mut features = Vec::new();
        for _ in 0..18 {
            features.push(seq(&["login", "view", "checkout"]));
        }
        features.push(seq(&["login", "logout"]));
        features.push(seq(&["browse", "exit"]));

        let patterns = SequenceMiningDetector
            .detect(&features, &DetectionConfig::default())
            .unwrap();

        let flow = patterns
            .iter()
            .find(|p| {
                p.subtype == "frequent_sequence"
                    && p.characteristics["sequence"] == serde_json::json!(["login", "view", "checkout"])
            })
            .expect("closed flow pattern");
        assert!((flow.confidence - 0.9).abs() < 1e-9);

        // ["login","view"] has the same support as the full flow and is not closed.
        assert!(!patterns.iter().any(|p| p.subtype == "frequent_sequence"
            && p.characteristics["sequence"] == serde_json::json!(["login", "view"])));

        let t = patterns
            .iter()
            .find(|p| p.subtype == "state_transition" && p.characteristics["from"] == "view")
            .unwrap();
        assert_eq!(t.confidence, 1.0);
    }

    #[test]
    fn rare_transitions_are_dropped() {
        let mut features = Vec::new();
        for _ in 0..20 {
            features.push(seq(&["a", "b"]));
        }
        features.push(seq(&["a", "c"]));
        features.push(seq(&["a", "c"]));
        let config = DetectionConfig {
            transition_probability_floor: 0.1,
            ..DetectionConfig::default()
        };
        let patterns = SequenceMiningDetector.detect(&features, &config).unwrap();
        // a->c has probability 2/22 < 0.1.
        assert!(!patterns
            .iter()
            .any(|p| p.subtype == "state_transition" && p.characteristics["to"] == "c"));
    }

    #[test]
    fn single_sequence_yields_nothing() {
        let patterns = SequenceMiningDetector
            .detect(&[seq(&["a", "b", "c"])], &DetectionConfig::default())
            .unwrap();
        assert!(patterns.is_empty());
    }
}
