//! Feature extraction: one JSON record in, one [`FeatureVector`] out.
//!
//! Extraction is total. Anything that cannot be interpreted simply
//! contributes nothing to the corresponding projection.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use rulewise_types::FeatureVector;

/// Top-level keys read as the record timestamp, in priority order.
pub const TIMESTAMP_FIELDS: [&str; 5] = ["timestamp", "created_at", "time", "occurred_at", "date"];

/// Top-level keys holding an explicit behavioral sequence.
pub const SEQUENCE_FIELDS: [&str; 3] = ["actions", "events", "sequence"];

/// Keys read from an object element of a sequence array.
const SEQUENCE_ELEMENT_KEYS: [&str; 4] = ["action", "event", "type", "name"];

/// Epoch values above this are read as milliseconds.
const EPOCH_MILLIS_CUTOFF: f64 = 1e11;

/// Stateless record → feature projection.
#[derive(Clone, Debug)]
pub struct FeatureExtractor {
    max_sequence_length: usize,
}

impl FeatureExtractor {
    pub fn new(max_sequence_length: usize) -> Self {
        Self {
            max_sequence_length: max_sequence_length.max(1),
        }
    }

    /// Extract features from every record, keeping batch positions.
    pub fn extract_batch(&self, records: &[Value]) -> Vec<FeatureVector> {
        records
            .iter()
            .enumerate()
            .map(|(i, r)| self.extract(r, i))
            .collect()
    }

    pub fn extract(&self, record: &Value, source_ref: usize) -> FeatureVector {
        let mut walk = Walk::default();
        walk.visit(record, 0, true);
        let structural = structural_projection(&walk);

        FeatureVector {
            numeric: walk.numeric,
            structural,
            text: walk.text.join(" "),
            token_sequence: self.tokens(record),
            timestamp: extract_timestamp(record),
            source_ref,
        }
    }

    fn tokens(&self, record: &Value) -> Vec<String> {
        let Value::Object(map) = record else {
            return Vec::new();
        };

        let explicit = SEQUENCE_FIELDS
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_array));
        let tokens: Vec<String> = match explicit {
            Some(items) => items.iter().filter_map(sequence_token).collect(),
            None => map
                .iter()
                .filter(|(k, _)| !TIMESTAMP_FIELDS.contains(&k.as_str()))
                .map(|(k, v)| format!("{}:{}", k, type_name(v)))
                .collect(),
        };
        tokens.into_iter().take(self.max_sequence_length).collect()
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(50)
    }
}

/// Content hash of a record batch; the detection cache key.
pub fn batch_hash(records: &[Value]) -> String {
    let mut hasher = blake3::Hasher::new();
    for record in records {
        // serde_json maps are key-sorted, so equal records encode equally.
        hasher.update(record.to_string().as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex().to_string()
}

// ── Traversal ───────────────────────────────────────────────────────────

#[derive(Default)]
struct Walk {
    numeric: Vec<f64>,
    text: Vec<String>,
    nodes: usize,
    max_depth: usize,
    key_counts: BTreeMap<String, usize>,
    type_counts: BTreeMap<&'static str, usize>,
}

impl Walk {
    fn visit(&mut self, value: &Value, depth: usize, top_level: bool) {
        self.nodes += 1;
        self.max_depth = self.max_depth.max(depth);
        *self.type_counts.entry(type_name(value)).or_default() += 1;

        match value {
            Value::Number(n) => {
                if let Some(f) = n.as_f64().filter(|f| f.is_finite()) {
                    self.numeric.push(f);
                }
            }
            Value::String(s) => {
                if !s.trim().is_empty() {
                    self.text.push(s.clone());
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.visit(item, depth + 1, false);
                }
            }
            Value::Object(map) => {
                for (key, child) in map {
                    *self.key_counts.entry(key.clone()).or_default() += 1;
                    // The timestamp is its own projection, not a numeric or text leaf.
                    if top_level && TIMESTAMP_FIELDS.contains(&key.as_str()) {
                        self.nodes += 1;
                        continue;
                    }
                    self.visit(child, depth + 1, false);
                }
            }
            Value::Null | Value::Bool(_) => {}
        }
    }
}

fn structural_projection(walk: &Walk) -> Vec<f64> {
    let size = walk.nodes as f64;
    let depth = walk.max_depth as f64;
    let key_entropy = entropy(walk.key_counts.values().copied());
    let value_type_entropy = entropy(walk.type_counts.values().copied());
    let type_count = walk.type_counts.len() as f64;
    let complexity = depth * 0.4 + (size + 1.0).log10() * 0.4 + type_count * 0.2;
    vec![size, depth, key_entropy, value_type_entropy, complexity, type_count]
}

/// Shannon entropy in bits of a count distribution.
fn entropy(counts: impl Iterator<Item = usize>) -> f64 {
    let counts: Vec<usize> = counts.filter(|c| *c > 0).collect();
    let total: usize = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    counts
        .iter()
        .map(|&c| {
            let p = c as f64 / total;
            -p * p.log2()
        })
        .sum()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn sequence_token(item: &Value) -> Option<String> {
    match item {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(map) => SEQUENCE_ELEMENT_KEYS
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
            .map(str::to_string),
        _ => None,
    }
}

// ── Timestamps ──────────────────────────────────────────────────────────

fn extract_timestamp(record: &Value) -> Option<DateTime<Utc>> {
    let map = record.as_object()?;
    TIMESTAMP_FIELDS
        .iter()
        .filter_map(|k| map.get(*k))
        .find_map(parse_timestamp)
}

/// Parse an RFC3339 string, a `YYYY-MM-DD` date, or epoch seconds/millis.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s.trim()) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(date) = chrono::NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d") {
                return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
            }
            s.trim().parse::<f64>().ok().and_then(from_epoch)
        }
        Value::Number(n) => n.as_f64().and_then(from_epoch),
        _ => None,
    }
}

fn from_epoch(raw: f64) -> Option<DateTime<Utc>> {
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    let millis = if raw > EPOCH_MILLIS_CUTOFF {
        raw
    } else {
        raw * 1000.0
    };
    Utc.timestamp_millis_opt(millis as i64).single()
}
