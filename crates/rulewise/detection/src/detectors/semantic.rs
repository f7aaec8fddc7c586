//! Semantic themes over record text: TF-IDF vectors clustered with seeded
//! k-means++, plus named-entity patterns by document frequency.

use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use rulewise_types::stats::{cosine, euclidean, mean};
use rulewise_types::{DetectionConfig, FeatureVector, IntelResult, Pattern, PatternType};

use super::{round6, support_floor, PatternDetector};

const MAX_VOCABULARY: usize = 500;
const KMEANS_ITERATIONS: usize = 50;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "has", "him", "his", "how", "its", "may", "new", "now", "see", "two",
    "who", "did", "get", "let", "say", "she", "too", "use", "with", "this", "that", "from",
    "they", "have", "were", "been", "will", "into", "than", "then", "them", "when", "what",
    "your", "which", "their", "there", "about", "would", "could", "should",
];

const POSITIVE: &[&str] = &[
    "good", "great", "excellent", "happy", "satisfied", "success", "successful", "resolved",
    "fast", "love", "thanks", "thank", "helpful", "approved", "pleased", "perfect", "works",
];

const NEGATIVE: &[&str] = &[
    "bad", "poor", "terrible", "angry", "unhappy", "failure", "failed", "error", "slow", "hate",
    "broken", "refund", "complaint", "denied", "rejected", "delay", "delayed", "issue", "problem",
];

#[derive(Debug, Default, Clone)]
pub struct TfIdfSemanticDetector;

impl PatternDetector for TfIdfSemanticDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::Semantic
    }

    fn backend(&self) -> &str {
        "tfidf_kmeans"
    }

    fn detect(
        &self,
        features: &[FeatureVector],
        config: &DetectionConfig,
    ) -> IntelResult<Vec<Pattern>> {
        let texts: Vec<&str> = features
            .iter()
            .filter(|f| f.has_text())
            .map(|f| f.text.as_str())
            .collect();
        if texts.len() < 2 {
            return Ok(Vec::new());
        }
        let docs: Vec<Vec<String>> = texts.iter().map(|t| tokenize(t)).collect();
        let floor = support_floor(texts.len(), config.min_frequency_threshold);

        let mut patterns = themes(&docs, floor, config);
        patterns.extend(entities(&texts, floor));
        debug!(documents = texts.len(), patterns = patterns.len(), "semantic analysis complete");
        Ok(patterns)
    }
}

fn themes(docs: &[Vec<String>], floor: usize, config: &DetectionConfig) -> Vec<Pattern> {
    let n = docs.len();
    let k = (n / 5).min(config.semantic_max_clusters);
    if k == 0 {
        return Vec::new();
    }

    let vocabulary = build_vocabulary(docs);
    if vocabulary.is_empty() {
        return Vec::new();
    }
    let vectors = tfidf(docs, &vocabulary);
    let (assignments, centroids) = kmeans(&vectors, k, config.seed);

    let mut members: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, c) in assignments.iter().enumerate() {
        members.entry(*c).or_default().push(i);
    }

    let terms: Vec<&String> = vocabulary.keys().collect();
    let mut patterns = Vec::new();
    for (cluster, idx) in members {
        if idx.len() < floor {
            continue;
        }
        let centroid = &centroids[cluster];
        let confidence = mean(
            &idx.iter()
                .map(|&i| cosine(&vectors[i], centroid))
                .collect::<Vec<_>>(),
        );

        let mut weighted: Vec<(usize, f64)> = centroid
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, w)| *w > 0.0)
            .collect();
        weighted.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        let keywords: Vec<String> = weighted
            .iter()
            .take(config.top_keywords.max(1))
            .map(|(t, _)| terms[*t].clone())
            .collect();

        let sentiment = sentiment_label(idx.iter().flat_map(|&i| docs[i].iter()));

        patterns.push(
            Pattern::new(
                PatternType::Semantic,
                "theme",
                format!(
                    "Theme '{}' across {} records ({} sentiment)",
                    keywords.join(", "),
                    idx.len(),
                    sentiment
                ),
                confidence,
            )
            .with_characteristic("keywords", keywords)
            .with_characteristic("sentiment", sentiment)
            .with_characteristic("support", idx.len() as u64)
            .with_characteristic("fraction", round6(idx.len() as f64 / n as f64)),
        );
    }
    patterns
}

fn entities(texts: &[&str], floor: usize) -> Vec<Pattern> {
    let n = texts.len();
    let mut df: BTreeMap<(String, &'static str), usize> = BTreeMap::new();
    for text in texts {
        let mut seen: BTreeSet<(String, &'static str)> = BTreeSet::new();
        for raw in text.split_whitespace() {
            let token = raw.trim_matches(|c: char| ",.;:!?()[]{}\"'".contains(c));
            if let Some(kind) = entity_kind(token) {
                seen.insert((token.to_string(), kind));
            }
        }
        for entry in seen {
            *df.entry(entry).or_default() += 1;
        }
    }

    df.into_iter()
        .filter(|(_, count)| *count >= floor)
        .map(|((entity, kind), count)| {
            let frequency = count as f64 / n as f64;
            Pattern::new(
                PatternType::Semantic,
                "entity",
                format!("Entity '{}' ({}) in {} records", entity, kind, count),
                frequency,
            )
            .with_characteristic("entity", entity)
            .with_characteristic("entity_kind", kind)
            .with_characteristic("support", count as u64)
            .with_characteristic("frequency", round6(frequency))
        })
        .collect()
}

fn entity_kind(token: &str) -> Option<&'static str> {
    if token.starts_with("http://") || token.starts_with("https://") {
        return Some("url");
    }
    if let Some((local, domain)) = token.split_once('@') {
        if !local.is_empty() && domain.contains('.') && !domain.ends_with('.') {
            return Some("email");
        }
    }
    let mut chars = token.chars();
    let first = chars.next()?;
    if first.is_uppercase()
        && token.chars().count() >= 2
        && token.chars().all(char::is_alphanumeric)
        && !STOPWORDS.contains(&token.to_lowercase().as_str())
    {
        return Some("proper_noun");
    }
    None
}

// ── Text model ──────────────────────────────────────────────────────────

pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|t| t.chars().count() >= 3 && !STOPWORDS.contains(&t.as_str()))
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
        .collect()
}

/// Term → document frequency, keeping the most common terms.
fn build_vocabulary(docs: &[Vec<String>]) -> BTreeMap<String, usize> {
    let mut df: BTreeMap<&str, usize> = BTreeMap::new();
    for doc in docs {
        let unique: BTreeSet<&str> = doc.iter().map(String::as_str).collect();
        for t in unique {
            *df.entry(t).or_default() += 1;
        }
    }
    let mut ranked: Vec<(&str, usize)> = df.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(MAX_VOCABULARY)
        .map(|(t, c)| (t.to_string(), c))
        .collect()
}

fn tfidf(docs: &[Vec<String>], vocabulary: &BTreeMap<String, usize>) -> Vec<Vec<f64>> {
    let n = docs.len() as f64;
    let index: BTreeMap<&str, usize> = vocabulary
        .keys()
        .enumerate()
        .map(|(i, t)| (t.as_str(), i))
        .collect();
    let idf: Vec<f64> = vocabulary
        .values()
        .map(|&df| ((1.0 + n) / (1.0 + df as f64)).ln() + 1.0)
        .collect();

    docs.iter()
        .map(|doc| {
            let mut v = vec![0.0; vocabulary.len()];
            for t in doc {
                if let Some(&i) = index.get(t.as_str()) {
                    v[i] += 1.0;
                }
            }
            let len = doc.len().max(1) as f64;
            for (i, x) in v.iter_mut().enumerate() {
                *x = *x / len * idf[i];
            }
            let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
            if norm > 0.0 {
                v.iter_mut().for_each(|x| *x /= norm);
            }
            v
        })
        .collect()
}

/// Seeded k-means++ returning per-point assignments and centroids.
pub(crate) fn kmeans(points: &[Vec<f64>], k: usize, seed: u64) -> (Vec<usize>, Vec<Vec<f64>>) {
    let n = points.len();
    if n == 0 {
        return (Vec::new(), Vec::new());
    }
    let k = k.clamp(1, n);
    let mut rng = StdRng::seed_from_u64(seed);

    let mut centroids: Vec<Vec<f64>> = vec![points[rng.gen_range(0..n)].clone()];
    while centroids.len() < k {
        let d2: Vec<f64> = points
            .iter()
            .map(|p| {
                centroids
                    .iter()
                    .map(|c| euclidean(p, c).powi(2))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let total: f64 = d2.iter().sum();
        if total <= 0.0 {
            break;
        }
        let mut target = rng.gen::<f64>() * total;
        let mut chosen = n - 1;
        for (i, d) in d2.iter().enumerate() {
            target -= d;
            if target <= 0.0 {
                chosen = i;
                break;
            }
        }
        centroids.push(points[chosen].clone());
    }

    let mut assignments = vec![0usize; n];
    for _ in 0..KMEANS_ITERATIONS {
        let mut changed = false;
        for (i, p) in points.iter().enumerate() {
            let best = nearest(p, &centroids);
            if assignments[i] != best {
                assignments[i] = best;
                changed = true;
            }
        }

        let width = points[0].len();
        let mut sums = vec![vec![0.0; width]; centroids.len()];
        let mut counts = vec![0usize; centroids.len()];
        for (i, p) in points.iter().enumerate() {
            counts[assignments[i]] += 1;
            for (d, v) in p.iter().enumerate() {
                sums[assignments[i]][d] += v;
            }
        }
        for (c, sum) in sums.into_iter().enumerate() {
            if counts[c] > 0 {
                centroids[c] = sum.into_iter().map(|v| v / counts[c] as f64).collect();
            }
        }
        if !changed {
            break;
        }
    }
    (assignments, centroids)
}

fn nearest(point: &[f64], centroids: &[Vec<f64>]) -> usize {
    let mut best = 0;
    let mut best_d = f64::INFINITY;
    for (c, centroid) in centroids.iter().enumerate() {
        let d = euclidean(point, centroid);
        if d < best_d {
            best_d = d;
            best = c;
        }
    }
    best
}

pub(crate) fn sentiment_label<'a>(tokens: impl Iterator<Item = &'a String>) -> &'static str {
    let mut score: i64 = 0;
    for t in tokens {
        if POSITIVE.contains(&t.as_str()) {
            score += 1;
        } else if NEGATIVE.contains(&t.as_str()) {
            score -= 1;
        }
    }
    match score {
        s if s > 0 => "positive",
        s if s < 0 => "negative",
        _ => "neutral",
    }
}
