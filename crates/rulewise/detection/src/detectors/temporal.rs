//! Temporal analyses over timestamped records: periodicity, trend,
//! hour-of-day seasonality and bursts.

use chrono::{DateTime, Duration, Timelike, Utc};
use tracing::debug;

use rulewise_types::stats::{coefficient_of_variation, linear_fit, mean, std_dev};
use rulewise_types::{DetectionConfig, FeatureVector, IntelResult, Pattern, PatternType};

use super::{round6, PatternDetector};

const MIN_TIMESTAMPED: usize = 3;
const PERIODIC_MAX_CV: f64 = 0.5;
const TREND_MIN_R2: f64 = 0.5;
const SEASONAL_MIN_SPAN_DAYS: i64 = 2;
const BURST_BUCKETS: usize = 20;

#[derive(Debug, Default, Clone)]
pub struct TimeSeriesDetector;

impl PatternDetector for TimeSeriesDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::Temporal
    }

    fn backend(&self) -> &str {
        "time_series"
    }

    fn detect(
        &self,
        features: &[FeatureVector],
        _config: &DetectionConfig,
    ) -> IntelResult<Vec<Pattern>> {
        let mut series: Vec<(DateTime<Utc>, &FeatureVector)> = features
            .iter()
            .filter_map(|f| f.timestamp.map(|t| (t, f)))
            .collect();
        if series.len() < MIN_TIMESTAMPED {
            return Ok(Vec::new());
        }
        series.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.source_ref.cmp(&b.1.source_ref)));

        let mut patterns = Vec::new();
        patterns.extend(periodic(&series));
        patterns.extend(trend(&series));
        patterns.extend(seasonal(&series));
        patterns.extend(bursts(&series));
        debug!(records = series.len(), patterns = patterns.len(), "temporal analysis complete");
        Ok(patterns)
    }
}

fn span_secs(series: &[(DateTime<Utc>, &FeatureVector)]) -> f64 {
    match (series.first(), series.last()) {
        (Some(first), Some(last)) => (last.0 - first.0).num_milliseconds() as f64 / 1000.0,
        _ => 0.0,
    }
}

fn periodic(series: &[(DateTime<Utc>, &FeatureVector)]) -> Option<Pattern> {
    let gaps: Vec<f64> = series
        .windows(2)
        .map(|w| (w[1].0 - w[0].0).num_milliseconds() as f64 / 1000.0)
        .collect();
    let period = mean(&gaps);
    if period <= 0.0 {
        return None;
    }
    let cv = coefficient_of_variation(&gaps);
    if cv >= PERIODIC_MAX_CV {
        return None;
    }
    Some(
        Pattern::new(
            PatternType::Temporal,
            "periodic",
            format!("Records arrive every {:.1}s (cv {:.2})", period, cv),
            1.0 - cv,
        )
        .with_characteristic("period_secs", round6(period))
        .with_characteristic("coefficient_of_variation", round6(cv))
        .with_characteristic("support", series.len() as u64),
    )
}

fn trend(series: &[(DateTime<Utc>, &FeatureVector)]) -> Option<Pattern> {
    let origin = series.first()?.0;
    let (xs, ys): (Vec<f64>, Vec<f64>) = series
        .iter()
        .filter_map(|(t, f)| {
            f.numeric_mean()
                .map(|m| ((*t - origin).num_milliseconds() as f64 / 3_600_000.0, m))
        })
        .unzip();
    if xs.len() < MIN_TIMESTAMPED {
        return None;
    }
    let fit = linear_fit(&xs, &ys);
    if fit.r_squared < TREND_MIN_R2 || fit.slope == 0.0 {
        return None;
    }
    let direction = if fit.slope > 0.0 { "increasing" } else { "decreasing" };
    Some(
        Pattern::new(
            PatternType::Temporal,
            "trend",
            format!(
                "Numeric values {} by {:.3} per hour (R² {:.2})",
                direction, fit.slope, fit.r_squared
            ),
            fit.r_squared,
        )
        .with_characteristic("direction", direction)
        .with_characteristic("slope_per_hour", round6(fit.slope))
        .with_characteristic("r_squared", round6(fit.r_squared))
        .with_characteristic("support", xs.len() as u64),
    )
}

fn seasonal(series: &[(DateTime<Utc>, &FeatureVector)]) -> Option<Pattern> {
    if span_secs(series) < (SEASONAL_MIN_SPAN_DAYS * 86_400) as f64 {
        return None;
    }
    let mut hours = [0usize; 24];
    for (t, _) in series {
        hours[t.hour() as usize] += 1;
    }
    let (peak_hour, peak_count) = hours
        .iter()
        .copied()
        .enumerate()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))?;
    let share = peak_count as f64 / series.len() as f64;
    let uniform = 1.0 / 24.0;
    let concentration = ((share - uniform) / (1.0 - uniform)).max(0.0);
    if concentration <= 0.0 {
        return None;
    }
    Some(
        Pattern::new(
            PatternType::Temporal,
            "seasonal",
            format!(
                "{:.0}% of records fall in hour {:02}:00 UTC",
                share * 100.0,
                peak_hour
            ),
            concentration,
        )
        .with_characteristic("peak_hour", peak_hour as u64)
        .with_characteristic("share", round6(share))
        .with_characteristic("support", peak_count as u64),
    )
}

fn bursts(series: &[(DateTime<Utc>, &FeatureVector)]) -> Vec<Pattern> {
    let span = span_secs(series);
    if span <= 0.0 {
        return Vec::new();
    }
    let origin = series[0].0;
    let width = span / BURST_BUCKETS as f64;
    let mut counts = [0usize; BURST_BUCKETS];
    for (t, _) in series {
        let offset = (*t - origin).num_milliseconds() as f64 / 1000.0;
        let bucket = ((offset / width) as usize).min(BURST_BUCKETS - 1);
        counts[bucket] += 1;
    }
    let as_f64: Vec<f64> = counts.iter().map(|&c| c as f64).collect();
    let mu = mean(&as_f64);
    let limit = mu + 2.0 * std_dev(&as_f64);

    // Merge runs of adjacent hot buckets into one burst.
    let mut runs: Vec<(usize, usize)> = Vec::new();
    for (i, &c) in counts.iter().enumerate() {
        if (c as f64) <= limit {
            continue;
        }
        match runs.last_mut() {
            Some((_, end)) if *end + 1 == i => *end = i,
            _ => runs.push((i, i)),
        }
    }

    runs.into_iter()
        .map(|(start, end)| {
            let total: usize = counts[start..=end].iter().sum();
            let peak = counts[start..=end].iter().copied().max().unwrap_or(0);
            let window_start = origin + Duration::milliseconds((start as f64 * width * 1000.0) as i64);
            let window_end =
                origin + Duration::milliseconds(((end + 1) as f64 * width * 1000.0) as i64);
            let confidence = if peak > 0 { 1.0 - mu / peak as f64 } else { 0.0 };
            Pattern::new(
                PatternType::Temporal,
                "burst",
                format!(
                    "Burst of {} records between {} and {}",
                    total,
                    window_start.to_rfc3339(),
                    window_end.to_rfc3339()
                ),
                confidence,
            )
            .with_characteristic("window_start", window_start.to_rfc3339())
            .with_characteristic("window_end", window_end.to_rfc3339())
            .with_characteristic("support", total as u64)
            .with_characteristic("peak_bucket_count", peak as u64)
            .with_characteristic("baseline_bucket_count", round6(mu))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ts: DateTime<Utc>, value: f64, i: usize) -> FeatureVector {
        FeatureVector {
            timestamp: Some(ts),
            numeric: vec![value],
            source_ref: i,
            ..FeatureVector::default()
        }
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn detects_periodic_arrivals_and_trend() {
        let features: Vec<FeatureVector> = (0..30)
            .map(|i| at(base() + Duration::minutes(10 * i), i as f64 * 2.0, i as usize))
            .collect();
        let patterns = TimeSeriesDetector
            .detect(&features, &DetectionConfig::default())
            .unwrap();

        let periodic = patterns.iter().find(|p| p.subtype == "periodic").unwrap();
        assert_eq!(periodic.confidence, 1.0);
        assert_eq!(periodic.characteristics["period_secs"], serde_json::json!(600.0));

        let trend = patterns.iter().find(|p| p.subtype == "trend").unwrap();
        assert_eq!(trend.characteristics["direction"], "increasing");
        assert!(trend.confidence > 0.99);
    }

    #[test]
    fn detects_burst() {
        let mut features: Vec<FeatureVector> = (0..20)
            .map(|i| at(base() + Duration::hours(i), 1.0, i as usize))
            .collect();
        // 30 extra records inside hour 10
        for j in 0..30 {
            features.push(at(
                base() + Duration::hours(10) + Duration::seconds(j * 10),
                1.0,
                100 + j as usize,
            ));
        }
        let patterns = TimeSeriesDetector
            .detect(&features, &DetectionConfig::default())
            .unwrap();
        let burst = patterns.iter().find(|p| p.subtype == "burst").unwrap();
        assert!(burst.confidence > 0.7);
        assert!(burst.support().unwrap() >= 30);
    }

    #[test]
    fn seasonal_needs_two_days() {
        let short: Vec<FeatureVector> = (0..10)
            .map(|i| at(base() + Duration::minutes(i), 1.0, i as usize))
            .collect();
        let patterns = TimeSeriesDetector
            .detect(&short, &DetectionConfig::default())
            .unwrap();
        assert!(!patterns.iter().any(|p| p.subtype == "seasonal"));

        let daily: Vec<FeatureVector> = (0..10)
            .map(|d| at(base() + Duration::days(d) + Duration::hours(9), 1.0, d as usize))
            .collect();
        let patterns = TimeSeriesDetector
            .detect(&daily, &DetectionConfig::default())
            .unwrap();
        let s = patterns.iter().find(|p| p.subtype == "seasonal").unwrap();
        assert_eq!(s.characteristics["peak_hour"], serde_json::json!(9));
        assert_eq!(s.confidence, 1.0);
    }

    #[test]
    fn fewer_than_three_timestamps_yield_nothing() {
        let features = vec![at(base(), 1.0, 0), at(base() + Duration::hours(1), 2.0, 1)];
        assert!(TimeSeriesDetector
            .detect(&features, &DetectionConfig::default())
            .unwrap()
            .is_empty());
    }
}
