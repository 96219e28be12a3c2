//! # Pattern Learner
//!
//! Statistical pattern learning over the coordination event history.
//! Four pattern kinds are computed with plain arithmetic: repeated
//! event sequences (n-grams), periodic frequencies, cross-type
//! correlations, and hour-of-day temporal clusters. No ML anywhere.

use crate::monitoring::metrics::SwarmEvent;
use crate::utils::config::PatternConfig;
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

const EVENT_RING_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Sequence,
    Frequency,
    Correlation,
    Temporal,
}

impl PatternKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sequence => "sequence",
            Self::Frequency => "frequency",
            Self::Correlation => "correlation",
            Self::Temporal => "temporal",
        }
    }
}

/// A learned pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub pattern_id: String,
    pub pattern_type: PatternKind,
    pub description: String,
    /// Event types involved, in sequence order where order matters.
    pub event_types: Vec<String>,
    pub confidence: f64,
    pub occurrences: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Learns patterns from an append-only event ring.
pub struct PatternLearner {
    config: PatternConfig,
    events: RwLock<VecDeque<SwarmEvent>>,
    patterns: RwLock<HashMap<String, Pattern>>,
}

impl PatternLearner {
    #[must_use]
    pub fn new(config: PatternConfig) -> Self {
        Self {
            config,
            events: RwLock::new(VecDeque::new()),
            patterns: RwLock::new(HashMap::new()),
        }
    }

    pub async fn ingest(&self, event: SwarmEvent) {
        let mut events = self.events.write().await;
        events.push_back(event);
        while events.len() > EVENT_RING_CAPACITY {
            events.pop_front();
        }
    }

    pub async fn ingest_all(&self, batch: impl IntoIterator<Item = SwarmEvent>) {
        let mut events = self.events.write().await;
        for event in batch {
            events.push_back(event);
        }
        while events.len() > EVENT_RING_CAPACITY {
            events.pop_front();
        }
    }

    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    /// Run all four analyses over the current ring and refresh the
    /// learned pattern set. Returns the patterns found in this pass.
    pub async fn learn(&self) -> Vec<Pattern> {
        let events: Vec<SwarmEvent> = {
            let ring = self.events.read().await;
            ring.iter().cloned().collect()
        };
        if events.is_empty() {
            return Vec::new();
        }

        let mut found = Vec::new();
        found.extend(self.learn_sequences(&events));
        found.extend(self.learn_frequencies(&events));
        found.extend(self.learn_correlations(&events));
        found.extend(self.learn_temporal(&events));

        let mut patterns = self.patterns.write().await;
        for pattern in &found {
            match patterns.get(&pattern.pattern_id) {
                Some(existing) => {
                    let mut updated = pattern.clone();
                    updated.first_seen = existing.first_seen.min(pattern.first_seen);
                    patterns.insert(pattern.pattern_id.clone(), updated);
                }
                None => {
                    patterns.insert(pattern.pattern_id.clone(), pattern.clone());
                }
            }
        }

        tracing::debug!("Learned {} patterns from {} events", found.len(), events.len());
        found
    }

    pub async fn patterns(&self) -> Vec<Pattern> {
        self.patterns.read().await.values().cloned().collect()
    }

    /// Repeated n-grams over the event-type stream. A sequence becomes a
    /// pattern when it recurs enough and its continuation probability
    /// (full-gram count over prefix count) clears the threshold.
    fn learn_sequences(&self, events: &[SwarmEvent]) -> Vec<Pattern> {
        let n = self.config.sequence_length;
        if n < 2 || events.len() < n {
            return Vec::new();
        }

        let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        let mut ngram_stats: HashMap<Vec<String>, (u64, DateTime<Utc>, DateTime<Utc>)> =
            HashMap::new();
        let mut prefix_counts: HashMap<Vec<String>, u64> = HashMap::new();

        for window in 0..=(types.len() - n) {
            let gram: Vec<String> = types[window..window + n]
                .iter()
                .map(ToString::to_string)
                .collect();
            let first_ts = events[window].timestamp;
            let last_ts = events[window + n - 1].timestamp;
            ngram_stats
                .entry(gram)
                .and_modify(|(count, first, last)| {
                    *count += 1;
                    *first = (*first).min(first_ts);
                    *last = (*last).max(last_ts);
                })
                .or_insert((1, first_ts, last_ts));
        }
        for window in 0..=(types.len() - (n - 1)) {
            let prefix: Vec<String> = types[window..window + n - 1]
                .iter()
                .map(ToString::to_string)
                .collect();
            *prefix_counts.entry(prefix).or_insert(0) += 1;
        }

        let mut patterns = Vec::new();
        for (gram, (count, first_seen, last_seen)) in ngram_stats {
            if count < self.config.min_occurrences as u64 {
                continue;
            }
            let prefix: Vec<String> = gram[..n - 1].to_vec();
            let prefix_count = prefix_counts.get(&prefix).copied().unwrap_or(count);
            let continuation = count as f64 / prefix_count.max(1) as f64;
            if continuation <= self.config.confidence_threshold {
                continue;
            }

            patterns.push(Pattern {
                pattern_id: format!("seq_{}", gram.join("_")),
                pattern_type: PatternKind::Sequence,
                description: format!("recurring sequence {}", gram.join(" -> ")),
                event_types: gram,
                confidence: continuation.min(1.0),
                occurrences: count,
                first_seen,
                last_seen,
                metadata: HashMap::new(),
            });
        }
        patterns
    }

    /// Periodic event types: coefficient of variation of inter-arrival
    /// intervals below 0.25 marks a periodic pattern.
    fn learn_frequencies(&self, events: &[SwarmEvent]) -> Vec<Pattern> {
        let mut by_type: HashMap<&str, Vec<DateTime<Utc>>> = HashMap::new();
        for event in events {
            by_type
                .entry(event.event_type.as_str())
                .or_default()
                .push(event.timestamp);
        }

        let mut patterns = Vec::new();
        for (event_type, timestamps) in by_type {
            if timestamps.len() < self.config.min_occurrences.max(3) {
                continue;
            }
            let intervals: Vec<f64> = timestamps
                .windows(2)
                .map(|pair| (pair[1] - pair[0]).num_milliseconds() as f64)
                .collect();
            let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
            if mean <= 0.0 {
                continue;
            }
            let variance = intervals
                .iter()
                .map(|x| (x - mean).powi(2))
                .sum::<f64>()
                / intervals.len() as f64;
            let cv = variance.sqrt() / mean;
            if cv >= 0.25 {
                continue;
            }

            let mut metadata = HashMap::new();
            metadata.insert("mean_interval_ms".to_string(), mean.into());
            metadata.insert("coefficient_of_variation".to_string(), cv.into());

            patterns.push(Pattern {
                pattern_id: format!("freq_{event_type}"),
                pattern_type: PatternKind::Frequency,
                description: format!("{event_type} recurs every ~{:.0}ms", mean),
                event_types: vec![event_type.to_string()],
                confidence: 1.0 - cv,
                occurrences: timestamps.len() as u64,
                first_seen: timestamps[0],
                last_seen: timestamps[timestamps.len() - 1],
                metadata,
            });
        }
        patterns
    }

    /// Ordered co-occurrence of two event types within the correlation
    /// window; confidence is pair count over the rarer type's count.
    fn learn_correlations(&self, events: &[SwarmEvent]) -> Vec<Pattern> {
        let mut type_counts: HashMap<&str, u64> = HashMap::new();
        for event in events {
            *type_counts.entry(event.event_type.as_str()).or_insert(0) += 1;
        }

        let mut pair_stats: HashMap<(String, String), (u64, DateTime<Utc>, DateTime<Utc>)> =
            HashMap::new();
        for (i, first) in events.iter().enumerate() {
            for second in events.iter().skip(i + 1) {
                let dt = (second.timestamp - first.timestamp).num_milliseconds();
                if dt > self.config.correlation_window_ms {
                    break;
                }
                if dt <= 0 || first.event_type == second.event_type {
                    continue;
                }
                pair_stats
                    .entry((first.event_type.clone(), second.event_type.clone()))
                    .and_modify(|(count, _, last)| {
                        *count += 1;
                        *last = (*last).max(second.timestamp);
                    })
                    .or_insert((1, first.timestamp, second.timestamp));
            }
        }

        let mut patterns = Vec::new();
        for ((cause, effect), (pairs, first_seen, last_seen)) in pair_stats {
            if pairs < self.config.min_occurrences as u64 {
                continue;
            }
            let rarer = type_counts
                .get(cause.as_str())
                .copied()
                .unwrap_or(1)
                .min(type_counts.get(effect.as_str()).copied().unwrap_or(1));
            let confidence = (pairs as f64 / rarer.max(1) as f64).min(1.0);

            let mut metadata = HashMap::new();
            metadata.insert(
                "window_ms".to_string(),
                self.config.correlation_window_ms.into(),
            );

            patterns.push(Pattern {
                pattern_id: format!("corr_{cause}_{effect}"),
                pattern_type: PatternKind::Correlation,
                description: format!("{effect} follows {cause} within window"),
                event_types: vec![cause, effect],
                confidence,
                occurrences: pairs,
                first_seen,
                last_seen,
                metadata,
            });
        }
        patterns
    }

    /// Hour-of-day clusters: a bucket whose density exceeds the mean by
    /// two standard deviations is a temporal pattern.
    fn learn_temporal(&self, events: &[SwarmEvent]) -> Vec<Pattern> {
        let mut buckets = [0u64; 24];
        for event in events {
            buckets[event.timestamp.hour() as usize] += 1;
        }

        let mean = events.len() as f64 / 24.0;
        let variance = buckets
            .iter()
            .map(|count| (*count as f64 - mean).powi(2))
            .sum::<f64>()
            / 24.0;
        let stdev = variance.sqrt();
        if stdev == 0.0 {
            return Vec::new();
        }

        let mut patterns = Vec::new();
        for (hour, count) in buckets.iter().enumerate() {
            let density = *count as f64;
            if *count < self.config.min_occurrences as u64 || density < mean + 2.0 * stdev {
                continue;
            }

            let in_bucket: Vec<&SwarmEvent> = events
                .iter()
                .filter(|e| e.timestamp.hour() as usize == hour)
                .collect();
            let first_seen = in_bucket.first().map_or_else(Utc::now, |e| e.timestamp);
            let last_seen = in_bucket.last().map_or_else(Utc::now, |e| e.timestamp);

            let mut metadata = HashMap::new();
            metadata.insert("hour_of_day".to_string(), hour.into());
            metadata.insert("bucket_density".to_string(), density.into());
            metadata.insert("mean_density".to_string(), mean.into());

            patterns.push(Pattern {
                pattern_id: format!("temporal_hour_{hour}"),
                pattern_type: PatternKind::Temporal,
                description: format!("activity spike around {hour:02}:00 UTC"),
                event_types: Vec::new(),
                confidence: ((density - mean) / (2.0 * stdev)).min(1.0),
                occurrences: *count,
                first_seen,
                last_seen,
                metadata,
            });
        }
        patterns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn event_at(event_type: &str, base: DateTime<Utc>, offset_ms: i64) -> SwarmEvent {
        let mut event = SwarmEvent::new(event_type);
        event.timestamp = base + Duration::milliseconds(offset_ms);
        event
    }

    fn learner() -> PatternLearner {
        PatternLearner::new(PatternConfig::default())
    }

    #[tokio::test]
    async fn test_sequence_pattern_from_repeats() {
        let learner = learner();
        let base = Utc::now();
        let mut offset = 0;
        // Repeat a -> b -> c four times with noise between repeats.
        for i in 0..4 {
            for event_type in ["task_started", "task_slow", "task_timeout"] {
                learner.ingest(event_at(event_type, base, offset)).await;
                offset += 100;
            }
            learner
                .ingest(event_at(&format!("noise_{i}"), base, offset))
                .await;
            offset += 100;
        }

        let patterns = learner.learn().await;
        let sequence = patterns
            .iter()
            .find(|p| p.pattern_id == "seq_task_started_task_slow_task_timeout")
            .unwrap();
        assert_eq!(sequence.occurrences, 4);
        assert!(sequence.confidence > 0.6);
    }

    #[tokio::test]
    async fn test_frequency_pattern_for_periodic_events() {
        let learner = learner();
        let base = Utc::now();
        for i in 0..10 {
            learner.ingest(event_at("heartbeat", base, i * 1_000)).await;
        }

        let patterns = learner.learn().await;
        let frequency = patterns
            .iter()
            .find(|p| p.pattern_type == PatternKind::Frequency)
            .unwrap();
        assert_eq!(frequency.event_types, vec!["heartbeat"]);
        // Perfectly periodic: CV ~ 0, confidence ~ 1.
        assert!(frequency.confidence > 0.99);
    }

    #[tokio::test]
    async fn test_irregular_events_produce_no_frequency_pattern() {
        let learner = learner();
        let base = Utc::now();
        for offset in [0, 100, 5_000, 5_200, 30_000, 90_000] {
            learner.ingest(event_at("sporadic", base, offset)).await;
        }

        let patterns = learner.learn().await;
        assert!(!patterns
            .iter()
            .any(|p| p.pattern_type == PatternKind::Frequency));
    }

    #[tokio::test]
    async fn test_correlation_pattern() {
        let learner = learner();
        let base = Utc::now();
        let mut offset = 0;
        for _ in 0..5 {
            learner.ingest(event_at("deploy", base, offset)).await;
            learner.ingest(event_at("error_spike", base, offset + 500)).await;
            offset += 60_000;
        }

        let patterns = learner.learn().await;
        let correlation = patterns
            .iter()
            .find(|p| p.pattern_id == "corr_deploy_error_spike")
            .unwrap();
        assert_eq!(correlation.occurrences, 5);
        assert!((correlation.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_learning_is_fast_enough() {
        let learner = learner();
        let base = Utc::now();
        let types = ["a", "b", "c", "d", "e"];
        let batch: Vec<SwarmEvent> = (0..1_000)
            .map(|i| event_at(types[i % types.len()], base, i as i64 * 50))
            .collect();
        learner.ingest_all(batch).await;

        let started = std::time::Instant::now();
        learner.learn().await;
        assert!(started.elapsed() < std::time::Duration::from_millis(500));
    }
}
