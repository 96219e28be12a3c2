//! # Pattern Matcher
//!
//! Real-time matching of the live event stream against learned
//! patterns, plus next-event prediction. Similarity is a weighted
//! blend: longest-common-subsequence over event types, event/metadata
//! agreement, and timing agreement.

use crate::monitoring::metrics::SwarmEvent;
use crate::patterns::learner::Pattern;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// Weights of the composite similarity score.
const SEQUENCE_WEIGHT: f64 = 0.5;
const EVENT_WEIGHT: f64 = 0.3;
const TEMPORAL_WEIGHT: f64 = 0.2;

/// A pattern matched against the current window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternMatch {
    pub pattern: Pattern,
    pub similarity: f64,
    pub matched_events: Vec<SwarmEvent>,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A predicted future event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub predicted_event_type: String,
    pub probability: f64,
    pub based_on_pattern: String,
    pub confidence: f64,
    pub expected_time_ms: Option<u64>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Sliding-window matcher over learned patterns.
pub struct PatternMatcher {
    match_threshold: f64,
    max_sequence_length: usize,
    patterns: RwLock<Vec<Pattern>>,
    window: RwLock<VecDeque<SwarmEvent>>,
}

impl PatternMatcher {
    #[must_use]
    pub fn new(match_threshold: f64, max_sequence_length: usize) -> Self {
        Self {
            match_threshold: match_threshold.clamp(0.0, 1.0),
            max_sequence_length,
            patterns: RwLock::new(Vec::new()),
            window: RwLock::new(VecDeque::new()),
        }
    }

    /// Replace the loaded pattern set.
    pub async fn load_patterns(&self, patterns: Vec<Pattern>) {
        *self.patterns.write().await = patterns;
    }

    pub async fn pattern_count(&self) -> usize {
        self.patterns.read().await.len()
    }

    pub async fn current_window(&self) -> Vec<SwarmEvent> {
        self.window.read().await.iter().cloned().collect()
    }

    /// Patterns containing the given event type.
    pub async fn matching_patterns(&self, event_type: &str) -> Vec<Pattern> {
        self.patterns
            .read()
            .await
            .iter()
            .filter(|p| p.event_types.iter().any(|t| t == event_type))
            .cloned()
            .collect()
    }

    /// Slide the window and match every loaded pattern against it.
    /// Matches at or above the threshold, best first.
    pub async fn observe(&self, event: SwarmEvent) -> Vec<PatternMatch> {
        let window: Vec<SwarmEvent> = {
            let mut window = self.window.write().await;
            window.push_back(event.clone());
            while window.len() > self.max_sequence_length {
                window.pop_front();
            }
            window.iter().cloned().collect()
        };

        let current_types: Vec<&str> = window.iter().map(|e| e.event_type.as_str()).collect();
        let patterns = self.patterns.read().await;

        let mut matches = Vec::new();
        for pattern in patterns.iter() {
            let pattern_types: Vec<&str> =
                pattern.event_types.iter().map(String::as_str).collect();

            let sequence_similarity = lcs_similarity(&current_types, &pattern_types);
            let event_similarity = event_similarity(&event, pattern);
            let temporal_similarity = temporal_similarity(&window, pattern);

            let similarity = sequence_similarity * SEQUENCE_WEIGHT
                + event_similarity * EVENT_WEIGHT
                + temporal_similarity * TEMPORAL_WEIGHT;

            if similarity >= self.match_threshold {
                let mut metadata = HashMap::new();
                metadata.insert("sequence_similarity".to_string(), sequence_similarity.into());
                metadata.insert("event_similarity".to_string(), event_similarity.into());
                metadata.insert("temporal_similarity".to_string(), temporal_similarity.into());
                matches.push(PatternMatch {
                    pattern: pattern.clone(),
                    similarity,
                    matched_events: window.clone(),
                    timestamp: Utc::now(),
                    metadata,
                });
            }
        }

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches
    }

    /// Predict likely next events by extending partially matched
    /// patterns to their next element, most probable first.
    pub async fn predict_next(&self, current_events: &[SwarmEvent]) -> Vec<Prediction> {
        let current_types: Vec<&str> = current_events
            .iter()
            .map(|e| e.event_type.as_str())
            .collect();
        let patterns = self.patterns.read().await;

        let mut predictions = Vec::new();
        for pattern in patterns.iter() {
            let pattern_types: Vec<&str> =
                pattern.event_types.iter().map(String::as_str).collect();
            let matched = matching_prefix_len(&current_types, &pattern_types);
            if matched == 0 || matched >= pattern_types.len() {
                continue;
            }

            let match_quality = matched as f64 / pattern_types.len() as f64;
            let occurrence_weight = (pattern.occurrences as f64 / 100.0).min(1.0);
            let probability =
                pattern.confidence * 0.4 + match_quality * 0.4 + occurrence_weight * 0.2;

            let mut metadata = HashMap::new();
            metadata.insert("match_length".to_string(), matched.into());
            metadata.insert("match_quality".to_string(), match_quality.into());
            metadata.insert("occurrence_weight".to_string(), occurrence_weight.into());

            predictions.push(Prediction {
                predicted_event_type: pattern_types[matched].to_string(),
                probability,
                based_on_pattern: pattern.pattern_id.clone(),
                confidence: pattern.confidence,
                expected_time_ms: predict_timing(pattern, current_events),
                metadata,
            });
        }

        predictions.sort_by(|a, b| {
            b.probability
                .partial_cmp(&a.probability)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        predictions
    }

    /// Match and predict in one pass for a freshly observed event.
    pub async fn process_event(&self, event: SwarmEvent) -> (Vec<PatternMatch>, Vec<Prediction>) {
        let matches = self.observe(event).await;
        let window = self.current_window().await;
        let predictions = self.predict_next(&window).await;
        (matches, predictions)
    }
}

/// Longest common subsequence similarity between two type sequences.
fn lcs_similarity(a: &[&str], b: &[&str]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (m, n) = (a.len(), b.len());
    let mut dp = vec![vec![0usize; n + 1]; m + 1];
    for i in 1..=m {
        for j in 1..=n {
            dp[i][j] = if a[i - 1] == b[j - 1] {
                dp[i - 1][j - 1] + 1
            } else {
                dp[i - 1][j].max(dp[i][j - 1])
            };
        }
    }
    dp[m][n] as f64 / m.max(n) as f64
}

/// Event-type membership (half weight) plus metadata agreement.
fn event_similarity(event: &SwarmEvent, pattern: &Pattern) -> f64 {
    let mut score = 0.0;
    if pattern.event_types.iter().any(|t| t == &event.event_type) {
        score += 0.5;
    }
    score += metadata_similarity(&event.metadata, &pattern.metadata) * 0.5;
    score
}

fn metadata_similarity(
    a: &HashMap<String, serde_json::Value>,
    b: &HashMap<String, serde_json::Value>,
) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let common: Vec<&String> = a.keys().filter(|k| b.contains_key(*k)).collect();
    if common.is_empty() {
        return 0.0;
    }

    let mut total = 0.0;
    for key in &common {
        let (left, right) = (&a[*key], &b[*key]);
        total += match (left.as_f64(), right.as_f64()) {
            (Some(x), Some(y)) => {
                if x == 0.0 && y == 0.0 {
                    1.0
                } else {
                    1.0 - ((x - y).abs() / x.abs().max(y.abs())).min(1.0)
                }
            }
            _ => {
                if left == right {
                    1.0
                } else {
                    0.0
                }
            }
        };
    }
    total / common.len() as f64
}

/// Compare the window's mean inter-arrival interval to the pattern's
/// average per-occurrence duration; within 50 % counts as similar.
fn temporal_similarity(window: &[SwarmEvent], pattern: &Pattern) -> f64 {
    if window.len() < 2 {
        return 0.5;
    }
    let intervals: Vec<f64> = window
        .windows(2)
        .map(|pair| (pair[1].timestamp - pair[0].timestamp).num_milliseconds() as f64)
        .collect();
    let avg_interval = intervals.iter().sum::<f64>() / intervals.len() as f64;

    let pattern_duration =
        (pattern.last_seen - pattern.first_seen).num_milliseconds() as f64;
    let pattern_avg = if pattern.occurrences > 1 {
        pattern_duration / pattern.occurrences as f64
    } else {
        pattern_duration
    };
    if pattern_avg == 0.0 {
        return 0.5;
    }

    let difference = (avg_interval - pattern_avg).abs();
    let tolerance = pattern_avg * 0.5;
    if difference <= tolerance {
        1.0 - difference / tolerance
    } else {
        0.0
    }
}

fn matching_prefix_len(current: &[&str], pattern: &[&str]) -> usize {
    current
        .iter()
        .zip(pattern.iter())
        .take_while(|(a, b)| a == b)
        .count()
}

fn predict_timing(pattern: &Pattern, current_events: &[SwarmEvent]) -> Option<u64> {
    let pattern_duration = (pattern.last_seen - pattern.first_seen).num_milliseconds();
    let avg_duration_ms = if pattern.occurrences > 1 {
        pattern_duration as f64 / pattern.occurrences as f64
    } else {
        pattern_duration as f64
    };

    let events_in_pattern = pattern.event_types.len();
    if events_in_pattern == 0 {
        return Some(avg_duration_ms.max(0.0) as u64);
    }
    let current_length = current_events.len().min(events_in_pattern);
    let remaining = events_in_pattern - current_length;
    let time_per_event = avg_duration_ms / events_in_pattern as f64;
    Some((time_per_event * remaining as f64).max(0.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::learner::PatternKind;

    fn pattern(id: &str, types: &[&str], confidence: f64, occurrences: u64) -> Pattern {
        // Zero pattern duration keeps temporal similarity neutral (0.5)
        // so these tests exercise the sequence and event terms.
        let now = Utc::now();
        Pattern {
            pattern_id: id.to_string(),
            pattern_type: PatternKind::Sequence,
            description: String::new(),
            event_types: types.iter().map(ToString::to_string).collect(),
            confidence,
            occurrences,
            first_seen: now,
            last_seen: now,
            metadata: HashMap::new(),
        }
    }

    fn event(event_type: &str) -> SwarmEvent {
        SwarmEvent::new(event_type)
    }

    #[test]
    fn test_lcs_similarity() {
        assert!((lcs_similarity(&["a", "b", "c"], &["a", "b", "c"]) - 1.0).abs() < f64::EPSILON);
        assert!((lcs_similarity(&["a", "x", "c"], &["a", "b", "c"]) - 2.0 / 3.0).abs() < 0.001);
        assert_eq!(lcs_similarity(&[], &["a"]), 0.0);
    }

    #[test]
    fn test_matching_prefix_len() {
        assert_eq!(matching_prefix_len(&["a", "b"], &["a", "b", "c"]), 2);
        assert_eq!(matching_prefix_len(&["x", "b"], &["a", "b", "c"]), 0);
    }

    #[tokio::test]
    async fn test_identical_sequence_matches() {
        let matcher = PatternMatcher::new(0.7, 10);
        matcher
            .load_patterns(vec![pattern("p1", &["a", "b", "c"], 0.9, 10)])
            .await;

        matcher.observe(event("a")).await;
        matcher.observe(event("b")).await;
        let matches = matcher.observe(event("c")).await;

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].pattern.pattern_id, "p1");
        assert!(matches[0].similarity >= 0.7);
    }

    #[tokio::test]
    async fn test_unrelated_sequence_does_not_match() {
        let matcher = PatternMatcher::new(0.8, 10);
        matcher
            .load_patterns(vec![pattern("p1", &["a", "b", "c"], 0.9, 10)])
            .await;

        matcher.observe(event("x")).await;
        matcher.observe(event("y")).await;
        let matches = matcher.observe(event("z")).await;
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn test_window_is_bounded() {
        let matcher = PatternMatcher::new(0.8, 3);
        for name in ["e1", "e2", "e3", "e4", "e5"] {
            matcher.observe(event(name)).await;
        }
        let window = matcher.current_window().await;
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].event_type, "e3");
    }

    #[tokio::test]
    async fn test_prediction_extends_partial_match() {
        let matcher = PatternMatcher::new(0.8, 10);
        matcher
            .load_patterns(vec![pattern(
                "p1",
                &["task_started", "task_slow", "task_timeout"],
                0.8,
                50,
            )])
            .await;

        let current = vec![event("task_started"), event("task_slow")];
        let predictions = matcher.predict_next(&current).await;

        assert_eq!(predictions.len(), 1);
        let prediction = &predictions[0];
        assert_eq!(prediction.predicted_event_type, "task_timeout");
        // 0.4*0.8 + 0.4*(2/3) + 0.2*0.5 = 0.6866...
        assert!((prediction.probability - 0.6867).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_complete_match_yields_no_prediction() {
        let matcher = PatternMatcher::new(0.8, 10);
        matcher
            .load_patterns(vec![pattern("p1", &["a", "b"], 0.9, 10)])
            .await;

        let current = vec![event("a"), event("b")];
        assert!(matcher.predict_next(&current).await.is_empty());
    }

    #[tokio::test]
    async fn test_predictions_sorted_by_probability() {
        let matcher = PatternMatcher::new(0.8, 10);
        matcher
            .load_patterns(vec![
                pattern("weak", &["a", "x"], 0.3, 1),
                pattern("strong", &["a", "y"], 0.95, 100),
            ])
            .await;

        let predictions = matcher.predict_next(&[event("a")]).await;
        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[0].based_on_pattern, "strong");
    }
}
