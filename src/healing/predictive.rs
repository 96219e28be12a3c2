//! # Predictive Healing
//!
//! Predicts failures before they occur by combining four signal
//! sources: learned pattern matches, resource bottleneck trends, agent
//! health degradation, and queue-depth pressure. Confident predictions
//! can trigger preventive healing; recorded outcomes feed back into the
//! per-pattern accuracy so repeated false positives lose influence.

use crate::healing::bottleneck::BottleneckDetector;
use crate::healing::self_healer::{Failure, FailureSeverity, HealingResult, SelfHealer};
use crate::monitoring::heartbeat::{HealthState, HeartbeatMonitor};
use crate::monitoring::metrics::SwarmEvent;
use crate::patterns::matcher::PatternMatcher;
use crate::resource::controller::BottleneckSeverity;
use crate::utils::config::PredictiveConfig;
use crate::utils::error::SwarmResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Confidence blend weights.
const PATTERN_WEIGHT: f64 = 0.5;
const ACCURACY_WEIGHT: f64 = 0.3;
const RECENCY_WEIGHT: f64 = 0.2;

/// Events older than this contribute no recency.
const RECENCY_HORIZON_MS: i64 = 60_000;

/// A failure expected to happen soon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictedFailure {
    pub prediction_id: String,
    pub failure_type: String,
    pub confidence: f64,
    /// Signal source: `pattern`, `resource_trend`, `agent_health`, or
    /// `queue_depth`.
    pub source: String,
    pub based_on_pattern: Option<String>,
    pub expected_time_ms: Option<u64>,
    pub predicted_at: DateTime<Utc>,
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
struct AccuracyRecord {
    predictions: u64,
    correct: u64,
}

impl AccuracyRecord {
    fn rate(&self) -> f64 {
        if self.predictions == 0 {
            // Unproven sources start at even odds.
            0.5
        } else {
            self.correct as f64 / self.predictions as f64
        }
    }
}

pub struct PredictiveHealing {
    matcher: Arc<PatternMatcher>,
    detector: Arc<BottleneckDetector>,
    healer: Arc<SelfHealer>,
    monitor: Option<HeartbeatMonitor>,
    config: PredictiveConfig,
    /// Historical accuracy keyed by pattern id or source name.
    accuracy: RwLock<HashMap<String, AccuracyRecord>>,
}

impl PredictiveHealing {
    #[must_use]
    pub fn new(
        matcher: Arc<PatternMatcher>,
        detector: Arc<BottleneckDetector>,
        healer: Arc<SelfHealer>,
        config: PredictiveConfig,
    ) -> Self {
        Self {
            matcher,
            detector,
            healer,
            monitor: None,
            config,
            accuracy: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_monitor(mut self, monitor: HeartbeatMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Predict failures from the current event window and live state,
    /// sorted by confidence. When `auto_apply` is configured, matching
    /// healing runs proactively for predictions above the threshold.
    pub async fn predict_failures(
        &self,
        events: &[SwarmEvent],
    ) -> SwarmResult<Vec<PredictedFailure>> {
        let mut predictions = Vec::new();
        let recency = recency_factor(events);

        predictions.extend(self.predict_from_patterns(events, recency).await);
        predictions.extend(self.predict_from_bottlenecks(recency).await?);
        predictions.extend(self.predict_from_agent_health(recency).await);

        predictions.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        if self.config.auto_apply {
            for prediction in predictions.clone() {
                if prediction.confidence >= self.config.confidence_threshold {
                    let result = self.apply_preventive_healing(&prediction).await?;
                    if let Some(result) = result {
                        tracing::info!(
                            "Preventive healing for predicted {}: success={}",
                            prediction.failure_type,
                            result.success
                        );
                    }
                }
            }
        }

        Ok(predictions)
    }

    /// Heal proactively for a confident prediction. Returns `None` when
    /// the prediction falls short of the threshold.
    pub async fn apply_preventive_healing(
        &self,
        prediction: &PredictedFailure,
    ) -> SwarmResult<Option<HealingResult>> {
        if prediction.confidence < self.config.confidence_threshold {
            return Ok(None);
        }

        let mut metadata = prediction.metadata.clone();
        metadata.insert("preventive".to_string(), serde_json::Value::Bool(true));
        metadata.insert(
            "prediction_id".to_string(),
            serde_json::Value::String(prediction.prediction_id.clone()),
        );

        let failure = Failure {
            failure_id: format!("predicted_{}", Uuid::new_v4().simple()),
            failure_type: prediction.failure_type.clone(),
            agent_id: prediction
                .metadata
                .get("agent_id")
                .and_then(|v| v.as_str())
                .map(ToString::to_string),
            severity: FailureSeverity::Medium,
            detected_at: Utc::now(),
            event: SwarmEvent::new(&prediction.failure_type),
            metadata,
        };

        Ok(Some(self.healer.heal(&failure).await?))
    }

    /// Feed a prediction outcome back into the accuracy record; false
    /// positives lower the pattern's future contribution.
    pub async fn record_prediction_outcome(&self, prediction: &PredictedFailure, occurred: bool) {
        let key = prediction
            .based_on_pattern
            .clone()
            .unwrap_or_else(|| prediction.source.clone());
        let mut accuracy = self.accuracy.write().await;
        let record = accuracy.entry(key).or_default();
        record.predictions += 1;
        if occurred {
            record.correct += 1;
        }
    }

    pub async fn historical_accuracy(&self, key: &str) -> f64 {
        self.accuracy
            .read()
            .await
            .get(key)
            .map_or(0.5, AccuracyRecord::rate)
    }

    async fn predict_from_patterns(
        &self,
        events: &[SwarmEvent],
        recency: f64,
    ) -> Vec<PredictedFailure> {
        let mut predictions = Vec::new();
        for candidate in self.matcher.predict_next(events).await {
            if !is_failure_event_type(&candidate.predicted_event_type) {
                continue;
            }
            let accuracy = self.historical_accuracy(&candidate.based_on_pattern).await;
            let confidence = PATTERN_WEIGHT * candidate.probability
                + ACCURACY_WEIGHT * accuracy
                + RECENCY_WEIGHT * recency;

            let mut metadata = candidate.metadata.clone();
            metadata.insert(
                "pattern_probability".to_string(),
                candidate.probability.into(),
            );

            predictions.push(PredictedFailure {
                prediction_id: format!("pred_{}", Uuid::new_v4().simple()),
                failure_type: candidate.predicted_event_type.clone(),
                confidence,
                source: "pattern".to_string(),
                based_on_pattern: Some(candidate.based_on_pattern.clone()),
                expected_time_ms: candidate.expected_time_ms,
                predicted_at: Utc::now(),
                metadata,
            });
        }
        predictions
    }

    async fn predict_from_bottlenecks(&self, recency: f64) -> SwarmResult<Vec<PredictedFailure>> {
        let mut predictions = Vec::new();
        for bottleneck in self.detector.detect_bottlenecks().await? {
            let (failure_type, source) = match bottleneck.kind.as_str() {
                "token_exhaustion" | "quota_exceeded" => {
                    ("resource_exhaustion".to_string(), "resource_trend")
                }
                "task_queue_backlog" => ("task_timeout".to_string(), "queue_depth"),
                "slow_agent" => ("agent_failed".to_string(), "resource_trend"),
                "consensus_timeout" => ("quorum_loss".to_string(), "resource_trend"),
                _ => continue,
            };

            let severity_score = match bottleneck.severity {
                BottleneckSeverity::Critical => 0.9,
                BottleneckSeverity::High => 0.75,
                BottleneckSeverity::Warning => 0.5,
            };
            let accuracy = self.historical_accuracy(source).await;
            let confidence = PATTERN_WEIGHT * severity_score
                + ACCURACY_WEIGHT * accuracy
                + RECENCY_WEIGHT * recency;

            let mut metadata = HashMap::new();
            metadata.insert(
                "bottleneck_kind".to_string(),
                serde_json::Value::String(bottleneck.kind.clone()),
            );
            metadata.insert(
                "details".to_string(),
                serde_json::Value::String(bottleneck.details.clone()),
            );

            predictions.push(PredictedFailure {
                prediction_id: format!("pred_{}", Uuid::new_v4().simple()),
                failure_type,
                confidence,
                source: source.to_string(),
                based_on_pattern: None,
                expected_time_ms: None,
                predicted_at: Utc::now(),
                metadata,
            });
        }
        Ok(predictions)
    }

    async fn predict_from_agent_health(&self, recency: f64) -> Vec<PredictedFailure> {
        let Some(monitor) = &self.monitor else {
            return Vec::new();
        };

        let mut predictions = Vec::new();
        for agent_id in monitor.unhealthy_agents(HealthState::Degraded).await {
            let Ok(state) = monitor.check_agent_health(&agent_id).await else {
                continue;
            };
            let health_score = match state {
                HealthState::Critical => 0.85,
                HealthState::Degraded => 0.6,
                // Already failed or healthy again; not a prediction.
                _ => continue,
            };

            let accuracy = self.historical_accuracy("agent_health").await;
            let confidence = PATTERN_WEIGHT * health_score
                + ACCURACY_WEIGHT * accuracy
                + RECENCY_WEIGHT * recency;

            let mut metadata = HashMap::new();
            metadata.insert(
                "agent_id".to_string(),
                serde_json::Value::String(agent_id.clone()),
            );
            metadata.insert(
                "health_state".to_string(),
                serde_json::Value::String(state.as_str().to_string()),
            );

            predictions.push(PredictedFailure {
                prediction_id: format!("pred_{}", Uuid::new_v4().simple()),
                failure_type: "agent_failed".to_string(),
                confidence,
                source: "agent_health".to_string(),
                based_on_pattern: None,
                expected_time_ms: None,
                predicted_at: Utc::now(),
                metadata,
            });
        }
        predictions
    }
}

fn is_failure_event_type(event_type: &str) -> bool {
    event_type.contains("fail")
        || event_type.contains("timeout")
        || event_type.contains("exhaustion")
        || event_type.contains("loss")
        || event_type.contains("error")
}

/// 1.0 for a window whose newest event is fresh, decaying linearly to
/// 0.0 at the horizon. An empty window has no recency.
fn recency_factor(events: &[SwarmEvent]) -> f64 {
    let Some(last) = events.last() else {
        return 0.0;
    };
    let age_ms = (Utc::now() - last.timestamp).num_milliseconds();
    if age_ms <= 0 {
        return 1.0;
    }
    (1.0 - age_ms as f64 / RECENCY_HORIZON_MS as f64).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::healing::degradation::GradualDegradationStrategy;
    use crate::monitoring::metrics::InMemoryMetricsStore;
    use crate::patterns::learner::{Pattern, PatternKind};
    use crate::resource::ResourceController;
    use crate::utils::config::TokenBudgetConfig;

    fn failure_pattern() -> Pattern {
        let now = Utc::now();
        Pattern {
            pattern_id: "seq_task_started_task_slow_task_timeout".to_string(),
            pattern_type: PatternKind::Sequence,
            description: String::new(),
            event_types: vec![
                "task_started".to_string(),
                "task_slow".to_string(),
                "task_timeout".to_string(),
            ],
            confidence: 0.9,
            occurrences: 80,
            first_seen: now,
            last_seen: now,
            metadata: HashMap::new(),
        }
    }

    async fn predictor(auto_apply: bool) -> (PredictiveHealing, Arc<ResourceController>) {
        let controller = Arc::new(ResourceController::new(TokenBudgetConfig::default()));
        let store = Arc::new(InMemoryMetricsStore::default());
        let detector = Arc::new(BottleneckDetector::new(Arc::clone(&controller), store));
        let matcher = Arc::new(PatternMatcher::new(0.8, 10));
        matcher.load_patterns(vec![failure_pattern()]).await;
        let healer = Arc::new(SelfHealer::new());
        healer
            .register_strategy(Arc::new(GradualDegradationStrategy::new()))
            .await;

        let config = PredictiveConfig {
            confidence_threshold: 0.7,
            auto_apply,
        };
        (
            PredictiveHealing::new(matcher, detector, healer, config),
            controller,
        )
    }

    fn window() -> Vec<SwarmEvent> {
        vec![SwarmEvent::new("task_started"), SwarmEvent::new("task_slow")]
    }

    #[tokio::test]
    async fn test_pattern_prediction_surfaces_failure() {
        let (predictor, _controller) = predictor(false).await;
        let predictions = predictor.predict_failures(&window()).await.unwrap();

        let pattern_prediction = predictions
            .iter()
            .find(|p| p.source == "pattern")
            .unwrap();
        assert_eq!(pattern_prediction.failure_type, "task_timeout");
        assert!(pattern_prediction.confidence > 0.5);
    }

    #[tokio::test]
    async fn test_resource_trend_prediction() {
        let (predictor, controller) = predictor(false).await;
        controller.tokens().allocate("s1", Some(10_000)).await.unwrap();
        controller.tokens().consume("s1", 9_200).await.unwrap();

        let predictions = predictor.predict_failures(&[]).await.unwrap();
        let resource = predictions
            .iter()
            .find(|p| p.source == "resource_trend")
            .unwrap();
        assert_eq!(resource.failure_type, "resource_exhaustion");
    }

    #[tokio::test]
    async fn test_low_confidence_prediction_not_applied() {
        let (predictor, _controller) = predictor(false).await;
        let prediction = PredictedFailure {
            prediction_id: "p1".to_string(),
            failure_type: "resource_exhaustion".to_string(),
            confidence: 0.4,
            source: "resource_trend".to_string(),
            based_on_pattern: None,
            expected_time_ms: None,
            predicted_at: Utc::now(),
            metadata: HashMap::new(),
        };
        let result = predictor.apply_preventive_healing(&prediction).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_confident_prediction_triggers_healing() {
        let (predictor, _controller) = predictor(false).await;
        let mut metadata = HashMap::new();
        metadata.insert("usage_percent".to_string(), serde_json::json!(96.0));
        metadata.insert("resource_type".to_string(), serde_json::json!("token"));

        let prediction = PredictedFailure {
            prediction_id: "p1".to_string(),
            failure_type: "resource_exhaustion".to_string(),
            confidence: 0.9,
            source: "resource_trend".to_string(),
            based_on_pattern: None,
            expected_time_ms: None,
            predicted_at: Utc::now(),
            metadata,
        };
        let result = predictor
            .apply_preventive_healing(&prediction)
            .await
            .unwrap()
            .unwrap();
        assert!(result.success);
        assert_eq!(result.strategy_used, "gradual_degradation");
    }

    #[tokio::test]
    async fn test_false_positives_reduce_future_confidence() {
        let (predictor, _controller) = predictor(false).await;

        let before = predictor.predict_failures(&window()).await.unwrap();
        let before_confidence = before
            .iter()
            .find(|p| p.source == "pattern")
            .unwrap()
            .confidence;

        // Record repeated false positives against the pattern.
        let sample = before.iter().find(|p| p.source == "pattern").unwrap();
        for _ in 0..5 {
            predictor.record_prediction_outcome(sample, false).await;
        }

        let after = predictor.predict_failures(&window()).await.unwrap();
        let after_confidence = after
            .iter()
            .find(|p| p.source == "pattern")
            .unwrap()
            .confidence;
        assert!(after_confidence < before_confidence);
    }
}
