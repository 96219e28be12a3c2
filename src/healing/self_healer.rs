//! # Self-Healer
//!
//! Maps coordination events to failures and drives registered healing
//! strategies. Strategies are consulted in registration order; the
//! first whose `can_heal` matches is invoked. Results land in a bounded
//! history and aggregate statistics.

use crate::monitoring::metrics::SwarmEvent;
use crate::utils::error::SwarmResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use uuid::Uuid;

const HISTORY_CAPACITY: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// A detected failure needing recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Failure {
    pub failure_id: String,
    pub failure_type: String,
    pub agent_id: Option<String>,
    pub severity: FailureSeverity,
    pub detected_at: DateTime<Utc>,
    pub event: SwarmEvent,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Outcome of one healing attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingResult {
    pub success: bool,
    pub failure_id: String,
    pub strategy_used: String,
    pub actions_taken: Vec<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl HealingResult {
    #[must_use]
    pub fn skipped(failure_id: &str, reason: &str) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert(
            "error".to_string(),
            serde_json::Value::String(reason.to_string()),
        );
        Self {
            success: false,
            failure_id: failure_id.to_string(),
            strategy_used: "none".to_string(),
            actions_taken: Vec::new(),
            duration_ms: 0,
            timestamp: Utc::now(),
            metadata,
        }
    }
}

/// Behavioural interface for recovery actions.
#[async_trait]
pub trait HealingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_heal(&self, failure: &Failure) -> bool;

    async fn heal(&self, failure: &Failure) -> SwarmResult<HealingResult>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailureTypeStats {
    pub attempts: u64,
    pub successes: u64,
}

impl FailureTypeStats {
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealingStats {
    pub total_attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_duration_ms: u64,
    pub by_failure_type: HashMap<String, FailureTypeStats>,
}

impl HealingStats {
    #[must_use]
    pub fn avg_duration_ms(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.total_attempts as f64
        }
    }
}

/// Automatic failure recovery driver.
pub struct SelfHealer {
    strategies: RwLock<Vec<Arc<dyn HealingStrategy>>>,
    /// event type -> (failure type, severity)
    failure_map: RwLock<HashMap<String, (String, FailureSeverity)>>,
    history: RwLock<VecDeque<HealingResult>>,
    stats: RwLock<HealingStats>,
}

impl Default for SelfHealer {
    fn default() -> Self {
        Self::new()
    }
}

impl SelfHealer {
    #[must_use]
    pub fn new() -> Self {
        let mut failure_map = HashMap::new();
        failure_map.insert(
            "heartbeat_failed".to_string(),
            ("agent_failed".to_string(), FailureSeverity::High),
        );
        failure_map.insert(
            "task_timeout".to_string(),
            ("task_timeout".to_string(), FailureSeverity::Medium),
        );
        failure_map.insert(
            "resource_exhaustion".to_string(),
            ("resource_exhaustion".to_string(), FailureSeverity::High),
        );
        failure_map.insert(
            "quorum_loss".to_string(),
            ("quorum_loss".to_string(), FailureSeverity::Critical),
        );

        Self {
            strategies: RwLock::new(Vec::new()),
            failure_map: RwLock::new(failure_map),
            history: RwLock::new(VecDeque::new()),
            stats: RwLock::new(HealingStats::default()),
        }
    }

    /// Register an additional event-type mapping.
    pub async fn register_failure_type(
        &self,
        event_type: &str,
        failure_type: &str,
        severity: FailureSeverity,
    ) {
        self.failure_map.write().await.insert(
            event_type.to_string(),
            (failure_type.to_string(), severity),
        );
    }

    /// Append a strategy; order of registration is consultation order.
    pub async fn register_strategy(&self, strategy: Arc<dyn HealingStrategy>) {
        tracing::info!("Registered healing strategy: {}", strategy.name());
        self.strategies.write().await.push(strategy);
    }

    /// Map an event to a failure record, if its type is recognized.
    pub async fn detect_failure(&self, event: &SwarmEvent) -> Option<Failure> {
        let failure_map = self.failure_map.read().await;
        let (failure_type, severity) = failure_map.get(&event.event_type)?.clone();
        drop(failure_map);

        Some(Failure {
            failure_id: format!("failure_{}", Uuid::new_v4().simple()),
            failure_type,
            agent_id: event.agent_id.clone(),
            severity,
            detected_at: Utc::now(),
            event: event.clone(),
            metadata: event.metadata.clone(),
        })
    }

    /// Run the first applicable strategy. A failure nothing can handle
    /// produces an unsuccessful result rather than an error.
    pub async fn heal(&self, failure: &Failure) -> SwarmResult<HealingResult> {
        let strategy = {
            let strategies = self.strategies.read().await;
            strategies.iter().find(|s| s.can_heal(failure)).cloned()
        };

        let result = match strategy {
            None => {
                tracing::warn!(
                    "No healing strategy applicable for {} ({})",
                    failure.failure_id,
                    failure.failure_type
                );
                HealingResult::skipped(&failure.failure_id, "no_applicable_strategy")
            }
            Some(strategy) => {
                let started = Instant::now();
                let mut result = match strategy.heal(failure).await {
                    Ok(result) => result,
                    Err(err) => {
                        tracing::error!(
                            "Healing strategy {} failed for {}: {err}",
                            strategy.name(),
                            failure.failure_id
                        );
                        let mut result =
                            HealingResult::skipped(&failure.failure_id, &err.to_string());
                        result.strategy_used = strategy.name().to_string();
                        result
                    }
                };
                result.duration_ms = started.elapsed().as_millis() as u64;
                result
            }
        };

        self.record(failure, &result).await;
        Ok(result)
    }

    pub async fn healing_stats(&self) -> HealingStats {
        self.stats.read().await.clone()
    }

    pub async fn history(&self) -> Vec<HealingResult> {
        self.history.read().await.iter().cloned().collect()
    }

    async fn record(&self, failure: &Failure, result: &HealingResult) {
        {
            let mut stats = self.stats.write().await;
            stats.total_attempts += 1;
            stats.total_duration_ms += result.duration_ms;
            if result.success {
                stats.successes += 1;
            } else {
                stats.failures += 1;
            }
            let type_stats = stats
                .by_failure_type
                .entry(failure.failure_type.clone())
                .or_default();
            type_stats.attempts += 1;
            if result.success {
                type_stats.successes += 1;
            }
        }

        let mut history = self.history.write().await;
        history.push_back(result.clone());
        while history.len() > HISTORY_CAPACITY {
            history.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysHeals;

    #[async_trait]
    impl HealingStrategy for AlwaysHeals {
        fn name(&self) -> &'static str {
            "always_heals"
        }

        fn can_heal(&self, _failure: &Failure) -> bool {
            true
        }

        async fn heal(&self, failure: &Failure) -> SwarmResult<HealingResult> {
            Ok(HealingResult {
                success: true,
                failure_id: failure.failure_id.clone(),
                strategy_used: self.name().to_string(),
                actions_taken: vec!["noop".to_string()],
                duration_ms: 0,
                timestamp: Utc::now(),
                metadata: HashMap::new(),
            })
        }
    }

    struct NeverMatches;

    #[async_trait]
    impl HealingStrategy for NeverMatches {
        fn name(&self) -> &'static str {
            "never_matches"
        }

        fn can_heal(&self, _failure: &Failure) -> bool {
            false
        }

        async fn heal(&self, failure: &Failure) -> SwarmResult<HealingResult> {
            Ok(HealingResult::skipped(&failure.failure_id, "unreachable"))
        }
    }

    #[tokio::test]
    async fn test_detect_failure_maps_known_types() {
        let healer = SelfHealer::new();
        let event = SwarmEvent::new("heartbeat_failed").for_agent("a1");
        let failure = healer.detect_failure(&event).await.unwrap();
        assert_eq!(failure.failure_type, "agent_failed");
        assert_eq!(failure.severity, FailureSeverity::High);
        assert_eq!(failure.agent_id.as_deref(), Some("a1"));
    }

    #[tokio::test]
    async fn test_detect_failure_ignores_unknown_types() {
        let healer = SelfHealer::new();
        let event = SwarmEvent::new("task_completed");
        assert!(healer.detect_failure(&event).await.is_none());
    }

    #[tokio::test]
    async fn test_custom_failure_type_registration() {
        let healer = SelfHealer::new();
        healer
            .register_failure_type("disk_full", "resource_exhaustion", FailureSeverity::Critical)
            .await;
        let failure = healer
            .detect_failure(&SwarmEvent::new("disk_full"))
            .await
            .unwrap();
        assert_eq!(failure.failure_type, "resource_exhaustion");
        assert_eq!(failure.severity, FailureSeverity::Critical);
    }

    #[tokio::test]
    async fn test_first_matching_strategy_wins() {
        let healer = SelfHealer::new();
        healer.register_strategy(Arc::new(NeverMatches)).await;
        healer.register_strategy(Arc::new(AlwaysHeals)).await;

        let failure = healer
            .detect_failure(&SwarmEvent::new("heartbeat_failed"))
            .await
            .unwrap();
        let result = healer.heal(&failure).await.unwrap();
        assert!(result.success);
        assert_eq!(result.strategy_used, "always_heals");
    }

    #[tokio::test]
    async fn test_no_strategy_yields_unsuccessful_result() {
        let healer = SelfHealer::new();
        healer.register_strategy(Arc::new(NeverMatches)).await;

        let failure = healer
            .detect_failure(&SwarmEvent::new("heartbeat_failed"))
            .await
            .unwrap();
        let result = healer.heal(&failure).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.strategy_used, "none");
    }

    #[tokio::test]
    async fn test_stats_and_history_accumulate() {
        let healer = SelfHealer::new();
        healer.register_strategy(Arc::new(AlwaysHeals)).await;

        for _ in 0..3 {
            let failure = healer
                .detect_failure(&SwarmEvent::new("task_timeout"))
                .await
                .unwrap();
            healer.heal(&failure).await.unwrap();
        }

        let stats = healer.healing_stats().await;
        assert_eq!(stats.total_attempts, 3);
        assert_eq!(stats.successes, 3);
        assert!((stats.by_failure_type["task_timeout"].success_rate() - 1.0).abs() < f64::EPSILON);
        assert_eq!(healer.history().await.len(), 3);
    }
}
