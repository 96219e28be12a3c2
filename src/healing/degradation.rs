//! # Gradual Degradation
//!
//! Maps resource pressure to service levels instead of failing outright.
//! Higher levels stretch timeouts and shed non-critical features; reset
//! returns to full service.

use crate::healing::self_healer::{Failure, HealingResult, HealingStrategy};
use crate::utils::error::SwarmResult;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Service levels, from full operation down to survival mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DegradationLevel {
    Full,
    Reduced1,
    Reduced2,
    Reduced3,
    Minimal,
}

impl DegradationLevel {
    /// Level for a resource usage percentage.
    #[must_use]
    pub fn from_usage(usage_percent: f64) -> Self {
        if usage_percent < 90.0 {
            Self::Full
        } else if usage_percent < 95.0 {
            Self::Reduced1
        } else if usage_percent < 98.0 {
            Self::Reduced2
        } else if usage_percent < 99.0 {
            Self::Reduced3
        } else {
            Self::Minimal
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "FULL",
            Self::Reduced1 => "REDUCED_1",
            Self::Reduced2 => "REDUCED_2",
            Self::Reduced3 => "REDUCED_3",
            Self::Minimal => "MINIMAL",
        }
    }

    /// Multiplier applied to operation timeouts at this level.
    #[must_use]
    pub fn timeout_multiplier(self) -> f64 {
        match self {
            Self::Full => 1.0,
            Self::Reduced1 => 1.5,
            Self::Reduced2 => 2.0,
            Self::Reduced3 => 3.0,
            Self::Minimal => 5.0,
        }
    }

    /// Whether non-critical features are disabled at this level.
    #[must_use]
    pub fn disables_noncritical(self) -> bool {
        self >= Self::Reduced2
    }
}

/// Degrades service under resource pressure instead of hard-failing.
pub struct GradualDegradationStrategy {
    levels: RwLock<HashMap<String, DegradationLevel>>,
}

impl Default for GradualDegradationStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl GradualDegradationStrategy {
    #[must_use]
    pub fn new() -> Self {
        Self {
            levels: RwLock::new(HashMap::new()),
        }
    }

    pub async fn current_level(&self, resource_type: &str) -> DegradationLevel {
        self.levels
            .read()
            .await
            .get(resource_type)
            .copied()
            .unwrap_or(DegradationLevel::Full)
    }

    /// Return a resource to full service.
    pub async fn reset(&self, resource_type: &str) {
        self.levels.write().await.remove(resource_type);
        tracing::info!("Degradation for {resource_type} reset to FULL");
    }

    pub async fn all_levels(&self) -> HashMap<String, DegradationLevel> {
        self.levels.read().await.clone()
    }
}

#[async_trait]
impl HealingStrategy for GradualDegradationStrategy {
    fn name(&self) -> &'static str {
        "gradual_degradation"
    }

    fn can_heal(&self, failure: &Failure) -> bool {
        matches!(
            failure.failure_type.as_str(),
            "resource_exhaustion"
                | "token_exhaustion"
                | "quota_exceeded"
                | "memory_exhaustion"
                | "memory_pressure"
                | "high_latency"
        )
    }

    async fn heal(&self, failure: &Failure) -> SwarmResult<HealingResult> {
        let usage = failure
            .metadata
            .get("usage_percent")
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(0.0);
        let resource_type = failure
            .metadata
            .get("resource_type")
            .and_then(|v| v.as_str())
            .unwrap_or("default")
            .to_string();

        let level = DegradationLevel::from_usage(usage);
        self.levels
            .write()
            .await
            .insert(resource_type.clone(), level);

        tracing::warn!(
            "Degraded {resource_type} to {} at {usage:.1}% usage",
            level.as_str()
        );

        let mut metadata = HashMap::new();
        metadata.insert(
            "degradation_level".to_string(),
            serde_json::Value::String(level.as_str().to_string()),
        );
        metadata.insert(
            "timeout_multiplier".to_string(),
            level.timeout_multiplier().into(),
        );
        metadata.insert("resource_type".to_string(), resource_type.clone().into());

        Ok(HealingResult {
            success: true,
            failure_id: failure.failure_id.clone(),
            strategy_used: self.name().to_string(),
            actions_taken: vec![format!("set {resource_type} to {}", level.as_str())],
            duration_ms: 0,
            timestamp: Utc::now(),
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::healing::self_healer::FailureSeverity;
    use crate::monitoring::metrics::SwarmEvent;
    use serde_json::json;

    fn pressure_failure(failure_type: &str, usage: f64) -> Failure {
        let mut metadata = HashMap::new();
        metadata.insert("usage_percent".to_string(), json!(usage));
        metadata.insert("resource_type".to_string(), json!("token"));
        Failure {
            failure_id: "f1".to_string(),
            failure_type: failure_type.to_string(),
            agent_id: None,
            severity: FailureSeverity::High,
            detected_at: Utc::now(),
            event: SwarmEvent::new(failure_type),
            metadata,
        }
    }

    #[test]
    fn test_level_thresholds() {
        assert_eq!(DegradationLevel::from_usage(85.0), DegradationLevel::Full);
        assert_eq!(DegradationLevel::from_usage(92.0), DegradationLevel::Reduced1);
        assert_eq!(DegradationLevel::from_usage(96.0), DegradationLevel::Reduced2);
        assert_eq!(DegradationLevel::from_usage(98.5), DegradationLevel::Reduced3);
        assert_eq!(DegradationLevel::from_usage(99.5), DegradationLevel::Minimal);
    }

    #[test]
    fn test_higher_levels_stretch_timeouts() {
        assert!(DegradationLevel::Minimal.timeout_multiplier()
            > DegradationLevel::Reduced1.timeout_multiplier());
        assert!(!DegradationLevel::Reduced1.disables_noncritical());
        assert!(DegradationLevel::Reduced2.disables_noncritical());
    }

    #[tokio::test]
    async fn test_heal_applies_level() {
        let strategy = GradualDegradationStrategy::new();
        let failure = pressure_failure("token_exhaustion", 95.0);
        assert!(strategy.can_heal(&failure));

        let result = strategy.heal(&failure).await.unwrap();
        assert!(result.success);
        assert_eq!(result.metadata["degradation_level"], json!("REDUCED_2"));
        assert_eq!(
            strategy.current_level("token").await,
            DegradationLevel::Reduced2
        );
    }

    #[tokio::test]
    async fn test_reset_returns_to_full() {
        let strategy = GradualDegradationStrategy::new();
        strategy
            .heal(&pressure_failure("quota_exceeded", 99.5))
            .await
            .unwrap();
        assert_eq!(
            strategy.current_level("token").await,
            DegradationLevel::Minimal
        );

        strategy.reset("token").await;
        assert_eq!(strategy.current_level("token").await, DegradationLevel::Full);
    }

    #[tokio::test]
    async fn test_non_pressure_failures_not_applicable() {
        let strategy = GradualDegradationStrategy::new();
        let failure = pressure_failure("agent_failed", 95.0);
        assert!(!strategy.can_heal(&failure));
    }
}
