//! # Healing Strategies
//!
//! Concrete recovery actions. Each strategy receives its collaborators
//! at construction; nothing reaches for global state. Healing actions
//! that call into the coordinator do so without holding healer locks.

use crate::core::coordinator::SwarmCoordinator;
use crate::core::topology::{AgentInfo, Placement};
use crate::healing::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::healing::self_healer::{Failure, HealingResult, HealingStrategy};
use crate::resource::ResourceController;
use crate::resource::task_queue::{QueuedTask, TaskPriority};
use crate::utils::error::SwarmResult;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn result_for(failure: &Failure, strategy: &str, success: bool, actions: Vec<String>) -> HealingResult {
    HealingResult {
        success,
        failure_id: failure.failure_id.clone(),
        strategy_used: strategy.to_string(),
        actions_taken: actions,
        duration_ms: 0,
        timestamp: Utc::now(),
        metadata: HashMap::new(),
    }
}

/// Re-registers a failed agent after a backoff, carrying its metadata
/// and capabilities over.
pub struct AgentRestartStrategy {
    coordinator: SwarmCoordinator,
    backoff: Duration,
}

impl AgentRestartStrategy {
    #[must_use]
    pub fn new(coordinator: SwarmCoordinator, backoff: Duration) -> Self {
        Self {
            coordinator,
            backoff,
        }
    }
}

#[async_trait]
impl HealingStrategy for AgentRestartStrategy {
    fn name(&self) -> &'static str {
        "agent_restart"
    }

    fn can_heal(&self, failure: &Failure) -> bool {
        failure.failure_type == "agent_failed" && failure.agent_id.is_some()
    }

    async fn heal(&self, failure: &Failure) -> SwarmResult<HealingResult> {
        let Some(agent_id) = failure.agent_id.as_deref() else {
            return Ok(result_for(failure, self.name(), false, Vec::new()));
        };

        let Some(snapshot) = self.coordinator.agent_info(agent_id).await else {
            let mut result = result_for(failure, self.name(), false, Vec::new());
            result.metadata.insert(
                "error".to_string(),
                serde_json::Value::String(format!("agent {agent_id} not registered")),
            );
            return Ok(result);
        };

        let mut actions = Vec::new();
        let placement = Placement {
            parent_id: snapshot.parent_id.clone(),
            layer: Some(snapshot.layer),
        };

        self.coordinator.unregister_agent(agent_id, false).await?;
        actions.push(format!("unregistered {agent_id}"));

        tokio::time::sleep(self.backoff).await;
        actions.push(format!("waited {}ms", self.backoff.as_millis()));

        let replacement = AgentInfo::new(&snapshot.agent_id, &snapshot.agent_type)
            .with_capabilities(snapshot.capabilities.clone())
            .with_metadata(snapshot.metadata.clone());
        // The fresh inbox is dropped here; the restarted agent picks up
        // a new one when it reconnects through the caller.
        let _inbox = self.coordinator.register_agent(replacement, placement).await?;
        actions.push(format!("re-registered {agent_id}"));

        tracing::info!("Restarted agent {agent_id}");
        Ok(result_for(failure, self.name(), true, actions))
    }
}

/// Requeues a timed-out task with an incremented retry count.
pub struct TaskRetryStrategy {
    controller: Arc<ResourceController>,
    max_retries: u32,
}

impl TaskRetryStrategy {
    #[must_use]
    pub fn new(controller: Arc<ResourceController>, max_retries: u32) -> Self {
        Self {
            controller,
            max_retries,
        }
    }
}

#[async_trait]
impl HealingStrategy for TaskRetryStrategy {
    fn name(&self) -> &'static str {
        "task_retry"
    }

    fn can_heal(&self, failure: &Failure) -> bool {
        failure.failure_type == "task_timeout" && failure.metadata.contains_key("task_id")
    }

    async fn heal(&self, failure: &Failure) -> SwarmResult<HealingResult> {
        let task_id = failure
            .metadata
            .get("task_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let retry_count = failure
            .metadata
            .get("retry_count")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0) as u32;

        if retry_count >= self.max_retries {
            let mut result = result_for(failure, self.name(), false, Vec::new());
            result.metadata.insert(
                "error".to_string(),
                serde_json::Value::String(format!(
                    "task {task_id} exhausted {retry_count} retries"
                )),
            );
            return Ok(result);
        }

        let priority = failure
            .metadata
            .get("priority")
            .and_then(|v| serde_json::from_value::<TaskPriority>(v.clone()).ok())
            .unwrap_or(TaskPriority::Medium);
        let task_data = failure
            .metadata
            .get("task_data")
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        let mut task = QueuedTask::new(&task_id, priority, task_data);
        task.retry_count = retry_count + 1;
        self.controller.queue().enqueue(task).await?;

        let mut result = result_for(
            failure,
            self.name(),
            true,
            vec![format!("requeued {task_id} (retry {})", retry_count + 1)],
        );
        result
            .metadata
            .insert("retry_count".to_string(), (retry_count + 1).into());
        Ok(result)
    }
}

/// Rebalances token budgets and trims the failing caller's concurrency.
pub struct ResourceRebalanceStrategy {
    controller: Arc<ResourceController>,
}

impl ResourceRebalanceStrategy {
    #[must_use]
    pub fn new(controller: Arc<ResourceController>) -> Self {
        Self { controller }
    }
}

#[async_trait]
impl HealingStrategy for ResourceRebalanceStrategy {
    fn name(&self) -> &'static str {
        "resource_rebalance"
    }

    fn can_heal(&self, failure: &Failure) -> bool {
        failure.failure_type == "resource_exhaustion"
    }

    async fn heal(&self, failure: &Failure) -> SwarmResult<HealingResult> {
        let mut actions = Vec::new();

        let plan = self.controller.tokens().rebalance().await?;
        actions.push(format!("rebalanced {} swarm budgets", plan.len()));

        if let Some(agent_type) = failure.metadata.get("agent_type").and_then(|v| v.as_str()) {
            if let Ok(status) = self.controller.quotas().quota_status(agent_type).await {
                let reduced = status.max_concurrent.saturating_sub(1).max(1);
                if reduced < status.max_concurrent {
                    self.controller.quotas().set_quota(agent_type, reduced).await;
                    actions.push(format!("reduced {agent_type} quota to {reduced}"));
                }
            }
        }

        Ok(result_for(failure, self.name(), true, actions))
    }
}

/// Recommends replacement agents after quorum loss.
pub struct QuorumRecoveryStrategy {
    coordinator: SwarmCoordinator,
}

impl QuorumRecoveryStrategy {
    #[must_use]
    pub fn new(coordinator: SwarmCoordinator) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl HealingStrategy for QuorumRecoveryStrategy {
    fn name(&self) -> &'static str {
        "quorum_recovery"
    }

    fn can_heal(&self, failure: &Failure) -> bool {
        failure.failure_type == "quorum_loss"
    }

    async fn heal(&self, failure: &Failure) -> SwarmResult<HealingResult> {
        let required = failure
            .metadata
            .get("required")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0) as usize;
        let current = self.coordinator.agent_count().await;
        let missing = required.saturating_sub(current);

        let mut result = result_for(
            failure,
            self.name(),
            true,
            vec![format!("recommend spawning {missing} replacement agents")],
        );
        result
            .metadata
            .insert("replacements_needed".to_string(), missing.into());
        result.metadata.insert("current_agents".to_string(), current.into());
        Ok(result)
    }
}

/// Trips a per-resource circuit on repeated failures; while the circuit
/// is open every heal attempt against that resource fails fast.
pub struct CircuitBreakerStrategy {
    breaker: Arc<CircuitBreaker>,
}

impl CircuitBreakerStrategy {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breaker: Arc::new(CircuitBreaker::new(config)),
        }
    }

    #[must_use]
    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        Arc::clone(&self.breaker)
    }

    fn resource_of(failure: &Failure) -> String {
        failure
            .agent_id
            .clone()
            .or_else(|| {
                failure
                    .metadata
                    .get("resource")
                    .and_then(|v| v.as_str())
                    .map(ToString::to_string)
            })
            .unwrap_or_else(|| failure.failure_type.clone())
    }
}

#[async_trait]
impl HealingStrategy for CircuitBreakerStrategy {
    fn name(&self) -> &'static str {
        "circuit_breaker"
    }

    fn can_heal(&self, failure: &Failure) -> bool {
        matches!(
            failure.failure_type.as_str(),
            "agent_failed" | "task_timeout" | "execution_error" | "agent_down" | "heartbeat_failed"
        )
    }

    async fn heal(&self, failure: &Failure) -> SwarmResult<HealingResult> {
        let resource = Self::resource_of(failure);

        if self.breaker.check(&resource).await.is_err() {
            let mut result = result_for(
                failure,
                self.name(),
                false,
                vec![format!("fail-fast: circuit open for {resource}")],
            );
            result.metadata.insert(
                "circuit_state".to_string(),
                serde_json::Value::String(CircuitState::Open.as_str().to_string()),
            );
            return Ok(result);
        }

        let state = self.breaker.record_failure(&resource).await;
        let mut actions = vec![format!("recorded failure for {resource}")];
        if state == CircuitState::Open {
            actions.push(format!("opened circuit for {resource}"));
        }

        let mut result = result_for(failure, self.name(), state != CircuitState::Open, actions);
        result.metadata.insert(
            "circuit_state".to_string(),
            serde_json::Value::String(state.as_str().to_string()),
        );
        Ok(result)
    }
}
