//! # Resource Controller
//!
//! Facade over the three resource axes: token budgets, per-type
//! concurrency quotas, and the priority task queue. Exposes consistent
//! usage snapshots and flags bottlenecks before they become failures.

use crate::resource::quotas::{AgentQuotas, QuotaStatus};
use crate::resource::task_queue::{PriorityTaskQueue, TaskPriority};
use crate::resource::token_budget::{GlobalBudgetStatus, TokenBudget};
use crate::utils::config::TokenBudgetConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Severity ladder shared by bottleneck records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BottleneckSeverity {
    Warning,
    High,
    Critical,
}

impl BottleneckSeverity {
    /// Severity from a 0.0-1.0 utilization figure.
    #[must_use]
    pub fn from_utilization(utilization: f64) -> Self {
        if utilization > 0.9 {
            Self::Critical
        } else if utilization > 0.75 {
            Self::High
        } else {
            Self::Warning
        }
    }
}

/// An observable condition likely to degrade throughput.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bottleneck {
    pub kind: String,
    pub severity: BottleneckSeverity,
    pub details: String,
    pub recommendation: String,
    pub detected_at: DateTime<Utc>,
}

/// Flat usage snapshot taken under the component locks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub tokens: GlobalBudgetStatus,
    pub quotas: Vec<QuotaStatus>,
    pub queue_depth: usize,
    pub queue_by_priority: HashMap<String, usize>,
}

/// Prevents resource exhaustion along the three axes.
pub struct ResourceController {
    tokens: TokenBudget,
    quotas: AgentQuotas,
    queue: PriorityTaskQueue,
    backlog_threshold: usize,
}

impl ResourceController {
    #[must_use]
    pub fn new(config: TokenBudgetConfig) -> Self {
        Self {
            tokens: TokenBudget::new(config),
            quotas: AgentQuotas::new(),
            queue: PriorityTaskQueue::new(),
            backlog_threshold: 50,
        }
    }

    #[must_use]
    pub fn with_backlog_threshold(mut self, backlog_threshold: usize) -> Self {
        self.backlog_threshold = backlog_threshold;
        self
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenBudget {
        &self.tokens
    }

    #[must_use]
    pub fn quotas(&self) -> &AgentQuotas {
        &self.quotas
    }

    #[must_use]
    pub fn queue(&self) -> &PriorityTaskQueue {
        &self.queue
    }

    /// Consistent view of tokens, quotas, and queue depth.
    pub async fn get_resource_usage(&self) -> ResourceUsage {
        let tokens = self.tokens.global_status().await;
        let quotas = self.quotas.all_statuses().await;
        let queue_depth = self.queue.len().await;
        let queue_by_priority = self
            .queue
            .depth_by_priority()
            .await
            .into_iter()
            .map(|(priority, depth)| (priority.as_str().to_string(), depth))
            .collect();

        ResourceUsage {
            tokens,
            quotas,
            queue_depth,
            queue_by_priority,
        }
    }

    /// Current bottleneck set: token pressure at 85 %, quota pressure at
    /// 90 %, and queue backlog past the configured limit.
    pub async fn get_bottlenecks(&self) -> Vec<Bottleneck> {
        let mut bottlenecks = Vec::new();
        let now = Utc::now();

        let status = self.tokens.global_status().await;
        for (swarm_id, allocation) in &status.swarms {
            let usage = allocation.usage_percent();
            if usage >= 85.0 {
                bottlenecks.push(Bottleneck {
                    kind: "token_exhaustion".to_string(),
                    severity: BottleneckSeverity::from_utilization(usage / 100.0),
                    details: format!(
                        "swarm {swarm_id} at {usage:.1}% of {} tokens",
                        allocation.allocated
                    ),
                    recommendation: format!(
                        "rebalance budgets or reset swarm {swarm_id} after a checkpoint"
                    ),
                    detected_at: now,
                });
            }
        }

        for quota in self.quotas.all_statuses().await {
            if quota.max_concurrent == 0 {
                continue;
            }
            let utilization = quota.active as f64 / quota.max_concurrent as f64;
            if utilization >= 0.9 {
                bottlenecks.push(Bottleneck {
                    kind: "quota_exceeded".to_string(),
                    severity: BottleneckSeverity::from_utilization(utilization),
                    details: format!(
                        "{} at {}/{} concurrent slots",
                        quota.agent_type, quota.active, quota.max_concurrent
                    ),
                    recommendation: format!(
                        "raise the {} quota or defer new work",
                        quota.agent_type
                    ),
                    detected_at: now,
                });
            }
        }

        let depth = self.queue.len().await;
        if depth > self.backlog_threshold {
            let utilization = depth as f64 / self.backlog_threshold.max(1) as f64;
            bottlenecks.push(Bottleneck {
                kind: "task_queue_backlog".to_string(),
                severity: BottleneckSeverity::from_utilization(utilization.min(1.0)),
                details: format!("{depth} tasks pending (limit {})", self.backlog_threshold),
                recommendation: "add workers or cancel stale background tasks".to_string(),
                detected_at: now,
            });
        }

        bottlenecks
    }
}
