//! # Resource Control
//!
//! Token budgets, per-agent-type concurrency quotas, and the
//! multi-level priority task queue, fronted by [`ResourceController`].

pub mod controller;
pub mod quotas;
pub mod task_queue;
pub mod token_budget;

pub use controller::{Bottleneck, BottleneckSeverity, ResourceController, ResourceUsage};
pub use quotas::{AgentQuotas, QuotaStatus};
pub use task_queue::{PriorityTaskQueue, QueuedTask, TaskPriority};
pub use token_budget::{
    BudgetAlert, BudgetAlertLevel, GlobalBudgetStatus, SwarmAllocation, TokenBudget,
};
