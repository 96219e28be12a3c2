//! # Priority Task Queue
//!
//! Multi-level priority queue ordered lexicographically by
//! `(priority, enqueued_at)`. Dequeue never blocks; pollers spin or
//! sleep. Priority updates preserve insertion time.

use crate::utils::error::{SwarmError, SwarmResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Task priority levels; lower value dequeues first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Critical = 0,
    High = 1,
    Medium = 2,
    Low = 3,
    Background = 4,
}

impl TaskPriority {
    pub const ALL: [Self; 5] = [
        Self::Critical,
        Self::High,
        Self::Medium,
        Self::Low,
        Self::Background,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Background => "background",
        }
    }
}

/// An entry waiting in the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTask {
    pub task_id: String,
    pub priority: TaskPriority,
    pub task_data: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
    /// Incremented by the retry healing path on requeue.
    pub retry_count: u32,
}

impl QueuedTask {
    #[must_use]
    pub fn new(task_id: &str, priority: TaskPriority, task_data: serde_json::Value) -> Self {
        Self {
            task_id: task_id.to_string(),
            priority,
            task_data,
            enqueued_at: Utc::now(),
            retry_count: 0,
        }
    }
}

/// Ordering key; task id breaks exact-timestamp ties deterministically.
type QueueKey = (TaskPriority, DateTime<Utc>, String);

#[derive(Default)]
struct QueueState {
    entries: BTreeMap<QueueKey, QueuedTask>,
    index: HashMap<String, QueueKey>,
}

/// The multi-level priority queue.
pub struct PriorityTaskQueue {
    state: RwLock<QueueState>,
}

impl Default for PriorityTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityTaskQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(QueueState::default()),
        }
    }

    /// Enqueue a task; duplicate ids are rejected.
    pub async fn enqueue(&self, task: QueuedTask) -> SwarmResult<()> {
        let mut state = self.state.write().await;
        if state.index.contains_key(&task.task_id) {
            return Err(SwarmError::DuplicateTask {
                id: task.task_id.clone(),
            });
        }
        let key = (task.priority, task.enqueued_at, task.task_id.clone());
        state.index.insert(task.task_id.clone(), key.clone());
        state.entries.insert(key, task);
        Ok(())
    }

    /// Remove and return the smallest `(priority, enqueued_at)` entry.
    pub async fn dequeue(&self) -> Option<QueuedTask> {
        let mut state = self.state.write().await;
        let key = state.entries.keys().next().cloned()?;
        let task = state.entries.remove(&key)?;
        state.index.remove(&task.task_id);
        Some(task)
    }

    /// Inspect the next entry without removing it.
    pub async fn peek(&self) -> Option<QueuedTask> {
        let state = self.state.read().await;
        state.entries.values().next().cloned()
    }

    /// Move a task to a new priority, preserving its insertion time.
    pub async fn update_priority(
        &self,
        task_id: &str,
        new_priority: TaskPriority,
    ) -> SwarmResult<()> {
        let mut state = self.state.write().await;
        let old_key = state
            .index
            .get(task_id)
            .cloned()
            .ok_or_else(|| SwarmError::TaskNotFound {
                id: task_id.to_string(),
            })?;

        let mut task = state
            .entries
            .remove(&old_key)
            .ok_or_else(|| SwarmError::InvariantViolation {
                reason: format!("queue index out of sync for task {task_id}"),
            })?;
        task.priority = new_priority;
        let new_key = (new_priority, task.enqueued_at, task.task_id.clone());
        state.index.insert(task.task_id.clone(), new_key.clone());
        state.entries.insert(new_key, task);
        Ok(())
    }

    /// Remove a specific task.
    pub async fn cancel(&self, task_id: &str) -> SwarmResult<QueuedTask> {
        let mut state = self.state.write().await;
        let key = state
            .index
            .remove(task_id)
            .ok_or_else(|| SwarmError::TaskNotFound {
                id: task_id.to_string(),
            })?;
        state
            .entries
            .remove(&key)
            .ok_or_else(|| SwarmError::InvariantViolation {
                reason: format!("queue index out of sync for task {task_id}"),
            })
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    pub async fn contains(&self, task_id: &str) -> bool {
        self.state.read().await.index.contains_key(task_id)
    }

    /// Queue depth broken down by priority level.
    pub async fn depth_by_priority(&self) -> HashMap<TaskPriority, usize> {
        let state = self.state.read().await;
        let mut depths = HashMap::new();
        for (priority, _, _) in state.entries.keys() {
            *depths.entry(*priority).or_insert(0) += 1;
        }
        depths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_priority_ordering() {
        let queue = PriorityTaskQueue::new();
        queue
            .enqueue(QueuedTask::new("low", TaskPriority::Low, json!({})))
            .await
            .unwrap();
        queue
            .enqueue(QueuedTask::new("critical", TaskPriority::Critical, json!({})))
            .await
            .unwrap();
        queue
            .enqueue(QueuedTask::new("medium", TaskPriority::Medium, json!({})))
            .await
            .unwrap();

        assert_eq!(queue.dequeue().await.unwrap().task_id, "critical");
        assert_eq!(queue.dequeue().await.unwrap().task_id, "medium");
        assert_eq!(queue.dequeue().await.unwrap().task_id, "low");
        assert!(queue.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn test_fifo_within_priority() {
        let queue = PriorityTaskQueue::new();
        for i in 0..3 {
            queue
                .enqueue(QueuedTask::new(&format!("t{i}"), TaskPriority::High, json!({})))
                .await
                .unwrap();
        }
        assert_eq!(queue.dequeue().await.unwrap().task_id, "t0");
        assert_eq!(queue.dequeue().await.unwrap().task_id, "t1");
        assert_eq!(queue.dequeue().await.unwrap().task_id, "t2");
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        let queue = PriorityTaskQueue::new();
        queue
            .enqueue(QueuedTask::new("t1", TaskPriority::Medium, json!({})))
            .await
            .unwrap();
        let result = queue
            .enqueue(QueuedTask::new("t1", TaskPriority::High, json!({})))
            .await;
        assert!(matches!(result, Err(SwarmError::DuplicateTask { .. })));
    }

    #[tokio::test]
    async fn test_update_priority_preserves_insertion_time() {
        let queue = PriorityTaskQueue::new();
        queue
            .enqueue(QueuedTask::new("a", TaskPriority::Low, json!({})))
            .await
            .unwrap();
        queue
            .enqueue(QueuedTask::new("b", TaskPriority::Low, json!({})))
            .await
            .unwrap();

        // Promote both: "a" must still come out first (earlier enqueue).
        queue
            .update_priority("b", TaskPriority::Critical)
            .await
            .unwrap();
        queue
            .update_priority("a", TaskPriority::Critical)
            .await
            .unwrap();

        assert_eq!(queue.dequeue().await.unwrap().task_id, "a");
        assert_eq!(queue.dequeue().await.unwrap().task_id, "b");
    }

    #[tokio::test]
    async fn test_cancel_removes_specific_task() {
        let queue = PriorityTaskQueue::new();
        queue
            .enqueue(QueuedTask::new("t1", TaskPriority::Medium, json!({})))
            .await
            .unwrap();
        queue
            .enqueue(QueuedTask::new("t2", TaskPriority::Medium, json!({})))
            .await
            .unwrap();

        let cancelled = queue.cancel("t1").await.unwrap();
        assert_eq!(cancelled.task_id, "t1");
        assert!(!queue.contains("t1").await);
        assert_eq!(queue.len().await, 1);

        let missing = queue.cancel("ghost").await;
        assert!(matches!(missing, Err(SwarmError::TaskNotFound { .. })));
    }

    #[tokio::test]
    async fn test_peek_does_not_remove() {
        let queue = PriorityTaskQueue::new();
        queue
            .enqueue(QueuedTask::new("t1", TaskPriority::High, json!({})))
            .await
            .unwrap();
        assert_eq!(queue.peek().await.unwrap().task_id, "t1");
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_depth_by_priority() {
        let queue = PriorityTaskQueue::new();
        queue
            .enqueue(QueuedTask::new("t1", TaskPriority::High, json!({})))
            .await
            .unwrap();
        queue
            .enqueue(QueuedTask::new("t2", TaskPriority::High, json!({})))
            .await
            .unwrap();
        queue
            .enqueue(QueuedTask::new("t3", TaskPriority::Background, json!({})))
            .await
            .unwrap();

        let depths = queue.depth_by_priority().await;
        assert_eq!(depths[&TaskPriority::High], 2);
        assert_eq!(depths[&TaskPriority::Background], 1);
    }
}
