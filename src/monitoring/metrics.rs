//! # Metrics
//!
//! Append-only metric records consumed by an external store. The kernel
//! ships an in-memory bounded store for tests and for the bottleneck
//! detector's sliding window; durable persistence is delegated.

use crate::utils::error::SwarmResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Task execution outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskOutcome {
    Success,
    Failure,
    Timeout,
    Partial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMetric {
    pub task_id: String,
    pub agent_id: String,
    pub duration_ms: u64,
    pub result: TaskOutcome,
    pub tokens_used: u64,
    pub files_changed: u32,
    pub metadata: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetric {
    pub agent_id: String,
    pub metric_type: String,
    pub value: f64,
    pub metadata: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmMetric {
    pub swarm_id: String,
    pub metric_type: String,
    pub value: f64,
    pub metadata: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// One of the three record shapes the store accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricRecord {
    Task(TaskMetric),
    Agent(AgentMetric),
    Swarm(SwarmMetric),
}

impl MetricRecord {
    #[must_use]
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Task(_) => MetricKind::Task,
            Self::Agent(_) => MetricKind::Agent,
            Self::Swarm(_) => MetricKind::Swarm,
        }
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Task(m) => m.timestamp,
            Self::Agent(m) => m.timestamp,
            Self::Swarm(m) => m.timestamp,
        }
    }

    #[must_use]
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Self::Task(m) => Some(&m.agent_id),
            Self::Agent(m) => Some(&m.agent_id),
            Self::Swarm(_) => None,
        }
    }

    #[must_use]
    pub fn swarm_id(&self) -> Option<&str> {
        match self {
            Self::Swarm(m) => Some(&m.swarm_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Task,
    Agent,
    Swarm,
}

/// Filtered read over the store.
#[derive(Debug, Clone, Default)]
pub struct MetricFilter {
    pub kind: Option<MetricKind>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub agent_id: Option<String>,
    pub swarm_id: Option<String>,
}

impl MetricFilter {
    #[must_use]
    pub fn matches(&self, record: &MetricRecord) -> bool {
        if let Some(kind) = self.kind {
            if record.kind() != kind {
                return false;
            }
        }
        let ts = record.timestamp();
        if let Some(since) = self.since {
            if ts < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if ts > until {
                return false;
            }
        }
        if let Some(agent_id) = &self.agent_id {
            if record.agent_id() != Some(agent_id.as_str()) {
                return false;
            }
        }
        if let Some(swarm_id) = &self.swarm_id {
            if record.swarm_id() != Some(swarm_id.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Append/query contract for the external metrics store.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    async fn append(&self, record: MetricRecord) -> SwarmResult<()>;
    async fn query(&self, filter: &MetricFilter) -> SwarmResult<Vec<MetricRecord>>;
}

/// Bounded in-process store, also used as the bottleneck detector's
/// observation window.
pub struct InMemoryMetricsStore {
    records: RwLock<VecDeque<MetricRecord>>,
    capacity: usize,
}

impl InMemoryMetricsStore {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            capacity,
        }
    }
}

impl Default for InMemoryMetricsStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl MetricsStore for InMemoryMetricsStore {
    async fn append(&self, record: MetricRecord) -> SwarmResult<()> {
        let mut records = self.records.write().await;
        records.push_back(record);
        while records.len() > self.capacity {
            records.pop_front();
        }
        Ok(())
    }

    async fn query(&self, filter: &MetricFilter) -> SwarmResult<Vec<MetricRecord>> {
        let records = self.records.read().await;
        Ok(records.iter().filter(|r| filter.matches(r)).cloned().collect())
    }
}

/// A coordination event: the unit the pattern layer learns from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmEvent {
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub agent_id: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl SwarmEvent {
    #[must_use]
    pub fn new(event_type: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            timestamp: Utc::now(),
            agent_id: None,
            metadata: HashMap::new(),
        }
    }

    #[must_use]
    pub fn for_agent(mut self, agent_id: &str) -> Self {
        self.agent_id = Some(agent_id.to_string());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// Fans component events into the metrics store and keeps a bounded
/// event ring for the pattern learner.
pub struct MetricsCollector {
    store: Arc<dyn MetricsStore>,
    events: RwLock<VecDeque<SwarmEvent>>,
    event_capacity: usize,
}

impl MetricsCollector {
    #[must_use]
    pub fn new(store: Arc<dyn MetricsStore>) -> Self {
        Self {
            store,
            events: RwLock::new(VecDeque::new()),
            event_capacity: 5_000,
        }
    }

    #[must_use]
    pub fn store(&self) -> Arc<dyn MetricsStore> {
        Arc::clone(&self.store)
    }

    pub async fn record_task(&self, metric: TaskMetric) -> SwarmResult<()> {
        self.store.append(MetricRecord::Task(metric)).await
    }

    pub async fn record_agent(&self, metric: AgentMetric) -> SwarmResult<()> {
        self.store.append(MetricRecord::Agent(metric)).await
    }

    pub async fn record_swarm(&self, metric: SwarmMetric) -> SwarmResult<()> {
        self.store.append(MetricRecord::Swarm(metric)).await
    }

    pub async fn record_event(&self, event: SwarmEvent) {
        let mut events = self.events.write().await;
        events.push_back(event);
        while events.len() > self.event_capacity {
            events.pop_front();
        }
    }

    /// Events newer than `since`, oldest first.
    pub async fn events_since(&self, since: DateTime<Utc>) -> Vec<SwarmEvent> {
        let events = self.events.read().await;
        events
            .iter()
            .filter(|e| e.timestamp >= since)
            .cloned()
            .collect()
    }

    pub async fn all_events(&self) -> Vec<SwarmEvent> {
        self.events.read().await.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_metric(task_id: &str, agent_id: &str, duration_ms: u64) -> TaskMetric {
        TaskMetric {
            task_id: task_id.to_string(),
            agent_id: agent_id.to_string(),
            duration_ms,
            result: TaskOutcome::Success,
            tokens_used: 100,
            files_changed: 1,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_append_and_filtered_query() {
        let store = InMemoryMetricsStore::default();
        store
            .append(MetricRecord::Task(task_metric("t1", "a1", 100)))
            .await
            .unwrap();
        store
            .append(MetricRecord::Task(task_metric("t2", "a2", 200)))
            .await
            .unwrap();
        store
            .append(MetricRecord::Swarm(SwarmMetric {
                swarm_id: "s1".to_string(),
                metric_type: "token_usage".to_string(),
                value: 0.5,
                metadata: HashMap::new(),
                timestamp: Utc::now(),
            }))
            .await
            .unwrap();

        let tasks = store
            .query(&MetricFilter {
                kind: Some(MetricKind::Task),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(tasks.len(), 2);

        let for_a1 = store
            .query(&MetricFilter {
                agent_id: Some("a1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(for_a1.len(), 1);

        let for_swarm = store
            .query(&MetricFilter {
                swarm_id: Some("s1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(for_swarm.len(), 1);
    }

    #[tokio::test]
    async fn test_store_is_bounded() {
        let store = InMemoryMetricsStore::new(3);
        for i in 0..5 {
            store
                .append(MetricRecord::Task(task_metric(&format!("t{i}"), "a1", 10)))
                .await
                .unwrap();
        }
        let all = store.query(&MetricFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_collector_event_ring() {
        let collector = MetricsCollector::new(Arc::new(InMemoryMetricsStore::default()));
        collector
            .record_event(SwarmEvent::new("task_completed").for_agent("a1"))
            .await;
        collector.record_event(SwarmEvent::new("task_failed")).await;

        let events = collector.all_events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "task_completed");
    }
}
