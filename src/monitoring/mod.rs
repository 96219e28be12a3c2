//! # Monitoring
//!
//! Heartbeat-driven liveness tracking and metric collection.

pub mod heartbeat;
pub mod metrics;

pub use heartbeat::{HealthAlert, HealthState, HeartbeatMonitor, HeartbeatRecord, MonitoringStats};
pub use metrics::{
    AgentMetric, InMemoryMetricsStore, MetricFilter, MetricKind, MetricRecord, MetricsCollector,
    MetricsStore, SwarmEvent, SwarmMetric, TaskMetric, TaskOutcome,
};
