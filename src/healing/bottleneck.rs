//! # Bottleneck Detector
//!
//! Inspects a sliding metrics window and the live resource controller
//! for conditions likely to degrade throughput: token pressure, slow
//! agents, queue backlog, saturated quotas, and consensus failures.
//! `analyze_performance` adds moving-average trend labels.

use crate::consensus::manager::ConsensusManager;
use crate::monitoring::metrics::{MetricFilter, MetricKind, MetricRecord, MetricsStore, TaskOutcome};
use crate::resource::controller::{Bottleneck, BottleneckSeverity, ResourceController};
use crate::resource::task_queue::TaskPriority;
use crate::utils::error::SwarmResult;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Trend direction derived from moving averages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Degrading,
    Stable,
}

/// Output of `analyze_performance`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub window_ms: i64,
    pub task_count: usize,
    pub avg_duration_ms: f64,
    pub success_rate: f64,
    pub duration_trend: Trend,
    pub success_trend: Trend,
    pub bottlenecks: Vec<Bottleneck>,
}

pub struct BottleneckDetector {
    controller: Arc<ResourceController>,
    store: Arc<dyn MetricsStore>,
    consensus: Option<Arc<ConsensusManager>>,
    window_ms: i64,
    /// Consensus timeout share that counts as a bottleneck.
    consensus_failure_threshold: f64,
    /// Minimum samples before an agent can be called slow.
    slow_agent_min_samples: usize,
}

impl BottleneckDetector {
    #[must_use]
    pub fn new(controller: Arc<ResourceController>, store: Arc<dyn MetricsStore>) -> Self {
        Self {
            controller,
            store,
            consensus: None,
            window_ms: 60_000,
            consensus_failure_threshold: 0.3,
            slow_agent_min_samples: 20,
        }
    }

    #[must_use]
    pub fn with_consensus(mut self, consensus: Arc<ConsensusManager>) -> Self {
        self.consensus = Some(consensus);
        self
    }

    #[must_use]
    pub fn with_window_ms(mut self, window_ms: i64) -> Self {
        self.window_ms = window_ms;
        self
    }

    #[must_use]
    pub fn with_slow_agent_min_samples(mut self, samples: usize) -> Self {
        self.slow_agent_min_samples = samples;
        self
    }

    /// Current bottleneck set across all five sources.
    pub async fn detect_bottlenecks(&self) -> SwarmResult<Vec<Bottleneck>> {
        let now = Utc::now();

        // Token, quota, and backlog pressure come from the controller.
        let mut bottlenecks = self.controller.get_bottlenecks().await;

        bottlenecks.extend(self.detect_slow_agents(now).await?);
        bottlenecks.extend(self.detect_high_priority_share(now).await);
        bottlenecks.extend(self.detect_consensus_failures(now).await);

        Ok(bottlenecks)
    }

    /// Trend analysis over a window: first half vs second half moving
    /// averages, with a 5 % dead band around stable.
    pub async fn analyze_performance(&self, window_ms: i64) -> SwarmResult<PerformanceReport> {
        let since = Utc::now() - Duration::milliseconds(window_ms);
        let records = self
            .store
            .query(&MetricFilter {
                kind: Some(MetricKind::Task),
                since: Some(since),
                ..Default::default()
            })
            .await?;

        let tasks: Vec<_> = records
            .iter()
            .filter_map(|record| match record {
                MetricRecord::Task(m) => Some(m),
                _ => None,
            })
            .collect();

        let (avg_duration_ms, success_rate) = summarize(&tasks);
        let midpoint = since + Duration::milliseconds(window_ms / 2);
        let (early, late): (Vec<_>, Vec<_>) =
            tasks.iter().copied().partition(|m| m.timestamp < midpoint);

        let (early_duration, early_success) = summarize(&early);
        let (late_duration, late_success) = summarize(&late);

        let duration_trend = if early.is_empty() || late.is_empty() {
            Trend::Stable
        } else {
            // Lower duration is better.
            trend_of(early_duration, late_duration, true)
        };
        let success_trend = if early.is_empty() || late.is_empty() {
            Trend::Stable
        } else {
            trend_of(early_success, late_success, false)
        };

        Ok(PerformanceReport {
            window_ms,
            task_count: tasks.len(),
            avg_duration_ms,
            success_rate,
            duration_trend,
            success_trend,
            bottlenecks: self.detect_bottlenecks().await?,
        })
    }

    /// Agents whose mean duration is at least twice the fleet mean over
    /// enough samples.
    async fn detect_slow_agents(&self, now: DateTime<Utc>) -> SwarmResult<Vec<Bottleneck>> {
        let since = now - Duration::milliseconds(self.window_ms);
        let records = self
            .store
            .query(&MetricFilter {
                kind: Some(MetricKind::Task),
                since: Some(since),
                ..Default::default()
            })
            .await?;

        let mut per_agent: HashMap<&str, Vec<u64>> = HashMap::new();
        let mut all_durations: Vec<u64> = Vec::new();
        for record in &records {
            if let MetricRecord::Task(metric) = record {
                per_agent
                    .entry(metric.agent_id.as_str())
                    .or_default()
                    .push(metric.duration_ms);
                all_durations.push(metric.duration_ms);
            }
        }
        if all_durations.is_empty() {
            return Ok(Vec::new());
        }
        let fleet_mean = all_durations.iter().sum::<u64>() as f64 / all_durations.len() as f64;
        if fleet_mean == 0.0 {
            return Ok(Vec::new());
        }

        let mut bottlenecks = Vec::new();
        for (agent_id, durations) in per_agent {
            if durations.len() < self.slow_agent_min_samples {
                continue;
            }
            let agent_mean = durations.iter().sum::<u64>() as f64 / durations.len() as f64;
            if agent_mean >= 2.0 * fleet_mean {
                let ratio = agent_mean / fleet_mean;
                bottlenecks.push(Bottleneck {
                    kind: "slow_agent".to_string(),
                    severity: if ratio >= 4.0 {
                        BottleneckSeverity::Critical
                    } else if ratio >= 3.0 {
                        BottleneckSeverity::High
                    } else {
                        BottleneckSeverity::Warning
                    },
                    details: format!(
                        "{agent_id} mean duration {agent_mean:.0}ms vs fleet {fleet_mean:.0}ms \
                         over {} samples",
                        durations.len()
                    ),
                    recommendation: format!(
                        "inspect {agent_id} for stuck work or shrink its task share"
                    ),
                    detected_at: now,
                });
            }
        }
        Ok(bottlenecks)
    }

    /// High-priority share of the queue at 20 % or above.
    async fn detect_high_priority_share(&self, now: DateTime<Utc>) -> Vec<Bottleneck> {
        let depths = self.controller.queue().depth_by_priority().await;
        let total: usize = depths.values().sum();
        if total == 0 {
            return Vec::new();
        }
        let high = depths.get(&TaskPriority::Critical).copied().unwrap_or(0)
            + depths.get(&TaskPriority::High).copied().unwrap_or(0);
        let share = high as f64 / total as f64;
        if share < 0.2 {
            return Vec::new();
        }

        vec![Bottleneck {
            kind: "task_queue_backlog".to_string(),
            severity: BottleneckSeverity::from_utilization(share),
            details: format!("{high}/{total} queued tasks are high priority"),
            recommendation: "urgent work is piling up; add capacity for critical tasks"
                .to_string(),
            detected_at: now,
        }]
    }

    async fn detect_consensus_failures(&self, now: DateTime<Utc>) -> Vec<Bottleneck> {
        let Some(consensus) = &self.consensus else {
            return Vec::new();
        };
        let stats = consensus.consensus_stats().await;
        if stats.total_proposals == 0 {
            return Vec::new();
        }
        let timeout_rate = stats.timeouts as f64 / stats.total_proposals as f64;
        if timeout_rate < self.consensus_failure_threshold {
            return Vec::new();
        }

        vec![Bottleneck {
            kind: "consensus_timeout".to_string(),
            severity: BottleneckSeverity::from_utilization(timeout_rate),
            details: format!(
                "{}/{} proposals timed out",
                stats.timeouts, stats.total_proposals
            ),
            recommendation: "raise consensus timeouts or investigate unresponsive voters"
                .to_string(),
            detected_at: now,
        }]
    }
}

fn summarize(tasks: &[&crate::monitoring::metrics::TaskMetric]) -> (f64, f64) {
    if tasks.is_empty() {
        return (0.0, 0.0);
    }
    let avg = tasks.iter().map(|m| m.duration_ms).sum::<u64>() as f64 / tasks.len() as f64;
    let successes = tasks
        .iter()
        .filter(|m| m.result == TaskOutcome::Success)
        .count();
    (avg, successes as f64 / tasks.len() as f64)
}

/// Compare two moving averages; `lower_is_better` flips the direction.
fn trend_of(early: f64, late: f64, lower_is_better: bool) -> Trend {
    if early == 0.0 {
        return Trend::Stable;
    }
    let change = (late - early) / early;
    if change.abs() < 0.05 {
        Trend::Stable
    } else if (change < 0.0) == lower_is_better {
        Trend::Improving
    } else {
        Trend::Degrading
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::metrics::{InMemoryMetricsStore, TaskMetric};
    use crate::resource::task_queue::QueuedTask;
    use crate::utils::config::TokenBudgetConfig;
    use serde_json::json;

    fn task_metric(agent: &str, duration_ms: u64, at: DateTime<Utc>, ok: bool) -> MetricRecord {
        MetricRecord::Task(TaskMetric {
            task_id: format!("t_{agent}_{duration_ms}_{}", at.timestamp_millis()),
            agent_id: agent.to_string(),
            duration_ms,
            result: if ok {
                TaskOutcome::Success
            } else {
                TaskOutcome::Failure
            },
            tokens_used: 10,
            files_changed: 0,
            metadata: HashMap::new(),
            timestamp: at,
        })
    }

    fn detector() -> (
        BottleneckDetector,
        Arc<ResourceController>,
        Arc<InMemoryMetricsStore>,
    ) {
        let controller = Arc::new(ResourceController::new(TokenBudgetConfig::default()));
        let store = Arc::new(InMemoryMetricsStore::default());
        let detector = BottleneckDetector::new(Arc::clone(&controller), store.clone());
        (detector, controller, store)
    }

    #[tokio::test]
    async fn test_slow_agent_detection() {
        let (detector, _controller, store) = detector();
        let detector = detector.with_slow_agent_min_samples(20);
        let now = Utc::now();

        // Fleet mean is dragged down by the fast agent's larger sample
        // count; the slow agent sits well past twice the mean.
        for i in 0..40 {
            store
                .append(task_metric("fast", 100, now - Duration::seconds(i), true))
                .await
                .unwrap();
        }
        for i in 0..20 {
            store
                .append(task_metric("slow", 900, now - Duration::seconds(i), true))
                .await
                .unwrap();
        }

        let bottlenecks = detector.detect_bottlenecks().await.unwrap();
        let slow = bottlenecks.iter().find(|b| b.kind == "slow_agent").unwrap();
        assert!(slow.details.contains("slow"));
    }

    #[tokio::test]
    async fn test_slow_agent_needs_enough_samples() {
        let (detector, _controller, store) = detector();
        let now = Utc::now();
        for i in 0..5 {
            store
                .append(task_metric("fast", 100, now - Duration::seconds(i), true))
                .await
                .unwrap();
            store
                .append(task_metric("slow", 900, now - Duration::seconds(i), true))
                .await
                .unwrap();
        }

        let bottlenecks = detector.detect_bottlenecks().await.unwrap();
        assert!(!bottlenecks.iter().any(|b| b.kind == "slow_agent"));
    }

    #[tokio::test]
    async fn test_high_priority_share_flags_backlog() {
        let (detector, controller, _store) = detector();
        for i in 0..3 {
            controller
                .queue()
                .enqueue(QueuedTask::new(
                    &format!("c{i}"),
                    TaskPriority::Critical,
                    json!({}),
                ))
                .await
                .unwrap();
        }
        for i in 0..7 {
            controller
                .queue()
                .enqueue(QueuedTask::new(
                    &format!("b{i}"),
                    TaskPriority::Background,
                    json!({}),
                ))
                .await
                .unwrap();
        }

        let bottlenecks = detector.detect_bottlenecks().await.unwrap();
        let backlog = bottlenecks
            .iter()
            .find(|b| b.kind == "task_queue_backlog")
            .unwrap();
        assert!(backlog.details.contains("3/10"));
    }

    #[tokio::test]
    async fn test_analyze_performance_trends() {
        let (detector, _controller, store) = detector();
        let now = Utc::now();

        // Early half: slow tasks. Late half: fast tasks.
        for i in 0..10 {
            store
                .append(task_metric(
                    "a1",
                    1_000,
                    now - Duration::seconds(100 - i),
                    true,
                ))
                .await
                .unwrap();
            store
                .append(task_metric("a1", 200, now - Duration::seconds(10 - i), true))
                .await
                .unwrap();
        }

        let report = detector.analyze_performance(120_000).await.unwrap();
        assert_eq!(report.task_count, 20);
        assert_eq!(report.duration_trend, Trend::Improving);
        assert_eq!(report.success_trend, Trend::Stable);
    }

    #[tokio::test]
    async fn test_empty_window_is_quiet() {
        let (detector, _controller, _store) = detector();
        let bottlenecks = detector.detect_bottlenecks().await.unwrap();
        assert!(bottlenecks.is_empty());

        let report = detector.analyze_performance(60_000).await.unwrap();
        assert_eq!(report.task_count, 0);
        assert_eq!(report.duration_trend, Trend::Stable);
    }
}
