//! # Adaptive Topology
//!
//! Evaluates workload shape and recent performance, suggests a topology
//! mode, and migrates the coordinator when the switch is worth it. A
//! switch must beat the recent-window score by at least the adaptation
//! threshold; when a candidate mode has no track record yet, the
//! structural suggestion (agent count, workload shape) stands.

use crate::core::coordinator::SwarmCoordinator;
use crate::core::topology::TopologyMode;
use crate::utils::error::SwarmResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// One performance observation over the active topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub timestamp: DateTime<Utc>,
    pub agent_count: usize,
    pub avg_latency_ms: f64,
    pub throughput_tasks_per_sec: f64,
    pub utilization_percent: f64,
    pub communication_overhead: f64,
    /// Share of tasks completed, 0-100.
    pub task_completion_rate: f64,
    /// Share of tasks failed, 0-100.
    pub failure_rate: f64,
    /// Share of completions that were strictly sequential, 0-100.
    /// High values favor the ring pipeline.
    pub sequential_completion_rate: f64,
}

impl PerformanceSample {
    /// Overall performance score (0-100, higher is better), a weighted
    /// combination of normalized metrics.
    #[must_use]
    pub fn score(&self) -> f64 {
        let latency_score = (100.0 - self.avg_latency_ms / 10.0).max(0.0);
        let throughput_score = (self.throughput_tasks_per_sec * 10.0).min(100.0);
        let utilization_score = self.utilization_percent.clamp(0.0, 100.0);
        let overhead_score = (100.0 - self.communication_overhead).max(0.0);
        let completion_score = self.task_completion_rate.clamp(0.0, 100.0);
        let failure_score = (100.0 - self.failure_rate).max(0.0);

        let total = latency_score * 0.20
            + throughput_score * 0.25
            + utilization_score * 0.15
            + overhead_score * 0.15
            + completion_score * 0.20
            + failure_score * 0.05;
        (total * 100.0).round() / 100.0
    }
}

/// Accumulated per-mode score history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModeStats {
    pub samples: usize,
    pub score_sum: f64,
}

impl ModeStats {
    #[must_use]
    pub fn avg_score(&self) -> Option<f64> {
        if self.samples == 0 {
            None
        } else {
            Some(self.score_sum / self.samples as f64)
        }
    }
}

/// Drives topology adaptation against a coordinator.
pub struct AdaptiveTopologyManager {
    coordinator: SwarmCoordinator,
    auto_adapt: bool,
    /// Minimum improvement (percent) a historically-known mode must show.
    adaptation_threshold: f64,
    /// Sequential completion share (percent) above which ring wins.
    sequential_threshold: f64,
    window: usize,
    samples: RwLock<VecDeque<PerformanceSample>>,
    mode_stats: RwLock<HashMap<TopologyMode, ModeStats>>,
}

impl AdaptiveTopologyManager {
    #[must_use]
    pub fn new(coordinator: SwarmCoordinator, auto_adapt: bool, adaptation_threshold: f64) -> Self {
        Self {
            coordinator,
            auto_adapt,
            adaptation_threshold,
            sequential_threshold: 90.0,
            window: 20,
            samples: RwLock::new(VecDeque::new()),
            mode_stats: RwLock::new(HashMap::new()),
        }
    }

    /// Record an observation against the currently active mode.
    pub async fn record_sample(&self, sample: PerformanceSample) {
        let mode = self.coordinator.current_mode().await;
        let score = sample.score();

        {
            let mut samples = self.samples.write().await;
            samples.push_back(sample);
            while samples.len() > self.window {
                samples.pop_front();
            }
        }

        let mut stats = self.mode_stats.write().await;
        let entry = stats.entry(mode).or_default();
        entry.samples += 1;
        entry.score_sum += score;
    }

    /// Average score over the recent window, if any samples exist.
    pub async fn recent_score(&self) -> Option<f64> {
        let samples = self.samples.read().await;
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().map(PerformanceSample::score).sum::<f64>() / samples.len() as f64)
    }

    /// Structural mode suggestion from workload shape.
    #[must_use]
    pub fn suggest_mode(&self, agent_count: usize, sequential_completion_rate: f64) -> TopologyMode {
        if sequential_completion_rate > self.sequential_threshold {
            return TopologyMode::Ring;
        }
        if agent_count < 5 {
            TopologyMode::Mesh
        } else if agent_count <= 10 {
            TopologyMode::Star
        } else {
            TopologyMode::Hierarchical
        }
    }

    /// Evaluate the suggestion and switch when it clears the threshold.
    /// Returns the new mode when a switch happened.
    pub async fn evaluate(&self) -> SwarmResult<Option<TopologyMode>> {
        if !self.auto_adapt {
            return Ok(None);
        }

        let agent_count = self.coordinator.agent_count().await;
        let current = self.coordinator.current_mode().await;
        let sequential = self
            .samples
            .read()
            .await
            .back()
            .map_or(0.0, |s| s.sequential_completion_rate);

        let suggested = self.suggest_mode(agent_count, sequential);
        if suggested == current {
            return Ok(None);
        }

        if let Some(recent) = self.recent_score().await {
            let candidate_avg = self.mode_stats.read().await.get(&suggested).and_then(ModeStats::avg_score);
            if let Some(candidate_avg) = candidate_avg {
                if recent > 0.0 {
                    let improvement = (candidate_avg - recent) / recent * 100.0;
                    if improvement < self.adaptation_threshold {
                        tracing::debug!(
                            "Suppressing switch {} -> {}: improvement {improvement:.1}% below threshold",
                            current.as_str(),
                            suggested.as_str()
                        );
                        return Ok(None);
                    }
                }
            }
        }

        tracing::info!(
            "Adapting topology: {} -> {} ({agent_count} agents)",
            current.as_str(),
            suggested.as_str()
        );
        self.coordinator.switch_mode(suggested).await?;
        Ok(Some(suggested))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::topology::{AgentInfo, Placement};

    fn sample(completion: f64, sequential: f64) -> PerformanceSample {
        PerformanceSample {
            timestamp: Utc::now(),
            agent_count: 3,
            avg_latency_ms: 100.0,
            throughput_tasks_per_sec: 5.0,
            utilization_percent: 60.0,
            communication_overhead: 20.0,
            task_completion_rate: completion,
            failure_rate: 100.0 - completion,
            sequential_completion_rate: sequential,
        }
    }

    #[test]
    fn test_score_weighting() {
        let s = sample(100.0, 0.0);
        // latency 90*.2 + throughput 50*.25 + util 60*.15 + overhead 80*.15
        // + completion 100*.2 + failure 100*.05 = 76.5
        assert!((s.score() - 76.5).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_suggestion_by_agent_count() {
        let coordinator = SwarmCoordinator::new(TopologyMode::Mesh);
        let manager = AdaptiveTopologyManager::new(coordinator, true, 10.0);
        assert_eq!(manager.suggest_mode(3, 0.0), TopologyMode::Mesh);
        assert_eq!(manager.suggest_mode(7, 0.0), TopologyMode::Star);
        assert_eq!(manager.suggest_mode(15, 0.0), TopologyMode::Hierarchical);
        assert_eq!(manager.suggest_mode(3, 95.0), TopologyMode::Ring);
    }

    #[tokio::test]
    async fn test_evaluate_switches_on_count_growth() {
        let coordinator = SwarmCoordinator::new(TopologyMode::Mesh);
        for i in 0..6 {
            coordinator
                .register_agent(
                    AgentInfo::new(&format!("a{i}"), "worker"),
                    Placement::default(),
                )
                .await
                .unwrap();
        }

        let manager = AdaptiveTopologyManager::new(coordinator.clone(), true, 10.0);
        let switched = manager.evaluate().await.unwrap();
        assert_eq!(switched, Some(TopologyMode::Star));
        assert_eq!(coordinator.current_mode().await, TopologyMode::Star);
    }

    #[tokio::test]
    async fn test_evaluate_respects_threshold() {
        let coordinator = SwarmCoordinator::new(TopologyMode::Mesh);
        for i in 0..6 {
            coordinator
                .register_agent(
                    AgentInfo::new(&format!("a{i}"), "worker"),
                    Placement::default(),
                )
                .await
                .unwrap();
        }

        let manager = AdaptiveTopologyManager::new(coordinator.clone(), true, 10.0);

        // Build a strong record for the current mode, then a weak record
        // for the candidate: the switch must be suppressed.
        for _ in 0..5 {
            manager.record_sample(sample(100.0, 0.0)).await;
        }
        coordinator.switch_mode(TopologyMode::Star).await.unwrap();
        manager.record_sample(sample(10.0, 0.0)).await;
        coordinator.switch_mode(TopologyMode::Mesh).await.unwrap();

        let switched = manager.evaluate().await.unwrap();
        assert_eq!(switched, None);
        assert_eq!(coordinator.current_mode().await, TopologyMode::Mesh);
    }

    #[tokio::test]
    async fn test_auto_adapt_disabled() {
        let coordinator = SwarmCoordinator::new(TopologyMode::Mesh);
        let manager = AdaptiveTopologyManager::new(coordinator, false, 10.0);
        assert_eq!(manager.evaluate().await.unwrap(), None);
    }
}
