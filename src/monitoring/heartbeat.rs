//! # Heartbeat Monitor
//!
//! Active health monitoring with automatic failure detection. Agents
//! report heartbeats; a background task re-evaluates every monitored
//! agent on a fixed tick and fires an alert exactly once per transition
//! into a degraded state. Recovery is automatic on the next heartbeat.

use crate::utils::config::HeartbeatConfig;
use crate::utils::error::{SwarmError, SwarmResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

/// Agent health states based on heartbeat timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Last heartbeat within one interval.
    Healthy,
    /// Last heartbeat within two intervals.
    Degraded,
    /// Last heartbeat within `failure_threshold` intervals.
    Critical,
    /// Missed-beat threshold exceeded.
    Failed,
    /// No heartbeat observed yet (only when `initial_state_healthy` is off).
    Unknown,
}

impl HealthState {
    /// Ordering used by `unhealthy_agents`; Unknown ranks with Healthy.
    #[must_use]
    pub fn severity(self) -> u8 {
        match self {
            Self::Healthy | Self::Unknown => 0,
            Self::Degraded => 1,
            Self::Critical => 2,
            Self::Failed => 3,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Critical => "critical",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }
}

/// One recorded heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Alert emitted on a transition into Degraded/Critical/Failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthAlert {
    pub agent_id: String,
    pub state: HealthState,
    pub previous_state: HealthState,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub elapsed_ms: Option<i64>,
}

/// Callback invoked outside the monitor lock for each alert.
pub type AlertCallback = Arc<dyn Fn(HealthAlert) + Send + Sync>;

#[derive(Debug, Clone)]
struct MonitoredAgent {
    interval_ms: u64,
    failure_threshold: u32,
    last_heartbeat: Option<DateTime<Utc>>,
    last_state: HealthState,
    started_at: DateTime<Utc>,
}

#[derive(Default)]
struct AlertRouter {
    enabled: HashMap<HealthState, bool>,
    callbacks: HashMap<HealthState, AlertCallback>,
}

/// Aggregate monitoring statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringStats {
    pub total_agents: usize,
    pub health_distribution: HashMap<String, usize>,
    pub total_heartbeats: usize,
    pub loop_running: bool,
}

/// Monitors agent liveness through heartbeat timing.
#[derive(Clone)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    agents: Arc<RwLock<HashMap<String, MonitoredAgent>>>,
    history: Arc<RwLock<HashMap<String, VecDeque<HeartbeatRecord>>>>,
    alerts: Arc<RwLock<AlertRouter>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    loop_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl HeartbeatMonitor {
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let mut router = AlertRouter::default();
        for state in [
            HealthState::Degraded,
            HealthState::Critical,
            HealthState::Failed,
        ] {
            router.enabled.insert(state, true);
        }

        Self {
            config,
            agents: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(RwLock::new(HashMap::new())),
            alerts: Arc::new(RwLock::new(router)),
            shutdown_tx: Arc::new(shutdown_tx),
            loop_handle: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawn the background check loop. Safe to call once; subsequent
    /// calls while the loop is alive are ignored.
    pub async fn start(&self) {
        let mut handle_slot = self.loop_handle.lock().await;
        if handle_slot.is_some() {
            tracing::warn!("Heartbeat monitoring loop already running");
            return;
        }

        let monitor = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let tick = Duration::from_millis(self.config.check_interval_ms);

        *handle_slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        monitor.check_all_agents().await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Heartbeat monitoring loop exited");
        }));
        tracing::info!(
            "Heartbeat monitoring started (check every {}ms)",
            self.config.check_interval_ms
        );
    }

    /// Begin monitoring an agent; returns false when already monitored.
    /// Per-agent interval/threshold overrides take precedence over the
    /// configured defaults.
    pub async fn start_monitoring(
        &self,
        agent_id: &str,
        interval_ms: Option<u64>,
        failure_threshold: Option<u32>,
    ) -> bool {
        let mut agents = self.agents.write().await;
        if agents.contains_key(agent_id) {
            tracing::warn!("Agent {agent_id} already being monitored");
            return false;
        }

        let initial_state = if self.config.initial_state_healthy {
            HealthState::Healthy
        } else {
            HealthState::Unknown
        };

        agents.insert(
            agent_id.to_string(),
            MonitoredAgent {
                interval_ms: interval_ms.unwrap_or(self.config.interval_ms),
                failure_threshold: failure_threshold.unwrap_or(self.config.failure_threshold),
                last_heartbeat: None,
                last_state: initial_state,
                started_at: Utc::now(),
            },
        );
        drop(agents);

        self.history
            .write()
            .await
            .insert(agent_id.to_string(), VecDeque::new());

        tracing::info!("Started monitoring {agent_id}");
        true
    }

    /// Stop monitoring; history is retained for later analysis.
    pub async fn stop_monitoring(&self, agent_id: &str) -> bool {
        let removed = self.agents.write().await.remove(agent_id).is_some();
        if removed {
            tracing::info!("Stopped monitoring {agent_id}");
        } else {
            tracing::warn!("Agent {agent_id} not being monitored");
        }
        removed
    }

    /// Record a heartbeat. Recovery from any worse state is immediate.
    pub async fn record_heartbeat(
        &self,
        agent_id: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> SwarmResult<()> {
        let now = Utc::now();
        {
            let mut agents = self.agents.write().await;
            let agent = agents
                .get_mut(agent_id)
                .ok_or_else(|| SwarmError::AgentNotFound {
                    id: agent_id.to_string(),
                })?;

            agent.last_heartbeat = Some(now);
            if agent.last_state != HealthState::Healthy {
                tracing::info!(
                    "Agent {agent_id} recovered: {} -> healthy",
                    agent.last_state.as_str()
                );
                agent.last_state = HealthState::Healthy;
            }
        }

        let mut history = self.history.write().await;
        let ring = history.entry(agent_id.to_string()).or_default();
        ring.push_back(HeartbeatRecord {
            timestamp: now,
            metadata,
        });
        while ring.len() > self.config.history_size {
            ring.pop_front();
        }
        Ok(())
    }

    /// Current health state of a monitored agent.
    pub async fn check_agent_health(&self, agent_id: &str) -> SwarmResult<HealthState> {
        let agents = self.agents.read().await;
        let agent = agents
            .get(agent_id)
            .ok_or_else(|| SwarmError::AgentNotFound {
                id: agent_id.to_string(),
            })?;
        Ok(self.compute_state(agent, Utc::now()))
    }

    /// Agents at or worse than `min_state`.
    pub async fn unhealthy_agents(&self, min_state: HealthState) -> Vec<String> {
        let now = Utc::now();
        let agents = self.agents.read().await;
        agents
            .iter()
            .filter(|(_, agent)| self.compute_state(agent, now).severity() >= min_state.severity())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Last known heartbeat timestamp, if any.
    pub async fn last_heartbeat(&self, agent_id: &str) -> Option<DateTime<Utc>> {
        self.agents
            .read()
            .await
            .get(agent_id)
            .and_then(|a| a.last_heartbeat)
    }

    /// Heartbeat history for an agent, optionally bounded by a time range.
    pub async fn heartbeat_history(
        &self,
        agent_id: &str,
        time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Vec<HeartbeatRecord> {
        let history = self.history.read().await;
        let Some(ring) = history.get(agent_id) else {
            return Vec::new();
        };
        match time_range {
            None => ring.iter().cloned().collect(),
            Some((start, end)) => ring
                .iter()
                .filter(|record| record.timestamp >= start && record.timestamp <= end)
                .cloned()
                .collect(),
        }
    }

    /// Enable/disable alerting and install callbacks per target state.
    pub async fn configure_alerts(
        &self,
        state: HealthState,
        enabled: bool,
        callback: Option<AlertCallback>,
    ) {
        let mut alerts = self.alerts.write().await;
        alerts.enabled.insert(state, enabled);
        if let Some(callback) = callback {
            alerts.callbacks.insert(state, callback);
        }
    }

    pub async fn monitoring_stats(&self) -> MonitoringStats {
        let now = Utc::now();
        let agents = self.agents.read().await;
        let mut distribution: HashMap<String, usize> = HashMap::new();
        for agent in agents.values() {
            *distribution
                .entry(self.compute_state(agent, now).as_str().to_string())
                .or_insert(0) += 1;
        }
        let total_heartbeats = self.history.read().await.values().map(VecDeque::len).sum();

        MonitoringStats {
            total_agents: agents.len(),
            health_distribution: distribution,
            total_heartbeats,
            loop_running: self
                .loop_handle
                .try_lock()
                .map(|h| h.is_some())
                .unwrap_or(true),
        }
    }

    /// Signal the background loop and join it. Idempotent.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.loop_handle.lock().await.take();
        if let Some(handle) = handle {
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(_) => tracing::info!("Heartbeat monitoring loop terminated"),
                Err(_) => tracing::warn!("Heartbeat monitoring loop did not stop within timeout"),
            }
        }
    }

    fn compute_state(&self, agent: &MonitoredAgent, now: DateTime<Utc>) -> HealthState {
        let Some(last) = agent.last_heartbeat else {
            return if self.config.initial_state_healthy {
                HealthState::Healthy
            } else {
                HealthState::Unknown
            };
        };

        let elapsed_ms = now.signed_duration_since(last).num_milliseconds();
        let interval = agent.interval_ms as i64;
        if elapsed_ms < interval {
            HealthState::Healthy
        } else if elapsed_ms < interval * 2 {
            HealthState::Degraded
        } else if elapsed_ms < interval * i64::from(agent.failure_threshold) {
            HealthState::Critical
        } else {
            HealthState::Failed
        }
    }

    /// One pass over every monitored agent. Alerts fire after the write
    /// lock is released so callbacks never run under the monitor lock.
    async fn check_all_agents(&self) {
        let now = Utc::now();
        let mut pending_alerts = Vec::new();

        {
            let mut agents = self.agents.write().await;
            for (agent_id, agent) in agents.iter_mut() {
                let new_state = self.compute_state(agent, now);
                if new_state == agent.last_state {
                    continue;
                }

                let previous = agent.last_state;
                agent.last_state = new_state;

                if matches!(
                    new_state,
                    HealthState::Degraded | HealthState::Critical | HealthState::Failed
                ) {
                    pending_alerts.push(HealthAlert {
                        agent_id: agent_id.clone(),
                        state: new_state,
                        previous_state: previous,
                        last_heartbeat: agent.last_heartbeat,
                        elapsed_ms: agent
                            .last_heartbeat
                            .map(|last| now.signed_duration_since(last).num_milliseconds()),
                    });
                } else if previous.severity() >= HealthState::Critical.severity() {
                    tracing::info!(
                        "Agent {agent_id} recovered: {} -> {}",
                        previous.as_str(),
                        new_state.as_str()
                    );
                }
            }
        }

        if pending_alerts.is_empty() {
            return;
        }

        let alerts = self.alerts.read().await;
        for alert in pending_alerts {
            if !alerts.enabled.get(&alert.state).copied().unwrap_or(false) {
                continue;
            }
            match alerts.callbacks.get(&alert.state) {
                Some(callback) => callback(alert),
                None => tracing::warn!(
                    "Agent {} health: {} -> {} (elapsed: {:?}ms)",
                    alert.agent_id,
                    alert.previous_state.as_str(),
                    alert.state.as_str(),
                    alert.elapsed_ms
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_config() -> HeartbeatConfig {
        HeartbeatConfig {
            interval_ms: 100,
            failure_threshold: 3,
            history_size: 5,
            check_interval_ms: 100,
            initial_state_healthy: true,
        }
    }

    #[tokio::test]
    async fn test_start_monitoring_is_idempotent() {
        let monitor = HeartbeatMonitor::new(fast_config());
        assert!(monitor.start_monitoring("a1", None, None).await);
        assert!(!monitor.start_monitoring("a1", None, None).await);
    }

    #[tokio::test]
    async fn test_healthy_before_first_heartbeat() {
        let monitor = HeartbeatMonitor::new(fast_config());
        monitor.start_monitoring("a1", None, None).await;
        assert_eq!(
            monitor.check_agent_health("a1").await.unwrap(),
            HealthState::Healthy
        );
    }

    #[tokio::test]
    async fn test_unknown_initial_state_when_configured() {
        let mut config = fast_config();
        config.initial_state_healthy = false;
        let monitor = HeartbeatMonitor::new(config);
        monitor.start_monitoring("a1", None, None).await;
        assert_eq!(
            monitor.check_agent_health("a1").await.unwrap(),
            HealthState::Unknown
        );

        monitor.record_heartbeat("a1", HashMap::new()).await.unwrap();
        assert_eq!(
            monitor.check_agent_health("a1").await.unwrap(),
            HealthState::Healthy
        );
    }

    #[tokio::test]
    async fn test_state_degrades_over_time() {
        let monitor = HeartbeatMonitor::new(fast_config());
        monitor.start_monitoring("a1", None, None).await;
        monitor.record_heartbeat("a1", HashMap::new()).await.unwrap();

        // interval=100ms, threshold=3: degraded at 1x, critical at 2x,
        // failed past 3x the interval.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(
            monitor.check_agent_health("a1").await.unwrap(),
            HealthState::Degraded
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            monitor.check_agent_health("a1").await.unwrap(),
            HealthState::Critical
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(
            monitor.check_agent_health("a1").await.unwrap(),
            HealthState::Failed
        );

        // Recovery on the next heartbeat.
        monitor.record_heartbeat("a1", HashMap::new()).await.unwrap();
        assert_eq!(
            monitor.check_agent_health("a1").await.unwrap(),
            HealthState::Healthy
        );
    }

    #[tokio::test]
    async fn test_alert_fires_once_per_transition() {
        let monitor = HeartbeatMonitor::new(fast_config());
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        monitor
            .configure_alerts(
                HealthState::Failed,
                true,
                Some(Arc::new(move |_alert| {
                    fired_clone.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .await;

        monitor.start_monitoring("a1", None, None).await;
        monitor.record_heartbeat("a1", HashMap::new()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        monitor.check_all_agents().await;
        monitor.check_all_agents().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let monitor = HeartbeatMonitor::new(fast_config());
        monitor.start_monitoring("a1", None, None).await;
        for _ in 0..10 {
            monitor.record_heartbeat("a1", HashMap::new()).await.unwrap();
        }
        let history = monitor.heartbeat_history("a1", None).await;
        assert_eq!(history.len(), 5);
    }

    #[tokio::test]
    async fn test_heartbeat_for_unmonitored_agent_fails() {
        let monitor = HeartbeatMonitor::new(fast_config());
        let result = monitor.record_heartbeat("ghost", HashMap::new()).await;
        assert!(matches!(result, Err(SwarmError::AgentNotFound { .. })));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let monitor = HeartbeatMonitor::new(fast_config());
        monitor.start().await;
        monitor.shutdown().await;
        monitor.shutdown().await;
        assert!(!monitor.monitoring_stats().await.loop_running);
    }
}
