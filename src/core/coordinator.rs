//! # Swarm Coordinator
//!
//! Owns the agent registry and the active topology, routes point-to-point
//! and broadcast messages through per-agent inboxes, and hands out agent
//! and topology status. Message delivery is best-effort, at-most-once,
//! in-order per sender/receiver pair.

use crate::communication::envelope::MessageEnvelope;
use crate::communication::router::MessageRouter;
use crate::core::topology::{AgentInfo, Placement, Topology, TopologyInfo, TopologyMode};
use crate::monitoring::heartbeat::{HealthState, HeartbeatMonitor};
use crate::utils::error::{SwarmError, SwarmResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Receiving end of an agent's message inbox, handed to the caller on
/// registration. Agents are black boxes; the kernel only addresses them
/// by id.
pub type AgentInbox = mpsc::UnboundedReceiver<MessageEnvelope>;

/// Status view combining registry data with health information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    pub agent_id: String,
    pub agent_type: String,
    pub state: HealthState,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub current_task: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Central coordinator for the swarm kernel.
///
/// All topology mutation goes through the internal `RwLock`; message
/// fan-out reads a consistent snapshot of recipients and then delivers
/// without holding the lock.
#[derive(Clone)]
pub struct SwarmCoordinator {
    /// Unique identifier for this coordinator instance.
    pub id: Uuid,
    topology: Arc<RwLock<Topology>>,
    inboxes: Arc<DashMap<String, mpsc::UnboundedSender<MessageEnvelope>>>,
    current_tasks: Arc<DashMap<String, String>>,
    monitor: Arc<RwLock<Option<HeartbeatMonitor>>>,
    mode_history: Arc<RwLock<Vec<(DateTime<Utc>, TopologyMode)>>>,
}

impl SwarmCoordinator {
    #[must_use]
    pub fn new(mode: TopologyMode) -> Self {
        let topology = Topology::new(mode);
        Self {
            id: Uuid::new_v4(),
            topology: Arc::new(RwLock::new(topology)),
            inboxes: Arc::new(DashMap::new()),
            current_tasks: Arc::new(DashMap::new()),
            monitor: Arc::new(RwLock::new(None)),
            mode_history: Arc::new(RwLock::new(vec![(Utc::now(), mode)])),
        }
    }

    /// Wire in the heartbeat monitor used for status reads. Newly
    /// registered agents are enrolled automatically once attached.
    pub async fn attach_monitor(&self, monitor: HeartbeatMonitor) {
        *self.monitor.write().await = Some(monitor);
    }

    /// Register an agent and wire edges per the current mode. Returns
    /// the agent's inbox; dropping it makes future sends fail soft.
    pub async fn register_agent(
        &self,
        agent: AgentInfo,
        placement: Placement,
    ) -> SwarmResult<AgentInbox> {
        let agent_id = agent.agent_id.clone();
        {
            let mut topology = self.topology.write().await;
            topology.add_agent(agent, &placement)?;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.inboxes.insert(agent_id.clone(), tx);

        if let Some(monitor) = self.monitor.read().await.as_ref() {
            monitor.start_monitoring(&agent_id, None, None).await;
        }

        tracing::info!("Registered agent {agent_id}");
        Ok(rx)
    }

    /// Remove an agent and its incident edges. Hierarchical removal
    /// promotes children to the grandparent unless
    /// `require_empty_children` is set.
    pub async fn unregister_agent(
        &self,
        agent_id: &str,
        require_empty_children: bool,
    ) -> SwarmResult<AgentInfo> {
        let removed = {
            let mut topology = self.topology.write().await;
            topology.remove_agent(agent_id, require_empty_children)?
        };

        self.inboxes.remove(agent_id);
        self.current_tasks.remove(agent_id);

        if let Some(monitor) = self.monitor.read().await.as_ref() {
            monitor.stop_monitoring(agent_id).await;
        }

        tracing::info!("Unregistered agent {agent_id}");
        Ok(removed)
    }

    /// Point-to-point send, valid only along an existing edge.
    pub async fn send_message(
        &self,
        from: &str,
        to: &str,
        envelope: MessageEnvelope,
    ) -> SwarmResult<()> {
        let (has_edge, mode) = {
            let topology = self.topology.read().await;
            if !topology.contains(from) {
                return Err(SwarmError::AgentNotFound {
                    id: from.to_string(),
                });
            }
            if !topology.contains(to) {
                return Err(SwarmError::AgentNotFound { id: to.to_string() });
            }
            (topology.has_edge(from, to), topology.mode())
        };

        if !has_edge {
            return Err(SwarmError::NoRoute {
                from: from.to_string(),
                to: to.to_string(),
                topology: mode.as_str().to_string(),
            });
        }

        self.deliver(from, to, envelope)
    }

    /// Broadcast to every reachable neighbour per the topology rules.
    /// Returns the number of inboxes the message reached; delivery
    /// failures to individual agents are non-fatal.
    ///
    /// Senders that are not registered agents (the consensus manager,
    /// the state synchronizer) are treated as system senders and reach
    /// every agent regardless of mode.
    pub async fn broadcast_message(
        &self,
        from: &str,
        envelope: MessageEnvelope,
        exclude: Option<&HashSet<String>>,
    ) -> SwarmResult<usize> {
        let targets = {
            let topology = self.topology.read().await;
            if topology.contains(from) {
                topology.broadcast_targets(from, exclude)?
            } else {
                topology
                    .agent_ids()
                    .into_iter()
                    .filter(|id| exclude.is_none_or(|set| !set.contains(id)))
                    .collect()
            }
        };

        let mut delivered = 0;
        for target in targets {
            let mut message = envelope.clone();
            message.to_agent = Some(target.clone());
            match self.deliver(from, &target, message) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    tracing::warn!("Broadcast delivery to {target} failed: {err}");
                }
            }
        }
        Ok(delivered)
    }

    /// Record (or clear) the task an agent is currently working.
    pub fn set_current_task(&self, agent_id: &str, task_id: Option<String>) {
        match task_id {
            Some(task_id) => {
                self.current_tasks.insert(agent_id.to_string(), task_id);
            }
            None => {
                self.current_tasks.remove(agent_id);
            }
        }
    }

    pub async fn get_agent_status(&self, agent_id: &str) -> SwarmResult<AgentStatus> {
        let (agent_type, metadata) = {
            let topology = self.topology.read().await;
            let agent = topology
                .agent(agent_id)
                .ok_or_else(|| SwarmError::AgentNotFound {
                    id: agent_id.to_string(),
                })?;
            (agent.agent_type.clone(), agent.metadata.clone())
        };

        let (state, last_heartbeat) = match self.monitor.read().await.as_ref() {
            Some(monitor) => {
                let state = monitor
                    .check_agent_health(agent_id)
                    .await
                    .unwrap_or(HealthState::Unknown);
                (state, monitor.last_heartbeat(agent_id).await)
            }
            None => (HealthState::Unknown, None),
        };

        Ok(AgentStatus {
            agent_id: agent_id.to_string(),
            agent_type,
            state,
            last_heartbeat,
            current_task: self.current_tasks.get(agent_id).map(|t| t.value().clone()),
            metadata,
        })
    }

    pub async fn get_topology_info(&self) -> TopologyInfo {
        let health = match self.monitor.read().await.as_ref() {
            Some(monitor) => {
                let stats = monitor.monitoring_stats().await;
                if stats.total_agents == 0 {
                    "empty".to_string()
                } else {
                    let healthy = stats
                        .health_distribution
                        .get("healthy")
                        .copied()
                        .unwrap_or(0);
                    format!("{healthy}/{} healthy", stats.total_agents)
                }
            }
            None => "unknown".to_string(),
        };
        self.topology.read().await.info(&health)
    }

    pub async fn agent_ids(&self) -> Vec<String> {
        self.topology.read().await.agent_ids()
    }

    pub async fn agent_info(&self, agent_id: &str) -> Option<AgentInfo> {
        self.topology.read().await.agent(agent_id).cloned()
    }

    pub async fn agent_count(&self) -> usize {
        self.topology.read().await.agent_count()
    }

    pub async fn current_mode(&self) -> TopologyMode {
        self.topology.read().await.mode()
    }

    pub async fn mode_history(&self) -> Vec<(DateTime<Utc>, TopologyMode)> {
        self.mode_history.read().await.clone()
    }

    pub async fn visualize(&self) -> String {
        self.topology.read().await.visualize()
    }

    /// Rebuild the topology in a new mode, migrating every agent.
    ///
    /// The replacement graph is constructed completely before the swap;
    /// if any agent fails to migrate the old topology is retained.
    pub async fn switch_mode(&self, mode: TopologyMode) -> SwarmResult<()> {
        let mut topology = self.topology.write().await;
        if topology.mode() == mode {
            return Ok(());
        }

        let mut replacement = Topology::with_root(mode, topology.root_id());
        for agent_id in topology.agent_ids() {
            if replacement.contains(&agent_id) {
                continue; // root is pre-seeded in star/hierarchical modes
            }
            let agent = topology
                .agent(&agent_id)
                .cloned()
                .ok_or_else(|| SwarmError::MigrationFailed {
                    reason: format!("agent {agent_id} disappeared during migration"),
                })?;
            let mut migrated = AgentInfo::new(&agent.agent_id, &agent.agent_type)
                .with_capabilities(agent.capabilities.clone())
                .with_metadata(agent.metadata.clone());
            migrated.registered_at = agent.registered_at;
            replacement
                .add_agent(migrated, &Placement::default())
                .map_err(|err| SwarmError::MigrationFailed {
                    reason: format!("agent {agent_id}: {err}"),
                })?;
        }

        *topology = replacement;
        drop(topology);

        self.mode_history.write().await.push((Utc::now(), mode));
        tracing::info!("Topology switched to {}", mode.as_str());
        Ok(())
    }

    fn deliver(&self, from: &str, to: &str, envelope: MessageEnvelope) -> SwarmResult<()> {
        let Some(sender) = self.inboxes.get(to) else {
            // Seeded root/hub agents have no inbox until a caller
            // registers one; treat them as unreachable endpoints.
            return Err(SwarmError::DeliveryFailed {
                from: from.to_string(),
                to: to.to_string(),
                reason: "no inbox".to_string(),
            });
        };
        sender
            .send(envelope)
            .map_err(|_| SwarmError::DeliveryFailed {
                from: from.to_string(),
                to: to.to_string(),
                reason: "inbox closed".to_string(),
            })
    }
}

#[async_trait]
impl MessageRouter for SwarmCoordinator {
    async fn send(&self, from: &str, to: &str, envelope: MessageEnvelope) -> SwarmResult<()> {
        self.send_message(from, to, envelope).await
    }

    async fn broadcast(
        &self,
        from: &str,
        envelope: MessageEnvelope,
        exclude: Option<&HashSet<String>>,
    ) -> SwarmResult<usize> {
        self.broadcast_message(from, envelope, exclude).await
    }

    async fn participants(&self) -> Vec<String> {
        self.agent_ids().await
    }
}
