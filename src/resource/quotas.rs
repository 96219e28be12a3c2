//! # Agent Quotas
//!
//! Per-agent-type concurrency slots. Requests never block: a saturated
//! quota returns `None` and the caller backs off.

use crate::utils::error::{SwarmError, SwarmResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Snapshot of one quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaStatus {
    pub agent_type: String,
    pub max_concurrent: usize,
    pub active: usize,
    pub available: usize,
}

#[derive(Debug, Default)]
struct QuotaSlot {
    max_concurrent: usize,
    active_slots: HashSet<Uuid>,
}

/// Per-agent-type slot accounting.
pub struct AgentQuotas {
    quotas: RwLock<HashMap<String, QuotaSlot>>,
}

impl Default for AgentQuotas {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentQuotas {
    #[must_use]
    pub fn new() -> Self {
        Self {
            quotas: RwLock::new(HashMap::new()),
        }
    }

    /// Declare (or resize) a capacity for an agent type. Shrinking below
    /// the active count keeps current slots alive; only new requests see
    /// the lower ceiling.
    pub async fn set_quota(&self, agent_type: &str, max_concurrent: usize) {
        let mut quotas = self.quotas.write().await;
        let slot = quotas.entry(agent_type.to_string()).or_default();
        slot.max_concurrent = max_concurrent;
        tracing::info!("Quota for {agent_type} set to {max_concurrent}");
    }

    /// Atomically claim a slot; `None` when the quota is full.
    pub async fn request_slot(&self, agent_type: &str) -> SwarmResult<Option<Uuid>> {
        let mut quotas = self.quotas.write().await;
        let slot = quotas
            .get_mut(agent_type)
            .ok_or_else(|| SwarmError::QuotaNotDefined {
                agent_type: agent_type.to_string(),
            })?;

        if slot.active_slots.len() >= slot.max_concurrent {
            return Ok(None);
        }

        let slot_id = Uuid::new_v4();
        slot.active_slots.insert(slot_id);
        Ok(Some(slot_id))
    }

    /// Release exactly the given slot.
    pub async fn release_slot(&self, agent_type: &str, slot_id: Uuid) -> SwarmResult<()> {
        let mut quotas = self.quotas.write().await;
        let slot = quotas
            .get_mut(agent_type)
            .ok_or_else(|| SwarmError::QuotaNotDefined {
                agent_type: agent_type.to_string(),
            })?;

        if !slot.active_slots.remove(&slot_id) {
            return Err(SwarmError::InvalidArgument {
                reason: format!("slot {slot_id} not active for {agent_type}"),
            });
        }
        Ok(())
    }

    pub async fn quota_status(&self, agent_type: &str) -> SwarmResult<QuotaStatus> {
        let quotas = self.quotas.read().await;
        let slot = quotas
            .get(agent_type)
            .ok_or_else(|| SwarmError::QuotaNotDefined {
                agent_type: agent_type.to_string(),
            })?;
        Ok(Self::status_of(agent_type, slot))
    }

    pub async fn all_statuses(&self) -> Vec<QuotaStatus> {
        let quotas = self.quotas.read().await;
        let mut statuses: Vec<QuotaStatus> = quotas
            .iter()
            .map(|(agent_type, slot)| Self::status_of(agent_type, slot))
            .collect();
        statuses.sort_by(|a, b| a.agent_type.cmp(&b.agent_type));
        statuses
    }

    fn status_of(agent_type: &str, slot: &QuotaSlot) -> QuotaStatus {
        QuotaStatus {
            agent_type: agent_type.to_string(),
            max_concurrent: slot.max_concurrent,
            active: slot.active_slots.len(),
            available: slot.max_concurrent.saturating_sub(slot.active_slots.len()),
        }
    }
}
