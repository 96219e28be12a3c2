//! # State Synchronizer
//!
//! Converges shared state across a swarm: queries every agent for its
//! view of a key, resolves divergent answers through the conflict
//! resolver, broadcasts the merged value, and persists it. Delta sync
//! ships only entries newer than a version watermark.
//!
//! The synchronizer depends on the coordinator's routing capability,
//! not on the coordinator value, so construction stays acyclic.

use crate::communication::envelope::{MessageEnvelope, MessageType};
use crate::communication::router::MessageRouter;
use crate::memory::MemoryProvider;
use crate::state::conflict_resolver::{ConflictResolver, StateVersion};
use crate::utils::error::{SwarmError, SwarmResult};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, RwLock};
use uuid::Uuid;

/// Sender id used on sync broadcasts.
const SYNC_SENDER: &str = "state_synchronizer";

/// Memory namespace holding synchronized state.
const STATE_NAMESPACE: &str = "state";

struct PendingQuery {
    responses: Vec<StateVersion>,
    expected: usize,
    notify: Arc<Notify>,
}

pub struct StateSynchronizer {
    router: Arc<dyn MessageRouter>,
    resolver: ConflictResolver,
    memory: Option<Arc<dyn MemoryProvider>>,
    sync_timeout_ms: u64,
    /// Local registry of the latest agreed version per (swarm, key).
    versions: RwLock<HashMap<String, HashMap<String, StateVersion>>>,
    pending: RwLock<HashMap<Uuid, PendingQuery>>,
}

impl StateSynchronizer {
    #[must_use]
    pub fn new(
        router: Arc<dyn MessageRouter>,
        resolver: ConflictResolver,
        memory: Option<Arc<dyn MemoryProvider>>,
        sync_timeout_ms: u64,
    ) -> Self {
        Self {
            router,
            resolver,
            memory,
            sync_timeout_ms,
            versions: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
        }
    }

    fn memory(&self) -> SwarmResult<&Arc<dyn MemoryProvider>> {
        self.memory.as_ref().ok_or_else(|| SwarmError::NotInitialized {
            component: "StateSynchronizer".to_string(),
            reason: "no memory provider configured".to_string(),
        })
    }

    /// Record a locally produced state version (e.g. from a coordinator
    /// write or an inbound `state_update`).
    pub async fn apply_update(&self, swarm_id: &str, version: StateVersion) {
        let mut versions = self.versions.write().await;
        let swarm_versions = versions.entry(swarm_id.to_string()).or_default();
        match swarm_versions.get(&version.state_key) {
            Some(existing) if existing.version >= version.version => {}
            _ => {
                swarm_versions.insert(version.state_key.clone(), version);
            }
        }
    }

    /// Current locally known version of a key.
    pub async fn local_version(&self, swarm_id: &str, state_key: &str) -> Option<StateVersion> {
        let versions = self.versions.read().await;
        versions
            .get(swarm_id)
            .and_then(|swarm| swarm.get(state_key))
            .cloned()
    }

    /// Deliver an agent's answer to an outstanding `state_query`.
    pub async fn receive_state_response(
        &self,
        correlation_id: Uuid,
        version: StateVersion,
    ) -> SwarmResult<bool> {
        let mut pending = self.pending.write().await;
        let Some(query) = pending.get_mut(&correlation_id) else {
            tracing::debug!("State response for unknown query {correlation_id}");
            return Ok(false);
        };
        query.responses.push(version);
        query.notify.notify_one();
        Ok(true)
    }

    /// Full synchronization of one key across the swarm.
    pub async fn synchronize_state(
        &self,
        swarm_id: &str,
        state_key: &str,
    ) -> SwarmResult<StateVersion> {
        let memory = Arc::clone(self.memory()?);

        let correlation_id = Uuid::new_v4();
        let participants = self.router.participants().await;
        let notify = Arc::new(Notify::new());
        {
            let mut pending = self.pending.write().await;
            pending.insert(
                correlation_id,
                PendingQuery {
                    responses: Vec::new(),
                    expected: participants.len(),
                    notify: Arc::clone(&notify),
                },
            );
        }

        let version_hint = self
            .local_version(swarm_id, state_key)
            .await
            .map(|v| v.version);
        let query = MessageEnvelope::new(
            MessageType::StateQuery,
            SYNC_SENDER,
            json!({
                "swarm_id": swarm_id,
                "state_key": state_key,
                "version_hint": version_hint,
            }),
        )
        .with_correlation(correlation_id);

        if let Err(err) = self.router.broadcast(SYNC_SENDER, query, None).await {
            self.pending.write().await.remove(&correlation_id);
            return Err(err);
        }

        // Collect responses within the window; whatever arrived by the
        // deadline is what gets resolved.
        let deadline = Instant::now() + Duration::from_millis(self.sync_timeout_ms);
        loop {
            {
                let pending = self.pending.read().await;
                if let Some(query) = pending.get(&correlation_id) {
                    if query.expected > 0 && query.responses.len() >= query.expected {
                        break;
                    }
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let _ = tokio::time::timeout(remaining, notify.notified()).await;
        }

        let mut collected = self
            .pending
            .write()
            .await
            .remove(&correlation_id)
            .map(|query| query.responses)
            .unwrap_or_default();

        if let Some(local) = self.local_version(swarm_id, state_key).await {
            collected.push(local);
        }
        if collected.is_empty() {
            return Err(SwarmError::InvalidArgument {
                reason: format!("no versions available for {state_key} in {swarm_id}"),
            });
        }

        let merged = self.resolver.resolve(state_key, &collected)?;

        let update = MessageEnvelope::new(
            MessageType::StateUpdate,
            SYNC_SENDER,
            json!({
                "swarm_id": swarm_id,
                "version": serde_json::to_value(&merged)?,
            }),
        )
        .with_correlation(correlation_id);
        if let Err(err) = self.router.broadcast(SYNC_SENDER, update, None).await {
            tracing::warn!("Failed to broadcast merged state for {state_key}: {err}");
        }

        memory
            .store(
                swarm_id,
                STATE_NAMESPACE,
                state_key,
                serde_json::to_value(&merged)?,
                true,
            )
            .await?;

        self.apply_update(swarm_id, merged.clone()).await;
        tracing::info!(
            "Synchronized {state_key} for {swarm_id}: version {} from {} inputs",
            merged.version,
            collected.len()
        );
        Ok(merged)
    }

    /// Entries newer than `since_version`. `delta_sync(s, 0)` is a full
    /// sync of every known key.
    pub async fn delta_sync(
        &self,
        swarm_id: &str,
        since_version: u64,
    ) -> SwarmResult<Vec<StateVersion>> {
        self.memory()?;

        let versions = self.versions.read().await;
        let mut delta: Vec<StateVersion> = versions
            .get(swarm_id)
            .map(|swarm| {
                swarm
                    .values()
                    .filter(|v| v.version > since_version)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        delta.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(delta)
    }
}
