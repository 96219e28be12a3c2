//! # Memory Provider
//!
//! Namespaced key/value persistence consumed by the state synchronizer
//! and the CLI. Persistent writes survive a restart through one
//! serialized file per `(swarm, namespace)` pair; volatile writes stay
//! process-local.

pub mod file_provider;

use crate::utils::error::SwarmResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use file_provider::FileMemoryProvider;

/// Aggregate usage statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    pub namespaces: usize,
    pub total_keys: usize,
    pub persistent_keys: usize,
    pub volatile_keys: usize,
}

/// Storage contract the kernel consumes.
#[async_trait]
pub trait MemoryProvider: Send + Sync {
    async fn store(
        &self,
        swarm_id: &str,
        namespace: &str,
        key: &str,
        value: serde_json::Value,
        persistent: bool,
    ) -> SwarmResult<()>;

    async fn retrieve(
        &self,
        swarm_id: &str,
        namespace: &str,
        key: &str,
    ) -> SwarmResult<Option<serde_json::Value>>;

    /// Returns whether the key existed.
    async fn delete(&self, swarm_id: &str, namespace: &str, key: &str) -> SwarmResult<bool>;

    /// Keys in a namespace, filtered by substring pattern when given.
    async fn list_keys(
        &self,
        swarm_id: &str,
        namespace: &str,
        pattern: Option<&str>,
    ) -> SwarmResult<Vec<String>>;

    /// Returns the number of keys removed.
    async fn clear_namespace(&self, swarm_id: &str, namespace: &str) -> SwarmResult<usize>;

    async fn memory_stats(&self) -> SwarmResult<MemoryStats>;
}
