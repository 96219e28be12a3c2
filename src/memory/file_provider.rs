//! File-backed memory provider: one JSON file per `(swarm, namespace)`
//! under `<root>/memory/`. Persistent entries are flushed on every
//! mutation; volatile entries live only in the in-process cache.

use crate::memory::{MemoryProvider, MemoryStats};
use crate::utils::error::{SwarmError, SwarmResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    value: serde_json::Value,
    persistent: bool,
}

type NamespaceKey = (String, String);

pub struct FileMemoryProvider {
    root: PathBuf,
    cache: RwLock<HashMap<NamespaceKey, HashMap<String, Entry>>>,
}

impl FileMemoryProvider {
    /// Open (creating `<root>/memory/` if needed) and index existing
    /// namespace files lazily.
    pub fn new<P: AsRef<Path>>(root: P) -> SwarmResult<Self> {
        let root = root.as_ref().join("memory");
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            cache: RwLock::new(HashMap::new()),
        })
    }

    fn namespace_path(&self, swarm_id: &str, namespace: &str) -> PathBuf {
        // Both components are caller-controlled; keep them path-safe.
        let sanitize = |s: &str| {
            s.chars()
                .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
                .collect::<String>()
        };
        self.root
            .join(format!("{}__{}.json", sanitize(swarm_id), sanitize(namespace)))
    }

    async fn ensure_loaded(&self, swarm_id: &str, namespace: &str) -> SwarmResult<()> {
        let key = (swarm_id.to_string(), namespace.to_string());
        {
            let cache = self.cache.read().await;
            if cache.contains_key(&key) {
                return Ok(());
            }
        }

        let path = self.namespace_path(swarm_id, namespace);
        let entries = if path.exists() {
            let contents = tokio::fs::read_to_string(&path).await?;
            serde_json::from_str::<HashMap<String, Entry>>(&contents).map_err(|e| {
                SwarmError::Storage {
                    reason: format!("corrupt namespace file {}: {e}", path.display()),
                }
            })?
        } else {
            HashMap::new()
        };

        self.cache.write().await.entry(key).or_insert(entries);
        Ok(())
    }

    async fn flush_namespace(&self, swarm_id: &str, namespace: &str) -> SwarmResult<()> {
        let key = (swarm_id.to_string(), namespace.to_string());
        let persistent: HashMap<String, Entry> = {
            let cache = self.cache.read().await;
            cache
                .get(&key)
                .map(|entries| {
                    entries
                        .iter()
                        .filter(|(_, entry)| entry.persistent)
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        let path = self.namespace_path(swarm_id, namespace);
        if persistent.is_empty() {
            if path.exists() {
                tokio::fs::remove_file(&path).await?;
            }
            return Ok(());
        }

        let serialized = serde_json::to_string_pretty(&persistent)?;
        tokio::fs::write(&path, serialized).await?;
        Ok(())
    }
}

#[async_trait]
impl MemoryProvider for FileMemoryProvider {
    async fn store(
        &self,
        swarm_id: &str,
        namespace: &str,
        key: &str,
        value: serde_json::Value,
        persistent: bool,
    ) -> SwarmResult<()> {
        self.ensure_loaded(swarm_id, namespace).await?;
        {
            let mut cache = self.cache.write().await;
            let entries = cache
                .entry((swarm_id.to_string(), namespace.to_string()))
                .or_default();
            entries.insert(key.to_string(), Entry { value, persistent });
        }
        if persistent {
            self.flush_namespace(swarm_id, namespace).await?;
        }
        Ok(())
    }

    async fn retrieve(
        &self,
        swarm_id: &str,
        namespace: &str,
        key: &str,
    ) -> SwarmResult<Option<serde_json::Value>> {
        self.ensure_loaded(swarm_id, namespace).await?;
        let cache = self.cache.read().await;
        Ok(cache
            .get(&(swarm_id.to_string(), namespace.to_string()))
            .and_then(|entries| entries.get(key))
            .map(|entry| entry.value.clone()))
    }

    async fn delete(&self, swarm_id: &str, namespace: &str, key: &str) -> SwarmResult<bool> {
        self.ensure_loaded(swarm_id, namespace).await?;
        let (existed, was_persistent) = {
            let mut cache = self.cache.write().await;
            match cache
                .get_mut(&(swarm_id.to_string(), namespace.to_string()))
                .and_then(|entries| entries.remove(key))
            {
                Some(entry) => (true, entry.persistent),
                None => (false, false),
            }
        };
        if was_persistent {
            self.flush_namespace(swarm_id, namespace).await?;
        }
        Ok(existed)
    }

    async fn list_keys(
        &self,
        swarm_id: &str,
        namespace: &str,
        pattern: Option<&str>,
    ) -> SwarmResult<Vec<String>> {
        self.ensure_loaded(swarm_id, namespace).await?;
        let cache = self.cache.read().await;
        let mut keys: Vec<String> = cache
            .get(&(swarm_id.to_string(), namespace.to_string()))
            .map(|entries| {
                entries
                    .keys()
                    .filter(|k| pattern.is_none_or(|p| k.contains(p)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }

    async fn clear_namespace(&self, swarm_id: &str, namespace: &str) -> SwarmResult<usize> {
        self.ensure_loaded(swarm_id, namespace).await?;
        let removed = {
            let mut cache = self.cache.write().await;
            cache
                .get_mut(&(swarm_id.to_string(), namespace.to_string()))
                .map(|entries| {
                    let count = entries.len();
                    entries.clear();
                    count
                })
                .unwrap_or(0)
        };
        self.flush_namespace(swarm_id, namespace).await?;
        Ok(removed)
    }

    async fn memory_stats(&self) -> SwarmResult<MemoryStats> {
        let cache = self.cache.read().await;
        let mut stats = MemoryStats {
            namespaces: cache.len(),
            ..Default::default()
        };
        for entries in cache.values() {
            for entry in entries.values() {
                stats.total_keys += 1;
                if entry.persistent {
                    stats.persistent_keys += 1;
                } else {
                    stats.volatile_keys += 1;
                }
            }
        }
        Ok(stats)
    }
}
