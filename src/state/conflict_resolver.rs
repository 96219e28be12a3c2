//! # Conflict Resolver
//!
//! Reconciles divergent state versions reported by different agents.
//! Three strategies: last-write-wins on timestamp, vector-clock causal
//! ordering with LWW fallback for concurrent writes, and CRDT joins.

use crate::state::crdt::CrdtValue;
use crate::utils::error::{SwarmError, SwarmResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Resolution strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    Lww,
    VectorClock,
    Crdt,
}

impl std::str::FromStr for ResolutionStrategy {
    type Err = SwarmError;

    fn from_str(s: &str) -> SwarmResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lww" => Ok(Self::Lww),
            "vector_clock" => Ok(Self::VectorClock),
            "crdt" => Ok(Self::Crdt),
            other => Err(SwarmError::InvalidArgument {
                reason: format!("unknown resolution strategy: {other}"),
            }),
        }
    }
}

/// One agent's view of a state entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateVersion {
    pub state_key: String,
    pub value: serde_json::Value,
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub vector_clock: Option<BTreeMap<String, u64>>,
    pub crdt: Option<CrdtValue>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl StateVersion {
    #[must_use]
    pub fn new(state_key: &str, value: serde_json::Value, version: u64, agent_id: &str) -> Self {
        Self {
            state_key: state_key.to_string(),
            value,
            version,
            timestamp: Utc::now(),
            agent_id: agent_id.to_string(),
            vector_clock: None,
            crdt: None,
            metadata: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn with_vector_clock(mut self, clock: BTreeMap<String, u64>) -> Self {
        self.vector_clock = Some(clock);
        self
    }

    #[must_use]
    pub fn with_crdt(mut self, crdt: CrdtValue) -> Self {
        self.crdt = Some(crdt);
        self
    }
}

/// Causal comparison of two vector clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CausalOrder {
    Before,
    After,
    Equal,
    Concurrent,
}

fn compare_clocks(a: &BTreeMap<String, u64>, b: &BTreeMap<String, u64>) -> CausalOrder {
    let mut a_less = false;
    let mut b_less = false;
    let keys: std::collections::BTreeSet<&String> = a.keys().chain(b.keys()).collect();
    for key in keys {
        let av = a.get(key).copied().unwrap_or(0);
        let bv = b.get(key).copied().unwrap_or(0);
        match av.cmp(&bv) {
            Ordering::Less => a_less = true,
            Ordering::Greater => b_less = true,
            Ordering::Equal => {}
        }
    }
    match (a_less, b_less) {
        (false, false) => CausalOrder::Equal,
        (true, false) => CausalOrder::Before,
        (false, true) => CausalOrder::After,
        (true, true) => CausalOrder::Concurrent,
    }
}

/// Stateless resolver; the strategy is fixed at construction.
pub struct ConflictResolver {
    strategy: ResolutionStrategy,
}

impl ConflictResolver {
    #[must_use]
    pub fn new(strategy: ResolutionStrategy) -> Self {
        Self { strategy }
    }

    #[must_use]
    pub fn strategy(&self) -> ResolutionStrategy {
        self.strategy
    }

    /// Merge one or more versions of a key into a single version. The
    /// inputs are preserved in the merged version's metadata for audit.
    pub fn resolve(&self, state_key: &str, versions: &[StateVersion]) -> SwarmResult<StateVersion> {
        if versions.is_empty() {
            return Err(SwarmError::InvalidArgument {
                reason: "resolve requires at least one version".to_string(),
            });
        }
        if let Some(stray) = versions.iter().find(|v| v.state_key != state_key) {
            return Err(SwarmError::InvalidArgument {
                reason: format!(
                    "version from {} is for key {}, expected {state_key}",
                    stray.agent_id, stray.state_key
                ),
            });
        }

        let mut merged = match self.strategy {
            ResolutionStrategy::Lww => Self::resolve_lww(versions).clone(),
            ResolutionStrategy::VectorClock => Self::resolve_vector_clock(versions).clone(),
            ResolutionStrategy::Crdt => self.resolve_crdt(state_key, versions)?,
        };

        if versions.len() > 1 {
            merged.metadata.insert(
                "resolved_from".to_string(),
                serde_json::to_value(
                    versions
                        .iter()
                        .map(|v| {
                            serde_json::json!({
                                "agent_id": v.agent_id,
                                "version": v.version,
                                "timestamp": v.timestamp,
                            })
                        })
                        .collect::<Vec<_>>(),
                )?,
            );
            merged.metadata.insert(
                "strategy".to_string(),
                serde_json::Value::String(format!("{:?}", self.strategy).to_lowercase()),
            );
        }
        Ok(merged)
    }

    /// Greatest timestamp wins; ties go to the lexicographically
    /// greatest agent id.
    fn resolve_lww(versions: &[StateVersion]) -> &StateVersion {
        versions
            .iter()
            .reduce(|best, candidate| {
                let candidate_key = (candidate.timestamp, candidate.agent_id.as_str());
                let best_key = (best.timestamp, best.agent_id.as_str());
                if candidate_key > best_key {
                    candidate
                } else {
                    best
                }
            })
            .unwrap_or(&versions[0])
    }

    /// Pick the causally dominant version; concurrent histories fall
    /// back to LWW. Versions without a clock are treated as empty clocks.
    fn resolve_vector_clock(versions: &[StateVersion]) -> &StateVersion {
        let empty = BTreeMap::new();
        let dominant = versions.iter().find(|candidate| {
            let candidate_clock = candidate.vector_clock.as_ref().unwrap_or(&empty);
            versions.iter().all(|other| {
                if std::ptr::eq(*candidate, other) {
                    return true;
                }
                let other_clock = other.vector_clock.as_ref().unwrap_or(&empty);
                matches!(
                    compare_clocks(candidate_clock, other_clock),
                    CausalOrder::After | CausalOrder::Equal
                )
            })
        });

        match dominant {
            Some(version) => version,
            None => Self::resolve_lww(versions),
        }
    }

    /// Join every CRDT state; all versions must carry the same type.
    fn resolve_crdt(&self, state_key: &str, versions: &[StateVersion]) -> SwarmResult<StateVersion> {
        let mut crdts = versions.iter().filter_map(|v| v.crdt.as_ref());
        let Some(first) = crdts.next() else {
            return Err(SwarmError::InvalidArgument {
                reason: format!("no CRDT payload on versions of {state_key}"),
            });
        };

        let mut merged_crdt = first.clone();
        for crdt in crdts {
            merged_crdt = merged_crdt.merge(crdt)?;
        }

        let max_version = versions.iter().map(|v| v.version).max().unwrap_or(0);
        let latest = Self::resolve_lww(versions);
        let mut merged = StateVersion::new(state_key, merged_crdt.value(), max_version, &latest.agent_id);
        merged.timestamp = latest.timestamp;
        merged.crdt = Some(merged_crdt);
        Ok(merged)
    }
}
