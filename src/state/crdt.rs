//! # CRDTs
//!
//! Conflict-free replicated data types used by the CRDT resolution
//! strategy. Every merge is commutative, associative, and idempotent;
//! the merge laws are exercised directly in the tests below.

use crate::utils::error::{SwarmError, SwarmResult};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

/// Tagged CRDT state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "crdt_type", rename_all = "snake_case")]
pub enum CrdtValue {
    /// Grow-only counter: per-replica monotone counts.
    GCounter { counts: BTreeMap<String, u64> },
    /// Increment/decrement counter as two grow-only maps.
    PnCounter {
        increments: BTreeMap<String, u64>,
        decrements: BTreeMap<String, u64>,
    },
    /// Last-writer-wins register with timestamp/agent tie-breaking.
    LwwRegister {
        value: serde_json::Value,
        timestamp_ms: i64,
        agent_id: String,
    },
    /// Observed-remove set: unique add tags with remove tombstones.
    OrSet {
        adds: BTreeMap<String, BTreeSet<String>>,
        removes: BTreeMap<String, BTreeSet<String>>,
    },
}

impl CrdtValue {
    #[must_use]
    pub fn g_counter() -> Self {
        Self::GCounter {
            counts: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn pn_counter() -> Self {
        Self::PnCounter {
            increments: BTreeMap::new(),
            decrements: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn lww_register(value: serde_json::Value, timestamp_ms: i64, agent_id: &str) -> Self {
        Self::LwwRegister {
            value,
            timestamp_ms,
            agent_id: agent_id.to_string(),
        }
    }

    #[must_use]
    pub fn or_set() -> Self {
        Self::OrSet {
            adds: BTreeMap::new(),
            removes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::GCounter { .. } => "g_counter",
            Self::PnCounter { .. } => "pn_counter",
            Self::LwwRegister { .. } => "lww_register",
            Self::OrSet { .. } => "or_set",
        }
    }

    /// Increment a counter on behalf of a replica.
    pub fn increment(&mut self, replica: &str, amount: u64) -> SwarmResult<()> {
        match self {
            Self::GCounter { counts } => {
                *counts.entry(replica.to_string()).or_insert(0) += amount;
                Ok(())
            }
            Self::PnCounter { increments, .. } => {
                *increments.entry(replica.to_string()).or_insert(0) += amount;
                Ok(())
            }
            _ => Err(SwarmError::InvalidArgument {
                reason: format!("{} does not support increment", self.type_name()),
            }),
        }
    }

    /// Decrement a PN-counter on behalf of a replica.
    pub fn decrement(&mut self, replica: &str, amount: u64) -> SwarmResult<()> {
        match self {
            Self::PnCounter { decrements, .. } => {
                *decrements.entry(replica.to_string()).or_insert(0) += amount;
                Ok(())
            }
            _ => Err(SwarmError::InvalidArgument {
                reason: format!("{} does not support decrement", self.type_name()),
            }),
        }
    }

    /// Add an element to an OR-set with a unique tag.
    pub fn add_element(&mut self, element: &str, tag: &str) -> SwarmResult<()> {
        match self {
            Self::OrSet { adds, .. } => {
                adds.entry(element.to_string())
                    .or_default()
                    .insert(tag.to_string());
                Ok(())
            }
            _ => Err(SwarmError::InvalidArgument {
                reason: format!("{} does not support add_element", self.type_name()),
            }),
        }
    }

    /// Remove an element by tombstoning its currently observed tags.
    pub fn remove_element(&mut self, element: &str) -> SwarmResult<()> {
        match self {
            Self::OrSet { adds, removes } => {
                if let Some(tags) = adds.get(element) {
                    removes
                        .entry(element.to_string())
                        .or_default()
                        .extend(tags.iter().cloned());
                }
                Ok(())
            }
            _ => Err(SwarmError::InvalidArgument {
                reason: format!("{} does not support remove_element", self.type_name()),
            }),
        }
    }

    /// Materialized value for readers.
    #[must_use]
    pub fn value(&self) -> serde_json::Value {
        match self {
            Self::GCounter { counts } => json!(counts.values().sum::<u64>()),
            Self::PnCounter {
                increments,
                decrements,
            } => {
                let up: u64 = increments.values().sum();
                let down: u64 = decrements.values().sum();
                json!(up as i64 - down as i64)
            }
            Self::LwwRegister { value, .. } => value.clone(),
            Self::OrSet { adds, removes } => {
                let members: Vec<&String> = adds
                    .iter()
                    .filter(|(element, tags)| {
                        let removed = removes.get(*element);
                        tags.iter().any(|tag| {
                            removed.is_none_or(|tombstones| !tombstones.contains(tag))
                        })
                    })
                    .map(|(element, _)| element)
                    .collect();
                json!(members)
            }
        }
    }

    /// CRDT join. Merging different types is a caller error.
    pub fn merge(&self, other: &Self) -> SwarmResult<Self> {
        match (self, other) {
            (Self::GCounter { counts: a }, Self::GCounter { counts: b }) => {
                Ok(Self::GCounter {
                    counts: merge_max(a, b),
                })
            }
            (
                Self::PnCounter {
                    increments: ai,
                    decrements: ad,
                },
                Self::PnCounter {
                    increments: bi,
                    decrements: bd,
                },
            ) => Ok(Self::PnCounter {
                increments: merge_max(ai, bi),
                decrements: merge_max(ad, bd),
            }),
            (
                Self::LwwRegister {
                    value: av,
                    timestamp_ms: at,
                    agent_id: aa,
                },
                Self::LwwRegister {
                    value: bv,
                    timestamp_ms: bt,
                    agent_id: ba,
                },
            ) => {
                let keep_other = (bt, ba.as_str()) > (at, aa.as_str());
                Ok(if keep_other {
                    Self::LwwRegister {
                        value: bv.clone(),
                        timestamp_ms: *bt,
                        agent_id: ba.clone(),
                    }
                } else {
                    Self::LwwRegister {
                        value: av.clone(),
                        timestamp_ms: *at,
                        agent_id: aa.clone(),
                    }
                })
            }
            (
                Self::OrSet {
                    adds: aa,
                    removes: ar,
                },
                Self::OrSet {
                    adds: ba,
                    removes: br,
                },
            ) => Ok(Self::OrSet {
                adds: merge_union(aa, ba),
                removes: merge_union(ar, br),
            }),
            (left, right) => Err(SwarmError::InvalidArgument {
                reason: format!(
                    "cannot merge {} with {}",
                    left.type_name(),
                    right.type_name()
                ),
            }),
        }
    }
}

fn merge_max(a: &BTreeMap<String, u64>, b: &BTreeMap<String, u64>) -> BTreeMap<String, u64> {
    let mut merged = a.clone();
    for (replica, count) in b {
        merged
            .entry(replica.clone())
            .and_modify(|existing| *existing = (*existing).max(*count))
            .or_insert(*count);
    }
    merged
}

fn merge_union(
    a: &BTreeMap<String, BTreeSet<String>>,
    b: &BTreeMap<String, BTreeSet<String>>,
) -> BTreeMap<String, BTreeSet<String>> {
    let mut merged = a.clone();
    for (element, tags) in b {
        merged
            .entry(element.clone())
            .or_default()
            .extend(tags.iter().cloned());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn g_counter(entries: &[(&str, u64)]) -> CrdtValue {
        let mut counter = CrdtValue::g_counter();
        for (replica, amount) in entries {
            counter.increment(replica, *amount).unwrap();
        }
        counter
    }

    #[test]
    fn test_g_counter_merge_takes_max_per_replica() {
        let a = g_counter(&[("r1", 5), ("r2", 2)]);
        let b = g_counter(&[("r1", 3), ("r3", 7)]);
        let merged = a.merge(&b).unwrap();
        assert_eq!(merged.value(), json!(14));
    }

    #[test]
    fn test_merge_laws_g_counter() {
        let a = g_counter(&[("r1", 5)]);
        let b = g_counter(&[("r2", 3)]);
        let c = g_counter(&[("r1", 2), ("r3", 1)]);

        // Commutativity.
        assert_eq!(a.merge(&b).unwrap(), b.merge(&a).unwrap());
        // Associativity.
        assert_eq!(
            a.merge(&b).unwrap().merge(&c).unwrap(),
            a.merge(&b.merge(&c).unwrap()).unwrap()
        );
        // Idempotency.
        assert_eq!(a.merge(&a).unwrap(), a);
    }

    #[test]
    fn test_pn_counter_value_and_merge() {
        let mut a = CrdtValue::pn_counter();
        a.increment("r1", 10).unwrap();
        a.decrement("r1", 3).unwrap();

        let mut b = CrdtValue::pn_counter();
        b.increment("r2", 5).unwrap();

        let merged = a.merge(&b).unwrap();
        assert_eq!(merged.value(), json!(12));
        assert_eq!(merged.merge(&merged).unwrap(), merged);
    }

    #[test]
    fn test_lww_register_merge() {
        let older = CrdtValue::lww_register(json!("v1"), 1_000, "a1");
        let newer = CrdtValue::lww_register(json!("v2"), 2_000, "a2");

        assert_eq!(older.merge(&newer).unwrap().value(), json!("v2"));
        assert_eq!(newer.merge(&older).unwrap().value(), json!("v2"));

        // Equal timestamps break ties by greatest agent id.
        let left = CrdtValue::lww_register(json!("left"), 1_000, "a1");
        let right = CrdtValue::lww_register(json!("right"), 1_000, "a9");
        assert_eq!(left.merge(&right).unwrap().value(), json!("right"));
    }

    #[test]
    fn test_or_set_add_wins_over_concurrent_remove() {
        let mut a = CrdtValue::or_set();
        a.add_element("x", "tag-1").unwrap();

        // Replica b observed tag-1 and removed it, while a re-adds with
        // a fresh tag concurrently.
        let mut b = a.clone();
        b.remove_element("x").unwrap();
        a.add_element("x", "tag-2").unwrap();

        let merged = a.merge(&b).unwrap();
        assert_eq!(merged.value(), json!(["x"]));
    }

    #[test]
    fn test_or_set_remove_sticks_without_readd() {
        let mut a = CrdtValue::or_set();
        a.add_element("x", "tag-1").unwrap();
        let mut b = a.clone();
        b.remove_element("x").unwrap();

        let merged = a.merge(&b).unwrap();
        assert_eq!(merged.value(), json!([]));
    }

    #[test]
    fn test_type_mismatch_is_error() {
        let counter = CrdtValue::g_counter();
        let set = CrdtValue::or_set();
        assert!(counter.merge(&set).is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let mut set = CrdtValue::or_set();
        set.add_element("x", "t1").unwrap();
        let encoded = serde_json::to_string(&set).unwrap();
        let decoded: CrdtValue = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, set);
    }
}
