//! # Topology
//!
//! The logical graph connecting agents for message routing. Four modes
//! are supported; edges are derived from the mode rather than stored
//! explicitly, except for the hierarchical parent/child links and the
//! ring order, which carry real structure.

use crate::utils::error::{SwarmError, SwarmResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Default root/hub agent id for star and hierarchical modes.
pub const DEFAULT_ROOT_ID: &str = "alfred";

/// Supported topology patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyMode {
    /// Full connectivity, best for small collaborative swarms.
    Mesh,
    /// Hub-and-spoke with a central coordinator agent.
    Star,
    /// Sequential chain for pipeline workloads.
    Ring,
    /// Tree rooted at a designated agent, scales past ~10 agents.
    Hierarchical,
}

impl TopologyMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mesh => "mesh",
            Self::Star => "star",
            Self::Ring => "ring",
            Self::Hierarchical => "hierarchical",
        }
    }
}

impl std::str::FromStr for TopologyMode {
    type Err = SwarmError;

    fn from_str(s: &str) -> SwarmResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mesh" => Ok(Self::Mesh),
            "star" => Ok(Self::Star),
            "ring" => Ok(Self::Ring),
            "hierarchical" => Ok(Self::Hierarchical),
            other => Err(SwarmError::InvalidArgument {
                reason: format!("unknown topology mode: {other}"),
            }),
        }
    }
}

/// A registered agent as seen by the topology and coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub agent_id: String,
    pub agent_type: String,
    pub capabilities: HashSet<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub registered_at: DateTime<Utc>,
    /// Parent link, meaningful in star (hub) and hierarchical modes.
    pub parent_id: Option<String>,
    /// Tree depth; 0 for the root and for flat modes.
    pub layer: u32,
    /// Child links, maintained for star/hierarchical modes.
    pub children: HashSet<String>,
}

impl AgentInfo {
    #[must_use]
    pub fn new(agent_id: &str, agent_type: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            agent_type: agent_type.to_string(),
            capabilities: HashSet::new(),
            metadata: HashMap::new(),
            registered_at: Utc::now(),
            parent_id: None,
            layer: 0,
            children: HashSet::new(),
        }
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: HashSet<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Placement options supplied at registration time.
#[derive(Debug, Clone, Default)]
pub struct Placement {
    /// Parent for hierarchical mode; defaults to the root.
    pub parent_id: Option<String>,
    /// Tree layer for hierarchical mode; defaults to parent layer + 1.
    pub layer: Option<u32>,
}

/// Summary returned by `get_topology_info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyInfo {
    #[serde(rename = "type")]
    pub mode: TopologyMode,
    pub agent_count: usize,
    pub edge_count: usize,
    pub health: String,
}

/// The active agent graph.
#[derive(Debug, Clone)]
pub struct Topology {
    mode: TopologyMode,
    root_id: String,
    agents: HashMap<String, AgentInfo>,
    /// Insertion order, drives ring adjacency.
    ring_order: Vec<String>,
}

impl Topology {
    /// Create a topology. Star and hierarchical modes seed the hub/root
    /// agent immediately so the structural invariant holds from the start.
    #[must_use]
    pub fn new(mode: TopologyMode) -> Self {
        Self::with_root(mode, DEFAULT_ROOT_ID)
    }

    #[must_use]
    pub fn with_root(mode: TopologyMode, root_id: &str) -> Self {
        let mut topology = Self {
            mode,
            root_id: root_id.to_string(),
            agents: HashMap::new(),
            ring_order: Vec::new(),
        };

        if matches!(mode, TopologyMode::Star | TopologyMode::Hierarchical) {
            let root = AgentInfo::new(root_id, "coordinator");
            topology.agents.insert(root_id.to_string(), root);
            topology.ring_order.push(root_id.to_string());
        }

        topology
    }

    #[must_use]
    pub fn mode(&self) -> TopologyMode {
        self.mode
    }

    #[must_use]
    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    #[must_use]
    pub fn contains(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    #[must_use]
    pub fn agent(&self, agent_id: &str) -> Option<&AgentInfo> {
        self.agents.get(agent_id)
    }

    #[must_use]
    pub fn agent_ids(&self) -> Vec<String> {
        self.ring_order.clone()
    }

    #[must_use]
    pub fn agents(&self) -> &HashMap<String, AgentInfo> {
        &self.agents
    }

    /// Add an agent and wire edges per the current mode.
    pub fn add_agent(&mut self, mut agent: AgentInfo, placement: &Placement) -> SwarmResult<()> {
        if self.agents.contains_key(&agent.agent_id) {
            return Err(SwarmError::DuplicateAgent {
                id: agent.agent_id.clone(),
            });
        }

        match self.mode {
            TopologyMode::Mesh => {
                agent.parent_id = None;
                agent.layer = 0;
            }
            TopologyMode::Ring => {
                agent.parent_id = None;
                agent.layer = self.ring_order.len() as u32;
            }
            TopologyMode::Star => {
                agent.parent_id = Some(self.root_id.clone());
                agent.layer = 1;
            }
            TopologyMode::Hierarchical => {
                let parent_id = placement
                    .parent_id
                    .clone()
                    .unwrap_or_else(|| self.root_id.clone());
                let parent_layer = match self.agents.get(&parent_id) {
                    Some(parent) => parent.layer,
                    None => {
                        return Err(SwarmError::AgentNotFound { id: parent_id });
                    }
                };
                agent.layer = placement.layer.unwrap_or(parent_layer + 1);
                agent.parent_id = Some(parent_id);
            }
        }

        if let Some(parent_id) = agent.parent_id.clone() {
            if let Some(parent) = self.agents.get_mut(&parent_id) {
                parent.children.insert(agent.agent_id.clone());
            }
        }

        self.ring_order.push(agent.agent_id.clone());
        self.agents.insert(agent.agent_id.clone(), agent);
        Ok(())
    }

    /// Remove an agent and its incident edges.
    ///
    /// In hierarchical mode children are promoted to the grandparent
    /// unless `require_empty_children` is set, in which case removal of
    /// a populated subtree root is rejected.
    pub fn remove_agent(&mut self, agent_id: &str, require_empty_children: bool) -> SwarmResult<AgentInfo> {
        if !self.agents.contains_key(agent_id) {
            return Err(SwarmError::AgentNotFound {
                id: agent_id.to_string(),
            });
        }

        if matches!(self.mode, TopologyMode::Star | TopologyMode::Hierarchical)
            && agent_id == self.root_id
        {
            return Err(SwarmError::InvalidArgument {
                reason: format!("cannot remove {} agent {agent_id}", self.mode.as_str()),
            });
        }

        if self.mode == TopologyMode::Hierarchical {
            let children: Vec<String> = self.agents[agent_id].children.iter().cloned().collect();
            if !children.is_empty() {
                if require_empty_children {
                    return Err(SwarmError::AgentHasChildren {
                        id: agent_id.to_string(),
                    });
                }
                let grandparent_id = self.agents[agent_id]
                    .parent_id
                    .clone()
                    .unwrap_or_else(|| self.root_id.clone());
                for child_id in children {
                    if let Some(child) = self.agents.get_mut(&child_id) {
                        child.parent_id = Some(grandparent_id.clone());
                    }
                    if let Some(grandparent) = self.agents.get_mut(&grandparent_id) {
                        grandparent.children.insert(child_id);
                    }
                }
            }
        }

        let removed = self
            .agents
            .remove(agent_id)
            .ok_or_else(|| SwarmError::AgentNotFound {
                id: agent_id.to_string(),
            })?;

        if let Some(parent_id) = &removed.parent_id {
            if let Some(parent) = self.agents.get_mut(parent_id) {
                parent.children.remove(agent_id);
            }
        }

        self.ring_order.retain(|id| id != agent_id);
        Ok(removed)
    }

    /// Whether a directed edge `(from, to)` exists under the mode rules.
    #[must_use]
    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        if from == to || !self.contains(from) || !self.contains(to) {
            return false;
        }

        match self.mode {
            TopologyMode::Mesh => true,
            TopologyMode::Star => from == self.root_id || to == self.root_id,
            TopologyMode::Ring => self.ring_successor(from).as_deref() == Some(to),
            TopologyMode::Hierarchical => {
                let from_agent = &self.agents[from];
                let to_agent = &self.agents[to];
                from_agent.parent_id.as_deref() == Some(to)
                    || to_agent.parent_id.as_deref() == Some(from)
            }
        }
    }

    /// Total directed edge count for `get_topology_info`.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        let n = self.agents.len();
        match self.mode {
            TopologyMode::Mesh => n.saturating_mul(n.saturating_sub(1)),
            TopologyMode::Star => 2 * n.saturating_sub(1),
            TopologyMode::Ring => {
                if n > 1 {
                    n
                } else {
                    0
                }
            }
            TopologyMode::Hierarchical => 2 * n.saturating_sub(1),
        }
    }

    /// Recipients of a broadcast issued by `from`, honoring mode rules.
    ///
    /// In star mode only the hub may broadcast; a ring broadcast forwards
    /// once around the chain; hierarchical broadcasts flood the tree.
    pub fn broadcast_targets(
        &self,
        from: &str,
        exclude: Option<&HashSet<String>>,
    ) -> SwarmResult<Vec<String>> {
        if !self.contains(from) {
            return Err(SwarmError::AgentNotFound {
                id: from.to_string(),
            });
        }

        if self.mode == TopologyMode::Star && from != self.root_id {
            return Err(SwarmError::InvalidArgument {
                reason: format!("only hub {} may broadcast in star mode", self.root_id),
            });
        }

        let targets = match self.mode {
            TopologyMode::Ring => {
                // Walk once around, preserving forwarding order.
                let mut ordered = Vec::new();
                if let Some(start) = self.ring_order.iter().position(|id| id == from) {
                    let n = self.ring_order.len();
                    for offset in 1..n {
                        ordered.push(self.ring_order[(start + offset) % n].clone());
                    }
                }
                ordered
            }
            _ => self
                .ring_order
                .iter()
                .filter(|id| id.as_str() != from)
                .cloned()
                .collect(),
        };

        Ok(targets
            .into_iter()
            .filter(|id| exclude.is_none_or(|set| !set.contains(id)))
            .collect())
    }

    fn ring_successor(&self, agent_id: &str) -> Option<String> {
        let n = self.ring_order.len();
        if n < 2 {
            return None;
        }
        let position = self.ring_order.iter().position(|id| id == agent_id)?;
        Some(self.ring_order[(position + 1) % n].clone())
    }

    #[must_use]
    pub fn info(&self, health: &str) -> TopologyInfo {
        TopologyInfo {
            mode: self.mode,
            agent_count: self.agent_count(),
            edge_count: self.edge_count(),
            health: health.to_string(),
        }
    }

    /// Text rendering of the current structure, one line per relation.
    #[must_use]
    pub fn visualize(&self) -> String {
        if self.agents.is_empty() {
            return format!("{} topology (empty)", self.mode.as_str());
        }

        let mut lines = Vec::new();
        match self.mode {
            TopologyMode::Mesh => {
                lines.push("Mesh topology (full connectivity)".to_string());
                for id in &self.ring_order {
                    let peers: Vec<&str> = self
                        .ring_order
                        .iter()
                        .filter(|other| other.as_str() != id.as_str())
                        .map(String::as_str)
                        .collect();
                    lines.push(format!("  {id} <-> {}", peers.join(", ")));
                }
            }
            TopologyMode::Star => {
                lines.push(format!("Star topology (hub: {})", self.root_id));
                for id in &self.ring_order {
                    if id != &self.root_id {
                        lines.push(format!("  {} <-> {id}", self.root_id));
                    }
                }
            }
            TopologyMode::Ring => {
                lines.push("Ring topology (sequential)".to_string());
                let mut chain = self.ring_order.join(" -> ");
                if self.ring_order.len() > 1 {
                    chain.push_str(&format!(" -> {}", self.ring_order[0]));
                }
                lines.push(format!("  {chain}"));
            }
            TopologyMode::Hierarchical => {
                lines.push(format!("Hierarchical topology (root: {})", self.root_id));
                let mut by_layer: Vec<&AgentInfo> = self.agents.values().collect();
                by_layer.sort_by_key(|a| (a.layer, a.agent_id.clone()));
                for agent in by_layer {
                    let indent = "  ".repeat(agent.layer as usize + 1);
                    match &agent.parent_id {
                        Some(parent) => {
                            lines.push(format!("{indent}{} (parent: {parent})", agent.agent_id));
                        }
                        None => lines.push(format!("{indent}{}", agent.agent_id)),
                    }
                }
            }
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(topology: &mut Topology, id: &str) {
        topology
            .add_agent(AgentInfo::new(id, "worker"), &Placement::default())
            .unwrap();
    }

    #[test]
    fn test_mesh_full_connectivity() {
        let mut topology = Topology::new(TopologyMode::Mesh);
        add(&mut topology, "a1");
        add(&mut topology, "a2");
        add(&mut topology, "a3");

        assert!(topology.has_edge("a1", "a2"));
        assert!(topology.has_edge("a3", "a1"));
        assert!(!topology.has_edge("a1", "a1"));
        assert_eq!(topology.edge_count(), 6);
    }

    #[test]
    fn test_duplicate_agent_rejected() {
        let mut topology = Topology::new(TopologyMode::Mesh);
        add(&mut topology, "a1");
        let result = topology.add_agent(AgentInfo::new("a1", "worker"), &Placement::default());
        assert!(matches!(result, Err(SwarmError::DuplicateAgent { .. })));
    }

    #[test]
    fn test_star_edges_go_through_hub() {
        let mut topology = Topology::new(TopologyMode::Star);
        add(&mut topology, "s1");
        add(&mut topology, "s2");

        assert!(topology.has_edge("alfred", "s1"));
        assert!(topology.has_edge("s2", "alfred"));
        assert!(!topology.has_edge("s1", "s2"));
        assert_eq!(topology.edge_count(), 4);
    }

    #[test]
    fn test_star_spoke_cannot_broadcast() {
        let mut topology = Topology::new(TopologyMode::Star);
        add(&mut topology, "s1");
        add(&mut topology, "s2");

        assert!(topology.broadcast_targets("s1", None).is_err());
        let targets = topology.broadcast_targets("alfred", None).unwrap();
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn test_ring_successor_edges() {
        let mut topology = Topology::new(TopologyMode::Ring);
        add(&mut topology, "r1");
        add(&mut topology, "r2");
        add(&mut topology, "r3");

        assert!(topology.has_edge("r1", "r2"));
        assert!(topology.has_edge("r3", "r1"));
        assert!(!topology.has_edge("r2", "r1"));
        assert_eq!(topology.edge_count(), 3);

        // Broadcast forwards once around in chain order.
        let targets = topology.broadcast_targets("r2", None).unwrap();
        assert_eq!(targets, vec!["r3".to_string(), "r1".to_string()]);
    }

    #[test]
    fn test_hierarchical_parent_links() {
        let mut topology = Topology::new(TopologyMode::Hierarchical);
        add(&mut topology, "m1");
        topology
            .add_agent(
                AgentInfo::new("w1", "worker"),
                &Placement {
                    parent_id: Some("m1".to_string()),
                    layer: None,
                },
            )
            .unwrap();

        let w1 = topology.agent("w1").unwrap();
        assert_eq!(w1.parent_id.as_deref(), Some("m1"));
        assert_eq!(w1.layer, 2);
        assert!(topology.has_edge("m1", "w1"));
        assert!(topology.has_edge("w1", "m1"));
        assert!(!topology.has_edge("w1", "alfred"));
    }

    #[test]
    fn test_hierarchical_removal_promotes_children() {
        let mut topology = Topology::new(TopologyMode::Hierarchical);
        add(&mut topology, "m1");
        topology
            .add_agent(
                AgentInfo::new("w1", "worker"),
                &Placement {
                    parent_id: Some("m1".to_string()),
                    layer: None,
                },
            )
            .unwrap();

        topology.remove_agent("m1", false).unwrap();
        let w1 = topology.agent("w1").unwrap();
        assert_eq!(w1.parent_id.as_deref(), Some("alfred"));
        assert!(topology.agent("alfred").unwrap().children.contains("w1"));
    }

    #[test]
    fn test_hierarchical_removal_rejected_with_children() {
        let mut topology = Topology::new(TopologyMode::Hierarchical);
        add(&mut topology, "m1");
        topology
            .add_agent(
                AgentInfo::new("w1", "worker"),
                &Placement {
                    parent_id: Some("m1".to_string()),
                    layer: None,
                },
            )
            .unwrap();

        let result = topology.remove_agent("m1", true);
        assert!(matches!(result, Err(SwarmError::AgentHasChildren { .. })));
        assert!(topology.contains("m1"));
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let mut topology = Topology::new(TopologyMode::Hierarchical);
        let result = topology.add_agent(
            AgentInfo::new("w1", "worker"),
            &Placement {
                parent_id: Some("ghost".to_string()),
                layer: None,
            },
        );
        assert!(matches!(result, Err(SwarmError::AgentNotFound { .. })));
    }

    #[test]
    fn test_exclude_filter_on_broadcast() {
        let mut topology = Topology::new(TopologyMode::Mesh);
        add(&mut topology, "a1");
        add(&mut topology, "a2");
        add(&mut topology, "a3");

        let exclude: HashSet<String> = ["a2".to_string()].into();
        let targets = topology.broadcast_targets("a1", Some(&exclude)).unwrap();
        assert_eq!(targets, vec!["a3".to_string()]);
    }

    #[test]
    fn test_visualize_mentions_mode() {
        let mut topology = Topology::new(TopologyMode::Ring);
        add(&mut topology, "r1");
        add(&mut topology, "r2");
        let rendered = topology.visualize();
        assert!(rendered.contains("Ring"));
        assert!(rendered.contains("r1 -> r2 -> r1"));
    }
}
