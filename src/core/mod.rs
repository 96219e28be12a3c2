//! # Core Coordination
//!
//! The swarm coordinator, the topology graph it routes over, and the
//! adaptive mode-switching layer.

pub mod adaptive;
pub mod coordinator;
pub mod topology;

pub use adaptive::{AdaptiveTopologyManager, PerformanceSample};
pub use coordinator::{AgentInbox, AgentStatus, SwarmCoordinator};
pub use topology::{AgentInfo, Placement, Topology, TopologyInfo, TopologyMode};
