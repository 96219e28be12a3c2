//! # Swarmflow
//!
//! A swarm coordination kernel: coordinates a dynamic population of
//! worker agents under global token budgets, per-type concurrency
//! quotas, and swarm-wide consistency guarantees.
//!
//! ## Architecture Overview
//!
//! - [`core`]: coordinator, topology graph, adaptive mode switching
//! - [`communication`]: message envelope and routing capability
//! - [`resource`]: token budgets, quotas, priority task queue
//! - [`consensus`]: quorum / weighted / Byzantine voting
//! - [`state`]: conflict resolution (LWW, vector clocks, CRDTs) and sync
//! - [`monitoring`]: heartbeat liveness and metrics collection
//! - [`healing`]: failure detection, recovery strategies, prediction
//! - [`patterns`]: statistical pattern learning and matching
//! - [`memory`]: namespaced key/value persistence contract
//! - [`utils`]: configuration and error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use swarmflow::core::{AgentInfo, Placement, SwarmCoordinator, TopologyMode};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let coordinator = SwarmCoordinator::new(TopologyMode::Mesh);
//!     let _inbox = coordinator
//!         .register_agent(AgentInfo::new("worker-1", "worker"), Placement::default())
//!         .await?;
//!     println!("{}", coordinator.visualize().await);
//!     Ok(())
//! }
//! ```

/// Message envelope types and the routing capability
pub mod communication;
/// Consensus algorithms and the consensus manager
pub mod consensus;
/// Coordinator, topology, and adaptive switching
pub mod core;
/// Self-healing, circuit breaking, and prediction
pub mod healing;
/// Memory provider contract and file-backed implementation
pub mod memory;
/// Heartbeat monitoring and metrics collection
pub mod monitoring;
/// Statistical pattern learning and matching
pub mod patterns;
/// Token budgets, quotas, and the priority task queue
pub mod resource;
/// Conflict resolution and state synchronization
pub mod state;
/// Configuration and error handling
pub mod utils;

pub use communication::{MessageEnvelope, MessageRouter, MessageType};
pub use consensus::{ConsensusDecision, ConsensusManager, ConsensusOutcome, VoteChoice};
pub use core::{AgentInfo, Placement, SwarmCoordinator, TopologyMode};
pub use healing::{Failure, HealingResult, SelfHealer};
pub use memory::{FileMemoryProvider, MemoryProvider};
pub use monitoring::{HealthState, HeartbeatMonitor, MetricsCollector, SwarmEvent};
pub use patterns::{Pattern, PatternLearner, PatternMatcher};
pub use resource::{ResourceController, TaskPriority};
pub use state::{ConflictResolver, ResolutionStrategy, StateSynchronizer, StateVersion};
pub use utils::{SwarmConfig, SwarmError, SwarmResult};
