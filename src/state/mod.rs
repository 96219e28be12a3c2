//! # Shared State
//!
//! Conflict resolution strategies (LWW, vector clocks, CRDTs) and the
//! broadcast-based state synchronizer built on top of them.

pub mod conflict_resolver;
pub mod crdt;
pub mod synchronizer;

pub use conflict_resolver::{ConflictResolver, ResolutionStrategy, StateVersion};
pub use crdt::CrdtValue;
pub use synchronizer::StateSynchronizer;
