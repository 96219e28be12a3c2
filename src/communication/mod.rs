//! # Communication
//!
//! Message envelope types shared by the coordinator, consensus manager,
//! and state synchronizer. Routing itself lives in [`crate::core`].

pub mod envelope;
pub mod router;

pub use envelope::{MessageEnvelope, MessageType};
pub use router::MessageRouter;
