use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error types for the swarm coordination kernel.
///
/// Every public operation either succeeds with a well-typed value or
/// returns one of these variants. Timeouts on consensus and state sync
/// are decision values, not errors.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum SwarmError {
    /// Agent and topology errors
    #[error("Agent not found: {id}")]
    AgentNotFound { id: String },

    #[error("Agent already registered: {id}")]
    DuplicateAgent { id: String },

    #[error("Agent {id} has children; remove or reparent them first")]
    AgentHasChildren { id: String },

    #[error("No route from {from} to {to} in {topology} topology")]
    NoRoute {
        from: String,
        to: String,
        topology: String,
    },

    #[error("Message delivery failed from {from} to {to}: {reason}")]
    DeliveryFailed {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Topology migration failed: {reason}")]
    MigrationFailed { reason: String },

    /// Task queue errors
    #[error("Task already queued: {id}")]
    DuplicateTask { id: String },

    #[error("Task not found: {id}")]
    TaskNotFound { id: String },

    /// Resource errors
    #[error("Capacity exceeded for {resource}: requested {requested}, available {available}")]
    CapacityExceeded {
        resource: String,
        requested: u64,
        available: u64,
    },

    #[error("Swarm not allocated: {swarm_id}")]
    SwarmNotAllocated { swarm_id: String },

    #[error("Swarm already allocated: {swarm_id}")]
    DuplicateSwarm { swarm_id: String },

    #[error("No quota defined for agent type: {agent_type}")]
    QuotaNotDefined { agent_type: String },

    /// Consensus errors
    #[error("Unknown consensus algorithm: {name}")]
    UnknownAlgorithm { name: String },

    #[error("Unknown proposal: {proposal_id}")]
    UnknownProposal { proposal_id: String },

    /// Validation
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// Component lifecycle
    #[error("{component} not initialized: {reason}")]
    NotInitialized { component: String, reason: String },

    #[error("Circuit breaker open for {resource}")]
    CircuitOpen { resource: String },

    /// Configuration and IO
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {reason}")]
    Io { reason: String },

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },

    #[error("Storage error: {reason}")]
    Storage { reason: String },

    /// Corrupted internal state. Aborts the owning operation, never the
    /// process; logged at CRITICAL by the owning subsystem.
    #[error("Internal invariant violated: {reason}")]
    InvariantViolation { reason: String },
}

/// Result alias used across the crate.
pub type SwarmResult<T> = Result<T, SwarmError>;

/// Coarse classification used by recovery policy: only transient errors
/// are retried, fatal errors terminate the owning subsystem operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    InvalidArgument,
    Duplicate,
    CapacityExceeded,
    NotInitialized,
    Transient,
    Fatal,
}

impl SwarmError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::DuplicateAgent { .. } | Self::DuplicateTask { .. } | Self::DuplicateSwarm { .. } => {
                ErrorClass::Duplicate
            }
            Self::CapacityExceeded { .. }
            | Self::QuotaNotDefined { .. }
            | Self::SwarmNotAllocated { .. } => ErrorClass::CapacityExceeded,
            Self::NotInitialized { .. } => ErrorClass::NotInitialized,
            Self::DeliveryFailed { .. } | Self::Io { .. } | Self::Storage { .. } => {
                ErrorClass::Transient
            }
            Self::InvariantViolation { .. } => ErrorClass::Fatal,
            _ => ErrorClass::InvalidArgument,
        }
    }

    /// Transient errors may be retried once where safe.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }
}

impl From<std::io::Error> for SwarmError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for SwarmError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            reason: err.to_string(),
        }
    }
}
