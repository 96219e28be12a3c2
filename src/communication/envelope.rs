//! # Message Envelope
//!
//! Wire-shaped (but process-internal) message format routed between
//! agents by the coordinator. Recognized message types cover heartbeat,
//! consensus, and state synchronization traffic; callers may pass any
//! other type string through verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Message type identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Heartbeat,
    ConsensusRequest,
    ConsensusVote,
    StateQuery,
    StateUpdate,
    TaskAssignment,
    /// Caller-defined type, passed through verbatim.
    #[serde(untagged)]
    Custom(String),
}

impl MessageType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::ConsensusRequest => "consensus_request",
            Self::ConsensusVote => "consensus_vote",
            Self::StateQuery => "state_query",
            Self::StateUpdate => "state_update",
            Self::TaskAssignment => "task_assignment",
            Self::Custom(name) => name,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope for every routed message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub message_type: MessageType,
    pub from_agent: String,
    /// Absent for broadcasts.
    pub to_agent: Option<String>,
    pub payload: serde_json::Value,
    /// Correlates request/response pairs (consensus votes, state replies).
    pub correlation_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl MessageEnvelope {
    #[must_use]
    pub fn new(message_type: MessageType, from_agent: &str, payload: serde_json::Value) -> Self {
        Self {
            message_type,
            from_agent: from_agent.to_string(),
            to_agent: None,
            payload,
            correlation_id: None,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    #[must_use]
    pub fn to(mut self, to_agent: &str) -> Self {
        self.to_agent = Some(to_agent.to_string());
        self
    }

    #[must_use]
    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_known_types_round_trip() {
        let envelope = MessageEnvelope::new(
            MessageType::ConsensusRequest,
            "consensus_manager",
            json!({"proposal_id": "p1"}),
        )
        .to("agent-1");

        let encoded = serde_json::to_string(&envelope).unwrap();
        let decoded: MessageEnvelope = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.message_type, MessageType::ConsensusRequest);
        assert_eq!(decoded.to_agent.as_deref(), Some("agent-1"));
    }

    #[test]
    fn test_custom_type_passes_through() {
        let envelope = MessageEnvelope::new(
            MessageType::Custom("rollout_signal".to_string()),
            "ops",
            json!({}),
        );
        assert_eq!(envelope.message_type.as_str(), "rollout_signal");

        let encoded = serde_json::to_string(&envelope).unwrap();
        let decoded: MessageEnvelope = serde_json::from_str(&encoded).unwrap();
        assert_eq!(
            decoded.message_type,
            MessageType::Custom("rollout_signal".to_string())
        );
    }
}
