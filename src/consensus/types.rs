//! Shared consensus data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Vote choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteChoice {
    For,
    Against,
    Abstain,
}

/// An individual vote. Immutable once recorded; a proposal accepts at
/// most one vote per agent per round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub agent_id: String,
    pub choice: VoteChoice,
    pub weight: f64,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Vote {
    #[must_use]
    pub fn new(agent_id: &str, choice: VoteChoice) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            choice,
            weight: 1.0,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight.max(0.0);
        self
    }
}

/// Consensus decision outcomes. Timeout is a decision value, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusDecision {
    Approved,
    Rejected,
    Timeout,
}

impl ConsensusDecision {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Timeout => "timeout",
        }
    }
}

/// A proposal under vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalContext {
    pub proposal_id: String,
    pub payload: serde_json::Value,
    pub participants: Vec<String>,
    pub algorithm: String,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

/// Votes collected per round. Single-round algorithms only ever touch
/// the last round; the Byzantine protocol requires one ledger round per
/// voting round, collected for real rather than simulated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoteLedger {
    rounds: Vec<HashMap<String, Vote>>,
}

impl VoteLedger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rounds: vec![HashMap::new()],
        }
    }

    #[must_use]
    pub fn round_count(&self) -> usize {
        self.rounds.len()
    }

    /// Record a vote into the current round; duplicate votes from the
    /// same agent within a round are rejected.
    pub fn record(&mut self, vote: Vote) -> bool {
        let Some(round) = self.rounds.last_mut() else {
            return false;
        };
        if round.contains_key(&vote.agent_id) {
            return false;
        }
        round.insert(vote.agent_id.clone(), vote);
        true
    }

    /// Open the next voting round.
    pub fn advance_round(&mut self) {
        self.rounds.push(HashMap::new());
    }

    /// Votes of the final (current) round.
    #[must_use]
    pub fn final_votes(&self) -> Vec<&Vote> {
        self.rounds.last().map(|round| round.values().collect()).unwrap_or_default()
    }

    #[must_use]
    pub fn final_vote_count(&self) -> usize {
        self.rounds.last().map_or(0, HashMap::len)
    }

    /// Per-round choice of one agent, in round order, for rounds where
    /// the agent voted.
    #[must_use]
    pub fn choices_of(&self, agent_id: &str) -> Vec<VoteChoice> {
        self.rounds
            .iter()
            .filter_map(|round| round.get(agent_id).map(|v| v.choice))
            .collect()
    }

    /// Every agent that voted in any round.
    #[must_use]
    pub fn voters(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut voters = Vec::new();
        for round in &self.rounds {
            for agent_id in round.keys() {
                if seen.insert(agent_id.clone()) {
                    voters.push(agent_id.clone());
                }
            }
        }
        voters
    }
}

/// Result of a consensus request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusOutcome {
    pub decision: ConsensusDecision,
    pub votes_for: usize,
    pub votes_against: usize,
    pub votes_abstain: usize,
    pub threshold: f64,
    pub participants: Vec<String>,
    pub algorithm_used: String,
    pub duration_ms: u64,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ConsensusOutcome {
    /// Shorthand for failure paths that never collected votes.
    #[must_use]
    pub fn rejected_with_error(algorithm: &str, error: &str) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert(
            "error".to_string(),
            serde_json::Value::String(error.to_string()),
        );
        Self {
            decision: ConsensusDecision::Rejected,
            votes_for: 0,
            votes_against: 0,
            votes_abstain: 0,
            threshold: 0.5,
            participants: Vec::new(),
            algorithm_used: algorithm.to_string(),
            duration_ms: 0,
            metadata,
        }
    }
}
