//! Simple-majority consensus. The default algorithm.

use crate::consensus::algorithms::ConsensusAlgorithm;
use crate::consensus::types::{
    ConsensusDecision, ConsensusOutcome, ProposalContext, VoteChoice, VoteLedger,
};
use crate::utils::error::{SwarmError, SwarmResult};
use std::collections::HashMap;

/// Approves when FOR votes exceed `threshold` of all participants.
/// Deadline expiry with participation below 50 % yields TIMEOUT.
pub struct QuorumConsensus {
    threshold: f64,
    require_majority: bool,
}

impl QuorumConsensus {
    pub fn new(threshold: f64) -> SwarmResult<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(SwarmError::InvalidArgument {
                reason: format!("threshold must be 0.0-1.0, got {threshold}"),
            });
        }
        Ok(Self {
            threshold,
            require_majority: true,
        })
    }

    #[must_use]
    pub fn with_require_majority(mut self, require_majority: bool) -> Self {
        self.require_majority = require_majority;
        self
    }
}

impl Default for QuorumConsensus {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            require_majority: true,
        }
    }
}

impl ConsensusAlgorithm for QuorumConsensus {
    fn name(&self) -> &'static str {
        "quorum"
    }

    fn decide(
        &self,
        proposal: &ProposalContext,
        ledger: &VoteLedger,
        timeout_reached: bool,
    ) -> SwarmResult<ConsensusOutcome> {
        let total_participants = proposal.participants.len();
        let votes = ledger.final_votes();

        let votes_for = votes.iter().filter(|v| v.choice == VoteChoice::For).count();
        let votes_against = votes
            .iter()
            .filter(|v| v.choice == VoteChoice::Against)
            .count();
        let votes_abstain = votes
            .iter()
            .filter(|v| v.choice == VoteChoice::Abstain)
            .count();

        let participation_rate = if total_participants == 0 {
            0.0
        } else {
            votes.len() as f64 / total_participants as f64
        };
        let approval_rate = if total_participants == 0 {
            0.0
        } else {
            votes_for as f64 / total_participants as f64
        };

        let decision = if timeout_reached && participation_rate < 0.5 && self.require_majority {
            ConsensusDecision::Timeout
        } else if approval_rate > self.threshold {
            ConsensusDecision::Approved
        } else if timeout_reached {
            ConsensusDecision::Timeout
        } else {
            ConsensusDecision::Rejected
        };

        let mut metadata = HashMap::new();
        metadata.insert("total_participants".to_string(), total_participants.into());
        metadata.insert("participation_rate".to_string(), participation_rate.into());
        metadata.insert("approval_rate".to_string(), approval_rate.into());

        Ok(ConsensusOutcome {
            decision,
            votes_for,
            votes_against,
            votes_abstain,
            threshold: self.threshold,
            participants: votes.iter().map(|v| v.agent_id.clone()).collect(),
            algorithm_used: self.name().to_string(),
            duration_ms: 0,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::types::Vote;
    use chrono::Utc;
    use serde_json::json;

    fn proposal(participants: &[&str]) -> ProposalContext {
        ProposalContext {
            proposal_id: "p1".to_string(),
            payload: json!({"action": "deploy"}),
            participants: participants.iter().map(ToString::to_string).collect(),
            algorithm: "quorum".to_string(),
            created_at: Utc::now(),
            deadline: Utc::now(),
        }
    }

    #[test]
    fn test_majority_approves() {
        let algorithm = QuorumConsensus::default();
        let proposal = proposal(&["a1", "a2", "a3"]);
        let mut ledger = VoteLedger::new();
        ledger.record(Vote::new("a1", VoteChoice::For));
        ledger.record(Vote::new("a2", VoteChoice::For));
        ledger.record(Vote::new("a3", VoteChoice::Against));

        let outcome = algorithm.decide(&proposal, &ledger, false).unwrap();
        assert_eq!(outcome.decision, ConsensusDecision::Approved);
        assert_eq!(outcome.votes_for, 2);
        assert_eq!(outcome.votes_against, 1);
    }

    #[test]
    fn test_exact_threshold_rejects() {
        // 1 FOR of 2 participants = 0.5, not strictly above threshold.
        let algorithm = QuorumConsensus::default();
        let proposal = proposal(&["a1", "a2"]);
        let mut ledger = VoteLedger::new();
        ledger.record(Vote::new("a1", VoteChoice::For));
        ledger.record(Vote::new("a2", VoteChoice::Against));

        let outcome = algorithm.decide(&proposal, &ledger, false).unwrap();
        assert_eq!(outcome.decision, ConsensusDecision::Rejected);
    }

    #[test]
    fn test_low_participation_times_out() {
        let algorithm = QuorumConsensus::default();
        let proposal = proposal(&["a1", "a2", "a3", "a4", "a5"]);
        let mut ledger = VoteLedger::new();
        ledger.record(Vote::new("a1", VoteChoice::For));

        let outcome = algorithm.decide(&proposal, &ledger, true).unwrap();
        assert_eq!(outcome.decision, ConsensusDecision::Timeout);
    }

    #[test]
    fn test_timeout_with_enough_for_votes_still_approves() {
        let algorithm = QuorumConsensus::default();
        let proposal = proposal(&["a1", "a2", "a3"]);
        let mut ledger = VoteLedger::new();
        ledger.record(Vote::new("a1", VoteChoice::For));
        ledger.record(Vote::new("a2", VoteChoice::For));

        let outcome = algorithm.decide(&proposal, &ledger, true).unwrap();
        assert_eq!(outcome.decision, ConsensusDecision::Approved);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        assert!(QuorumConsensus::new(1.5).is_err());
    }
}
