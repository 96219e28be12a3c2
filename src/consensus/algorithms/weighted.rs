//! Weighted voting, for hierarchical swarms or expertise-based decisions.

use crate::consensus::algorithms::ConsensusAlgorithm;
use crate::consensus::types::{
    ConsensusDecision, ConsensusOutcome, ProposalContext, VoteChoice, VoteLedger,
};
use crate::utils::error::{SwarmError, SwarmResult};
use std::collections::HashMap;

/// Approves when the FOR share of total participant weight exceeds the
/// threshold. Configured weights take precedence over vote-supplied
/// weights; unknown agents count as 1.0.
pub struct WeightedConsensus {
    threshold: f64,
    agent_weights: HashMap<String, f64>,
}

impl WeightedConsensus {
    pub fn new(threshold: f64, agent_weights: HashMap<String, f64>) -> SwarmResult<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(SwarmError::InvalidArgument {
                reason: format!("threshold must be 0.0-1.0, got {threshold}"),
            });
        }
        if let Some((agent, weight)) = agent_weights.iter().find(|(_, w)| **w < 0.0) {
            return Err(SwarmError::InvalidArgument {
                reason: format!("weight for {agent} must be >= 0, got {weight}"),
            });
        }
        Ok(Self {
            threshold,
            agent_weights,
        })
    }

    fn weight_of(&self, agent_id: &str, vote_weight: Option<f64>) -> f64 {
        self.agent_weights
            .get(agent_id)
            .copied()
            .or(vote_weight)
            .unwrap_or(1.0)
    }
}

impl Default for WeightedConsensus {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            agent_weights: HashMap::new(),
        }
    }
}

impl ConsensusAlgorithm for WeightedConsensus {
    fn name(&self) -> &'static str {
        "weighted"
    }

    fn decide(
        &self,
        proposal: &ProposalContext,
        ledger: &VoteLedger,
        timeout_reached: bool,
    ) -> SwarmResult<ConsensusOutcome> {
        let votes = ledger.final_votes();
        let vote_weights: HashMap<&str, f64> =
            votes.iter().map(|v| (v.agent_id.as_str(), v.weight)).collect();

        let total_weight: f64 = proposal
            .participants
            .iter()
            .map(|p| self.weight_of(p, vote_weights.get(p.as_str()).copied()))
            .sum();

        let mut weighted_for = 0.0;
        let mut weighted_against = 0.0;
        let mut votes_for = 0;
        let mut votes_against = 0;
        let mut votes_abstain = 0;

        for vote in &votes {
            let weight = self.weight_of(&vote.agent_id, Some(vote.weight));
            match vote.choice {
                VoteChoice::For => {
                    weighted_for += weight;
                    votes_for += 1;
                }
                VoteChoice::Against => {
                    weighted_against += weight;
                    votes_against += 1;
                }
                VoteChoice::Abstain => votes_abstain += 1,
            }
        }

        let weighted_approval = if total_weight > 0.0 {
            weighted_for / total_weight
        } else {
            0.0
        };

        let decision = if timeout_reached
            && (votes.len() as f64) < proposal.participants.len() as f64 * 0.5
        {
            ConsensusDecision::Timeout
        } else if weighted_approval > self.threshold {
            ConsensusDecision::Approved
        } else {
            ConsensusDecision::Rejected
        };

        let mut metadata = HashMap::new();
        metadata.insert("total_weight".to_string(), total_weight.into());
        metadata.insert("weighted_for".to_string(), weighted_for.into());
        metadata.insert("weighted_against".to_string(), weighted_against.into());
        metadata.insert("weighted_approval".to_string(), weighted_approval.into());

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
            payload: json!({"action": "rollback"}),
            participants: participants.iter().map(ToString::to_string).collect(),
            algorithm: "weighted".to_string(),
            created_at: Utc::now(),
            deadline: Utc::now(),
        }
    }

    #[test]
    fn test_weighted_rejection_below_threshold() {
        // a1 weighs 2 of a total 4; FOR share 0.5 < 0.6.
        let weights = HashMap::from([
            ("a1".to_string(), 2.0),
            ("a2".to_string(), 1.0),
            ("a3".to_string(), 1.0),
        ]);
        let algorithm = WeightedConsensus::new(0.6, weights).unwrap();
        let proposal = proposal(&["a1", "a2", "a3"]);
        let mut ledger = VoteLedger::new();
        ledger.record(Vote::new("a1", VoteChoice::For));
        ledger.record(Vote::new("a2", VoteChoice::Against));
        ledger.record(Vote::new("a3", VoteChoice::Against));

        let outcome = algorithm.decide(&proposal, &ledger, false).unwrap();
        assert_eq!(outcome.decision, ConsensusDecision::Rejected);
        assert_eq!(outcome.votes_for, 1);
        assert_eq!(outcome.votes_against, 2);
    }

    #[test]
    fn test_heavyweight_approval() {
        let weights = HashMap::from([("lead".to_string(), 5.0)]);
        let algorithm = WeightedConsensus::new(0.6, weights).unwrap();
        let proposal = proposal(&["lead", "a2", "a3"]);
        let mut ledger = VoteLedger::new();
        ledger.record(Vote::new("lead", VoteChoice::For));
        ledger.record(Vote::new("a2", VoteChoice::Against));
        ledger.record(Vote::new("a3", VoteChoice::Against));

        // 5 of 7 total weight = 0.714 > 0.6.
        let outcome = algorithm.decide(&proposal, &ledger, false).unwrap();
        assert_eq!(outcome.decision, ConsensusDecision::Approved);
    }

    #[test]
    fn test_vote_supplied_weights_used_when_unconfigured() {
        let algorithm = WeightedConsensus::new(0.6, HashMap::new()).unwrap();
        let proposal = proposal(&["a1", "a2"]);
        let mut ledger = VoteLedger::new();
        ledger.record(Vote::new("a1", VoteChoice::For).with_weight(3.0));
        ledger.record(Vote::new("a2", VoteChoice::Against));

        // 3 of 4 = 0.75 > 0.6.
        let outcome = algorithm.decide(&proposal, &ledger, false).unwrap();
        assert_eq!(outcome.decision, ConsensusDecision::Approved);
    }

    #[test]
    fn test_low_participation_timeout() {
        let algorithm = WeightedConsensus::default();
        let proposal = proposal(&["a1", "a2", "a3", "a4"]);
        let mut ledger = VoteLedger::new();
        ledger.record(Vote::new("a1", VoteChoice::For));

        let outcome = algorithm.decide(&proposal, &ledger, true).unwrap();
        assert_eq!(outcome.decision, ConsensusDecision::Timeout);
    }

    #[test]
    fn test_negative_weight_rejected() {
        let weights = HashMap::from([("a1".to_string(), -1.0)]);
        assert!(WeightedConsensus::new(0.6, weights).is_err());
    }
}
