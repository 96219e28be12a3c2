//! Byzantine fault tolerant consensus.
//!
//! Tolerates up to `f` agents that deviate arbitrarily, including lying
//! about their votes. Requires `n >= 3f+1` participants and at least
//! three real voting rounds; an agent whose choice differs across
//! rounds is flagged malicious and excluded from the tally. Approval
//! needs `2f+1` honest FOR votes.

use crate::consensus::algorithms::ConsensusAlgorithm;
use crate::consensus::types::{
    ConsensusDecision, ConsensusOutcome, ProposalContext, VoteChoice, VoteLedger,
};
use crate::utils::error::{SwarmError, SwarmResult};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

pub struct ByzantineConsensus {
    fault_tolerance: usize,
    num_rounds: usize,
    min_participants: usize,
    agreement_threshold: usize,
    detected_malicious: RwLock<HashSet<String>>,
}

impl ByzantineConsensus {
    pub fn new(fault_tolerance: usize, num_rounds: usize) -> SwarmResult<Self> {
        if num_rounds < 3 {
            return Err(SwarmError::InvalidArgument {
                reason: format!("byzantine consensus requires >= 3 rounds, got {num_rounds}"),
            });
        }
        Ok(Self {
            fault_tolerance,
            num_rounds,
            min_participants: 3 * fault_tolerance + 1,
            agreement_threshold: 2 * fault_tolerance + 1,
            detected_malicious: RwLock::new(HashSet::new()),
        })
    }

    #[must_use]
    pub fn fault_tolerance(&self) -> usize {
        self.fault_tolerance
    }

    #[must_use]
    pub fn min_participants(&self) -> usize {
        self.min_participants
    }

    #[must_use]
    pub fn agreement_threshold(&self) -> usize {
        self.agreement_threshold
    }

    /// All malicious agents detected across proposals.
    pub fn detected_malicious(&self) -> HashSet<String> {
        self.detected_malicious
            .read()
            .map(|set| set.clone())
            .unwrap_or_default()
    }

    pub fn clear_malicious_history(&self) {
        if let Ok(mut set) = self.detected_malicious.write() {
            set.clear();
        }
    }

    /// Agents whose recorded choice differs between rounds.
    fn find_malicious(ledger: &VoteLedger) -> HashSet<String> {
        let mut malicious = HashSet::new();
        for agent_id in ledger.voters() {
            let choices = ledger.choices_of(&agent_id);
            if choices.len() > 1 {
                let first = choices[0];
                if choices.iter().any(|c| *c != first) {
                    malicious.insert(agent_id);
                }
            }
        }
        malicious
    }
}

impl Default for ByzantineConsensus {
    fn default() -> Self {
        Self {
            fault_tolerance: 1,
            num_rounds: 3,
            min_participants: 4,
            agreement_threshold: 3,
            detected_malicious: RwLock::new(HashSet::new()),
        }
    }
}

impl ConsensusAlgorithm for ByzantineConsensus {
    fn name(&self) -> &'static str {
        "byzantine"
    }

    fn rounds_required(&self) -> usize {
        self.num_rounds
    }

    fn validate_participants(&self, participants: &[String]) -> SwarmResult<()> {
        if participants.len() < self.min_participants {
            return Err(SwarmError::InvalidArgument {
                reason: format!(
                    "insufficient participants for byzantine consensus: need {} (3f+1), got {}",
                    self.min_participants,
                    participants.len()
                ),
            });
        }
        Ok(())
    }

    fn decide(
        &self,
        proposal: &ProposalContext,
        ledger: &VoteLedger,
        timeout_reached: bool,
    ) -> SwarmResult<ConsensusOutcome> {
        // Multi-round data must be real; deciding from a single ballot
        // would let a vote-changer go undetected.
        if ledger.round_count() < self.num_rounds {
            return Err(SwarmError::InvalidArgument {
                reason: format!(
                    "byzantine consensus requires {} recorded rounds, got {}",
                    self.num_rounds,
                    ledger.round_count()
                ),
            });
        }

        let n = proposal.participants.len();
        let malicious = Self::find_malicious(ledger);
        if !malicious.is_empty() {
            if let Ok(mut set) = self.detected_malicious.write() {
                set.extend(malicious.iter().cloned());
            }
            for agent_id in &malicious {
                tracing::warn!(
                    "Detected malicious agent {agent_id} in proposal {}: vote changed across rounds",
                    proposal.proposal_id
                );
            }
        }

        let final_votes = ledger.final_votes();
        let honest: Vec<_> = final_votes
            .iter()
            .filter(|v| !malicious.contains(&v.agent_id))
            .collect();

        let votes_for = honest.iter().filter(|v| v.choice == VoteChoice::For).count();
        let votes_against = honest
            .iter()
            .filter(|v| v.choice == VoteChoice::Against)
            .count();
        let votes_abstain = honest
            .iter()
            .filter(|v| v.choice == VoteChoice::Abstain)
            .count();

        let decision = if timeout_reached {
            ConsensusDecision::Timeout
        } else if votes_for >= self.agreement_threshold {
            ConsensusDecision::Approved
        } else {
            ConsensusDecision::Rejected
        };

        let mut metadata = HashMap::new();
        metadata.insert("fault_tolerance".to_string(), self.fault_tolerance.into());
        metadata.insert("min_participants".to_string(), self.min_participants.into());
        metadata.insert(
            "agreement_threshold".to_string(),
            self.agreement_threshold.into(),
        );
        metadata.insert("total_participants".to_string(), n.into());
        metadata.insert("honest_participants".to_string(), honest.len().into());
        metadata.insert("malicious_detected".to_string(), malicious.len().into());
        metadata.insert(
            "malicious_agents".to_string(),
            serde_json::Value::Array(
                malicious
                    .iter()
                    .map(|id| serde_json::Value::String(id.clone()))
                    .collect(),
            ),
        );
        metadata.insert("num_rounds".to_string(), self.num_rounds.into());

        Ok(ConsensusOutcome {
            decision,
            votes_for,
            votes_against,
            votes_abstain,
            threshold: if n > 0 {
                self.agreement_threshold as f64 / n as f64
            } else {
                0.0
            },
            participants: final_votes.iter().map(|v| v.agent_id.clone()).collect(),
            algorithm_used: self.name().to_string(),
            duration_ms: 0,
            metadata,
        })
    }
}
