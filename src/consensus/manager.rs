//! # Consensus Manager
//!
//! Drives a voting protocol against the agents reachable through the
//! router and returns a decision within a deadline. Algorithms are
//! pluggable through an explicit registry; duplicate votes are dropped
//! with a warning and late votes are ignored.

use crate::communication::envelope::{MessageEnvelope, MessageType};
use crate::communication::router::MessageRouter;
use crate::consensus::algorithms::{
    ByzantineConsensus, ConsensusAlgorithm, QuorumConsensus, WeightedConsensus,
};
use crate::consensus::types::{
    ConsensusDecision, ConsensusOutcome, ProposalContext, Vote, VoteChoice, VoteLedger,
};
use crate::utils::config::ConsensusConfig;
use crate::utils::error::{SwarmError, SwarmResult};
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, RwLock};
use uuid::Uuid;

const HISTORY_CAPACITY: usize = 100;

/// Sender id used on consensus broadcasts.
const MANAGER_SENDER: &str = "consensus_manager";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlgorithmStats {
    pub proposals: u64,
    pub approved: u64,
    pub rejected: u64,
    pub timeouts: u64,
}

impl AlgorithmStats {
    #[must_use]
    pub fn approval_rate(&self) -> f64 {
        if self.proposals == 0 {
            0.0
        } else {
            self.approved as f64 / self.proposals as f64
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsensusStats {
    pub total_proposals: u64,
    pub approved: u64,
    pub rejected: u64,
    pub timeouts: u64,
    pub total_duration_ms: u64,
    pub by_algorithm: HashMap<String, AlgorithmStats>,
}

impl ConsensusStats {
    #[must_use]
    pub fn avg_duration_ms(&self) -> f64 {
        if self.total_proposals == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.total_proposals as f64
        }
    }

    #[must_use]
    pub fn approval_rate(&self) -> f64 {
        if self.total_proposals == 0 {
            0.0
        } else {
            self.approved as f64 / self.total_proposals as f64
        }
    }
}

struct ActiveProposal {
    context: ProposalContext,
    ledger: VoteLedger,
    rounds_required: usize,
    notify: Arc<Notify>,
}

/// Multi-algorithm consensus manager.
pub struct ConsensusManager {
    router: Arc<dyn MessageRouter>,
    default_algorithm: String,
    default_timeout_ms: u64,
    algorithms: RwLock<HashMap<String, Arc<dyn ConsensusAlgorithm>>>,
    active: RwLock<HashMap<String, ActiveProposal>>,
    stats: RwLock<ConsensusStats>,
    history: RwLock<VecDeque<ConsensusOutcome>>,
}

impl ConsensusManager {
    /// Build a manager with the built-in algorithms registered.
    pub fn new(router: Arc<dyn MessageRouter>, config: &ConsensusConfig) -> SwarmResult<Self> {
        let mut algorithms: HashMap<String, Arc<dyn ConsensusAlgorithm>> = HashMap::new();
        algorithms.insert(
            "quorum".to_string(),
            Arc::new(QuorumConsensus::new(config.threshold)?),
        );
        algorithms.insert("weighted".to_string(), Arc::new(WeightedConsensus::default()));
        algorithms.insert("byzantine".to_string(), Arc::new(ByzantineConsensus::default()));

        if !algorithms.contains_key(&config.default_algorithm) {
            return Err(SwarmError::UnknownAlgorithm {
                name: config.default_algorithm.clone(),
            });
        }

        Ok(Self {
            router,
            default_algorithm: config.default_algorithm.clone(),
            default_timeout_ms: config.default_timeout_ms,
            algorithms: RwLock::new(algorithms),
            active: RwLock::new(HashMap::new()),
            stats: RwLock::new(ConsensusStats::default()),
            history: RwLock::new(VecDeque::new()),
        })
    }

    /// Register an algorithm under a name; false when the name is taken.
    pub async fn register_algorithm(
        &self,
        name: &str,
        algorithm: Arc<dyn ConsensusAlgorithm>,
    ) -> SwarmResult<bool> {
        if name.trim().is_empty() {
            return Err(SwarmError::InvalidArgument {
                reason: "algorithm name cannot be empty".to_string(),
            });
        }
        let mut algorithms = self.algorithms.write().await;
        if algorithms.contains_key(name) {
            tracing::warn!("Algorithm '{name}' already registered, skipping");
            return Ok(false);
        }
        algorithms.insert(name.to_string(), algorithm);
        tracing::info!("Registered consensus algorithm: {name}");
        Ok(true)
    }

    /// Request a consensus decision from the swarm.
    ///
    /// Broadcasts a `consensus_request`, blocks until the vote set is
    /// decidable or the deadline passes, then applies the algorithm.
    pub async fn request_consensus(
        &self,
        payload: serde_json::Value,
        algorithm: Option<&str>,
        timeout_ms: Option<u64>,
    ) -> SwarmResult<ConsensusOutcome> {
        let timeout_ms = timeout_ms.unwrap_or(self.default_timeout_ms);
        if timeout_ms < 100 {
            return Err(SwarmError::InvalidArgument {
                reason: format!("timeout must be >= 100ms, got {timeout_ms}"),
            });
        }

        let algorithm_name = algorithm.unwrap_or(&self.default_algorithm).to_string();
        let algorithm = {
            let algorithms = self.algorithms.read().await;
            algorithms
                .get(&algorithm_name)
                .cloned()
                .ok_or_else(|| SwarmError::UnknownAlgorithm {
                    name: algorithm_name.clone(),
                })?
        };

        let participants = self.router.participants().await;
        if participants.is_empty() {
            tracing::warn!("No agents in topology, cannot request consensus");
            let outcome = ConsensusOutcome::rejected_with_error(&algorithm_name, "no_agents");
            self.finalize(outcome.clone()).await;
            return Ok(outcome);
        }

        if let Err(err) = algorithm.validate_participants(&participants) {
            let outcome =
                ConsensusOutcome::rejected_with_error(&algorithm_name, &err.to_string());
            self.finalize(outcome.clone()).await;
            return Ok(outcome);
        }

        let proposal_id = format!("{algorithm_name}_{}", Uuid::new_v4().simple());
        let now = Utc::now();
        let context = ProposalContext {
            proposal_id: proposal_id.clone(),
            payload: payload.clone(),
            participants: participants.clone(),
            algorithm: algorithm_name.clone(),
            created_at: now,
            deadline: now + ChronoDuration::milliseconds(timeout_ms as i64),
        };

        let notify = Arc::new(Notify::new());
        {
            let mut active = self.active.write().await;
            active.insert(
                proposal_id.clone(),
                ActiveProposal {
                    context: context.clone(),
                    ledger: VoteLedger::new(),
                    rounds_required: algorithm.rounds_required(),
                    notify: Arc::clone(&notify),
                },
            );
        }

        let request = MessageEnvelope::new(
            MessageType::ConsensusRequest,
            MANAGER_SENDER,
            json!({
                "proposal_id": proposal_id,
                "proposal": payload,
                "algorithm": algorithm_name,
                "timeout_ms": timeout_ms,
                "rounds": algorithm.rounds_required(),
            }),
        );

        if let Err(err) = self.router.broadcast(MANAGER_SENDER, request, None).await {
            tracing::error!("Failed to broadcast consensus request: {err}");
            self.active.write().await.remove(&proposal_id);
            let outcome =
                ConsensusOutcome::rejected_with_error(&algorithm_name, &err.to_string());
            self.finalize(outcome.clone()).await;
            return Ok(outcome);
        }

        let started = Instant::now();
        let deadline = started + Duration::from_millis(timeout_ms);
        let timeout_reached = loop {
            if self.is_decidable(&proposal_id).await {
                break false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break true;
            }
            if tokio::time::timeout(remaining, notify.notified()).await.is_err() {
                break true;
            }
        };

        let Some(proposal) = self.active.write().await.remove(&proposal_id) else {
            let outcome =
                ConsensusOutcome::rejected_with_error(&algorithm_name, "proposal_lost");
            self.finalize(outcome.clone()).await;
            return Ok(outcome);
        };

        let mut outcome =
            match algorithm.decide(&proposal.context, &proposal.ledger, timeout_reached) {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::warn!("Consensus algorithm {algorithm_name} failed: {err}");
                    ConsensusOutcome::rejected_with_error(&algorithm_name, &err.to_string())
                }
            };
        outcome.duration_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            "Consensus result for {proposal_id}: {} ({} for, {} against, {} participants, {}ms)",
            outcome.decision.as_str(),
            outcome.votes_for,
            outcome.votes_against,
            outcome.participants.len(),
            outcome.duration_ms
        );

        self.finalize(outcome.clone()).await;
        Ok(outcome)
    }

    /// Record a vote for an active proposal. Returns false for duplicate
    /// votes and for late/unknown proposals, both non-fatal.
    pub async fn record_vote(
        &self,
        proposal_id: &str,
        agent_id: &str,
        choice: VoteChoice,
        weight: f64,
        metadata: HashMap<String, serde_json::Value>,
    ) -> SwarmResult<bool> {
        if proposal_id.is_empty() || agent_id.is_empty() {
            return Err(SwarmError::InvalidArgument {
                reason: "proposal_id and agent_id cannot be empty".to_string(),
            });
        }

        let mut active = self.active.write().await;
        let Some(proposal) = active.get_mut(proposal_id) else {
            tracing::warn!("Vote for unknown or expired proposal: {proposal_id}");
            return Ok(false);
        };

        let mut vote = Vote::new(agent_id, choice).with_weight(weight);
        vote.metadata = metadata;
        if !proposal.ledger.record(vote) {
            tracing::warn!("Duplicate vote from {agent_id} for {proposal_id}");
            return Ok(false);
        }

        proposal.notify.notify_one();
        tracing::debug!("Recorded vote from {agent_id} for {proposal_id}");
        Ok(true)
    }

    /// Open the next voting round for a multi-round proposal. Returns
    /// the new round count.
    pub async fn advance_round(&self, proposal_id: &str) -> SwarmResult<usize> {
        let mut active = self.active.write().await;
        let proposal = active
            .get_mut(proposal_id)
            .ok_or_else(|| SwarmError::UnknownProposal {
                proposal_id: proposal_id.to_string(),
            })?;
        proposal.ledger.advance_round();
        proposal.notify.notify_one();
        Ok(proposal.ledger.round_count())
    }

    pub async fn active_proposal_count(&self) -> usize {
        self.active.read().await.len()
    }

    /// Ids of proposals currently collecting votes.
    pub async fn active_proposal_ids(&self) -> Vec<String> {
        self.active.read().await.keys().cloned().collect()
    }

    pub async fn consensus_stats(&self) -> ConsensusStats {
        self.stats.read().await.clone()
    }

    pub async fn history(&self) -> Vec<ConsensusOutcome> {
        self.history.read().await.iter().cloned().collect()
    }

    async fn is_decidable(&self, proposal_id: &str) -> bool {
        let active = self.active.read().await;
        let Some(proposal) = active.get(proposal_id) else {
            return true;
        };
        proposal.ledger.round_count() >= proposal.rounds_required
            && proposal.ledger.final_vote_count() >= proposal.context.participants.len()
    }

    async fn finalize(&self, outcome: ConsensusOutcome) {
        {
            let mut stats = self.stats.write().await;
            stats.total_proposals += 1;
            stats.total_duration_ms += outcome.duration_ms;
            match outcome.decision {
                ConsensusDecision::Approved => stats.approved += 1,
                ConsensusDecision::Rejected => stats.rejected += 1,
                ConsensusDecision::Timeout => stats.timeouts += 1,
            }
            let algorithm_stats = stats
                .by_algorithm
                .entry(outcome.algorithm_used.clone())
                .or_default();
            algorithm_stats.proposals += 1;
            match outcome.decision {
                ConsensusDecision::Approved => algorithm_stats.approved += 1,
                ConsensusDecision::Rejected => algorithm_stats.rejected += 1,
                ConsensusDecision::Timeout => algorithm_stats.timeouts += 1,
            }
        }

        let mut history = self.history.write().await;
        history.push_back(outcome);
        while history.len() > HISTORY_CAPACITY {
            history.pop_front();
        }
    }
}
