//! # Consensus
//!
//! Multi-algorithm consensus for swarm decision-making: quorum,
//! weighted, and Byzantine voting behind a single manager.

pub mod algorithms;
pub mod manager;
pub mod types;

pub use algorithms::{ByzantineConsensus, ConsensusAlgorithm, QuorumConsensus, WeightedConsensus};
pub use manager::{AlgorithmStats, ConsensusManager, ConsensusStats};
pub use types::{
    ConsensusDecision, ConsensusOutcome, ProposalContext, Vote, VoteChoice, VoteLedger,
};
