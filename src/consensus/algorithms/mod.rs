//! # Consensus Algorithms
//!
//! Behavioural interface plus the built-in implementations. Algorithms
//! are registered by name in the [`crate::consensus::ConsensusManager`];
//! there is no runtime type lookup.

pub mod byzantine;
pub mod quorum;
pub mod weighted;

use crate::consensus::types::{ConsensusOutcome, ProposalContext, VoteLedger};
use crate::utils::error::SwarmResult;

pub use byzantine::ByzantineConsensus;
pub use quorum::QuorumConsensus;
pub use weighted::WeightedConsensus;

/// A pluggable voting protocol.
pub trait ConsensusAlgorithm: Send + Sync {
    fn name(&self) -> &'static str;

    /// Voting rounds the protocol needs before it can decide.
    fn rounds_required(&self) -> usize {
        1
    }

    /// Structural check run before a proposal is opened.
    fn validate_participants(&self, _participants: &[String]) -> SwarmResult<()> {
        Ok(())
    }

    /// Decide from the collected ledger. `timeout_reached` marks a
    /// deadline expiry; the decision must still be produced from
    /// whatever votes arrived.
    fn decide(
        &self,
        proposal: &ProposalContext,
        ledger: &VoteLedger,
        timeout_reached: bool,
    ) -> SwarmResult<ConsensusOutcome>;
}
