//! Message-routing capability consumed by the consensus manager and the
//! state synchronizer. The coordinator implements it; depending on the
//! trait instead of the coordinator value keeps those components free of
//! reference cycles.

use crate::communication::envelope::MessageEnvelope;
use crate::utils::error::SwarmResult;
use async_trait::async_trait;
use std::collections::HashSet;

#[async_trait]
pub trait MessageRouter: Send + Sync {
    /// Point-to-point delivery along an existing topology edge.
    async fn send(&self, from: &str, to: &str, envelope: MessageEnvelope) -> SwarmResult<()>;

    /// Broadcast to all reachable neighbours, returning the delivery count.
    async fn broadcast(
        &self,
        from: &str,
        envelope: MessageEnvelope,
        exclude: Option<&HashSet<String>>,
    ) -> SwarmResult<usize>;

    /// Ids of all currently registered agents.
    async fn participants(&self) -> Vec<String>;
}
