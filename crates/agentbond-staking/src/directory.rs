//! Read-only view of the agent registry

use agentbond_types::{Address, AgentRole};
use async_trait::async_trait;

/// Role lookups other components may make against the registry
///
/// Implementations never mutate registry state.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    /// Bonded role of `who`, `None` if not joined
    async fn agent_type(&self, who: &Address) -> AgentRole;

    /// Joined, not slashed, and bonded as a validator
    async fn is_validator(&self, who: &Address) -> bool {
        self.agent_type(who).await == AgentRole::Validator && !self.is_slashed(who).await
    }

    /// Joined, not slashed, and bonded as a moderator
    async fn is_moderator(&self, who: &Address) -> bool {
        self.agent_type(who).await == AgentRole::Moderator && !self.is_slashed(who).await
    }

    /// Carries a slashed marker
    async fn is_slashed(&self, who: &Address) -> bool;
}
