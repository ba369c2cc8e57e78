//! Agent and slash request records
//!
//! An agent is an identity bonded under exactly one role. A slash request is
//! a moderator proposal to forfeit a target's bond, executable once enough
//! distinct moderators have approved it and before its deadline.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

use crate::{Address, Amount, SlashRequestId, Timestamp, MODERATOR_STAKE, VALIDATOR_STAKE};

/// Role an identity is bonded under
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Not bonded
    #[default]
    None,
    /// Attests deal outcomes for a 2% fee
    Validator,
    /// Adjudicates appeals for a 10% fee and votes on slashes
    Moderator,
}

impl AgentRole {
    /// Fixed bond for the role; zero for `None`
    pub fn stake_amount(self) -> Amount {
        match self {
            Self::Validator => VALIDATOR_STAKE,
            Self::Moderator => MODERATOR_STAKE,
            Self::None => Amount::ZERO,
        }
    }

    /// Whether an identity may join under this role
    pub fn is_joinable(self) -> bool {
        matches!(self, Self::Validator | Self::Moderator)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Validator => "validator",
            Self::Moderator => "moderator",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry record of an identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub address: Address,
    pub role: AgentRole,
    pub joined: bool,
    /// Set when a slash was executed against this identity. Cleared only by
    /// administrator re-admission.
    pub slashed: bool,
    /// Bond currently held for this identity
    pub stake: Amount,
    pub joined_at: Timestamp,
}

impl Agent {
    /// Record for an identity that just bonded under `role`
    pub fn bonded(address: Address, role: AgentRole, now: Timestamp) -> Self {
        Self {
            address,
            role,
            joined: true,
            slashed: false,
            stake: role.stake_amount(),
            joined_at: now,
        }
    }

    /// Record left behind after a slash: no role, no bond, banned
    pub fn slashed_marker(address: Address, now: Timestamp) -> Self {
        Self {
            address,
            role: AgentRole::None,
            joined: false,
            slashed: true,
            stake: Amount::ZERO,
            joined_at: now,
        }
    }

    /// Joined, not slashed, and bonded under `role`
    pub fn is_active_as(&self, role: AgentRole) -> bool {
        self.joined && !self.slashed && self.role == role
    }
}

/// Quorum-gated proposal to forfeit a target's bond
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashRequest {
    pub id: SlashRequestId,
    pub target: Address,
    pub created_by: Address,
    pub created_at: Timestamp,
    pub deadline: Timestamp,
    /// Number of distinct moderators who approved
    pub approvals: u32,
    pub executed: bool,
}

impl SlashRequest {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now > self.deadline
    }

    /// Neither executed nor past its deadline
    pub fn is_live(&self, now: Timestamp) -> bool {
        !self.executed && !self.is_expired(now)
    }

    pub fn status(&self, now: Timestamp, required_approvals: u32) -> SlashRequestStatus {
        if self.executed {
            SlashRequestStatus::Executed
        } else if self.is_expired(now) {
            SlashRequestStatus::Expired
        } else if self.approvals >= required_approvals {
            SlashRequestStatus::Approvable
        } else {
            SlashRequestStatus::Pending
        }
    }
}

impl SlashRequestId {
    /// Keccak-256 of the target address followed by the big-endian creation time
    pub fn derive(target: &Address, created_at: Timestamp) -> Self {
        let mut hasher = Keccak256::new();
        hasher.update(target.as_bytes());
        hasher.update(created_at.as_secs().to_be_bytes());
        Self(hasher.finalize().into())
    }
}

/// Position of a slash request in its lifecycle, derived from the clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlashRequestStatus {
    /// Collecting approvals
    Pending,
    /// Quorum reached, awaiting administrator execution
    Approvable,
    /// Bond forfeited
    Executed,
    /// Deadline passed without execution
    Expired,
}

impl SlashRequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed | Self::Expired)
    }
}
