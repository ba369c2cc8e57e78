//! Deal records and the deal state machine
//!
//! ```text
//! Created -> Applied -> Validated -> Closed
//!               |  \
//!               |   -> Rejected -> Appeal -> Closed
//!               |                    ^
//!               +--(grace expired)---+
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{
    Address, Amount, ContentHash, DealId, MarketError, Timestamp, APPEAL_PERIOD, VALIDATE_PERIOD,
};

/// State of a deal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealState {
    /// Funded by the business, waiting for the counterparty
    Created,
    /// Accepted by the counterparty, waiting for the validator
    Applied,
    /// Validator found the work lacking
    Rejected,
    /// Validator confirmed the work
    Validated,
    /// Escalated by the business to a moderator
    Appeal,
    /// Funds disbursed
    Closed,
}

impl DealState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: DealState) -> bool {
        use DealState::*;
        matches!(
            (self, next),
            (Created, Applied)
                | (Applied, Rejected)
                | (Applied, Validated)
                | (Applied, Appeal)
                | (Rejected, Appeal)
                | (Validated, Closed)
                | (Appeal, Closed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Applied => "applied",
            Self::Rejected => "rejected",
            Self::Validated => "validated",
            Self::Appeal => "appeal",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for DealState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome a validator can attest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealResult {
    Rejected,
    Validated,
}

impl From<DealResult> for DealState {
    fn from(result: DealResult) -> Self {
        match result {
            DealResult::Rejected => DealState::Rejected,
            DealResult::Validated => DealState::Validated,
        }
    }
}

impl TryFrom<DealState> for DealResult {
    type Error = MarketError;

    fn try_from(state: DealState) -> Result<Self, Self::Error> {
        match state {
            DealState::Rejected => Ok(Self::Rejected),
            DealState::Validated => Ok(Self::Validated),
            other => Err(MarketError::InvalidDealResult {
                result: other.to_string(),
            }),
        }
    }
}

/// Role a participant plays in one deal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealParty {
    Business,
    Counterparty,
    Validator,
}

impl DealParty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Business => "business",
            Self::Counterparty => "counterparty",
            Self::Validator => "validator",
        }
    }
}

/// An escrowed payment between a business and a counterparty
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deal {
    pub id: DealId,
    /// Funds the deal and may appeal
    pub business: Address,
    /// Delivers the work and receives the payment
    pub counterparty: Address,
    /// Attests whether the work was delivered
    pub validator: Address,
    pub content_hash: ContentHash,
    /// When the work is due
    pub deadline: Timestamp,
    /// Fully escrowed at creation
    pub amount: Amount,
    pub state: DealState,
    pub created_at: Timestamp,
    /// When the validator submitted a result
    pub resolved_at: Option<Timestamp>,
    /// When the business appealed
    pub appealed_at: Option<Timestamp>,
}

impl Deal {
    /// Last moment the validator may submit a result
    pub fn validation_closes_at(&self) -> Timestamp {
        self.deadline.plus(VALIDATE_PERIOD)
    }

    /// Last moment a moderator may rule on the appeal
    pub fn appeal_closes_at(&self) -> Option<Timestamp> {
        self.appealed_at.map(|at| at.plus(APPEAL_PERIOD))
    }

    /// Rejected outright, or still unresolved after the validation grace window
    pub fn can_be_appealed(&self, now: Timestamp) -> bool {
        match self.state {
            DealState::Rejected => true,
            DealState::Applied => now > self.validation_closes_at(),
            _ => false,
        }
    }

    /// The role `who` plays in this deal, if any
    pub fn party(&self, who: &Address) -> Option<DealParty> {
        if who == &self.business {
            Some(DealParty::Business)
        } else if who == &self.counterparty {
            Some(DealParty::Counterparty)
        } else if who == &self.validator {
            Some(DealParty::Validator)
        } else {
            None
        }
    }

    pub fn involves(&self, who: &Address) -> bool {
        self.party(who).is_some()
    }
}
