//! Domain events
//!
//! Every operation returns the events it caused inside an [`Outcome`];
//! nothing is emitted through a side channel.

use serde::{Deserialize, Serialize};

use crate::{Address, AgentRole, Amount, DealId, DealResult, SlashRequestId, Timestamp};

/// Something that happened to the registry or to a deal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketEvent {
    AgentJoined {
        agent: Address,
        role: AgentRole,
    },
    AgentLeft {
        agent: Address,
        role: AgentRole,
    },
    SlashRequestCreated {
        request_id: SlashRequestId,
        target: Address,
        deadline: Timestamp,
    },
    SlashRequestApproved {
        request_id: SlashRequestId,
        voter: Address,
    },
    AgentSlashed {
        target: Address,
        role: AgentRole,
        executor: Address,
    },
    RequiredApprovalsChanged {
        previous: u32,
        current: u32,
    },
    AdministrationTransferred {
        previous: Address,
        current: Address,
    },
    AgentReadmitted {
        agent: Address,
    },
    DealProposalCreated {
        deal_id: DealId,
        business: Address,
        counterparty: Address,
        validator: Address,
        amount: Amount,
        deadline: Timestamp,
    },
    DealAccepted {
        deal_id: DealId,
        counterparty: Address,
    },
    DealResultSubmitted {
        deal_id: DealId,
        validator: Address,
        result: DealResult,
    },
    DealAppealed {
        deal_id: DealId,
        business: Address,
    },
    PaymentWithdrawn {
        deal_id: DealId,
        counterparty: Address,
        counterparty_amount: Amount,
        validator: Address,
        validator_fee: Amount,
    },
    ModeratorVerdictSubmitted {
        deal_id: DealId,
        moderator: Address,
        winner: Address,
        winner_amount: Amount,
        moderator_fee: Amount,
    },
    AppealLapsed {
        deal_id: DealId,
        business: Address,
        refund: Amount,
    },
}

impl MarketEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AgentJoined { .. } => "AgentJoined",
            Self::AgentLeft { .. } => "AgentLeft",
            Self::SlashRequestCreated { .. } => "SlashRequestCreated",
            Self::SlashRequestApproved { .. } => "SlashRequestApproved",
            Self::AgentSlashed { .. } => "AgentSlashed",
            Self::RequiredApprovalsChanged { .. } => "RequiredApprovalsChanged",
            Self::AdministrationTransferred { .. } => "AdministrationTransferred",
            Self::AgentReadmitted { .. } => "AgentReadmitted",
            Self::DealProposalCreated { .. } => "DealProposalCreated",
            Self::DealAccepted { .. } => "DealAccepted",
            Self::DealResultSubmitted { .. } => "DealResultSubmitted",
            Self::DealAppealed { .. } => "DealAppealed",
            Self::PaymentWithdrawn { .. } => "PaymentWithdrawn",
            Self::ModeratorVerdictSubmitted { .. } => "ModeratorVerdictSubmitted",
            Self::AppealLapsed { .. } => "AppealLapsed",
        }
    }

    /// The deal this event belongs to, if it is a deal event
    pub fn deal_id(&self) -> Option<DealId> {
        match self {
            Self::DealProposalCreated { deal_id, .. }
            | Self::DealAccepted { deal_id, .. }
            | Self::DealResultSubmitted { deal_id, .. }
            | Self::DealAppealed { deal_id, .. }
            | Self::PaymentWithdrawn { deal_id, .. }
            | Self::ModeratorVerdictSubmitted { deal_id, .. }
            | Self::AppealLapsed { deal_id, .. } => Some(*deal_id),
            _ => None,
        }
    }
}

/// Value produced by an operation together with the events it emitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome<T> {
    pub value: T,
    pub events: Vec<MarketEvent>,
}

impl<T> Outcome<T> {
    pub fn new(value: T, events: Vec<MarketEvent>) -> Self {
        Self { value, events }
    }

    pub fn with_event(value: T, event: MarketEvent) -> Self {
        Self {
            value,
            events: vec![event],
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: f(self.value),
            events: self.events,
        }
    }

    pub fn into_parts(self) -> (T, Vec<MarketEvent>) {
        (self.value, self.events)
    }
}
