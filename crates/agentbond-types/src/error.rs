//! Error types for AgentBond
//!
//! Every failure aborts the operation with no state change. There is no
//! retry path, so there is no retriable/fatal split.

use thiserror::Error;

/// Result type for AgentBond operations
pub type Result<T> = std::result::Result<T, MarketError>;

/// AgentBond error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarketError {
    // ========================================================================
    // Registry Errors
    // ========================================================================

    #[error("Agent {agent} is already registered")]
    AlreadyRegistered { agent: String },

    #[error("Invalid agent type: {role}")]
    InvalidAgentType { role: String },

    #[error("Invalid stake amount: expected {expected}, provided {provided}")]
    InvalidStakeAmount { expected: u128, provided: u128 },

    #[error("Agent {agent} has been slashed")]
    SlashedAgent { agent: String },

    #[error("Agent {agent} is not registered for this action")]
    NotRegistered { agent: String },

    #[error("Agent {agent} cannot leave while slash request {request_id} is live")]
    PendingSlashRequest { agent: String, request_id: String },

    #[error("Slash target {target} holds no stake")]
    SlashTargetNotRegistered { target: String },

    #[error("Agent {agent} is not slashed")]
    NotSlashed { agent: String },

    // ========================================================================
    // Slash Request Errors
    // ========================================================================

    #[error("A live slash request already exists for {target}")]
    Duplicate { target: String },

    #[error("Slash request {request_id} not found")]
    SlashRequestNotFound { request_id: String },

    #[error("Slash request {request_id} expired at {deadline}")]
    SlashRequestExpired { request_id: String, deadline: String },

    #[error("Slash request {request_id} has already been executed")]
    SlashRequestAlreadyExecuted { request_id: String },

    #[error("Moderator {moderator} already approved slash request {request_id}")]
    AlreadyApproved { request_id: String, moderator: String },

    #[error("Slash request {request_id} has {approvals} of {required} approvals")]
    NotEnoughApprovals {
        request_id: String,
        approvals: u32,
        required: u32,
    },

    // ========================================================================
    // Administration Errors
    // ========================================================================

    #[error("{caller} is not the administrator")]
    NotAdministrator { caller: String },

    #[error("Required approvals must be at least 1, got {value}")]
    InvalidRequiredApprovals { value: u32 },

    // ========================================================================
    // Deal Errors
    // ========================================================================

    #[error("Deal {deal_id} not found")]
    DealNotFound { deal_id: String },

    #[error("Deal {deal_id} cannot be appealed in state {state}")]
    DealCannotBeAppealed { deal_id: String, state: String },

    #[error("Deal {deal_id} is in state {actual}, expected {expected}")]
    InvalidDealState {
        deal_id: String,
        expected: String,
        actual: String,
    },

    #[error("Unauthorized: {caller} is not the {required} of deal {deal_id}")]
    Unauthorized {
        deal_id: String,
        caller: String,
        required: String,
    },

    #[error("{validator} is not an active validator")]
    InvalidValidator { validator: String },

    #[error("Invalid deal result: {result}")]
    InvalidDealResult { result: String },

    #[error("Validation window for deal {deal_id} closed at {closed_at}")]
    ValidationWindowClosed { deal_id: String, closed_at: String },

    #[error("Invalid deadline {deadline}: must be after {earliest} and no later than {latest}")]
    InvalidDeadline {
        deadline: String,
        earliest: String,
        latest: String,
    },

    #[error("Invalid deal participants: {reason}")]
    InvalidParticipants { reason: String },

    #[error("Verdict winner {winner} is not a party to deal {deal_id}")]
    InvalidVerdictWinner { deal_id: String, winner: String },

    #[error("Moderator {moderator} is a party to deal {deal_id}")]
    ConflictOfInterest { deal_id: String, moderator: String },

    #[error("Appeal period for deal {deal_id} elapsed at {closed_at}")]
    AppealPeriodElapsed { deal_id: String, closed_at: String },

    #[error("Appeal period for deal {deal_id} is open until {closes_at}")]
    AppealPeriodActive { deal_id: String, closes_at: String },

    // ========================================================================
    // Funds Errors
    // ========================================================================

    #[error("Invalid amount: {message}")]
    InvalidAmount { message: String },

    #[error("Insufficient funds in {account}: requested {requested}, available {available}")]
    InsufficientFunds {
        account: String,
        requested: u128,
        available: u128,
    },

    #[error("Amount overflow during arithmetic operation")]
    AmountOverflow,

    #[error("Amount underflow during arithmetic operation")]
    AmountUnderflow,

    // ========================================================================
    // General Errors
    // ========================================================================

    #[error("Invalid identifier {value}: {reason}")]
    InvalidIdentifier { value: String, reason: String },

    #[error("Invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl MarketError {
    /// Create an invalid input error
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Get an error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AlreadyRegistered { .. } => "ALREADY_REGISTERED",
            Self::InvalidAgentType { .. } => "INVALID_AGENT_TYPE",
            Self::InvalidStakeAmount { .. } => "INVALID_STAKE_AMOUNT",
            Self::SlashedAgent { .. } => "SLASHED_AGENT",
            Self::NotRegistered { .. } => "NOT_REGISTERED",
            Self::PendingSlashRequest { .. } => "PENDING_SLASH_REQUEST",
            Self::SlashTargetNotRegistered { .. } => "SLASH_TARGET_NOT_REGISTERED",
            Self::NotSlashed { .. } => "NOT_SLASHED",
            Self::Duplicate { .. } => "DUPLICATE",
            Self::SlashRequestNotFound { .. } => "SLASH_REQUEST_NOT_FOUND",
            Self::SlashRequestExpired { .. } => "SLASH_REQUEST_EXPIRED",
            Self::SlashRequestAlreadyExecuted { .. } => "SLASH_REQUEST_ALREADY_EXECUTED",
            Self::AlreadyApproved { .. } => "ALREADY_APPROVED",
            Self::NotEnoughApprovals { .. } => "NOT_ENOUGH_APPROVALS",
            Self::NotAdministrator { .. } => "NOT_ADMINISTRATOR",
            Self::InvalidRequiredApprovals { .. } => "INVALID_REQUIRED_APPROVALS",
            Self::DealNotFound { .. } => "DEAL_NOT_FOUND",
            Self::DealCannotBeAppealed { .. } => "DEAL_CANNOT_BE_APPEALED",
            Self::InvalidDealState { .. } => "INVALID_DEAL_STATE",
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::InvalidValidator { .. } => "INVALID_VALIDATOR",
            Self::InvalidDealResult { .. } => "INVALID_DEAL_RESULT",
            Self::ValidationWindowClosed { .. } => "VALIDATION_WINDOW_CLOSED",
            Self::InvalidDeadline { .. } => "INVALID_DEADLINE",
            Self::InvalidParticipants { .. } => "INVALID_PARTICIPANTS",
            Self::InvalidVerdictWinner { .. } => "INVALID_VERDICT_WINNER",
            Self::ConflictOfInterest { .. } => "CONFLICT_OF_INTEREST",
            Self::AppealPeriodElapsed { .. } => "APPEAL_PERIOD_ELAPSED",
            Self::AppealPeriodActive { .. } => "APPEAL_PERIOD_ACTIVE",
            Self::InvalidAmount { .. } => "INVALID_AMOUNT",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::AmountOverflow => "AMOUNT_OVERFLOW",
            Self::AmountUnderflow => "AMOUNT_UNDERFLOW",
            Self::InvalidIdentifier { .. } => "INVALID_IDENTIFIER",
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::Config { .. } => "CONFIG_ERROR",
        }
    }
}
