//! AgentBond Types - Canonical domain types for the staked-agent marketplace
//!
//! This crate contains all foundational types for AgentBond with zero
//! dependencies on other agentbond crates. It defines:
//!
//! - Identity types (Address, SlashRequestId, DealId, ContentHash)
//! - Base-unit amounts with checked arithmetic and fee splitting
//! - Protocol parameters (stakes, periods, fee rates, quorum)
//! - The injectable clock
//! - Agent, slash request and deal records
//! - Domain events and the shared error type
//!
//! # Invariants
//!
//! 1. An identity holds at most one staked role at a time
//! 2. Slashing is quorum-gated and irreversible for the slashed stake
//! 3. Every escrowed amount is disbursed exactly once, and fee splits
//!    never create or destroy value

pub mod identity;
pub mod amount;
pub mod params;
pub mod clock;
pub mod agent;
pub mod deal;
pub mod event;
pub mod error;

pub use identity::*;
pub use amount::*;
pub use params::*;
pub use clock::*;
pub use agent::*;
pub use deal::*;
pub use event::*;
pub use error::*;

/// Version of the AgentBond types schema
pub const TYPES_VERSION: &str = "0.1.0";
