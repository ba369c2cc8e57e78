//! AgentBond Marketplace
//!
//! Wires the funds ledger, the stake ledger and the deal manager into one
//! service built from a [`MarketConfig`]. Every operation is forwarded to the
//! component that owns it, and the events it returns are republished to
//! subscribers over a broadcast channel.
//!
//! ```ignore
//! let market = Marketplace::new(MarketConfig::load(None)?, Arc::new(SystemClock::new()))?;
//! let mut events = market.subscribe();
//! market.join(&validator, AgentRole::Validator, VALIDATOR_STAKE).await?;
//! ```

pub mod config;
pub mod logging;

use std::sync::Arc;

use agentbond_escrow::{DealManager, DealProposal};
use agentbond_ledger::{FundsTransfer, InMemoryLedger};
use agentbond_staking::StakeLedger;
use agentbond_types::{
    Address, Agent, AgentRole, Amount, AssetId, Clock, Deal, DealId, DealResult, FeeSplit,
    MarketEvent, Outcome, Result, SlashRequest, SlashRequestId,
};
use tokio::sync::broadcast;
use tracing::{debug, info};

pub use crate::config::{LoggingConfig, MarketConfig};
pub use crate::logging::init_logging;

/// The assembled marketplace
pub struct Marketplace {
    config: MarketConfig,
    ledger: InMemoryLedger,
    clock: Arc<dyn Clock>,
    stakes: Arc<StakeLedger>,
    deals: DealManager,
    events: broadcast::Sender<MarketEvent>,
}

impl Marketplace {
    /// Build a marketplace over a fresh in-memory ledger
    pub fn new(config: MarketConfig, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        Self::with_ledger(config, InMemoryLedger::new(), clock)
    }

    /// Build a marketplace over an existing ledger
    pub fn with_ledger(
        config: MarketConfig,
        ledger: InMemoryLedger,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let administrator = config.administrator_address()?;
        let funds: Arc<dyn FundsTransfer> = Arc::new(ledger.clone());

        let stakes = Arc::new(
            StakeLedger::new(administrator, funds.clone(), clock.clone())
                .with_asset(config.stake_asset_id())
                .with_required_approvals(config.required_approvals)?,
        );
        let deals = DealManager::new(config.deal_asset_id(), stakes.clone(), funds, clock.clone());
        let (events, _) = broadcast::channel(config.event_buffer);

        info!(
            administrator = %administrator,
            deal_asset = %config.deal_asset,
            stake_asset = %config.stake_asset,
            required_approvals = config.required_approvals,
            "Marketplace initialized"
        );

        Ok(Self {
            config,
            ledger,
            clock,
            stakes,
            deals,
            events,
        })
    }

    /// Receive every event emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
        self.events.subscribe()
    }

    fn publish<T>(&self, outcome: Outcome<T>) -> Outcome<T> {
        for event in &outcome.events {
            debug!(event = event.name(), deal_id = ?event.deal_id(), "Publishing event");
            // No subscribers is not an error
            let _ = self.events.send(event.clone());
        }
        outcome
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    pub fn ledger(&self) -> &InMemoryLedger {
        &self.ledger
    }

    pub fn stakes(&self) -> &StakeLedger {
        &self.stakes
    }

    pub fn deals(&self) -> &DealManager {
        &self.deals
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn deal_asset(&self) -> &AssetId {
        self.deals.asset()
    }

    pub fn stake_asset(&self) -> &AssetId {
        self.stakes.asset()
    }

    pub async fn balance(&self, who: &Address, asset: &AssetId) -> Amount {
        self.ledger.balance(who, asset).await
    }

    // ========================================================================
    // Staking
    // ========================================================================

    pub async fn join(
        &self,
        caller: &Address,
        role: AgentRole,
        stake: Amount,
    ) -> Result<Outcome<Agent>> {
        Ok(self.publish(self.stakes.join(caller, role, stake).await?))
    }

    pub async fn leave(&self, caller: &Address) -> Result<Outcome<Amount>> {
        Ok(self.publish(self.stakes.leave(caller).await?))
    }

    pub async fn create_slash_request(
        &self,
        caller: &Address,
        target: &Address,
    ) -> Result<Outcome<SlashRequest>> {
        Ok(self.publish(self.stakes.create_slash_request(caller, target).await?))
    }

    pub async fn approve_slash_request(
        &self,
        caller: &Address,
        id: &SlashRequestId,
    ) -> Result<Outcome<SlashRequest>> {
        Ok(self.publish(self.stakes.approve_slash_request(caller, id).await?))
    }

    pub async fn execute_slash_request(
        &self,
        caller: &Address,
        id: &SlashRequestId,
    ) -> Result<Outcome<SlashRequest>> {
        Ok(self.publish(self.stakes.execute_slash_request(caller, id).await?))
    }

    pub async fn change_required_approvals(
        &self,
        caller: &Address,
        required: u32,
    ) -> Result<Outcome<u32>> {
        Ok(self.publish(self.stakes.change_required_approvals(caller, required).await?))
    }

    pub async fn transfer_administration(
        &self,
        caller: &Address,
        new_administrator: &Address,
    ) -> Result<Outcome<Address>> {
        Ok(self.publish(self.stakes.transfer_administration(caller, new_administrator).await?))
    }

    pub async fn readmit_agent(&self, caller: &Address, target: &Address) -> Result<Outcome<()>> {
        Ok(self.publish(self.stakes.readmit_agent(caller, target).await?))
    }

    // ========================================================================
    // Deals
    // ========================================================================

    pub async fn create_deal(
        &self,
        caller: &Address,
        proposal: DealProposal,
    ) -> Result<Outcome<Deal>> {
        Ok(self.publish(self.deals.create_deal(caller, proposal).await?))
    }

    pub async fn accept_deal(&self, caller: &Address, id: DealId) -> Result<Outcome<Deal>> {
        Ok(self.publish(self.deals.accept_deal(caller, id).await?))
    }

    pub async fn set_deal_result(
        &self,
        caller: &Address,
        id: DealId,
        result: DealResult,
    ) -> Result<Outcome<Deal>> {
        Ok(self.publish(self.deals.set_deal_result(caller, id, result).await?))
    }

    pub async fn withdraw_payment(
        &self,
        caller: &Address,
        id: DealId,
    ) -> Result<Outcome<FeeSplit>> {
        Ok(self.publish(self.deals.withdraw_payment(caller, id).await?))
    }

    pub async fn appeal_deal(&self, caller: &Address, id: DealId) -> Result<Outcome<Deal>> {
        Ok(self.publish(self.deals.appeal_deal(caller, id).await?))
    }

    pub async fn submit_moderator_verdict(
        &self,
        caller: &Address,
        id: DealId,
        winner: &Address,
    ) -> Result<Outcome<FeeSplit>> {
        Ok(self.publish(self.deals.submit_moderator_verdict(caller, id, winner).await?))
    }

    pub async fn close_lapsed_appeal(
        &self,
        caller: &Address,
        id: DealId,
    ) -> Result<Outcome<Amount>> {
        Ok(self.publish(self.deals.close_lapsed_appeal(caller, id).await?))
    }
}
