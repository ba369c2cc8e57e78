//! AgentBond Staking - agent bonds and quorum-gated slashing
//!
//! The stake ledger owns every agent record and every slash request:
//!
//! 1. An identity bonds under exactly one role by depositing that role's
//!    fixed stake into the stake vault
//! 2. Leaving returns the stake, unless a live slash request targets the agent
//! 3. Moderators open and approve slash requests; each moderator votes once
//! 4. The administrator executes a request once quorum is reached and before
//!    its deadline, forfeiting the target's stake to the executor
//! 5. A slashed identity stays banned until the administrator re-admits it
//!
//! All mutations run under one writer lock held across the fund movement, so
//! an operation either applies completely or leaves the ledger untouched.

pub mod directory;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use agentbond_ledger::{FundsTransfer, TransferReason};
use agentbond_types::{
    Address, Agent, AgentRole, Amount, AssetId, Clock, MarketError, MarketEvent, Outcome, Result,
    SlashRequest, SlashRequestId, SlashRequestStatus, Timestamp, DEFAULT_REQUIRED_APPROVALS,
    SLASH_REQUEST_DURATION,
};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub use directory::AgentDirectory;

/// Label the stake vault address is derived from
pub const STAKE_VAULT_LABEL: &str = "agentbond:stake-vault";

#[derive(Debug)]
struct RegistryState {
    agents: HashMap<Address, Agent>,
    requests: HashMap<SlashRequestId, SlashRequest>,
    /// One entry per (request, moderator) vote
    votes: HashSet<(SlashRequestId, Address)>,
    /// Most recent request per target; may point at an expired request
    live_by_target: HashMap<Address, SlashRequestId>,
    administrator: Address,
    required_approvals: u32,
}

impl RegistryState {
    fn new(administrator: Address) -> Self {
        Self {
            agents: HashMap::new(),
            requests: HashMap::new(),
            votes: HashSet::new(),
            live_by_target: HashMap::new(),
            administrator,
            required_approvals: DEFAULT_REQUIRED_APPROVALS,
        }
    }

    fn is_slashed(&self, who: &Address) -> bool {
        self.agents.get(who).is_some_and(|a| a.slashed)
    }

    fn is_active_as(&self, who: &Address, role: AgentRole) -> bool {
        self.agents.get(who).is_some_and(|a| a.is_active_as(role))
    }

    fn live_request_for(&self, target: &Address, now: Timestamp) -> Option<&SlashRequest> {
        self.live_by_target
            .get(target)
            .and_then(|id| self.requests.get(id))
            .filter(|r| r.is_live(now))
    }

    fn require_administrator(&self, caller: &Address) -> Result<()> {
        if caller != &self.administrator {
            return Err(MarketError::NotAdministrator {
                caller: caller.to_string(),
            });
        }
        Ok(())
    }

    fn require_moderator(&self, caller: &Address) -> Result<()> {
        if self.is_slashed(caller) {
            return Err(MarketError::SlashedAgent {
                agent: caller.to_string(),
            });
        }
        if !self.is_active_as(caller, AgentRole::Moderator) {
            return Err(MarketError::NotRegistered {
                agent: caller.to_string(),
            });
        }
        Ok(())
    }

    fn check_join(&self, caller: &Address, role: AgentRole, stake: Amount) -> Result<()> {
        let existing = self.agents.get(caller);
        if existing.is_some_and(|a| a.joined) {
            return Err(MarketError::AlreadyRegistered {
                agent: caller.to_string(),
            });
        }
        if !role.is_joinable() {
            return Err(MarketError::InvalidAgentType {
                role: role.to_string(),
            });
        }
        if existing.is_some_and(|a| a.slashed) {
            return Err(MarketError::SlashedAgent {
                agent: caller.to_string(),
            });
        }
        let expected = role.stake_amount();
        if stake != expected {
            return Err(MarketError::InvalidStakeAmount {
                expected: expected.value(),
                provided: stake.value(),
            });
        }
        Ok(())
    }

    fn check_leave(&self, caller: &Address, now: Timestamp) -> Result<Agent> {
        let agent = self.agents.get(caller);
        if agent.is_some_and(|a| a.slashed) {
            return Err(MarketError::SlashedAgent {
                agent: caller.to_string(),
            });
        }
        let agent = agent.filter(|a| a.joined).ok_or_else(|| MarketError::NotRegistered {
            agent: caller.to_string(),
        })?;
        if let Some(request) = self.live_request_for(caller, now) {
            return Err(MarketError::PendingSlashRequest {
                agent: caller.to_string(),
                request_id: request.id.to_string(),
            });
        }
        Ok(agent.clone())
    }

    /// Not found, expired, executed, in that order
    fn open_request(&self, id: &SlashRequestId, now: Timestamp) -> Result<&SlashRequest> {
        let request = self
            .requests
            .get(id)
            .ok_or_else(|| MarketError::SlashRequestNotFound {
                request_id: id.to_string(),
            })?;
        if request.is_expired(now) {
            return Err(MarketError::SlashRequestExpired {
                request_id: id.to_string(),
                deadline: request.deadline.to_string(),
            });
        }
        if request.executed {
            return Err(MarketError::SlashRequestAlreadyExecuted {
                request_id: id.to_string(),
            });
        }
        Ok(request)
    }

    fn staked_agent(&self, target: &Address) -> Result<&Agent> {
        self.agents
            .get(target)
            .filter(|a| a.joined && !a.slashed && !a.stake.is_zero())
            .ok_or_else(|| MarketError::SlashTargetNotRegistered {
                target: target.to_string(),
            })
    }
}

/// Registry of bonded agents and their slash requests
pub struct StakeLedger {
    state: RwLock<RegistryState>,
    funds: Arc<dyn FundsTransfer>,
    clock: Arc<dyn Clock>,
    asset: AssetId,
    vault: Address,
}

impl StakeLedger {
    /// Create an empty registry administered by `administrator`
    ///
    /// Stakes are held in the native asset and quorum starts at
    /// [`DEFAULT_REQUIRED_APPROVALS`].
    pub fn new(
        administrator: Address,
        funds: Arc<dyn FundsTransfer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state: RwLock::new(RegistryState::new(administrator)),
            funds,
            clock,
            asset: AssetId::native(),
            vault: Address::from_label(STAKE_VAULT_LABEL),
        }
    }

    /// Hold stakes in `asset` instead of the native asset
    pub fn with_asset(mut self, asset: AssetId) -> Self {
        self.asset = asset;
        self
    }

    /// Start with a different slash quorum
    pub fn with_required_approvals(mut self, required: u32) -> Result<Self> {
        if required == 0 {
            return Err(MarketError::InvalidRequiredApprovals { value: required });
        }
        self.state.get_mut().required_approvals = required;
        Ok(self)
    }

    /// Account holding every bonded stake
    pub fn vault(&self) -> Address {
        self.vault
    }

    pub fn asset(&self) -> &AssetId {
        &self.asset
    }

    // ========================================================================
    // Membership
    // ========================================================================

    /// Bond `caller` under `role` by depositing exactly the role's stake
    pub async fn join(
        &self,
        caller: &Address,
        role: AgentRole,
        stake: Amount,
    ) -> Result<Outcome<Agent>> {
        let mut state = self.state.write().await;
        let now = self.clock.now();
        state
            .check_join(caller, role, stake)
            .inspect_err(|err| {
                warn!(agent = %caller, role = %role, error = %err, "Join rejected")
            })?;

        self.funds
            .transfer(&self.asset, caller, &self.vault, stake, TransferReason::StakeDeposit)
            .await
            .inspect_err(|err| warn!(agent = %caller, error = %err, "Stake deposit failed"))?;

        let agent = Agent::bonded(*caller, role, now);
        state.agents.insert(*caller, agent.clone());
        info!(agent = %caller, role = %role, stake = %stake, "Agent joined");

        Ok(Outcome::with_event(
            agent,
            MarketEvent::AgentJoined {
                agent: *caller,
                role,
            },
        ))
    }

    /// Unbond `caller` and return its stake
    pub async fn leave(&self, caller: &Address) -> Result<Outcome<Amount>> {
        let mut state = self.state.write().await;
        let now = self.clock.now();
        let agent = state
            .check_leave(caller, now)
            .inspect_err(|err| warn!(agent = %caller, error = %err, "Leave rejected"))?;

        state.agents.remove(caller);
        if let Err(err) = self
            .funds
            .transfer(&self.asset, &self.vault, caller, agent.stake, TransferReason::StakeReturn)
            .await
        {
            warn!(agent = %caller, error = %err, "Stake return failed, restoring agent");
            state.agents.insert(*caller, agent);
            return Err(err);
        }
        info!(agent = %caller, role = %agent.role, stake = %agent.stake, "Agent left");

        Ok(Outcome::with_event(
            agent.stake,
            MarketEvent::AgentLeft {
                agent: *caller,
                role: agent.role,
            },
        ))
    }

    // ========================================================================
    // Slashing
    // ========================================================================

    /// Open a slash request against `target`; the creator does not auto-approve
    pub async fn create_slash_request(
        &self,
        caller: &Address,
        target: &Address,
    ) -> Result<Outcome<SlashRequest>> {
        let mut state = self.state.write().await;
        let now = self.clock.now();
        let checked = state.require_moderator(caller).and_then(|_| {
            state.staked_agent(target)?;
            if state.live_request_for(target, now).is_some() {
                return Err(MarketError::Duplicate {
                    target: target.to_string(),
                });
            }
            let id = SlashRequestId::derive(target, now);
            if state.requests.contains_key(&id) {
                return Err(MarketError::Duplicate {
                    target: target.to_string(),
                });
            }
            Ok(id)
        });
        let id = checked.inspect_err(|err| {
            warn!(moderator = %caller, target = %target, error = %err, "Slash request rejected")
        })?;

        let request = SlashRequest {
            id,
            target: *target,
            created_by: *caller,
            created_at: now,
            deadline: now.plus(SLASH_REQUEST_DURATION),
            approvals: 0,
            executed: false,
        };
        state.requests.insert(id, request.clone());
        state.live_by_target.insert(*target, id);
        info!(
            request_id = %id,
            target = %target,
            moderator = %caller,
            deadline = %request.deadline,
            "Slash request created"
        );

        Ok(Outcome::with_event(
            request.clone(),
            MarketEvent::SlashRequestCreated {
                request_id: id,
                target: *target,
                deadline: request.deadline,
            },
        ))
    }

    /// Record `caller`'s vote for a slash request
    pub async fn approve_slash_request(
        &self,
        caller: &Address,
        id: &SlashRequestId,
    ) -> Result<Outcome<SlashRequest>> {
        let mut state = self.state.write().await;
        let now = self.clock.now();
        let checked = state.require_moderator(caller).and_then(|_| {
            state.open_request(id, now)?;
            if state.votes.contains(&(*id, *caller)) {
                return Err(MarketError::AlreadyApproved {
                    request_id: id.to_string(),
                    moderator: caller.to_string(),
                });
            }
            Ok(())
        });
        checked.inspect_err(|err| {
            warn!(moderator = %caller, request_id = %id, error = %err, "Approval rejected")
        })?;

        state.votes.insert((*id, *caller));
        let request = state
            .requests
            .get_mut(id)
            .ok_or_else(|| MarketError::SlashRequestNotFound {
                request_id: id.to_string(),
            })?;
        request.approvals += 1;
        let request = request.clone();
        info!(
            request_id = %id,
            moderator = %caller,
            approvals = request.approvals,
            "Slash request approved"
        );

        Ok(Outcome::with_event(
            request,
            MarketEvent::SlashRequestApproved {
                request_id: *id,
                voter: *caller,
            },
        ))
    }

    /// Forfeit the target's stake to the administrator once quorum is reached
    pub async fn execute_slash_request(
        &self,
        caller: &Address,
        id: &SlashRequestId,
    ) -> Result<Outcome<SlashRequest>> {
        let mut state = self.state.write().await;
        let now = self.clock.now();
        let checked = state.require_administrator(caller).and_then(|_| {
            let request = state.open_request(id, now)?;
            if request.approvals < state.required_approvals {
                return Err(MarketError::NotEnoughApprovals {
                    request_id: id.to_string(),
                    approvals: request.approvals,
                    required: state.required_approvals,
                });
            }
            let agent = state.staked_agent(&request.target)?;
            Ok((request.clone(), agent.clone()))
        });
        let (request, target) =
            checked.inspect_err(|err| {
                warn!(
                    executor = %caller,
                    request_id = %id,
                    error = %err,
                    "Slash execution rejected"
                )
            })?;

        let mut executed = request.clone();
        executed.executed = true;
        state.requests.insert(*id, executed.clone());
        state.live_by_target.remove(&target.address);
        state
            .agents
            .insert(target.address, Agent::slashed_marker(target.address, now));

        if let Err(err) = self
            .funds
            .transfer(
                &self.asset,
                &self.vault,
                caller,
                target.stake,
                TransferReason::StakeForfeit { request_id: *id },
            )
            .await
        {
            warn!(request_id = %id, error = %err, "Stake forfeit failed, restoring request");
            state.requests.insert(*id, request);
            state.live_by_target.insert(target.address, *id);
            state.agents.insert(target.address, target);
            return Err(err);
        }
        info!(
            request_id = %id,
            target = %target.address,
            role = %target.role,
            stake = %target.stake,
            executor = %caller,
            "Agent slashed"
        );

        Ok(Outcome::with_event(
            executed,
            MarketEvent::AgentSlashed {
                target: target.address,
                role: target.role,
                executor: *caller,
            },
        ))
    }

    // ========================================================================
    // Administration
    // ========================================================================

    pub async fn change_required_approvals(
        &self,
        caller: &Address,
        required: u32,
    ) -> Result<Outcome<u32>> {
        let mut state = self.state.write().await;
        let checked = state.require_administrator(caller).and_then(|_| {
            if required == 0 {
                return Err(MarketError::InvalidRequiredApprovals { value: required });
            }
            Ok(())
        });
        checked.inspect_err(|err| warn!(caller = %caller, error = %err, "Quorum change rejected"))?;

        let previous = std::mem::replace(&mut state.required_approvals, required);
        info!(previous, current = required, "Required approvals changed");

        Ok(Outcome::with_event(
            required,
            MarketEvent::RequiredApprovalsChanged {
                previous,
                current: required,
            },
        ))
    }

    pub async fn transfer_administration(
        &self,
        caller: &Address,
        new_administrator: &Address,
    ) -> Result<Outcome<Address>> {
        let mut state = self.state.write().await;
        state
            .require_administrator(caller)
            .inspect_err(|err| {
                warn!(caller = %caller, error = %err, "Administration transfer rejected")
            })?;

        let previous = std::mem::replace(&mut state.administrator, *new_administrator);
        info!(previous = %previous, current = %new_administrator, "Administration transferred");

        Ok(Outcome::with_event(
            *new_administrator,
            MarketEvent::AdministrationTransferred {
                previous,
                current: *new_administrator,
            },
        ))
    }

    /// Lift the ban on a slashed identity so it may join again
    pub async fn readmit_agent(&self, caller: &Address, target: &Address) -> Result<Outcome<()>> {
        let mut state = self.state.write().await;
        let checked = state.require_administrator(caller).and_then(|_| {
            if !state.is_slashed(target) {
                return Err(MarketError::NotSlashed {
                    agent: target.to_string(),
                });
            }
            Ok(())
        });
        checked.inspect_err(|err| {
            warn!(caller = %caller, target = %target, error = %err, "Readmission rejected")
        })?;

        state.agents.remove(target);
        info!(agent = %target, "Agent readmitted");

        Ok(Outcome::with_event((), MarketEvent::AgentReadmitted { agent: *target }))
    }

    // ========================================================================
    // Views
    // ========================================================================

    pub async fn is_validator(&self, who: &Address) -> bool {
        self.state.read().await.is_active_as(who, AgentRole::Validator)
    }

    pub async fn is_moderator(&self, who: &Address) -> bool {
        self.state.read().await.is_active_as(who, AgentRole::Moderator)
    }

    pub async fn get_agent_type(&self, who: &Address) -> AgentRole {
        let state = self.state.read().await;
        state
            .agents
            .get(who)
            .filter(|a| a.joined)
            .map(|a| a.role)
            .unwrap_or_default()
    }

    pub async fn get_agent(&self, who: &Address) -> Option<Agent> {
        self.state.read().await.agents.get(who).cloned()
    }

    /// Fixed bond for `role`
    pub fn get_stake_amount(&self, role: AgentRole) -> Amount {
        role.stake_amount()
    }

    pub async fn get_slash_request(&self, id: &SlashRequestId) -> Option<SlashRequest> {
        self.state.read().await.requests.get(id).cloned()
    }

    pub async fn slash_request_status(&self, id: &SlashRequestId) -> Option<SlashRequestStatus> {
        let state = self.state.read().await;
        let now = self.clock.now();
        state
            .requests
            .get(id)
            .map(|r| r.status(now, state.required_approvals))
    }

    /// Live request currently targeting `target`
    pub async fn live_slash_request(&self, target: &Address) -> Option<SlashRequest> {
        let state = self.state.read().await;
        state.live_request_for(target, self.clock.now()).cloned()
    }

    pub async fn has_approved(&self, id: &SlashRequestId, moderator: &Address) -> bool {
        self.state.read().await.votes.contains(&(*id, *moderator))
    }

    pub async fn required_approvals(&self) -> u32 {
        self.state.read().await.required_approvals
    }

    pub async fn administrator(&self) -> Address {
        self.state.read().await.administrator
    }

    /// Sum of all bonds currently held
    pub async fn total_staked(&self) -> Amount {
        let state = self.state.read().await;
        Amount::new(
            state
                .agents
                .values()
                .map(|a| a.stake.value())
                .fold(0u128, u128::saturating_add),
        )
    }
}

#[async_trait]
impl AgentDirectory for StakeLedger {
    async fn agent_type(&self, who: &Address) -> AgentRole {
        self.get_agent_type(who).await
    }

    async fn is_validator(&self, who: &Address) -> bool {
        StakeLedger::is_validator(self, who).await
    }

    async fn is_moderator(&self, who: &Address) -> bool {
        StakeLedger::is_moderator(self, who).await
    }

    async fn is_slashed(&self, who: &Address) -> bool {
        self.state.read().await.is_slashed(who)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentbond_ledger::InMemoryLedger;
    use agentbond_types::{ManualClock, MODERATOR_STAKE, NATIVE_DECIMALS, VALIDATOR_STAKE};
    use agentbond_ledger::{TransferLeg, TransferReceipt};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Ledger whose stake payouts can be made to fail on demand
    struct FlakyFunds {
        inner: InMemoryLedger,
        fail_payouts: AtomicBool,
    }

    #[async_trait]
    impl FundsTransfer for FlakyFunds {
        async fn transfer(
            &self,
            asset: &AssetId,
            from: &Address,
            to: &Address,
            amount: Amount,
            reason: TransferReason,
        ) -> Result<TransferReceipt> {
            if self.fail_payouts.load(Ordering::SeqCst) {
                return Err(MarketError::InsufficientFunds {
                    account: from.to_string(),
                    requested: amount.value(),
                    available: 0,
                });
            }
            self.inner.transfer(asset, from, to, amount, reason).await
        }

        async fn disburse(
            &self,
            asset: &AssetId,
            from: &Address,
            legs: Vec<TransferLeg>,
        ) -> Result<Vec<TransferReceipt>> {
            self.inner.disburse(asset, from, legs).await
        }

        async fn balance(&self, account: &Address, asset: &AssetId) -> Amount {
            self.inner.balance(account, asset).await
        }
    }

    struct Harness {
        ledger: InMemoryLedger,
        funds: Arc<FlakyFunds>,
        clock: Arc<ManualClock>,
        stakes: StakeLedger,
        admin: Address,
    }

    async fn harness() -> Harness {
        let ledger = InMemoryLedger::new();
        let funds = Arc::new(FlakyFunds {
            inner: ledger.clone(),
            fail_payouts: AtomicBool::new(false),
        });
        let clock = Arc::new(ManualClock::new(Timestamp(1_700_000_000)));
        let admin = Address::from_label("admin");
        let stakes = StakeLedger::new(admin, funds.clone(), clock.clone());
        Harness {
            ledger,
            funds,
            clock,
            stakes,
            admin,
        }
    }

    impl Harness {
        async fn funded(&self, label: &str) -> Address {
            let who = Address::from_label(label);
            let one = Amount::from_whole(1, NATIVE_DECIMALS).unwrap();
            self.ledger.mint(&who, &AssetId::native(), one).await.unwrap();
            who
        }

        async fn join(&self, label: &str, role: AgentRole) -> Address {
            let who = self.funded(label).await;
            self.stakes.join(&who, role, role.stake_amount()).await.unwrap();
            who
        }

        async fn native(&self, who: &Address) -> Amount {
            self.ledger.balance(who, &AssetId::native()).await
        }
    }

    #[tokio::test]
    async fn test_join_with_exact_stake() {
        let h = harness().await;
        let validator = h.funded("validator").await;

        let err = h
            .stakes
            .join(&validator, AgentRole::Validator, Amount::new(VALIDATOR_STAKE.value() - 1))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_STAKE_AMOUNT");
        assert!(!h.stakes.is_validator(&validator).await);

        let outcome = h
            .stakes
            .join(&validator, AgentRole::Validator, VALIDATOR_STAKE)
            .await
            .unwrap();
        assert_eq!(outcome.events.len(), 1);
        assert!(h.stakes.is_validator(&validator).await);
        assert!(!h.stakes.is_moderator(&validator).await);
        assert_eq!(h.native(&h.stakes.vault()).await, VALIDATOR_STAKE);
        assert_eq!(h.stakes.total_staked().await, VALIDATOR_STAKE);
    }

    #[tokio::test]
    async fn test_single_role_per_identity() {
        let h = harness().await;
        let agent = h.join("validator", AgentRole::Validator).await;

        let err = h
            .stakes
            .join(&agent, AgentRole::Moderator, MODERATOR_STAKE)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::AlreadyRegistered { .. }));
        assert_eq!(h.stakes.get_agent_type(&agent).await, AgentRole::Validator);
    }

    #[tokio::test]
    async fn test_join_rejects_none_role() {
        let h = harness().await;
        let who = h.funded("nobody").await;
        let err = h.stakes.join(&who, AgentRole::None, Amount::ZERO).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_AGENT_TYPE");
    }

    #[tokio::test]
    async fn test_join_without_funds_changes_nothing() {
        let h = harness().await;
        let broke = Address::from_label("broke");
        let err = h
            .stakes
            .join(&broke, AgentRole::Moderator, MODERATOR_STAKE)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::InsufficientFunds { .. }));
        assert!(h.stakes.get_agent(&broke).await.is_none());
    }

    #[tokio::test]
    async fn test_leave_returns_stake() {
        let h = harness().await;
        let moderator = h.join("moderator", AgentRole::Moderator).await;
        let before = h.native(&moderator).await;

        let outcome = h.stakes.leave(&moderator).await.unwrap();
        assert_eq!(outcome.value, MODERATOR_STAKE);
        assert_eq!(h.native(&moderator).await.value(), before.value() + MODERATOR_STAKE.value());
        assert!(h.stakes.get_agent(&moderator).await.is_none());

        let err = h.stakes.leave(&moderator).await.unwrap_err();
        assert_eq!(err.error_code(), "NOT_REGISTERED");
    }

    #[tokio::test]
    async fn test_slash_quorum_and_execution() {
        let h = harness().await;
        let m1 = h.join("m1", AgentRole::Moderator).await;
        let m2 = h.join("m2", AgentRole::Moderator).await;
        let m3 = h.join("m3", AgentRole::Moderator).await;
        let target = h.join("validator", AgentRole::Validator).await;

        let request = h.stakes.create_slash_request(&m1, &target).await.unwrap().value;
        assert_eq!(request.approvals, 0);
        assert_eq!(request.deadline, request.created_at.plus(SLASH_REQUEST_DURATION));

        h.stakes.approve_slash_request(&m1, &request.id).await.unwrap();
        let err = h.stakes.execute_slash_request(&h.admin, &request.id).await.unwrap_err();
        assert!(matches!(
            err,
            MarketError::NotEnoughApprovals {
                approvals: 1,
                required: 2,
                ..
            }
        ));

        h.stakes.approve_slash_request(&m2, &request.id).await.unwrap();
        assert_eq!(
            h.stakes.slash_request_status(&request.id).await,
            Some(SlashRequestStatus::Approvable)
        );

        let err = h.stakes.execute_slash_request(&m1, &request.id).await.unwrap_err();
        assert_eq!(err.error_code(), "NOT_ADMINISTRATOR");

        let outcome = h.stakes.execute_slash_request(&h.admin, &request.id).await.unwrap();
        assert!(outcome.value.executed);
        assert_eq!(
            outcome.events,
            vec![MarketEvent::AgentSlashed {
                target,
                role: AgentRole::Validator,
                executor: h.admin,
            }]
        );
        assert_eq!(h.native(&h.admin).await, VALIDATOR_STAKE);
        assert!(!h.stakes.is_validator(&target).await);
        assert_eq!(h.stakes.get_agent_type(&target).await, AgentRole::None);
        assert!(h.stakes.get_agent(&target).await.unwrap().slashed);

        let err = h.stakes.approve_slash_request(&m3, &request.id).await.unwrap_err();
        assert_eq!(err.error_code(), "SLASH_REQUEST_ALREADY_EXECUTED");
    }

    #[tokio::test]
    async fn test_vote_once_per_moderator() {
        let h = harness().await;
        let m1 = h.join("m1", AgentRole::Moderator).await;
        let target = h.join("validator", AgentRole::Validator).await;
        let id = h.stakes.create_slash_request(&m1, &target).await.unwrap().value.id;

        h.stakes.approve_slash_request(&m1, &id).await.unwrap();
        let err = h.stakes.approve_slash_request(&m1, &id).await.unwrap_err();
        assert_eq!(err.error_code(), "ALREADY_APPROVED");
        assert_eq!(h.stakes.get_slash_request(&id).await.unwrap().approvals, 1);
        assert!(h.stakes.has_approved(&id, &m1).await);
    }

    #[tokio::test]
    async fn test_only_moderators_slash() {
        let h = harness().await;
        let validator = h.join("validator", AgentRole::Validator).await;
        let other = h.join("other", AgentRole::Validator).await;

        let err = h.stakes.create_slash_request(&validator, &other).await.unwrap_err();
        assert_eq!(err.error_code(), "NOT_REGISTERED");

        let m1 = h.join("m1", AgentRole::Moderator).await;
        let stranger = Address::from_label("stranger");
        let err = h.stakes.create_slash_request(&m1, &stranger).await.unwrap_err();
        assert_eq!(err.error_code(), "SLASH_TARGET_NOT_REGISTERED");
    }

    #[tokio::test]
    async fn test_duplicate_and_expiry() {
        let h = harness().await;
        let m1 = h.join("m1", AgentRole::Moderator).await;
        let m2 = h.join("m2", AgentRole::Moderator).await;
        let target = h.join("validator", AgentRole::Validator).await;

        let first = h.stakes.create_slash_request(&m1, &target).await.unwrap().value;
        h.clock.advance(60);
        let err = h.stakes.create_slash_request(&m2, &target).await.unwrap_err();
        assert_eq!(err.error_code(), "DUPLICATE");

        // Approvals and execution are allowed up to the deadline itself
        h.clock.set(first.deadline);
        h.stakes.approve_slash_request(&m1, &first.id).await.unwrap();

        h.clock.advance(1);
        let err = h.stakes.approve_slash_request(&m2, &first.id).await.unwrap_err();
        assert_eq!(err.error_code(), "SLASH_REQUEST_EXPIRED");
        assert_eq!(
            h.stakes.slash_request_status(&first.id).await,
            Some(SlashRequestStatus::Expired)
        );
        assert!(h.stakes.live_slash_request(&target).await.is_none());

        let second = h.stakes.create_slash_request(&m2, &target).await.unwrap().value;
        assert_ne!(second.id, first.id);
    }

    #[tokio::test]
    async fn test_unknown_slash_request() {
        let h = harness().await;
        let m1 = h.join("m1", AgentRole::Moderator).await;
        let target = h.join("validator", AgentRole::Validator).await;
        let unknown = SlashRequestId::derive(&target, Timestamp(1));

        let err = h.stakes.approve_slash_request(&m1, &unknown).await.unwrap_err();
        assert_eq!(err.error_code(), "SLASH_REQUEST_NOT_FOUND");
        let err = h.stakes.execute_slash_request(&h.admin, &unknown).await.unwrap_err();
        assert_eq!(err.error_code(), "SLASH_REQUEST_NOT_FOUND");
        assert!(!h.stakes.has_approved(&unknown, &m1).await);
    }

    #[tokio::test]
    async fn test_execution_bounded_by_deadline() {
        let h = harness().await;
        let m1 = h.join("m1", AgentRole::Moderator).await;
        let m2 = h.join("m2", AgentRole::Moderator).await;
        let target = h.join("validator", AgentRole::Validator).await;

        let request = h.stakes.create_slash_request(&m1, &target).await.unwrap().value;
        h.stakes.approve_slash_request(&m1, &request.id).await.unwrap();
        h.stakes.approve_slash_request(&m2, &request.id).await.unwrap();

        h.clock.set(request.deadline.plus(1));
        let err = h.stakes.execute_slash_request(&h.admin, &request.id).await.unwrap_err();
        assert!(matches!(err, MarketError::SlashRequestExpired { .. }));
        assert!(h.stakes.is_validator(&target).await);
        assert_eq!(h.stakes.get_agent(&target).await.unwrap().stake, VALIDATOR_STAKE);
        assert_eq!(h.native(&h.admin).await, Amount::ZERO);
    }

    #[tokio::test]
    async fn test_execute_only_once() {
        let h = harness().await;
        let m1 = h.join("m1", AgentRole::Moderator).await;
        let target = h.join("validator", AgentRole::Validator).await;
        h.stakes.change_required_approvals(&h.admin, 1).await.unwrap();

        let id = h.stakes.create_slash_request(&m1, &target).await.unwrap().value.id;
        h.stakes.approve_slash_request(&m1, &id).await.unwrap();
        h.stakes.execute_slash_request(&h.admin, &id).await.unwrap();

        let err = h.stakes.execute_slash_request(&h.admin, &id).await.unwrap_err();
        assert_eq!(err.error_code(), "SLASH_REQUEST_ALREADY_EXECUTED");
        assert_eq!(h.native(&h.admin).await, VALIDATOR_STAKE);
        assert_eq!(h.native(&h.stakes.vault()).await, MODERATOR_STAKE);
    }

    #[tokio::test]
    async fn test_failed_stake_return_keeps_agent() {
        let h = harness().await;
        let moderator = h.join("moderator", AgentRole::Moderator).await;
        let before = h.native(&moderator).await;

        h.funds.fail_payouts.store(true, Ordering::SeqCst);
        let err = h.stakes.leave(&moderator).await.unwrap_err();
        assert_eq!(err.error_code(), "INSUFFICIENT_FUNDS");
        assert!(h.stakes.is_moderator(&moderator).await);
        assert_eq!(h.stakes.total_staked().await, MODERATOR_STAKE);
        assert_eq!(h.native(&moderator).await, before);

        h.funds.fail_payouts.store(false, Ordering::SeqCst);
        h.stakes.leave(&moderator).await.unwrap();
        assert_eq!(h.native(&moderator).await, before.checked_add(MODERATOR_STAKE).unwrap());
    }

    #[tokio::test]
    async fn test_failed_forfeit_restores_request() {
        let h = harness().await;
        let m1 = h.join("m1", AgentRole::Moderator).await;
        let target = h.join("validator", AgentRole::Validator).await;
        h.stakes.change_required_approvals(&h.admin, 1).await.unwrap();
        let id = h.stakes.create_slash_request(&m1, &target).await.unwrap().value.id;
        h.stakes.approve_slash_request(&m1, &id).await.unwrap();

        h.funds.fail_payouts.store(true, Ordering::SeqCst);
        let err = h.stakes.execute_slash_request(&h.admin, &id).await.unwrap_err();
        assert_eq!(err.error_code(), "INSUFFICIENT_FUNDS");

        let request = h.stakes.get_slash_request(&id).await.unwrap();
        assert!(!request.executed);
        assert_eq!(request.approvals, 1);
        assert_eq!(h.stakes.live_slash_request(&target).await.map(|r| r.id), Some(id));
        assert!(h.stakes.is_validator(&target).await);
        assert!(!AgentDirectory::is_slashed(&h.stakes, &target).await);
        assert_eq!(h.native(&h.admin).await, Amount::ZERO);

        h.funds.fail_payouts.store(false, Ordering::SeqCst);
        h.stakes.execute_slash_request(&h.admin, &id).await.unwrap();
        assert_eq!(h.native(&h.admin).await, VALIDATOR_STAKE);
    }

    #[tokio::test]
    async fn test_cannot_leave_under_pending_slash() {
        let h = harness().await;
        let m1 = h.join("m1", AgentRole::Moderator).await;
        let target = h.join("validator", AgentRole::Validator).await;
        let request = h.stakes.create_slash_request(&m1, &target).await.unwrap().value;

        let err = h.stakes.leave(&target).await.unwrap_err();
        assert_eq!(err.error_code(), "PENDING_SLASH_REQUEST");

        h.clock.set(request.deadline.plus(1));
        h.stakes.leave(&target).await.unwrap();
    }

    #[tokio::test]
    async fn test_slashed_agent_banned_until_readmitted() {
        let h = harness().await;
        let m1 = h.join("m1", AgentRole::Moderator).await;
        let target = h.join("validator", AgentRole::Validator).await;
        h.stakes.change_required_approvals(&h.admin, 1).await.unwrap();

        let id = h.stakes.create_slash_request(&m1, &target).await.unwrap().value.id;
        h.stakes.approve_slash_request(&m1, &id).await.unwrap();
        h.stakes.execute_slash_request(&h.admin, &id).await.unwrap();

        let err = h.stakes.join(&target, AgentRole::Validator, VALIDATOR_STAKE).await.unwrap_err();
        assert_eq!(err.error_code(), "SLASHED_AGENT");
        let err = h.stakes.leave(&target).await.unwrap_err();
        assert_eq!(err.error_code(), "SLASHED_AGENT");
        assert!(AgentDirectory::is_slashed(&h.stakes, &target).await);

        let err = h.stakes.readmit_agent(&m1, &target).await.unwrap_err();
        assert_eq!(err.error_code(), "NOT_ADMINISTRATOR");
        let err = h.stakes.readmit_agent(&h.admin, &m1).await.unwrap_err();
        assert_eq!(err.error_code(), "NOT_SLASHED");

        h.stakes.readmit_agent(&h.admin, &target).await.unwrap();
        h.stakes.join(&target, AgentRole::Validator, VALIDATOR_STAKE).await.unwrap();
        assert!(h.stakes.is_validator(&target).await);
    }

    #[tokio::test]
    async fn test_slashed_moderator_cannot_vote() {
        let h = harness().await;
        let m1 = h.join("m1", AgentRole::Moderator).await;
        let m2 = h.join("m2", AgentRole::Moderator).await;
        let target = h.join("validator", AgentRole::Validator).await;
        h.stakes.change_required_approvals(&h.admin, 1).await.unwrap();

        let id = h.stakes.create_slash_request(&m1, &m2).await.unwrap().value.id;
        h.stakes.approve_slash_request(&m1, &id).await.unwrap();
        h.stakes.execute_slash_request(&h.admin, &id).await.unwrap();

        let err = h.stakes.create_slash_request(&m2, &target).await.unwrap_err();
        assert_eq!(err.error_code(), "SLASHED_AGENT");
    }

    #[tokio::test]
    async fn test_administration() {
        let h = harness().await;
        let err = h.stakes.change_required_approvals(&h.admin, 0).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_REQUIRED_APPROVALS");

        let outcome = h.stakes.change_required_approvals(&h.admin, 3).await.unwrap();
        assert_eq!(
            outcome.events,
            vec![MarketEvent::RequiredApprovalsChanged { previous: 2, current: 3 }]
        );
        assert_eq!(h.stakes.required_approvals().await, 3);

        let successor = Address::from_label("successor");
        h.stakes.transfer_administration(&h.admin, &successor).await.unwrap();
        assert_eq!(h.stakes.administrator().await, successor);
        let err = h.stakes.change_required_approvals(&h.admin, 1).await.unwrap_err();
        assert_eq!(err.error_code(), "NOT_ADMINISTRATOR");
    }

    #[test]
    fn test_builder_rejects_zero_quorum() {
        let ledger = InMemoryLedger::new();
        let clock = Arc::new(ManualClock::new(Timestamp(0)));
        let result =
            StakeLedger::new(Address::ZERO, Arc::new(ledger), clock).with_required_approvals(0);
        assert!(result.is_err());
    }

    proptest! {
        #[test]
        fn prop_approvals_count_distinct_moderators(
            voters in prop::collection::vec(0usize..4, 0..16),
        ) {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async {
                let h = harness().await;
                let mut moderators = Vec::new();
                for i in 0..4 {
                    moderators.push(h.join(&format!("m{i}"), AgentRole::Moderator).await);
                }
                let target = h.join("validator", AgentRole::Validator).await;
                let id = h
                    .stakes
                    .create_slash_request(&moderators[0], &target)
                    .await
                    .unwrap()
                    .value
                    .id;

                let mut distinct = HashSet::new();
                for voter in voters {
                    let result = h.stakes.approve_slash_request(&moderators[voter], &id).await;
                    assert_eq!(result.is_ok(), distinct.insert(voter));
                }

                let request = h.stakes.get_slash_request(&id).await.unwrap();
                assert_eq!(request.approvals as usize, distinct.len());
                let executed = h.stakes.execute_slash_request(&h.admin, &id).await;
                assert_eq!(executed.is_ok(), distinct.len() >= 2);
            });
        }
    }
}
