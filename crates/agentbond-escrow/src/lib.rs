//! AgentBond Escrow - deal lifecycle and payouts
//!
//! A business escrows the full deal amount up front. The counterparty
//! accepts, a registered validator attests the result, and the escrow is
//! released along one of three paths:
//!
//! - Validated: the counterparty withdraws, paying the validator a 2% fee
//! - Appeal: a moderator picks a winner and keeps a 10% fee
//! - Lapsed appeal: nobody ruled in time, the business is refunded in full
//!
//! Role checks read the agent registry through [`AgentDirectory`]; this crate
//! never mutates it.

use std::collections::HashMap;
use std::sync::Arc;

use agentbond_ledger::{FundsTransfer, TransferLeg, TransferReason, TransferReceipt};
use agentbond_staking::AgentDirectory;
use agentbond_types::{
    Address, Amount, AssetId, Clock, ContentHash, Deal, DealId, DealParty, DealResult, DealState,
    FeeSplit, MarketError, MarketEvent, Outcome, Result, Timestamp, DEAL_LIFESPAN, FEE_DENOMINATOR,
    MODERATOR_FEE, VALIDATOR_FEE,
};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Label the escrow vault address is derived from
pub const ESCROW_VAULT_LABEL: &str = "agentbond:escrow-vault";

/// Terms of a new deal, as proposed by the business
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DealProposal {
    pub validator: Address,
    pub counterparty: Address,
    pub content_hash: ContentHash,
    pub deadline: Timestamp,
    pub amount: Amount,
}

struct DealBook {
    deals: HashMap<DealId, Deal>,
    next_id: u64,
}

impl DealBook {
    fn get(&self, id: DealId) -> Result<&Deal> {
        self.deals.get(&id).ok_or_else(|| MarketError::DealNotFound {
            deal_id: id.to_string(),
        })
    }
}

fn require_party(deal: &Deal, caller: &Address, party: DealParty) -> Result<()> {
    if deal.party(caller) != Some(party) {
        return Err(MarketError::Unauthorized {
            deal_id: deal.id.to_string(),
            caller: caller.to_string(),
            required: party.as_str().to_string(),
        });
    }
    Ok(())
}

fn require_state(deal: &Deal, expected: DealState) -> Result<()> {
    if deal.state != expected {
        return Err(MarketError::InvalidDealState {
            deal_id: deal.id.to_string(),
            expected: expected.to_string(),
            actual: deal.state.to_string(),
        });
    }
    Ok(())
}

fn check_proposal(business: &Address, proposal: &DealProposal, now: Timestamp) -> Result<()> {
    if proposal.amount.is_zero() {
        return Err(MarketError::InvalidAmount {
            message: "Deal amount must be greater than zero".to_string(),
        });
    }
    let latest = now.plus(DEAL_LIFESPAN);
    if proposal.deadline <= now || proposal.deadline > latest {
        return Err(MarketError::InvalidDeadline {
            deadline: proposal.deadline.to_string(),
            earliest: now.to_string(),
            latest: latest.to_string(),
        });
    }
    let reason = if business == &proposal.counterparty {
        Some("business and counterparty are the same identity")
    } else if business == &proposal.validator {
        Some("business cannot validate its own deal")
    } else if proposal.counterparty == proposal.validator {
        Some("counterparty cannot validate its own deal")
    } else {
        None
    };
    if let Some(reason) = reason {
        return Err(MarketError::InvalidParticipants {
            reason: reason.to_string(),
        });
    }
    Ok(())
}

/// Owner of every deal record and of the escrowed funds
pub struct DealManager {
    book: RwLock<DealBook>,
    directory: Arc<dyn AgentDirectory>,
    funds: Arc<dyn FundsTransfer>,
    clock: Arc<dyn Clock>,
    asset: AssetId,
    vault: Address,
}

impl DealManager {
    pub fn new(
        asset: AssetId,
        directory: Arc<dyn AgentDirectory>,
        funds: Arc<dyn FundsTransfer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            book: RwLock::new(DealBook {
                deals: HashMap::new(),
                next_id: 1,
            }),
            directory,
            funds,
            clock,
            asset,
            vault: Address::from_label(ESCROW_VAULT_LABEL),
        }
    }

    /// Account holding every escrowed deal amount
    pub fn vault(&self) -> Address {
        self.vault
    }

    pub fn asset(&self) -> &AssetId {
        &self.asset
    }

    /// Mark the deal closed and pay `legs` from the vault
    ///
    /// Zero legs are skipped. If the payout fails the deal is restored to
    /// `before` and the error returned.
    async fn settle(
        &self,
        book: &mut DealBook,
        before: Deal,
        legs: Vec<TransferLeg>,
    ) -> Result<Vec<TransferReceipt>> {
        let mut closed = before.clone();
        closed.state = DealState::Closed;
        book.deals.insert(before.id, closed);

        let legs: Vec<TransferLeg> = legs.into_iter().filter(|l| !l.amount.is_zero()).collect();
        if legs.is_empty() {
            return Ok(Vec::new());
        }
        match self.funds.disburse(&self.asset, &self.vault, legs).await {
            Ok(receipts) => Ok(receipts),
            Err(err) => {
                warn!(deal_id = %before.id, error = %err, "Payout failed, restoring deal");
                book.deals.insert(before.id, before);
                Err(err)
            }
        }
    }

    /// Propose a deal and escrow its amount from the business
    pub async fn create_deal(
        &self,
        caller: &Address,
        proposal: DealProposal,
    ) -> Result<Outcome<Deal>> {
        let mut book = self.book.write().await;
        let now = self.clock.now();
        check_proposal(caller, &proposal, now)
            .inspect_err(|err| warn!(business = %caller, error = %err, "Deal proposal rejected"))?;
        if !self.directory.is_validator(&proposal.validator).await {
            let err = MarketError::InvalidValidator {
                validator: proposal.validator.to_string(),
            };
            warn!(business = %caller, error = %err, "Deal proposal rejected");
            return Err(err);
        }

        let id = DealId(book.next_id);
        self.funds
            .transfer(
                &self.asset,
                caller,
                &self.vault,
                proposal.amount,
                TransferReason::DealEscrow { deal_id: id },
            )
            .await
            .inspect_err(|err| {
                warn!(business = %caller, deal_id = %id, error = %err, "Deal escrow failed")
            })?;

        let deal = Deal {
            id,
            business: *caller,
            counterparty: proposal.counterparty,
            validator: proposal.validator,
            content_hash: proposal.content_hash,
            deadline: proposal.deadline,
            amount: proposal.amount,
            state: DealState::Created,
            created_at: now,
            resolved_at: None,
            appealed_at: None,
        };
        book.deals.insert(id, deal.clone());
        book.next_id += 1;
        info!(
            deal_id = %id,
            business = %caller,
            counterparty = %deal.counterparty,
            validator = %deal.validator,
            amount = %deal.amount,
            deadline = %deal.deadline,
            "Deal created"
        );

        Ok(Outcome::with_event(
            deal.clone(),
            MarketEvent::DealProposalCreated {
                deal_id: id,
                business: *caller,
                counterparty: deal.counterparty,
                validator: deal.validator,
                amount: deal.amount,
                deadline: deal.deadline,
            },
        ))
    }

    pub async fn accept_deal(&self, caller: &Address, id: DealId) -> Result<Outcome<Deal>> {
        let mut book = self.book.write().await;
        let checked = book.get(id).and_then(|deal| {
            require_party(deal, caller, DealParty::Counterparty)?;
            require_state(deal, DealState::Created)?;
            Ok(deal.clone())
        });
        let mut deal = checked.inspect_err(|err| {
            warn!(deal_id = %id, caller = %caller, error = %err, "Accept rejected")
        })?;

        deal.state = DealState::Applied;
        book.deals.insert(id, deal.clone());
        info!(deal_id = %id, counterparty = %caller, "Deal accepted");

        Ok(Outcome::with_event(
            deal,
            MarketEvent::DealAccepted {
                deal_id: id,
                counterparty: *caller,
            },
        ))
    }

    /// Validator attests the work, within the grace window after the deadline
    pub async fn set_deal_result(
        &self,
        caller: &Address,
        id: DealId,
        result: DealResult,
    ) -> Result<Outcome<Deal>> {
        let mut book = self.book.write().await;
        let now = self.clock.now();
        let still_validator = self.directory.is_validator(caller).await;
        let checked = book.get(id).and_then(|deal| {
            require_party(deal, caller, DealParty::Validator)?;
            if !still_validator {
                return Err(MarketError::InvalidValidator {
                    validator: caller.to_string(),
                });
            }
            require_state(deal, DealState::Applied)?;
            if now > deal.validation_closes_at() {
                return Err(MarketError::ValidationWindowClosed {
                    deal_id: id.to_string(),
                    closed_at: deal.validation_closes_at().to_string(),
                });
            }
            Ok(deal.clone())
        });
        let mut deal =
            checked.inspect_err(|err| {
                warn!(deal_id = %id, caller = %caller, error = %err, "Deal result rejected")
            })?;

        deal.state = result.into();
        deal.resolved_at = Some(now);
        book.deals.insert(id, deal.clone());
        info!(deal_id = %id, validator = %caller, result = %deal.state, "Deal result submitted");

        Ok(Outcome::with_event(
            deal,
            MarketEvent::DealResultSubmitted {
                deal_id: id,
                validator: *caller,
                result,
            },
        ))
    }

    /// Counterparty collects a validated deal; the validator takes its fee
    pub async fn withdraw_payment(
        &self,
        caller: &Address,
        id: DealId,
    ) -> Result<Outcome<FeeSplit>> {
        let mut book = self.book.write().await;
        let checked = book.get(id).and_then(|deal| {
            require_party(deal, caller, DealParty::Counterparty)?;
            require_state(deal, DealState::Validated)?;
            let split = deal.amount.split_fee(VALIDATOR_FEE, FEE_DENOMINATOR)?;
            Ok((deal.clone(), split))
        });
        let (deal, split) =
            checked.inspect_err(|err| {
                warn!(deal_id = %id, caller = %caller, error = %err, "Withdrawal rejected")
            })?;

        let legs = vec![
            TransferLeg::new(
                *caller,
                split.remainder,
                TransferReason::CounterpartyPayout { deal_id: id },
            ),
            TransferLeg::new(
                deal.validator,
                split.fee,
                TransferReason::ValidatorFee { deal_id: id },
            ),
        ];
        let validator = deal.validator;
        self.settle(&mut book, deal, legs).await?;
        info!(
            deal_id = %id,
            counterparty = %caller,
            counterparty_amount = %split.remainder,
            validator = %validator,
            validator_fee = %split.fee,
            "Payment withdrawn"
        );

        Ok(Outcome::with_event(
            split,
            MarketEvent::PaymentWithdrawn {
                deal_id: id,
                counterparty: *caller,
                counterparty_amount: split.remainder,
                validator,
                validator_fee: split.fee,
            },
        ))
    }

    /// Business escalates a rejected or unattested deal to the moderators
    pub async fn appeal_deal(&self, caller: &Address, id: DealId) -> Result<Outcome<Deal>> {
        let mut book = self.book.write().await;
        let now = self.clock.now();
        let checked = book.get(id).and_then(|deal| {
            require_party(deal, caller, DealParty::Business)?;
            if !deal.can_be_appealed(now) {
                return Err(MarketError::DealCannotBeAppealed {
                    deal_id: id.to_string(),
                    state: deal.state.to_string(),
                });
            }
            Ok(deal.clone())
        });
        let mut deal = checked.inspect_err(|err| {
            warn!(deal_id = %id, caller = %caller, error = %err, "Appeal rejected")
        })?;

        let from = deal.state;
        deal.state = DealState::Appeal;
        deal.appealed_at = Some(now);
        book.deals.insert(id, deal.clone());
        info!(deal_id = %id, business = %caller, from = %from, "Deal appealed");

        Ok(Outcome::with_event(
            deal,
            MarketEvent::DealAppealed {
                deal_id: id,
                business: *caller,
            },
        ))
    }

    /// A moderator rules on an appeal, paying the winner and keeping a fee
    pub async fn submit_moderator_verdict(
        &self,
        caller: &Address,
        id: DealId,
        winner: &Address,
    ) -> Result<Outcome<FeeSplit>> {
        let mut book = self.book.write().await;
        let now = self.clock.now();
        let slashed = self.directory.is_slashed(caller).await;
        let moderator = self.directory.is_moderator(caller).await;
        let checked = book.get(id).and_then(|deal| {
            if slashed {
                return Err(MarketError::SlashedAgent {
                    agent: caller.to_string(),
                });
            }
            if !moderator {
                return Err(MarketError::NotRegistered {
                    agent: caller.to_string(),
                });
            }
            if deal.party(caller).is_some() {
                return Err(MarketError::ConflictOfInterest {
                    deal_id: id.to_string(),
                    moderator: caller.to_string(),
                });
            }
            require_state(deal, DealState::Appeal)?;
            if !matches!(deal.party(winner), Some(DealParty::Business | DealParty::Counterparty)) {
                return Err(MarketError::InvalidVerdictWinner {
                    deal_id: id.to_string(),
                    winner: winner.to_string(),
                });
            }
            if let Some(closes_at) = deal.appeal_closes_at().filter(|at| now > *at) {
                return Err(MarketError::AppealPeriodElapsed {
                    deal_id: id.to_string(),
                    closed_at: closes_at.to_string(),
                });
            }
            let split = deal.amount.split_fee(MODERATOR_FEE, FEE_DENOMINATOR)?;
            Ok((deal.clone(), split))
        });
        let (deal, split) =
            checked.inspect_err(|err| {
                warn!(deal_id = %id, caller = %caller, error = %err, "Verdict rejected")
            })?;

        let legs = vec![
            TransferLeg::new(
                *winner,
                split.remainder,
                TransferReason::VerdictPayout { deal_id: id },
            ),
            TransferLeg::new(*caller, split.fee, TransferReason::ModeratorFee { deal_id: id }),
        ];
        self.settle(&mut book, deal, legs).await?;
        info!(
            deal_id = %id,
            moderator = %caller,
            winner = %winner,
            winner_amount = %split.remainder,
            moderator_fee = %split.fee,
            "Moderator verdict submitted"
        );

        Ok(Outcome::with_event(
            split,
            MarketEvent::ModeratorVerdictSubmitted {
                deal_id: id,
                moderator: *caller,
                winner: *winner,
                winner_amount: split.remainder,
                moderator_fee: split.fee,
            },
        ))
    }

    /// Business reclaims the full amount of an appeal nobody ruled on in time
    pub async fn close_lapsed_appeal(
        &self,
        caller: &Address,
        id: DealId,
    ) -> Result<Outcome<Amount>> {
        let mut book = self.book.write().await;
        let now = self.clock.now();
        let checked = book.get(id).and_then(|deal| {
            require_party(deal, caller, DealParty::Business)?;
            require_state(deal, DealState::Appeal)?;
            match deal.appeal_closes_at() {
                Some(closes_at) if now <= closes_at => Err(MarketError::AppealPeriodActive {
                    deal_id: id.to_string(),
                    closes_at: closes_at.to_string(),
                }),
                _ => Ok(deal.clone()),
            }
        });
        let deal = checked.inspect_err(|err| {
            warn!(deal_id = %id, caller = %caller, error = %err, "Lapse close rejected")
        })?;

        let refund = deal.amount;
        let reason = TransferReason::AppealRefund { deal_id: id };
        let legs = vec![TransferLeg::new(*caller, refund, reason)];
        self.settle(&mut book, deal, legs).await?;
        info!(deal_id = %id, business = %caller, refund = %refund, "Lapsed appeal closed");

        Ok(Outcome::with_event(
            refund,
            MarketEvent::AppealLapsed {
                deal_id: id,
                business: *caller,
                refund,
            },
        ))
    }

    // ========================================================================
    // Views
    // ========================================================================

    pub async fn get_deal(&self, id: DealId) -> Option<Deal> {
        self.book.read().await.deals.get(&id).cloned()
    }

    /// Number of deals ever created
    pub async fn deal_count(&self) -> u64 {
        self.book.read().await.next_id - 1
    }

    /// Deals `who` takes any part in, oldest first
    pub async fn deals_for(&self, who: &Address) -> Vec<Deal> {
        let book = self.book.read().await;
        let mut deals: Vec<Deal> =
            book.deals.values().filter(|d| d.involves(who)).cloned().collect();
        deals.sort_by_key(|d| d.id);
        deals
    }

    /// Amount still held for deals that have not closed
    pub async fn escrowed_total(&self) -> Amount {
        let book = self.book.read().await;
        Amount::new(
            book.deals
                .values()
                .filter(|d| !d.state.is_terminal())
                .map(|d| d.amount.value())
                .fold(0u128, u128::saturating_add),
        )
    }
}
