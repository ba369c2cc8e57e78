//! AgentBond Ledger - funds movement for stakes and escrow
//!
//! The ledger is:
//! - Asset-scoped (native currency for stakes, one token for deals)
//! - Account-keyed by [`Address`]
//! - Double-entry (every credit has a corresponding debit)
//! - Append-only (entries are never rewritten)
//!
//! # Invariants
//!
//! 1. No negative balances
//! 2. Every entry has a reason
//! 3. A transfer or disbursement applies completely or not at all

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use agentbond_types::{Address, Amount, AssetId, DealId, MarketError, Result, SlashRequestId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Unique identifier for a ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub String);

impl EntryId {
    pub fn new() -> Self {
        Self(format!("entry_{}", Uuid::new_v4()))
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifier of one executed transfer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptId(pub String);

impl ReceiptId {
    pub fn new() -> Self {
        Self(format!("xfer_{}", Uuid::new_v4()))
    }
}

impl Default for ReceiptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReceiptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Type of ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    /// Credit (increase) to an account
    Credit,
    /// Debit (decrease) from an account
    Debit,
}

/// Why value moved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransferReason {
    /// Funds created out of thin air (tests, demos, faucets)
    Mint,
    /// Agent bond pulled into the stake vault
    StakeDeposit,
    /// Bond returned to an agent that left
    StakeReturn,
    /// Bond forfeited to the slash executor
    StakeForfeit { request_id: SlashRequestId },
    /// Deal amount pulled into the escrow vault
    DealEscrow { deal_id: DealId },
    ValidatorFee { deal_id: DealId },
    CounterpartyPayout { deal_id: DealId },
    ModeratorFee { deal_id: DealId },
    VerdictPayout { deal_id: DealId },
    /// Full refund after an appeal lapsed without a verdict
    AppealRefund { deal_id: DealId },
}

impl TransferReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mint => "mint",
            Self::StakeDeposit => "stake_deposit",
            Self::StakeReturn => "stake_return",
            Self::StakeForfeit { .. } => "stake_forfeit",
            Self::DealEscrow { .. } => "deal_escrow",
            Self::ValidatorFee { .. } => "validator_fee",
            Self::CounterpartyPayout { .. } => "counterparty_payout",
            Self::ModeratorFee { .. } => "moderator_fee",
            Self::VerdictPayout { .. } => "verdict_payout",
            Self::AppealRefund { .. } => "appeal_refund",
        }
    }
}

/// One payout of a disbursement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLeg {
    pub to: Address,
    pub amount: Amount,
    pub reason: TransferReason,
}

impl TransferLeg {
    pub fn new(to: Address, amount: Amount, reason: TransferReason) -> Self {
        Self { to, amount, reason }
    }
}

/// Proof that a transfer was applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub receipt_id: ReceiptId,
    pub asset: AssetId,
    pub from: Address,
    pub to: Address,
    pub amount: Amount,
    pub reason: TransferReason,
    pub executed_at: DateTime<Utc>,
}

/// A single ledger entry (one side of a double-entry)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: EntryId,
    pub account: Address,
    pub asset: AssetId,
    pub entry_type: EntryType,
    pub amount: Amount,
    pub balance_after: Amount,
    pub reason: TransferReason,
    pub receipt_id: ReceiptId,
    pub created_at: DateTime<Utc>,
}

/// Value movement used by the stake and escrow ledgers
///
/// A transfer either fully applies (debit and credit) or fails and changes
/// nothing. A disbursement pays every leg from one source or none of them.
#[async_trait]
pub trait FundsTransfer: Send + Sync {
    async fn transfer(
        &self,
        asset: &AssetId,
        from: &Address,
        to: &Address,
        amount: Amount,
        reason: TransferReason,
    ) -> Result<TransferReceipt>;

    async fn disburse(
        &self,
        asset: &AssetId,
        from: &Address,
        legs: Vec<TransferLeg>,
    ) -> Result<Vec<TransferReceipt>>;

    async fn balance(&self, account: &Address, asset: &AssetId) -> Amount;
}

/// Account state in the ledger
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountState {
    pub balances: HashMap<AssetId, Amount>,
    pub entry_count: u64,
}

impl AccountState {
    pub fn balance(&self, asset: &AssetId) -> Amount {
        self.balances.get(asset).copied().unwrap_or(Amount::ZERO)
    }
}

struct Posting {
    account: Address,
    entry_type: EntryType,
    amount: Amount,
    reason: TransferReason,
    receipt_id: ReceiptId,
}

#[derive(Default)]
struct LedgerBook {
    accounts: HashMap<Address, AccountState>,
    entries: Vec<LedgerEntry>,
}

impl LedgerBook {
    fn balance(&self, account: &Address, asset: &AssetId) -> Amount {
        self.accounts
            .get(account)
            .map(|a| a.balance(asset))
            .unwrap_or(Amount::ZERO)
    }

    /// Apply postings in order, all or nothing
    fn post(&mut self, asset: &AssetId, postings: Vec<Posting>) -> Result<()> {
        // Stage every resulting balance before touching the book
        let mut staged: HashMap<Address, Amount> = HashMap::new();
        let mut after = Vec::with_capacity(postings.len());
        for posting in &postings {
            let current = match staged.get(&posting.account) {
                Some(balance) => *balance,
                None => self.balance(&posting.account, asset),
            };
            let next = match posting.entry_type {
                EntryType::Credit => current.checked_add(posting.amount)?,
                EntryType::Debit => {
                    current
                        .checked_sub(posting.amount)
                        .map_err(|_| MarketError::InsufficientFunds {
                            account: posting.account.to_string(),
                            requested: posting.amount.value(),
                            available: current.value(),
                        })?
                }
            };
            staged.insert(posting.account, next);
            after.push(next);
        }

        let now = Utc::now();
        for (posting, balance_after) in postings.into_iter().zip(after) {
            let account = self.accounts.entry(posting.account).or_default();
            account.balances.insert(asset.clone(), balance_after);
            account.entry_count += 1;
            self.entries.push(LedgerEntry {
                entry_id: EntryId::new(),
                account: posting.account,
                asset: asset.clone(),
                entry_type: posting.entry_type,
                amount: posting.amount,
                balance_after,
                reason: posting.reason,
                receipt_id: posting.receipt_id,
                created_at: now,
            });
        }
        Ok(())
    }
}

fn require_positive(amount: Amount) -> Result<()> {
    if amount.is_zero() {
        return Err(MarketError::InvalidAmount {
            message: "Amount must be greater than zero".to_string(),
        });
    }
    Ok(())
}

/// In-memory double-entry ledger
///
/// Thread-safe and cheap to clone; clones share the same book.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    book: Arc<RwLock<LedgerBook>>,
}

impl InMemoryLedger {
    /// Create a new empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit new funds to an account
    pub async fn mint(
        &self,
        to: &Address,
        asset: &AssetId,
        amount: Amount,
    ) -> Result<TransferReceipt> {
        require_positive(amount)?;
        let receipt_id = ReceiptId::new();
        let mut book = self.book.write().await;
        book.post(
            asset,
            vec![Posting {
                account: *to,
                entry_type: EntryType::Credit,
                amount,
                reason: TransferReason::Mint,
                receipt_id: receipt_id.clone(),
            }],
        )?;
        info!(account = %to, asset = %asset, amount = %amount, "Minted funds");
        Ok(TransferReceipt {
            receipt_id,
            asset: asset.clone(),
            from: Address::ZERO,
            to: *to,
            amount,
            reason: TransferReason::Mint,
            executed_at: Utc::now(),
        })
    }

    /// Get all entries for an account
    pub async fn account_entries(&self, account: &Address) -> Vec<LedgerEntry> {
        let book = self.book.read().await;
        book.entries
            .iter()
            .filter(|e| &e.account == account)
            .cloned()
            .collect()
    }

    /// Get entries belonging to one transfer
    pub async fn receipt_entries(&self, receipt_id: &ReceiptId) -> Vec<LedgerEntry> {
        let book = self.book.read().await;
        book.entries
            .iter()
            .filter(|e| &e.receipt_id == receipt_id)
            .cloned()
            .collect()
    }

    /// Get the total number of entries
    pub async fn entry_count(&self) -> usize {
        self.book.read().await.entries.len()
    }

    /// Get recent entries (newest first)
    pub async fn recent_entries(&self, limit: usize) -> Vec<LedgerEntry> {
        let book = self.book.read().await;
        book.entries.iter().rev().take(limit).cloned().collect()
    }

    /// Get account state
    pub async fn account_state(&self, account: &Address) -> Option<AccountState> {
        self.book.read().await.accounts.get(account).cloned()
    }

    /// Sum of every account's balance in `asset`
    pub async fn total_balance(&self, asset: &AssetId) -> Result<Amount> {
        let book = self.book.read().await;
        book.accounts
            .values()
            .try_fold(Amount::ZERO, |acc, state| acc.checked_add(state.balance(asset)))
    }
}

#[async_trait]
impl FundsTransfer for InMemoryLedger {
    async fn transfer(
        &self,
        asset: &AssetId,
        from: &Address,
        to: &Address,
        amount: Amount,
        reason: TransferReason,
    ) -> Result<TransferReceipt> {
        require_positive(amount)?;
        let receipt_id = ReceiptId::new();
        let mut book = self.book.write().await;
        let postings = vec![
            Posting {
                account: *from,
                entry_type: EntryType::Debit,
                amount,
                reason: reason.clone(),
                receipt_id: receipt_id.clone(),
            },
            Posting {
                account: *to,
                entry_type: EntryType::Credit,
                amount,
                reason: reason.clone(),
                receipt_id: receipt_id.clone(),
            },
        ];
        if let Err(err) = book.post(asset, postings) {
            warn!(from = %from, to = %to, amount = %amount, error = %err, "Transfer rejected");
            return Err(err);
        }
        debug!(
            from = %from,
            to = %to,
            amount = %amount,
            reason = reason.as_str(),
            "Transfer applied"
        );
        Ok(TransferReceipt {
            receipt_id,
            asset: asset.clone(),
            from: *from,
            to: *to,
            amount,
            reason,
            executed_at: Utc::now(),
        })
    }

    async fn disburse(
        &self,
        asset: &AssetId,
        from: &Address,
        legs: Vec<TransferLeg>,
    ) -> Result<Vec<TransferReceipt>> {
        if legs.is_empty() {
            return Err(MarketError::invalid_input("legs", "disbursement has no legs"));
        }
        for leg in &legs {
            require_positive(leg.amount)?;
        }

        let receipt_ids: Vec<ReceiptId> = legs.iter().map(|_| ReceiptId::new()).collect();
        let mut postings = Vec::with_capacity(legs.len() * 2);
        for (leg, receipt_id) in legs.iter().zip(&receipt_ids) {
            postings.push(Posting {
                account: *from,
                entry_type: EntryType::Debit,
                amount: leg.amount,
                reason: leg.reason.clone(),
                receipt_id: receipt_id.clone(),
            });
            postings.push(Posting {
                account: leg.to,
                entry_type: EntryType::Credit,
                amount: leg.amount,
                reason: leg.reason.clone(),
                receipt_id: receipt_id.clone(),
            });
        }

        let mut book = self.book.write().await;
        if let Err(err) = book.post(asset, postings) {
            warn!(from = %from, legs = legs.len(), error = %err, "Disbursement rejected");
            return Err(err);
        }
        drop(book);

        let executed_at = Utc::now();
        debug!(from = %from, legs = legs.len(), "Disbursement applied");
        Ok(legs
            .into_iter()
            .zip(receipt_ids)
            .map(|(leg, receipt_id)| TransferReceipt {
                receipt_id,
                asset: asset.clone(),
                from: *from,
                to: leg.to,
                amount: leg.amount,
                reason: leg.reason,
                executed_at,
            })
            .collect())
    }

    async fn balance(&self, account: &Address, asset: &AssetId) -> Amount {
        self.book.read().await.balance(account, asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usdc() -> AssetId {
        AssetId::new("USDC")
    }

    #[tokio::test]
    async fn test_mint_and_balance() {
        let ledger = InMemoryLedger::new();
        let account = Address::from_label("business");

        assert_eq!(ledger.balance(&account, &usdc()).await, Amount::ZERO);

        ledger.mint(&account, &usdc(), Amount::new(1000)).await.unwrap();

        assert_eq!(ledger.balance(&account, &usdc()).await, Amount::new(1000));
        assert_eq!(ledger.balance(&account, &AssetId::native()).await, Amount::ZERO);
    }

    #[tokio::test]
    async fn test_transfer() {
        let ledger = InMemoryLedger::new();
        let from = Address::from_label("from");
        let to = Address::from_label("to");

        ledger.mint(&from, &usdc(), Amount::new(1000)).await.unwrap();
        let receipt = ledger
            .transfer(&usdc(), &from, &to, Amount::new(400), TransferReason::StakeDeposit)
            .await
            .unwrap();

        assert_eq!(ledger.balance(&from, &usdc()).await, Amount::new(600));
        assert_eq!(ledger.balance(&to, &usdc()).await, Amount::new(400));

        // debit + credit
        assert_eq!(ledger.receipt_entries(&receipt.receipt_id).await.len(), 2);
    }

    #[tokio::test]
    async fn test_no_negative_balance() {
        let ledger = InMemoryLedger::new();
        let from = Address::from_label("from");
        let to = Address::from_label("to");

        ledger.mint(&from, &usdc(), Amount::new(100)).await.unwrap();
        let result = ledger
            .transfer(&usdc(), &from, &to, Amount::new(200), TransferReason::StakeDeposit)
            .await;

        assert!(matches!(
            result,
            Err(MarketError::InsufficientFunds {
                requested: 200,
                available: 100,
                ..
            })
        ));
        assert_eq!(ledger.balance(&from, &usdc()).await, Amount::new(100));
        assert_eq!(ledger.entry_count().await, 1);
    }

    #[tokio::test]
    async fn test_zero_amount_rejected() {
        let ledger = InMemoryLedger::new();
        let account = Address::from_label("a");
        let err = ledger.mint(&account, &usdc(), Amount::ZERO).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_AMOUNT");
    }

    #[tokio::test]
    async fn test_disburse_pays_every_leg() {
        let ledger = InMemoryLedger::new();
        let vault = Address::from_label("vault");
        let a = Address::from_label("a");
        let b = Address::from_label("b");
        let deal_id = DealId(1);

        ledger.mint(&vault, &usdc(), Amount::new(100)).await.unwrap();
        let receipts = ledger
            .disburse(
                &usdc(),
                &vault,
                vec![
                    TransferLeg::new(
                        a,
                        Amount::new(98),
                        TransferReason::CounterpartyPayout { deal_id },
                    ),
                    TransferLeg::new(b, Amount::new(2), TransferReason::ValidatorFee { deal_id }),
                ],
            )
            .await
            .unwrap();

        assert_eq!(receipts.len(), 2);
        assert_eq!(ledger.balance(&vault, &usdc()).await, Amount::ZERO);
        assert_eq!(ledger.balance(&a, &usdc()).await, Amount::new(98));
        assert_eq!(ledger.balance(&b, &usdc()).await, Amount::new(2));
    }

    #[tokio::test]
    async fn test_disburse_is_all_or_nothing() {
        let ledger = InMemoryLedger::new();
        let vault = Address::from_label("vault");
        let a = Address::from_label("a");
        let b = Address::from_label("b");
        let deal_id = DealId(1);

        ledger.mint(&vault, &usdc(), Amount::new(100)).await.unwrap();
        let result = ledger
            .disburse(
                &usdc(),
                &vault,
                vec![
                    TransferLeg::new(a, Amount::new(90), TransferReason::VerdictPayout { deal_id }),
                    TransferLeg::new(b, Amount::new(20), TransferReason::ModeratorFee { deal_id }),
                ],
            )
            .await;

        assert!(matches!(result, Err(MarketError::InsufficientFunds { .. })));
        assert_eq!(ledger.balance(&vault, &usdc()).await, Amount::new(100));
        assert_eq!(ledger.balance(&a, &usdc()).await, Amount::ZERO);
        assert_eq!(ledger.entry_count().await, 1);
    }

    #[tokio::test]
    async fn test_entry_tracking() {
        let ledger = InMemoryLedger::new();
        let account = Address::from_label("a");
        let other = Address::from_label("b");

        ledger.mint(&account, &usdc(), Amount::new(100)).await.unwrap();
        ledger.mint(&account, &usdc(), Amount::new(200)).await.unwrap();
        ledger
            .transfer(&usdc(), &account, &other, Amount::new(50), TransferReason::StakeReturn)
            .await
            .unwrap();

        let entries = ledger.account_entries(&account).await;
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].entry_type, EntryType::Debit);
        assert_eq!(entries[2].balance_after, Amount::new(250));
        assert_eq!(ledger.entry_count().await, 4);
        assert_eq!(ledger.recent_entries(1).await[0].account, other);
        assert_eq!(ledger.total_balance(&usdc()).await.unwrap(), Amount::new(300));
        assert_eq!(ledger.account_state(&account).await.unwrap().entry_count, 3);
    }

    #[test]
    fn test_reason_serialization() {
        let reason = TransferReason::DealEscrow { deal_id: DealId(3) };
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json["kind"], "deal_escrow");
        assert_eq!(json["deal_id"], 3);
        assert_eq!(reason.as_str(), "deal_escrow");
    }
}
