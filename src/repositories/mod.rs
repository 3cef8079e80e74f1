//! Storage layer.
//!
//! Each store trait method is one atomic unit of work: every balance write
//! commits together with the record write that explains it, or nothing
//! commits. The PostgreSQL repositories get this from a database transaction
//! holding `FOR UPDATE` row locks; [`MemoryStore`] gets it from a single mutex.

pub mod account_repository;
mod ledger_sql;
pub mod memory_store;
pub mod position_repository;
pub mod price_repository;
pub mod transaction_repository;

pub use account_repository::AccountRepository;
pub use memory_store::MemoryStore;
pub use position_repository::PositionRepository;
pub use price_repository::PriceRepository;
pub use transaction_repository::TransactionRepository;

use crate::error::RepositoryError;
use crate::models::{
    Account, BalanceDelta, Currency, InvestmentPosition, InvestmentTier, NewPosition,
    NewPricePoint, NewTier, NewTransaction, ReferencePricePoint, TransactionKind,
    TransactionRecord, TransactionStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

/// A balance change and the record that explains it
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub account_id: Uuid,
    pub delta: BalanceDelta,
    pub record: NewTransaction,
}

impl LedgerEntry {
    pub fn new(delta: BalanceDelta, record: NewTransaction) -> Self {
        Self {
            account_id: record.account_id,
            delta,
            record,
        }
    }
}

/// Account state and record after an entry committed
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerReceipt {
    pub account: Account,
    pub record: TransactionRecord,
}

/// Move a pending record to a terminal status, optionally changing balances
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub record_id: Uuid,
    pub status: TransactionStatus,
    pub delta: BalanceDelta,
    /// Keys merged into the record's metadata
    pub metadata: Value,
    pub at: DateTime<Utc>,
}

/// One position's payout for one day, computed by the engine and applied
/// under the position lock
#[derive(Debug, Clone, PartialEq)]
pub struct PayoutApplication {
    pub position_id: Uuid,
    /// `current_value` the amounts were computed from; anything else is a conflict
    pub expected_current_value: Decimal,
    pub payout_date: NaiveDate,
    pub new_current_value: Decimal,
    pub new_total_earned: Decimal,
    pub deactivate: bool,
    pub entries: Vec<LedgerEntry>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PayoutReceipt {
    pub position: InvestmentPosition,
    pub records: Vec<TransactionRecord>,
}

/// Trait defining the contract for account storage.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn create_account(&self, account: Account) -> Result<Account, RepositoryError>;
    async fn find_account(&self, id: Uuid) -> Result<Option<Account>, RepositoryError>;
    async fn find_account_by_owner(&self, owner_ref: &str)
        -> Result<Option<Account>, RepositoryError>;
    async fn link_processor_ids(
        &self,
        id: Uuid,
        customer_id: Option<String>,
        payout_id: Option<String>,
    ) -> Result<Account, RepositoryError>;
    /// Close the account if it has zero balances, no active positions and no
    /// pending records, all checked under the account lock
    async fn close_account(&self, id: Uuid, at: DateTime<Utc>) -> Result<Account, RepositoryError>;
}

/// Trait defining the contract for the transaction record store.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Apply a balance delta and write its record atomically
    async fn apply_entry(&self, entry: LedgerEntry) -> Result<LedgerReceipt, RepositoryError>;
    /// Resolve a pending record; `AlreadySettled` if it is terminal
    async fn settle(&self, settlement: Settlement) -> Result<LedgerReceipt, RepositoryError>;
    /// Link a pending, unlinked record to its processor object
    async fn attach_correlation_id(
        &self,
        record_id: Uuid,
        correlation_id: &str,
    ) -> Result<TransactionRecord, RepositoryError>;
    async fn find_record(&self, id: Uuid) -> Result<Option<TransactionRecord>, RepositoryError>;
    async fn find_by_correlation(
        &self,
        kind: TransactionKind,
        correlation_id: &str,
    ) -> Result<Option<TransactionRecord>, RepositoryError>;
    /// Newest first
    async fn list_for_account(
        &self,
        account_id: Uuid,
        limit: i64,
    ) -> Result<Vec<TransactionRecord>, RepositoryError>;
}

/// Trait defining the contract for the reference price series.
#[async_trait]
pub trait PriceStore: Send + Sync {
    async fn latest(&self) -> Result<Option<ReferencePricePoint>, RepositoryError>;
    async fn insert(&self, point: NewPricePoint) -> Result<ReferencePricePoint, RepositoryError>;
    /// Newest first
    async fn recent(&self, limit: i64) -> Result<Vec<ReferencePricePoint>, RepositoryError>;
}

/// Trait defining the contract for tiers and positions.
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Insert a tier unless one with the same name exists; returns the stored tier
    async fn upsert_tier(&self, tier: NewTier) -> Result<InvestmentTier, RepositoryError>;
    async fn list_tiers(&self, active_only: bool) -> Result<Vec<InvestmentTier>, RepositoryError>;
    async fn find_tier(&self, id: Uuid) -> Result<Option<InvestmentTier>, RepositoryError>;
    /// Debit the principal and create the position in one unit
    async fn open_position(
        &self,
        funding: LedgerEntry,
        position: NewPosition,
    ) -> Result<(LedgerReceipt, InvestmentPosition), RepositoryError>;
    async fn find_position(&self, id: Uuid) -> Result<Option<InvestmentPosition>, RepositoryError>;
    async fn active_positions(&self) -> Result<Vec<InvestmentPosition>, RepositoryError>;
    async fn positions_for_account(
        &self,
        account_id: Uuid,
        active_only: bool,
    ) -> Result<Vec<InvestmentPosition>, RepositoryError>;
    async fn apply_payout(
        &self,
        payout: PayoutApplication,
    ) -> Result<PayoutReceipt, RepositoryError>;
}

/// Balances after applying `delta`, or the error that forbids it
pub(crate) fn checked_balances(
    account: &Account,
    delta: &BalanceDelta,
) -> Result<(Decimal, Decimal), RepositoryError> {
    if !delta.is_zero() && !account.is_open() {
        return Err(RepositoryError::AccountClosed(account.id));
    }

    let primary = account.primary_balance + delta.primary;
    let pegged = account.pegged_balance + delta.pegged;

    for (currency, after) in [(Currency::Primary, primary), (Currency::Pegged, pegged)] {
        if after < Decimal::ZERO {
            return Err(RepositoryError::InsufficientFunds {
                currency,
                available: account.balance(currency),
                requested: -delta.amount(currency),
            });
        }
    }

    Ok((primary, pegged))
}

/// Balances after applying a ledger entry. Closed accounts accept only
/// terminal records with no balance effect.
pub(crate) fn checked_entry(
    account: &Account,
    entry: &LedgerEntry,
) -> Result<(Decimal, Decimal), RepositoryError> {
    if !account.is_open() && entry.record.status == TransactionStatus::Pending {
        return Err(RepositoryError::AccountClosed(account.id));
    }
    checked_balances(account, &entry.delta)
}

/// Check a settlement may move `record` and build the resulting record state
pub(crate) fn settled_record(
    mut record: TransactionRecord,
    settlement: &Settlement,
) -> Result<TransactionRecord, RepositoryError> {
    if record.status.is_terminal() {
        return Err(RepositoryError::AlreadySettled {
            record_id: record.id,
            status: record.status,
        });
    }
    if !settlement.status.is_terminal() {
        return Err(RepositoryError::InvalidInput(format!(
            "cannot settle transaction {} to {}",
            record.id, settlement.status
        )));
    }

    record.status = settlement.status;
    record.completed_at = (settlement.status == TransactionStatus::Completed).then_some(settlement.at);
    crate::models::merge_metadata(&mut record.metadata, &settlement.metadata);
    Ok(record)
}

/// Check `record` can take `correlation_id` and build the linked record.
/// Only pending records without a correlation id are linkable; relinking to
/// the same id is a no-op.
pub(crate) fn linked_record(
    mut record: TransactionRecord,
    correlation_id: &str,
) -> Result<TransactionRecord, RepositoryError> {
    if record.status.is_terminal() {
        return Err(RepositoryError::AlreadySettled {
            record_id: record.id,
            status: record.status,
        });
    }
    match record.correlation_id.as_deref() {
        Some(existing) if existing != correlation_id => Err(RepositoryError::Conflict(format!(
            "transaction {} is already linked to {}",
            record.id, existing
        ))),
        _ => {
            record.correlation_id = Some(correlation_id.to_string());
            Ok(record)
        }
    }
}

/// Check a payout may be applied to `position` under its lock
pub(crate) fn check_payout(
    position: &InvestmentPosition,
    payout: &PayoutApplication,
) -> Result<(), RepositoryError> {
    if !position.is_active {
        return Err(RepositoryError::Conflict(format!(
            "position {} is no longer active",
            position.id
        )));
    }
    if position.last_payout_on == Some(payout.payout_date) {
        return Err(RepositoryError::Conflict(format!(
            "position {} already paid on {}",
            position.id, payout.payout_date
        )));
    }
    if position.current_value != payout.expected_current_value {
        return Err(RepositoryError::Conflict(format!(
            "position {} changed during the payout cycle",
            position.id
        )));
    }
    if payout.new_current_value < position.principal {
        return Err(RepositoryError::InvalidInput(format!(
            "position {} value cannot fall below principal",
            position.id
        )));
    }
    if payout.entries.iter().any(|e| e.account_id != position.account_id) {
        return Err(RepositoryError::InvalidInput(format!(
            "payout entries must belong to account {}",
            position.account_id
        )));
    }
    Ok(())
}
