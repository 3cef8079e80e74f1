//! In-process store implementing every store trait.
//!
//! One `tokio::sync::Mutex` guards all state, so each trait call is a single
//! atomic unit and concurrent calls serialize exactly as row locks would.

use super::{
    check_payout, checked_balances, checked_entry, linked_record, settled_record, AccountStore,
    LedgerEntry, LedgerReceipt, PayoutApplication, PayoutReceipt, PositionStore, PriceStore,
    Settlement, TransactionStore,
};
use crate::error::RepositoryError;
use crate::models::{
    Account, AccountStatus, InvestmentPosition, InvestmentTier, NewPosition, NewPricePoint,
    NewTier, ReferencePricePoint, TransactionKind, TransactionRecord, TransactionStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
struct MemoryState {
    accounts: HashMap<Uuid, Account>,
    records: Vec<TransactionRecord>,
    prices: Vec<ReferencePricePoint>,
    tiers: Vec<InvestmentTier>,
    positions: HashMap<Uuid, InvestmentPosition>,
}

impl MemoryState {
    fn account(&self, id: Uuid) -> Result<&Account, RepositoryError> {
        self.accounts
            .get(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("Account {} not found", id)))
    }

    fn check_correlation(&self, record: &TransactionRecord) -> Result<(), RepositoryError> {
        if let Some(correlation_id) = record.correlation_id.as_deref() {
            let taken = self.records.iter().any(|r| {
                r.id != record.id
                    && r.kind == record.kind
                    && r.correlation_id.as_deref() == Some(correlation_id)
            });
            if taken {
                return Err(RepositoryError::Duplicate(format!(
                    "{} correlation id {} already recorded",
                    record.kind, correlation_id
                )));
            }
        }
        Ok(())
    }

    /// Validate a batch of entries against a scratch copy of the balances;
    /// nothing is written unless every entry passes
    fn stage_entries(
        &self,
        entries: Vec<LedgerEntry>,
    ) -> Result<(HashMap<Uuid, Account>, Vec<TransactionRecord>), RepositoryError> {
        let mut staged: HashMap<Uuid, Account> = HashMap::new();
        let mut records = Vec::with_capacity(entries.len());

        for entry in entries {
            let mut account = match staged.get(&entry.account_id) {
                Some(account) => account.clone(),
                None => self.account(entry.account_id)?.clone(),
            };
            let (primary, pegged) = checked_entry(&account, &entry)?;
            if !entry.delta.is_zero() {
                account.primary_balance = primary;
                account.pegged_balance = pegged;
                account.updated_at = entry.record.created_at;
            }

            let record = entry.record.into_record();
            self.check_correlation(&record)?;
            if records.iter().any(|r: &TransactionRecord| {
                r.kind == record.kind
                    && r.correlation_id.is_some()
                    && r.correlation_id == record.correlation_id
            }) {
                return Err(RepositoryError::Duplicate(format!(
                    "{} correlation id repeated in one unit",
                    record.kind
                )));
            }

            staged.insert(account.id, account);
            records.push(record);
        }

        Ok((staged, records))
    }

    fn commit(&mut self, staged: HashMap<Uuid, Account>, records: &[TransactionRecord]) {
        self.accounts.extend(staged);
        self.records.extend_from_slice(records);
    }
}

/// In-memory implementation of the account, transaction, price and position stores
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn create_account(&self, account: Account) -> Result<Account, RepositoryError> {
        let mut state = self.state.lock().await;
        if state.accounts.values().any(|a| a.owner_ref == account.owner_ref) {
            return Err(RepositoryError::Duplicate(format!(
                "account for owner {} already exists",
                account.owner_ref
            )));
        }
        state.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn find_account(&self, id: Uuid) -> Result<Option<Account>, RepositoryError> {
        Ok(self.state.lock().await.accounts.get(&id).cloned())
    }

    async fn find_account_by_owner(
        &self,
        owner_ref: &str,
    ) -> Result<Option<Account>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .values()
            .find(|a| a.owner_ref == owner_ref)
            .cloned())
    }

    async fn link_processor_ids(
        &self,
        id: Uuid,
        customer_id: Option<String>,
        payout_id: Option<String>,
    ) -> Result<Account, RepositoryError> {
        let mut state = self.state.lock().await;

        let clash = state.accounts.values().any(|a| {
            a.id != id
                && ((customer_id.is_some() && a.processor_customer_id == customer_id)
                    || (payout_id.is_some() && a.processor_payout_id == payout_id))
        });
        if clash {
            return Err(RepositoryError::Duplicate(
                "processor id already linked to another account".to_string(),
            ));
        }

        let account = state
            .accounts
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("Account {} not found", id)))?;
        if customer_id.is_some() {
            account.processor_customer_id = customer_id;
        }
        if payout_id.is_some() {
            account.processor_payout_id = payout_id;
        }
        account.updated_at = Utc::now();
        Ok(account.clone())
    }

    async fn close_account(&self, id: Uuid, at: DateTime<Utc>) -> Result<Account, RepositoryError> {
        let mut state = self.state.lock().await;
        let account = state.account(id)?.clone();

        if !account.is_open() {
            return Ok(account);
        }
        if !account.has_zero_balances() {
            return Err(RepositoryError::BusinessRule(format!(
                "account {} still holds funds",
                id
            )));
        }
        if state
            .positions
            .values()
            .any(|p| p.account_id == id && p.is_active)
        {
            return Err(RepositoryError::BusinessRule(format!(
                "account {} has active investments",
                id
            )));
        }
        if state
            .records
            .iter()
            .any(|r| r.account_id == id && r.status == TransactionStatus::Pending)
        {
            return Err(RepositoryError::BusinessRule(format!(
                "account {} has pending transactions",
                id
            )));
        }

        let account = state
            .accounts
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("Account {} not found", id)))?;
        account.status = AccountStatus::Closed;
        account.updated_at = at;
        Ok(account.clone())
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn apply_entry(&self, entry: LedgerEntry) -> Result<LedgerReceipt, RepositoryError> {
        let mut state = self.state.lock().await;
        let account_id = entry.account_id;
        let (staged, records) = state.stage_entries(vec![entry])?;
        state.commit(staged, &records);

        let account = state.account(account_id)?.clone();
        let record = records
            .into_iter()
            .next()
            .ok_or_else(|| RepositoryError::InvalidInput("empty ledger entry".to_string()))?;
        Ok(LedgerReceipt { account, record })
    }

    async fn settle(&self, settlement: Settlement) -> Result<LedgerReceipt, RepositoryError> {
        let mut state = self.state.lock().await;

        let index = state
            .records
            .iter()
            .position(|r| r.id == settlement.record_id)
            .ok_or_else(|| {
                RepositoryError::NotFound(format!("Transaction {} not found", settlement.record_id))
            })?;
        let record = settled_record(state.records[index].clone(), &settlement)?;

        let mut account = state.account(record.account_id)?.clone();
        let (primary, pegged) = checked_balances(&account, &settlement.delta)?;
        if !settlement.delta.is_zero() {
            account.primary_balance = primary;
            account.pegged_balance = pegged;
            account.updated_at = settlement.at;
        }

        state.accounts.insert(account.id, account.clone());
        state.records[index] = record.clone();
        Ok(LedgerReceipt { account, record })
    }

    async fn attach_correlation_id(
        &self,
        record_id: Uuid,
        correlation_id: &str,
    ) -> Result<TransactionRecord, RepositoryError> {
        let mut state = self.state.lock().await;
        let index = state
            .records
            .iter()
            .position(|r| r.id == record_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("Transaction {} not found", record_id)))?;

        let record = linked_record(state.records[index].clone(), correlation_id)?;
        state.check_correlation(&record)?;
        state.records[index] = record.clone();
        Ok(record)
    }

    async fn find_record(&self, id: Uuid) -> Result<Option<TransactionRecord>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.records.iter().find(|r| r.id == id).cloned())
    }

    async fn find_by_correlation(
        &self,
        kind: TransactionKind,
        correlation_id: &str,
    ) -> Result<Option<TransactionRecord>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .iter()
            .find(|r| r.kind == kind && r.correlation_id.as_deref() == Some(correlation_id))
            .cloned())
    }

    async fn list_for_account(
        &self,
        account_id: Uuid,
        limit: i64,
    ) -> Result<Vec<TransactionRecord>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .iter()
            .rev()
            .filter(|r| r.account_id == account_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PriceStore for MemoryStore {
    async fn latest(&self) -> Result<Option<ReferencePricePoint>, RepositoryError> {
        let state = self.state.lock().await;
        // Ties on timestamp resolve to the later insert
        Ok(state
            .prices
            .iter()
            .enumerate()
            .max_by_key(|(i, p)| (p.timestamp, *i))
            .map(|(_, p)| p.clone()))
    }

    async fn insert(&self, point: NewPricePoint) -> Result<ReferencePricePoint, RepositoryError> {
        let point = point.into_point();
        self.state.lock().await.prices.push(point.clone());
        Ok(point)
    }

    async fn recent(&self, limit: i64) -> Result<Vec<ReferencePricePoint>, RepositoryError> {
        let state = self.state.lock().await;
        let mut points: Vec<(usize, &ReferencePricePoint)> = state.prices.iter().enumerate().collect();
        points.sort_by(|(ia, a), (ib, b)| (b.timestamp, ib).cmp(&(a.timestamp, ia)));
        Ok(points
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|(_, p)| p.clone())
            .collect())
    }
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn upsert_tier(&self, tier: NewTier) -> Result<InvestmentTier, RepositoryError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.tiers.iter().find(|t| t.name == tier.name) {
            return Ok(existing.clone());
        }
        let tier = tier.into_tier();
        state.tiers.push(tier.clone());
        Ok(tier)
    }

    async fn list_tiers(&self, active_only: bool) -> Result<Vec<InvestmentTier>, RepositoryError> {
        let state = self.state.lock().await;
        let mut tiers: Vec<InvestmentTier> = state
            .tiers
            .iter()
            .filter(|t| !active_only || t.is_active)
            .cloned()
            .collect();
        tiers.sort_by(|a, b| a.principal.cmp(&b.principal));
        Ok(tiers)
    }

    async fn find_tier(&self, id: Uuid) -> Result<Option<InvestmentTier>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.tiers.iter().find(|t| t.id == id).cloned())
    }

    async fn open_position(
        &self,
        funding: LedgerEntry,
        position: NewPosition,
    ) -> Result<(LedgerReceipt, InvestmentPosition), RepositoryError> {
        let mut state = self.state.lock().await;
        if funding.account_id != position.account_id {
            return Err(RepositoryError::InvalidInput(
                "position and funding entry belong to different accounts".to_string(),
            ));
        }

        let account_id = funding.account_id;
        let (staged, records) = state.stage_entries(vec![funding])?;
        state.commit(staged, &records);

        let position = position.into_position();
        state.positions.insert(position.id, position.clone());

        let account = state.account(account_id)?.clone();
        let record = records
            .into_iter()
            .next()
            .ok_or_else(|| RepositoryError::InvalidInput("empty ledger entry".to_string()))?;
        Ok((LedgerReceipt { account, record }, position))
    }

    async fn find_position(&self, id: Uuid) -> Result<Option<InvestmentPosition>, RepositoryError> {
        Ok(self.state.lock().await.positions.get(&id).cloned())
    }

    async fn active_positions(&self) -> Result<Vec<InvestmentPosition>, RepositoryError> {
        let state = self.state.lock().await;
        let mut positions: Vec<InvestmentPosition> = state
            .positions
            .values()
            .filter(|p| p.is_active)
            .cloned()
            .collect();
        positions.sort_by_key(|p| (p.start_date, p.id));
        Ok(positions)
    }

    async fn positions_for_account(
        &self,
        account_id: Uuid,
        active_only: bool,
    ) -> Result<Vec<InvestmentPosition>, RepositoryError> {
        let state = self.state.lock().await;
        let mut positions: Vec<InvestmentPosition> = state
            .positions
            .values()
            .filter(|p| p.account_id == account_id && (!active_only || p.is_active))
            .cloned()
            .collect();
        positions.sort_by_key(|p| (p.start_date, p.id));
        Ok(positions)
    }

    async fn apply_payout(
        &self,
        payout: PayoutApplication,
    ) -> Result<PayoutReceipt, RepositoryError> {
        let mut state = self.state.lock().await;

        let mut position = state
            .positions
            .get(&payout.position_id)
            .cloned()
            .ok_or_else(|| {
                RepositoryError::NotFound(format!("Position {} not found", payout.position_id))
            })?;
        check_payout(&position, &payout)?;

        let (staged, records) = state.stage_entries(payout.entries)?;

        position.current_value = payout.new_current_value;
        position.total_earned = payout.new_total_earned;
        position.last_payout_on = Some(payout.payout_date);
        if payout.deactivate {
            position.is_active = false;
            position.closed_at = Some(payout.at);
        }

        state.commit(staged, &records);
        state.positions.insert(position.id, position.clone());
        Ok(PayoutReceipt { position, records })
    }
}
