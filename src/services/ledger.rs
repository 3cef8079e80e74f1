//! The ledger: sole owner of account balances.
//!
//! Every primitive validates its input, then hands the store a single
//! [`LedgerEntry`] (or [`Settlement`]) so the balance write and the record
//! write commit together under the account lock.

use crate::clock::Clock;
use crate::error::{AppError, AppResult, ErrorReport};
use crate::models::{
    validate_amount, Account, BalanceDelta, ConversionDirection, Currency, NewTransaction,
    TransactionKind, TransactionRecord, TransactionStatus,
};
use crate::repositories::{AccountStore, LedgerEntry, LedgerReceipt, Settlement, TransactionStore};
use crate::services::oracle::PriceFeed;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// How a pending record leaves `pending`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Mark completed, balances untouched
    Complete,
    /// Mark completed and credit the record's amount (deposit settles)
    CompleteAndCredit,
    /// Mark failed, balances untouched
    Fail { reason: String },
    /// Mark failed and undo the record's debit (payout bounced)
    FailAndReverse { reason: String },
}

impl Resolution {
    fn status(&self) -> TransactionStatus {
        match self {
            Self::Complete | Self::CompleteAndCredit => TransactionStatus::Completed,
            Self::Fail { .. } | Self::FailAndReverse { .. } => TransactionStatus::Failed,
        }
    }
}

/// Result of a conversion
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionReceipt {
    pub account: Account,
    pub record: TransactionRecord,
    pub converted_amount: Decimal,
    pub converted_currency: Currency,
    pub price: Decimal,
}

pub struct Ledger {
    accounts: Arc<dyn AccountStore>,
    transactions: Arc<dyn TransactionStore>,
    prices: Arc<dyn PriceFeed>,
    clock: Arc<dyn Clock>,
}

impl Ledger {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        transactions: Arc<dyn TransactionStore>,
        prices: Arc<dyn PriceFeed>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            accounts,
            transactions,
            prices,
            clock,
        }
    }

    /// Current price for the record snapshot; absent if none is published yet
    async fn price_snapshot(&self) -> AppResult<Option<Decimal>> {
        match self.prices.current().await {
            Ok(point) => Ok(Some(point.price)),
            Err(AppError::PriceUnavailable) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn check_new_status(status: TransactionStatus) -> AppResult<()> {
        if status == TransactionStatus::Failed {
            return Err(AppError::Validation(
                "failed records are written with record_failure".to_string(),
            ));
        }
        Ok(())
    }

    /// Increase a balance and record it
    pub async fn credit(
        &self,
        account_id: Uuid,
        amount: Decimal,
        currency: Currency,
        kind: TransactionKind,
        correlation_id: Option<&str>,
        status: TransactionStatus,
    ) -> AppResult<LedgerReceipt> {
        let amount = validate_amount(amount)?;
        Self::check_new_status(status)?;

        let record = NewTransaction::new(account_id, amount, currency, kind, status, self.clock.now())
            .with_correlation(correlation_id.map(str::to_string))
            .with_reference_price(self.price_snapshot().await?);

        let receipt = self
            .transactions
            .apply_entry(LedgerEntry::new(BalanceDelta::single(currency, amount), record))
            .await?;

        info!(
            "Credited {} {} to account {} ({}, {})",
            amount, currency, account_id, kind, status
        );
        Ok(receipt)
    }

    /// Decrease a balance and record it; `InsufficientFunds` leaves no trace
    pub async fn debit(
        &self,
        account_id: Uuid,
        amount: Decimal,
        currency: Currency,
        kind: TransactionKind,
        status: TransactionStatus,
    ) -> AppResult<LedgerReceipt> {
        let amount = validate_amount(amount)?;
        Self::check_new_status(status)?;

        let record = NewTransaction::new(account_id, -amount, currency, kind, status, self.clock.now())
            .with_reference_price(self.price_snapshot().await?);

        let receipt = self
            .transactions
            .apply_entry(LedgerEntry::new(BalanceDelta::single(currency, -amount), record))
            .await?;

        info!(
            "Debited {} {} from account {} ({}, {})",
            amount, currency, account_id, kind, status
        );
        Ok(receipt)
    }

    /// Move value between the two balances at the current reference price
    pub async fn convert(
        &self,
        account_id: Uuid,
        amount: Decimal,
        direction: ConversionDirection,
    ) -> AppResult<ConversionReceipt> {
        let amount = validate_amount(amount)?;
        let price = self.prices.current().await?.price;

        let source = direction.source();
        let target = direction.target();
        let converted = direction.apply(amount, price);
        if converted <= Decimal::ZERO {
            return Err(AppError::InvalidAmount(format!(
                "{} {} converts to nothing at price {}",
                amount, source, price
            )));
        }

        let mut delta = BalanceDelta::single(source, -amount);
        match target {
            Currency::Primary => delta.primary = converted,
            Currency::Pegged => delta.pegged = converted,
        }

        let record = NewTransaction::new(
            account_id,
            -amount,
            source,
            TransactionKind::Conversion,
            TransactionStatus::Completed,
            self.clock.now(),
        )
        .with_reference_price(Some(price))
        .with_metadata(json!({
            "converted_amount": converted.to_string(),
            "converted_currency": target.as_str(),
            "direction": direction.as_str(),
        }));

        let receipt = self
            .transactions
            .apply_entry(LedgerEntry::new(delta, record))
            .await?;

        info!(
            "Converted {} {} to {} {} at {} for account {}",
            amount, source, converted, target, price, account_id
        );
        Ok(ConversionReceipt {
            account: receipt.account,
            record: receipt.record,
            converted_amount: converted,
            converted_currency: target,
            price,
        })
    }

    /// Zero-amount failed record carrying the error; balances untouched
    pub async fn record_failure(
        &self,
        account_id: Uuid,
        kind: TransactionKind,
        report: &ErrorReport,
    ) -> AppResult<TransactionRecord> {
        let error = serde_json::to_value(report)?;
        let record = NewTransaction::failure(account_id, kind, error, self.clock.now());
        let receipt = self
            .transactions
            .apply_entry(LedgerEntry::new(BalanceDelta::none(), record))
            .await?;

        warn!(
            "Recorded failed {} for account {}: {}",
            kind, account_id, report.detail
        );
        Ok(receipt.record)
    }

    /// Pending record with no balance effect, settled later by [`Ledger::resolve`]
    pub async fn record_intent(
        &self,
        account_id: Uuid,
        amount: Decimal,
        currency: Currency,
        kind: TransactionKind,
        correlation_id: &str,
    ) -> AppResult<TransactionRecord> {
        let amount = validate_amount(amount)?;
        let record = NewTransaction::new(
            account_id,
            amount,
            currency,
            kind,
            TransactionStatus::Pending,
            self.clock.now(),
        )
        .with_correlation(Some(correlation_id.to_string()))
        .with_reference_price(self.price_snapshot().await?);

        let receipt = self
            .transactions
            .apply_entry(LedgerEntry::new(BalanceDelta::none(), record))
            .await?;
        Ok(receipt.record)
    }

    /// Move a pending record to its terminal status, applying the balance
    /// effect of `resolution` in the same unit
    pub async fn resolve(&self, record_id: Uuid, resolution: Resolution) -> AppResult<LedgerReceipt> {
        let record = self
            .transactions
            .find_record(record_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Transaction {} not found", record_id)))?;

        let (delta, metadata) = match &resolution {
            Resolution::Complete => (BalanceDelta::none(), json!({})),
            Resolution::CompleteAndCredit => (
                BalanceDelta::single(record.currency, record.amount),
                json!({}),
            ),
            Resolution::Fail { reason } => (BalanceDelta::none(), json!({ "failure_reason": reason })),
            Resolution::FailAndReverse { reason } => (
                BalanceDelta::single(record.currency, -record.amount),
                json!({
                    "failure_reason": reason,
                    "reversed_amount": (-record.amount).to_string(),
                }),
            ),
        };

        let receipt = self
            .transactions
            .settle(Settlement {
                record_id,
                status: resolution.status(),
                delta,
                metadata,
                at: self.clock.now(),
            })
            .await?;

        info!(
            "Resolved {} {} for account {} as {}",
            receipt.record.kind, record_id, receipt.account.id, receipt.record.status
        );
        Ok(receipt)
    }

    pub async fn attach_correlation_id(
        &self,
        record_id: Uuid,
        correlation_id: &str,
    ) -> AppResult<TransactionRecord> {
        Ok(self
            .transactions
            .attach_correlation_id(record_id, correlation_id)
            .await?)
    }

    pub async fn account(&self, account_id: Uuid) -> AppResult<Account> {
        self.accounts
            .find_account(account_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Account {} not found", account_id)))
    }

    /// Newest-first records for an account
    pub async fn history(&self, account_id: Uuid, limit: i64) -> AppResult<Vec<TransactionRecord>> {
        Ok(self.transactions.list_for_account(account_id, limit).await?)
    }
}
