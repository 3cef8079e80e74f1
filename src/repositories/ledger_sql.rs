//! Row types and statements shared by the PostgreSQL repositories.
//!
//! Helpers take a `&mut PgConnection` so callers can run them inside their
//! own transaction after taking the row locks they need.

use super::{checked_entry, LedgerEntry};
use crate::error::RepositoryError;
use crate::models::{
    Account, AccountStatus, Currency, InvestmentPosition, InvestmentTier, NewTransaction,
    ReferencePricePoint, ReturnRateKind, TransactionKind, TransactionRecord, TransactionStatus,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

pub(super) const ACCOUNT_COLUMNS: &str = "id, owner_ref, primary_balance, pegged_balance, \
    processor_customer_id, processor_payout_id, status, created_at, updated_at";

pub(super) const RECORD_COLUMNS: &str = "id, account_id, amount, currency, kind, status, \
    correlation_id, reference_price, metadata, created_at, completed_at";

pub(super) const TIER_COLUMNS: &str =
    "id, name, principal, daily_return_rate, rate_kind, term_days, is_active";

pub(super) const POSITION_COLUMNS: &str = "id, account_id, tier_id, principal, current_value, \
    total_earned, initial_reference_price, start_date, maturity_date, last_payout_on, \
    is_active, closed_at";

pub(super) const PRICE_COLUMNS: &str = "id, price, timestamp, change_24h, source";

#[derive(Debug, FromRow)]
pub(super) struct AccountRow {
    id: Uuid,
    owner_ref: String,
    primary_balance: Decimal,
    pegged_balance: Decimal,
    processor_customer_id: Option<String>,
    processor_payout_id: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = RepositoryError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Account {
            id: row.id,
            owner_ref: row.owner_ref,
            primary_balance: row.primary_balance,
            pegged_balance: row.pegged_balance,
            processor_customer_id: row.processor_customer_id,
            processor_payout_id: row.processor_payout_id,
            status: AccountStatus::from_str(&row.status).map_err(RepositoryError::InvalidInput)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(super) struct RecordRow {
    id: Uuid,
    account_id: Uuid,
    amount: Decimal,
    currency: String,
    kind: String,
    status: String,
    correlation_id: Option<String>,
    reference_price: Option<Decimal>,
    metadata: Value,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<RecordRow> for TransactionRecord {
    type Error = RepositoryError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        Ok(TransactionRecord {
            id: row.id,
            account_id: row.account_id,
            amount: row.amount,
            currency: Currency::from_str(&row.currency).ok_or_else(|| {
                RepositoryError::InvalidInput(format!("Invalid currency: {}", row.currency))
            })?,
            kind: TransactionKind::from_str(&row.kind).ok_or_else(|| {
                RepositoryError::InvalidInput(format!("Invalid transaction kind: {}", row.kind))
            })?,
            status: TransactionStatus::from_str(&row.status).ok_or_else(|| {
                RepositoryError::InvalidInput(format!("Invalid transaction status: {}", row.status))
            })?,
            correlation_id: row.correlation_id,
            reference_price: row.reference_price,
            metadata: row.metadata,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(super) struct TierRow {
    id: Uuid,
    name: String,
    principal: Decimal,
    daily_return_rate: Decimal,
    rate_kind: String,
    term_days: i32,
    is_active: bool,
}

impl TryFrom<TierRow> for InvestmentTier {
    type Error = RepositoryError;

    fn try_from(row: TierRow) -> Result<Self, Self::Error> {
        Ok(InvestmentTier {
            id: row.id,
            name: row.name,
            principal: row.principal,
            daily_return_rate: row.daily_return_rate,
            rate_kind: ReturnRateKind::from_str(&row.rate_kind)
                .map_err(RepositoryError::InvalidInput)?,
            term_days: row.term_days,
            is_active: row.is_active,
        })
    }
}

#[derive(Debug, FromRow)]
pub(super) struct PositionRow {
    id: Uuid,
    account_id: Uuid,
    tier_id: Uuid,
    principal: Decimal,
    current_value: Decimal,
    total_earned: Decimal,
    initial_reference_price: Decimal,
    start_date: DateTime<Utc>,
    maturity_date: DateTime<Utc>,
    last_payout_on: Option<NaiveDate>,
    is_active: bool,
    closed_at: Option<DateTime<Utc>>,
}

impl From<PositionRow> for InvestmentPosition {
    fn from(row: PositionRow) -> Self {
        InvestmentPosition {
            id: row.id,
            account_id: row.account_id,
            tier_id: row.tier_id,
            principal: row.principal,
            current_value: row.current_value,
            total_earned: row.total_earned,
            initial_reference_price: row.initial_reference_price,
            start_date: row.start_date,
            maturity_date: row.maturity_date,
            last_payout_on: row.last_payout_on,
            is_active: row.is_active,
            closed_at: row.closed_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub(super) struct PriceRow {
    id: Uuid,
    price: Decimal,
    timestamp: DateTime<Utc>,
    change_24h: Decimal,
    source: String,
}

impl From<PriceRow> for ReferencePricePoint {
    fn from(row: PriceRow) -> Self {
        ReferencePricePoint {
            id: row.id,
            price: row.price,
            timestamp: row.timestamp,
            change_24h: row.change_24h,
            source: row.source,
        }
    }
}

/// Lock an account row for the rest of the transaction
pub(super) async fn lock_account(
    conn: &mut PgConnection,
    account_id: Uuid,
) -> Result<Account, RepositoryError> {
    let row = sqlx::query_as::<_, AccountRow>(&format!(
        "SELECT {} FROM accounts WHERE id = $1 FOR UPDATE",
        ACCOUNT_COLUMNS
    ))
    .bind(account_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| RepositoryError::NotFound(format!("Account {} not found", account_id)))?;

    row.try_into()
}

/// Lock a transaction record row for the rest of the transaction
pub(super) async fn lock_record(
    conn: &mut PgConnection,
    record_id: Uuid,
) -> Result<TransactionRecord, RepositoryError> {
    let row = sqlx::query_as::<_, RecordRow>(&format!(
        "SELECT {} FROM transactions WHERE id = $1 FOR UPDATE",
        RECORD_COLUMNS
    ))
    .bind(record_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| RepositoryError::NotFound(format!("Transaction {} not found", record_id)))?;

    row.try_into()
}

/// Write new balances to an account the caller already holds locked
pub(super) async fn write_balances(
    conn: &mut PgConnection,
    account_id: Uuid,
    primary: Decimal,
    pegged: Decimal,
    at: DateTime<Utc>,
) -> Result<Account, RepositoryError> {
    let row = sqlx::query_as::<_, AccountRow>(&format!(
        r#"
        UPDATE accounts
        SET primary_balance = $2, pegged_balance = $3, updated_at = $4
        WHERE id = $1
        RETURNING {}
        "#,
        ACCOUNT_COLUMNS
    ))
    .bind(account_id)
    .bind(primary)
    .bind(pegged)
    .bind(at)
    .fetch_one(&mut *conn)
    .await?;

    row.try_into()
}

pub(super) async fn insert_record(
    conn: &mut PgConnection,
    record: NewTransaction,
) -> Result<TransactionRecord, RepositoryError> {
    let record = record.into_record();
    let row = sqlx::query_as::<_, RecordRow>(&format!(
        r#"
        INSERT INTO transactions ({cols})
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING {cols}
        "#,
        cols = RECORD_COLUMNS
    ))
    .bind(record.id)
    .bind(record.account_id)
    .bind(record.amount)
    .bind(record.currency.as_str())
    .bind(record.kind.as_str())
    .bind(record.status.as_str())
    .bind(&record.correlation_id)
    .bind(record.reference_price)
    .bind(&record.metadata)
    .bind(record.created_at)
    .bind(record.completed_at)
    .fetch_one(&mut *conn)
    .await?;

    row.try_into()
}

/// Lock the entry's account, apply its delta and write its record
pub(super) async fn apply_entry(
    conn: &mut PgConnection,
    entry: LedgerEntry,
) -> Result<(Account, TransactionRecord), RepositoryError> {
    let account = lock_account(conn, entry.account_id).await?;
    let (primary, pegged) = checked_entry(&account, &entry)?;

    let account = if entry.delta.is_zero() {
        account
    } else {
        write_balances(conn, account.id, primary, pegged, entry.record.created_at).await?
    };
    let record = insert_record(conn, entry.record).await?;

    Ok((account, record))
}
