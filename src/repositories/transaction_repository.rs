//! Repository for transaction records and the balance writes they explain

use super::ledger_sql::{self, RecordRow, RECORD_COLUMNS};
use super::{
    checked_balances, linked_record, settled_record, LedgerEntry, LedgerReceipt, Settlement,
    TransactionStore,
};
use crate::error::RepositoryError;
use crate::models::{TransactionKind, TransactionRecord};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionStore for TransactionRepository {
    async fn apply_entry(&self, entry: LedgerEntry) -> Result<LedgerReceipt, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let (account, record) = ledger_sql::apply_entry(&mut tx, entry).await?;
        tx.commit().await?;

        Ok(LedgerReceipt { account, record })
    }

    async fn settle(&self, settlement: Settlement) -> Result<LedgerReceipt, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Record lock first: concurrent deliveries of the same event queue here
        let current = ledger_sql::lock_record(&mut tx, settlement.record_id).await?;
        let account_id = current.account_id;
        let record = settled_record(current, &settlement)?;

        let account = ledger_sql::lock_account(&mut tx, account_id).await?;
        let (primary, pegged) = checked_balances(&account, &settlement.delta)?;
        let account = if settlement.delta.is_zero() {
            account
        } else {
            ledger_sql::write_balances(&mut tx, account_id, primary, pegged, settlement.at).await?
        };

        let row = sqlx::query_as::<_, RecordRow>(&format!(
            r#"
            UPDATE transactions
            SET status = $2, completed_at = $3, metadata = $4
            WHERE id = $1 AND status = 'pending'
            RETURNING {}
            "#,
            RECORD_COLUMNS
        ))
        .bind(record.id)
        .bind(record.status.as_str())
        .bind(record.completed_at)
        .bind(&record.metadata)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RepositoryError::Conflict(format!("Transaction {} changed", record.id)))?;

        tx.commit().await?;

        Ok(LedgerReceipt {
            account,
            record: row.try_into()?,
        })
    }

    async fn attach_correlation_id(
        &self,
        record_id: Uuid,
        correlation_id: &str,
    ) -> Result<TransactionRecord, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let current = ledger_sql::lock_record(&mut tx, record_id).await?;
        let record = linked_record(current, correlation_id)?;

        let row = sqlx::query_as::<_, RecordRow>(&format!(
            r#"
            UPDATE transactions SET correlation_id = $2
            WHERE id = $1 AND status = 'pending'
              AND (correlation_id IS NULL OR correlation_id = $2)
            RETURNING {}
            "#,
            RECORD_COLUMNS
        ))
        .bind(record.id)
        .bind(correlation_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        row.try_into()
    }

    async fn find_record(&self, id: Uuid) -> Result<Option<TransactionRecord>, RepositoryError> {
        let row = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {} FROM transactions WHERE id = $1",
            RECORD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn find_by_correlation(
        &self,
        kind: TransactionKind,
        correlation_id: &str,
    ) -> Result<Option<TransactionRecord>, RepositoryError> {
        let row = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {} FROM transactions WHERE kind = $1 AND correlation_id = $2",
            RECORD_COLUMNS
        ))
        .bind(kind.as_str())
        .bind(correlation_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_for_account(
        &self,
        account_id: Uuid,
        limit: i64,
    ) -> Result<Vec<TransactionRecord>, RepositoryError> {
        let rows = sqlx::query_as::<_, RecordRow>(&format!(
            r#"
            SELECT {}
            FROM transactions
            WHERE account_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
            RECORD_COLUMNS
        ))
        .bind(account_id)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}
