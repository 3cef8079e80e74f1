//! Repository for account rows

use super::ledger_sql::{self, AccountRow, ACCOUNT_COLUMNS};
use super::AccountStore;
use crate::error::RepositoryError;
use crate::models::Account;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

pub struct AccountRepository {
    pool: PgPool,
}

impl AccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for AccountRepository {
    async fn create_account(&self, account: Account) -> Result<Account, RepositoryError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            r#"
            INSERT INTO accounts ({cols})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {cols}
            "#,
            cols = ACCOUNT_COLUMNS
        ))
        .bind(account.id)
        .bind(&account.owner_ref)
        .bind(account.primary_balance)
        .bind(account.pegged_balance)
        .bind(&account.processor_customer_id)
        .bind(&account.processor_payout_id)
        .bind(account.status.as_str())
        .bind(account.created_at)
        .bind(account.updated_at)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn find_account(&self, id: Uuid) -> Result<Option<Account>, RepositoryError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn find_account_by_owner(
        &self,
        owner_ref: &str,
    ) -> Result<Option<Account>, RepositoryError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE owner_ref = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(owner_ref)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn link_processor_ids(
        &self,
        id: Uuid,
        customer_id: Option<String>,
        payout_id: Option<String>,
    ) -> Result<Account, RepositoryError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            r#"
            UPDATE accounts
            SET processor_customer_id = COALESCE($2, processor_customer_id),
                processor_payout_id = COALESCE($3, processor_payout_id),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .bind(customer_id)
        .bind(payout_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("Account {} not found", id)))?;

        row.try_into()
    }

    async fn close_account(&self, id: Uuid, at: DateTime<Utc>) -> Result<Account, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let account = ledger_sql::lock_account(&mut tx, id).await?;

        if !account.is_open() {
            return Ok(account);
        }
        if !account.has_zero_balances() {
            return Err(RepositoryError::BusinessRule(format!(
                "account {} still holds funds",
                id
            )));
        }

        // Every write that opens a position or a pending record locks this
        // account row first, so these counts cannot change under us
        let (active_positions,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM investment_positions WHERE account_id = $1 AND is_active",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        if active_positions > 0 {
            return Err(RepositoryError::BusinessRule(format!(
                "account {} has active investments",
                id
            )));
        }

        let (pending,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM transactions WHERE account_id = $1 AND status = 'pending'",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        if pending > 0 {
            return Err(RepositoryError::BusinessRule(format!(
                "account {} has pending transactions",
                id
            )));
        }

        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "UPDATE accounts SET status = 'closed', updated_at = $2 WHERE id = $1 RETURNING {}",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .bind(at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }
}
