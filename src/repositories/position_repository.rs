//! Repository for investment tiers and positions

use super::ledger_sql::{self, PositionRow, TierRow, POSITION_COLUMNS, TIER_COLUMNS};
use super::{
    check_payout, LedgerEntry, LedgerReceipt, PayoutApplication, PayoutReceipt, PositionStore,
};
use crate::error::RepositoryError;
use crate::models::{InvestmentPosition, InvestmentTier, NewPosition, NewTier};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

pub struct PositionRepository {
    pool: PgPool,
}

impl PositionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PositionStore for PositionRepository {
    async fn upsert_tier(&self, tier: NewTier) -> Result<InvestmentTier, RepositoryError> {
        let tier = tier.into_tier();
        sqlx::query(
            r#"
            INSERT INTO investment_tiers (id, name, principal, daily_return_rate, rate_kind, term_days, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(tier.id)
        .bind(&tier.name)
        .bind(tier.principal)
        .bind(tier.daily_return_rate)
        .bind(tier.rate_kind.as_str())
        .bind(tier.term_days)
        .bind(tier.is_active)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query_as::<_, TierRow>(&format!(
            "SELECT {} FROM investment_tiers WHERE name = $1",
            TIER_COLUMNS
        ))
        .bind(&tier.name)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn list_tiers(&self, active_only: bool) -> Result<Vec<InvestmentTier>, RepositoryError> {
        let rows = sqlx::query_as::<_, TierRow>(&format!(
            r#"
            SELECT {}
            FROM investment_tiers
            WHERE is_active OR NOT $1
            ORDER BY principal ASC
            "#,
            TIER_COLUMNS
        ))
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn find_tier(&self, id: Uuid) -> Result<Option<InvestmentTier>, RepositoryError> {
        let row = sqlx::query_as::<_, TierRow>(&format!(
            "SELECT {} FROM investment_tiers WHERE id = $1",
            TIER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn open_position(
        &self,
        funding: LedgerEntry,
        position: NewPosition,
    ) -> Result<(LedgerReceipt, InvestmentPosition), RepositoryError> {
        if funding.account_id != position.account_id {
            return Err(RepositoryError::InvalidInput(
                "position and funding entry belong to different accounts".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        let (account, record) = ledger_sql::apply_entry(&mut tx, funding).await?;

        let position = position.into_position();
        let row = sqlx::query_as::<_, PositionRow>(&format!(
            r#"
            INSERT INTO investment_positions ({cols})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {cols}
            "#,
            cols = POSITION_COLUMNS
        ))
        .bind(position.id)
        .bind(position.account_id)
        .bind(position.tier_id)
        .bind(position.principal)
        .bind(position.current_value)
        .bind(position.total_earned)
        .bind(position.initial_reference_price)
        .bind(position.start_date)
        .bind(position.maturity_date)
        .bind(position.last_payout_on)
        .bind(position.is_active)
        .bind(position.closed_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((LedgerReceipt { account, record }, row.into()))
    }

    async fn find_position(&self, id: Uuid) -> Result<Option<InvestmentPosition>, RepositoryError> {
        let row = sqlx::query_as::<_, PositionRow>(&format!(
            "SELECT {} FROM investment_positions WHERE id = $1",
            POSITION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn active_positions(&self) -> Result<Vec<InvestmentPosition>, RepositoryError> {
        let rows = sqlx::query_as::<_, PositionRow>(&format!(
            "SELECT {} FROM investment_positions WHERE is_active ORDER BY start_date, id",
            POSITION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn positions_for_account(
        &self,
        account_id: Uuid,
        active_only: bool,
    ) -> Result<Vec<InvestmentPosition>, RepositoryError> {
        let rows = sqlx::query_as::<_, PositionRow>(&format!(
            r#"
            SELECT {}
            FROM investment_positions
            WHERE account_id = $1 AND (is_active OR NOT $2)
            ORDER BY start_date, id
            "#,
            POSITION_COLUMNS
        ))
        .bind(account_id)
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn apply_payout(
        &self,
        payout: PayoutApplication,
    ) -> Result<PayoutReceipt, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let position: InvestmentPosition = sqlx::query_as::<_, PositionRow>(&format!(
            "SELECT {} FROM investment_positions WHERE id = $1 FOR UPDATE",
            POSITION_COLUMNS
        ))
        .bind(payout.position_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            RepositoryError::NotFound(format!("Position {} not found", payout.position_id))
        })?
        .into();
        check_payout(&position, &payout)?;

        let mut records = Vec::with_capacity(payout.entries.len());
        for entry in payout.entries {
            let (_, record) = ledger_sql::apply_entry(&mut tx, entry).await?;
            records.push(record);
        }

        let row = sqlx::query_as::<_, PositionRow>(&format!(
            r#"
            UPDATE investment_positions
            SET current_value = $2,
                total_earned = $3,
                last_payout_on = $4,
                is_active = NOT $5,
                closed_at = CASE WHEN $5 THEN $6 ELSE closed_at END
            WHERE id = $1
            RETURNING {}
            "#,
            POSITION_COLUMNS
        ))
        .bind(payout.position_id)
        .bind(payout.new_current_value)
        .bind(payout.new_total_earned)
        .bind(payout.payout_date)
        .bind(payout.deactivate)
        .bind(payout.at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(PayoutReceipt {
            position: row.into(),
            records,
        })
    }
}
