//! Repository for the reference price series

use super::ledger_sql::{PriceRow, PRICE_COLUMNS};
use super::PriceStore;
use crate::error::RepositoryError;
use crate::models::{NewPricePoint, ReferencePricePoint};
use async_trait::async_trait;
use sqlx::PgPool;

pub struct PriceRepository {
    pool: PgPool,
}

impl PriceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PriceStore for PriceRepository {
    async fn latest(&self) -> Result<Option<ReferencePricePoint>, RepositoryError> {
        let row = sqlx::query_as::<_, PriceRow>(&format!(
            "SELECT {} FROM reference_prices ORDER BY timestamp DESC, id DESC LIMIT 1",
            PRICE_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn insert(&self, point: NewPricePoint) -> Result<ReferencePricePoint, RepositoryError> {
        let point = point.into_point();
        let row = sqlx::query_as::<_, PriceRow>(&format!(
            r#"
            INSERT INTO reference_prices ({cols})
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {cols}
            "#,
            cols = PRICE_COLUMNS
        ))
        .bind(point.id)
        .bind(point.price)
        .bind(point.timestamp)
        .bind(point.change_24h)
        .bind(&point.source)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn recent(&self, limit: i64) -> Result<Vec<ReferencePricePoint>, RepositoryError> {
        let rows = sqlx::query_as::<_, PriceRow>(&format!(
            "SELECT {} FROM reference_prices ORDER BY timestamp DESC, id DESC LIMIT $1",
            PRICE_COLUMNS
        ))
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
