//! Point-in-time net worth of an account. Read-only.

use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::models::quantize;
use crate::repositories::{AccountStore, PositionStore};
use crate::services::oracle::PriceFeed;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionSummary {
    pub position_id: Uuid,
    pub tier: String,
    pub principal: Decimal,
    pub current_value: Decimal,
    pub total_earned: Decimal,
    pub daily_return_rate: Decimal,
    pub days_remaining: i64,
    pub maturity_date: DateTime<Utc>,
}

/// Valuation in primary units at one reference price
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioSnapshot {
    pub account_id: Uuid,
    pub primary_balance: Decimal,
    pub pegged_balance: Decimal,
    pub reference_price: Decimal,
    /// `pegged_balance * reference_price`, 2 dp
    pub pegged_value: Decimal,
    pub invested_principal: Decimal,
    pub investments_value: Decimal,
    pub net_worth: Decimal,
    pub positions: Vec<PositionSummary>,
    pub valued_at: DateTime<Utc>,
}

pub struct PortfolioValuation {
    accounts: Arc<dyn AccountStore>,
    positions: Arc<dyn PositionStore>,
    prices: Arc<dyn PriceFeed>,
    clock: Arc<dyn Clock>,
}

impl PortfolioValuation {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        positions: Arc<dyn PositionStore>,
        prices: Arc<dyn PriceFeed>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            accounts,
            positions,
            prices,
            clock,
        }
    }

    /// Balances plus active positions, valued at the current reference price.
    /// Fails with `PriceUnavailable` rather than valuing pegged units at zero.
    pub async fn valuation(&self, account_id: Uuid) -> AppResult<PortfolioSnapshot> {
        let account = self
            .accounts
            .find_account(account_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Account {} not found", account_id)))?;
        let price = self.prices.current().await?.price;
        let now = self.clock.now();

        let tiers: HashMap<Uuid, (String, Decimal)> = self
            .positions
            .list_tiers(false)
            .await?
            .into_iter()
            .map(|t| (t.id, (t.name, t.daily_return_rate)))
            .collect();
        let positions = self
            .positions
            .positions_for_account(account_id, true)
            .await?;

        let invested_principal: Decimal = positions.iter().map(|p| p.principal).sum();
        let investments_value: Decimal = positions.iter().map(|p| p.current_value).sum();
        let pegged_value = quantize(account.pegged_balance * price);
        let net_worth = quantize(account.primary_balance + pegged_value + investments_value);

        let positions = positions
            .into_iter()
            .map(|p| {
                let (tier, rate) = tiers
                    .get(&p.tier_id)
                    .cloned()
                    .unwrap_or_else(|| (String::from("unknown"), Decimal::ZERO));
                PositionSummary {
                    position_id: p.id,
                    tier,
                    principal: p.principal,
                    current_value: p.current_value,
                    total_earned: p.total_earned,
                    daily_return_rate: rate,
                    days_remaining: p.days_remaining(now),
                    maturity_date: p.maturity_date,
                }
            })
            .collect();

        Ok(PortfolioSnapshot {
            account_id,
            primary_balance: account.primary_balance,
            pegged_balance: account.pegged_balance,
            reference_price: price,
            pegged_value,
            invested_principal,
            investments_value,
            net_worth,
            positions,
            valued_at: now,
        })
    }
}
