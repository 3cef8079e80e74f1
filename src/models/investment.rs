//! Investment tiers and fixed-term positions

use crate::error::{AppError, AppResult};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default position term
pub const DEFAULT_TERM_DAYS: i32 = 1050;

/// Decimal places kept for daily return rates
pub const RATE_SCALE: u32 = 8;

/// How a tier's daily rate is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnRateKind {
    /// Fraction of current value per day
    Fixed,
    /// Fixed rate scaled by current price over the price at opening
    PriceRelative,
}

impl ReturnRateKind {
    /// Convert from database string
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "fixed" => Ok(ReturnRateKind::Fixed),
            "price_relative" => Ok(ReturnRateKind::PriceRelative),
            _ => Err(format!("Invalid rate kind: {}", s)),
        }
    }

    /// Convert to database string
    pub fn as_str(&self) -> &'static str {
        match self {
            ReturnRateKind::Fixed => "fixed",
            ReturnRateKind::PriceRelative => "price_relative",
        }
    }
}

/// Investment product: fixed principal, daily rate, term
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentTier {
    pub id: Uuid,
    pub name: String,
    pub principal: Decimal,
    pub daily_return_rate: Decimal,
    pub rate_kind: ReturnRateKind,
    pub term_days: i32,
    pub is_active: bool,
}

impl InvestmentTier {
    /// Daily rate to apply given the current and opening reference prices
    pub fn effective_rate(&self, current_price: Decimal, initial_price: Decimal) -> Decimal {
        match self.rate_kind {
            ReturnRateKind::Fixed => self.daily_return_rate,
            ReturnRateKind::PriceRelative if initial_price > Decimal::ZERO => {
                (self.daily_return_rate * current_price / initial_price)
                    .round_dp_with_strategy(RATE_SCALE, RoundingStrategy::MidpointAwayFromZero)
            }
            ReturnRateKind::PriceRelative => self.daily_return_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTier {
    pub name: String,
    pub principal: Decimal,
    pub daily_return_rate: Decimal,
    pub rate_kind: ReturnRateKind,
    pub term_days: i32,
}

impl NewTier {
    pub fn new(
        name: impl Into<String>,
        principal: Decimal,
        daily_return_rate: Decimal,
        rate_kind: ReturnRateKind,
        term_days: i32,
    ) -> AppResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(AppError::Validation("Tier name cannot be empty".to_string()));
        }
        if principal <= Decimal::ZERO {
            return Err(AppError::Validation(format!(
                "Tier {} principal must be positive",
                name
            )));
        }
        if daily_return_rate <= Decimal::ZERO {
            return Err(AppError::Validation(format!(
                "Tier {} daily return rate must be positive",
                name
            )));
        }
        if term_days <= 0 {
            return Err(AppError::Validation(format!(
                "Tier {} term must be at least one day",
                name
            )));
        }
        Ok(Self {
            name,
            principal,
            daily_return_rate,
            rate_kind,
            term_days,
        })
    }

    pub fn into_tier(self) -> InvestmentTier {
        InvestmentTier {
            id: Uuid::new_v4(),
            name: self.name,
            principal: self.principal,
            daily_return_rate: self.daily_return_rate,
            rate_kind: self.rate_kind,
            term_days: self.term_days,
            is_active: true,
        }
    }
}

/// The standard tier catalogue: principal and advertised daily return, with
/// the rate expressed as a fraction of principal
pub fn default_tiers() -> Vec<NewTier> {
    [
        ("Starter", 500, 52),
        ("Silver", 1500, 156),
        ("Gold", 5000, 519),
        ("Platinum", 7500, 779),
        ("Diamond", 10000, 1038),
        ("VIP", 25000, 2595),
    ]
    .into_iter()
    .map(|(name, principal, daily_cents)| {
        let principal = Decimal::from(principal);
        let rate = (Decimal::new(daily_cents, 2) / principal)
            .round_dp_with_strategy(RATE_SCALE, RoundingStrategy::MidpointAwayFromZero);
        NewTier {
            name: name.to_string(),
            principal,
            daily_return_rate: rate,
            rate_kind: ReturnRateKind::Fixed,
            term_days: DEFAULT_TERM_DAYS,
        }
    })
    .collect()
}

/// A fixed-term position funded from the primary balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentPosition {
    pub id: Uuid,
    pub account_id: Uuid,
    pub tier_id: Uuid,
    pub principal: Decimal,
    /// Principal plus every accrued payout, in primary units
    pub current_value: Decimal,
    /// Accrued payouts in primary units
    pub total_earned: Decimal,
    pub initial_reference_price: Decimal,
    pub start_date: DateTime<Utc>,
    pub maturity_date: DateTime<Utc>,
    pub last_payout_on: Option<NaiveDate>,
    pub is_active: bool,
    pub closed_at: Option<DateTime<Utc>>,
}

impl InvestmentPosition {
    pub fn is_mature(&self, now: DateTime<Utc>) -> bool {
        now >= self.maturity_date
    }

    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.maturity_date - now).num_days().max(0)
    }

    /// Already paid on the calendar day (UTC) of `now`
    pub fn paid_on(&self, now: DateTime<Utc>) -> bool {
        self.last_payout_on == Some(now.date_naive())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPosition {
    pub account_id: Uuid,
    pub tier_id: Uuid,
    pub principal: Decimal,
    pub initial_reference_price: Decimal,
    pub start_date: DateTime<Utc>,
    pub maturity_date: DateTime<Utc>,
}

impl NewPosition {
    pub fn for_tier(
        account_id: Uuid,
        tier: &InvestmentTier,
        reference_price: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            account_id,
            tier_id: tier.id,
            principal: tier.principal,
            initial_reference_price: reference_price,
            start_date: now,
            maturity_date: now + Duration::days(i64::from(tier.term_days)),
        }
    }

    pub fn into_position(self) -> InvestmentPosition {
        InvestmentPosition {
            id: Uuid::new_v4(),
            account_id: self.account_id,
            tier_id: self.tier_id,
            principal: self.principal,
            current_value: self.principal,
            total_earned: Decimal::ZERO,
            initial_reference_price: self.initial_reference_price,
            start_date: self.start_date,
            maturity_date: self.maturity_date,
            last_payout_on: None,
            is_active: true,
            closed_at: None,
        }
    }
}
