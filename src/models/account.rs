//! Custodial account holding the two balances

use super::money::Currency;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Account lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Open,
    Closed,
}

impl AccountStatus {
    /// Convert from database string
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "open" => Ok(AccountStatus::Open),
            "closed" => Ok(AccountStatus::Closed),
            _ => Err(format!("Invalid account status: {}", s)),
        }
    }

    /// Convert to database string
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Open => "open",
            AccountStatus::Closed => "closed",
        }
    }
}

/// Snapshot of an account as of the last committed write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub owner_ref: String,
    pub primary_balance: Decimal,
    pub pegged_balance: Decimal,
    pub processor_customer_id: Option<String>,
    pub processor_payout_id: Option<String>,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// A freshly provisioned account with zero balances
    pub fn new(owner_ref: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_ref: owner_ref.into(),
            primary_balance: Decimal::ZERO,
            pegged_balance: Decimal::ZERO,
            processor_customer_id: None,
            processor_payout_id: None,
            status: AccountStatus::Open,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn balance(&self, currency: Currency) -> Decimal {
        match currency {
            Currency::Primary => self.primary_balance,
            Currency::Pegged => self.pegged_balance,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == AccountStatus::Open
    }

    pub fn has_zero_balances(&self) -> bool {
        self.primary_balance.is_zero() && self.pegged_balance.is_zero()
    }
}

/// Signed change to both balances, applied atomically with a record write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BalanceDelta {
    pub primary: Decimal,
    pub pegged: Decimal,
}

impl BalanceDelta {
    pub fn none() -> Self {
        Self::default()
    }

    /// Change of `amount` (signed) to one currency
    pub fn single(currency: Currency, amount: Decimal) -> Self {
        match currency {
            Currency::Primary => Self {
                primary: amount,
                pegged: Decimal::ZERO,
            },
            Currency::Pegged => Self {
                primary: Decimal::ZERO,
                pegged: amount,
            },
        }
    }

    pub fn is_zero(&self) -> bool {
        self.primary.is_zero() && self.pegged.is_zero()
    }

    pub fn amount(&self, currency: Currency) -> Decimal {
        match currency {
            Currency::Primary => self.primary,
            Currency::Pegged => self.pegged,
        }
    }

    pub fn negate(&self) -> Self {
        Self {
            primary: -self.primary,
            pegged: -self.pegged,
        }
    }
}
