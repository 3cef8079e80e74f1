//! Reference price series

use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Source tag for points produced by the stochastic model
pub const SOURCE_SIMULATION: &str = "GBM_Simulation";
/// Source tag for the first point of an empty series
pub const SOURCE_INITIAL_SEED: &str = "InitialSeed";

/// One point of the reference price series. The current price is the
/// latest point by timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferencePricePoint {
    pub id: Uuid,
    /// Primary units per pegged unit
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    /// Signed percentage change against the previous point
    pub change_24h: Decimal,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPricePoint {
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    pub change_24h: Decimal,
    pub source: String,
}

impl NewPricePoint {
    pub fn new(
        price: Decimal,
        timestamp: DateTime<Utc>,
        change_24h: Decimal,
        source: impl Into<String>,
    ) -> AppResult<Self> {
        if price <= Decimal::ZERO {
            return Err(AppError::InvalidPrice(format!(
                "reference price must be positive, got {}",
                price
            )));
        }
        Ok(Self {
            price,
            timestamp,
            change_24h,
            source: source.into(),
        })
    }

    pub fn into_point(self) -> ReferencePricePoint {
        ReferencePricePoint {
            id: Uuid::new_v4(),
            price: self.price,
            timestamp: self.timestamp,
            change_24h: self.change_24h,
            source: self.source,
        }
    }
}
