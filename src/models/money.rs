//! Currencies and fixed-point money helpers.
//!
//! Both balances are stored with two decimal places. Computed amounts
//! (payouts, valuations) go through [`quantize`], which rounds half away from
//! zero; the credited leg of a conversion goes through [`quantize_down`]. The
//! ledger never holds sub-cent values.

use crate::error::{AppError, AppResult};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Decimal places kept for every balance and record amount
pub const MONEY_SCALE: u32 = 2;

/// The two balances an account holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    /// Fiat-equivalent balance
    #[serde(rename = "USD")]
    Primary,
    /// Gold-pegged unit, valued at the reference price
    #[serde(rename = "USXW")]
    Pegged,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "USD",
            Self::Pegged => "USXW",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "USD" => Some(Self::Primary),
            "USXW" => Some(Self::Pegged),
            _ => None,
        }
    }

    /// Parse a currency code supplied by a caller
    pub fn parse(code: &str) -> AppResult<Self> {
        Self::from_str(code).ok_or_else(|| AppError::UnsupportedCurrency(code.to_string()))
    }

    pub fn other(&self) -> Self {
        match self {
            Self::Primary => Self::Pegged,
            Self::Pegged => Self::Primary,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a currency conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionDirection {
    PrimaryToPegged,
    PeggedToPrimary,
}

impl ConversionDirection {
    pub fn source(&self) -> Currency {
        match self {
            Self::PrimaryToPegged => Currency::Primary,
            Self::PeggedToPrimary => Currency::Pegged,
        }
    }

    pub fn target(&self) -> Currency {
        self.source().other()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrimaryToPegged => "primary_to_pegged",
            Self::PeggedToPrimary => "pegged_to_primary",
        }
    }

    /// Converted amount at `price` (primary units per pegged unit).
    ///
    /// The source is debited exactly `amount`, so the credited leg is cut
    /// toward zero: it never exceeds the value taken from the source.
    pub fn apply(&self, amount: Decimal, price: Decimal) -> Decimal {
        match self {
            Self::PrimaryToPegged => quantize_down(amount / price),
            Self::PeggedToPrimary => quantize_down(amount * price),
        }
    }
}

/// Round to cents, half away from zero
pub fn quantize(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Round to cents toward zero
pub fn quantize_down(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::ToZero)
}

/// Validate a caller-supplied amount: strictly positive and no finer than a
/// cent. Returns the amount at cent scale.
pub fn validate_amount(amount: Decimal) -> AppResult<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(AppError::InvalidAmount(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    if amount.normalize().scale() > MONEY_SCALE {
        return Err(AppError::InvalidAmount(format!(
            "amount {} has more than {} decimal places",
            amount, MONEY_SCALE
        )));
    }
    let mut amount = amount.normalize();
    amount.rescale(MONEY_SCALE);
    Ok(amount)
}

/// Convert a float amount from an outer layer, rejecting NaN and infinities
pub fn amount_from_f64(value: f64) -> AppResult<Decimal> {
    if !value.is_finite() {
        return Err(AppError::InvalidAmount(format!("amount {} is not finite", value)));
    }
    let amount = Decimal::from_f64(value)
        .ok_or_else(|| AppError::InvalidAmount(format!("amount {} is out of range", value)))?;
    validate_amount(quantize(amount))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_quantize_rounds_half_up() {
        assert_eq!(quantize(dec!(0.125)), dec!(0.13));
        assert_eq!(quantize(dec!(0.124)), dec!(0.12));
        assert_eq!(quantize(dec!(0.0033)), dec!(0.00));
    }

    #[test]
    fn test_validate_amount() {
        assert!(validate_amount(dec!(0)).is_err());
        assert!(validate_amount(dec!(-1)).is_err());
        assert!(validate_amount(dec!(0.001)).is_err());
        assert_eq!(validate_amount(dec!(10.50)).unwrap().to_string(), "10.50");
        assert_eq!(validate_amount(dec!(7)).unwrap().to_string(), "7.00");
    }

    #[test]
    fn test_amount_from_f64_rejects_non_finite() {
        assert!(matches!(amount_from_f64(f64::NAN), Err(AppError::InvalidAmount(_))));
        assert!(matches!(amount_from_f64(f64::INFINITY), Err(AppError::InvalidAmount(_))));
        assert_eq!(amount_from_f64(12.5).unwrap(), dec!(12.5));
    }

    #[test]
    fn test_currency_codes() {
        assert_eq!(Currency::parse("usxw").unwrap(), Currency::Pegged);
        assert!(matches!(Currency::parse("EUR"), Err(AppError::UnsupportedCurrency(_))));
        assert_eq!(Currency::Primary.other(), Currency::Pegged);
    }

    #[test]
    fn test_conversion_at_reference_price() {
        let price = dec!(2000.00);
        assert_eq!(ConversionDirection::PrimaryToPegged.apply(dec!(500.00), price), dec!(0.25));
        assert_eq!(ConversionDirection::PeggedToPrimary.apply(dec!(0.25), price), dec!(500.00));
    }

    #[test]
    fn test_conversion_never_rounds_up() {
        let price = dec!(2000.00);
        // 1010 / 2000 = 0.505 would round half-up to 0.51, worth 1020
        assert_eq!(ConversionDirection::PrimaryToPegged.apply(dec!(1010.00), price), dec!(0.50));
        assert_eq!(ConversionDirection::PeggedToPrimary.apply(dec!(0.01), dec!(0.75)), dec!(0.00));
        assert_eq!(quantize_down(dec!(-0.129)), dec!(-0.12));
    }
}
