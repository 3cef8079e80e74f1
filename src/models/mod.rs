//! Domain models for the bullion ledger.
//!
//! Accounts, transaction records, the reference price series and
//! investment tiers/positions, plus the fixed-point money helpers they share.

pub mod account;
pub mod investment;
pub mod money;
pub mod price;
pub mod transaction;

// Re-export all models for convenient access
pub use account::{Account, AccountStatus, BalanceDelta};
pub use investment::{
    default_tiers, InvestmentPosition, InvestmentTier, NewPosition, NewTier, ReturnRateKind,
    DEFAULT_TERM_DAYS,
};
pub use money::{
    amount_from_f64, quantize, quantize_down, validate_amount, ConversionDirection, Currency,
};
pub use price::{NewPricePoint, ReferencePricePoint, SOURCE_INITIAL_SEED, SOURCE_SIMULATION};
pub use transaction::{
    merge_metadata, NewTransaction, TransactionKind, TransactionRecord, TransactionStatus,
};
