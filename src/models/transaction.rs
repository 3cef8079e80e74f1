//! Transaction records: the audit trail of every money movement attempt

use super::money::Currency;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// What a transaction record represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    Conversion,
    Investment,
    Payout,
    Maturity,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
            Self::Conversion => "conversion",
            Self::Investment => "investment",
            Self::Payout => "payout",
            Self::Maturity => "maturity",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(Self::Deposit),
            "withdrawal" => Some(Self::Withdrawal),
            "conversion" => Some(Self::Conversion),
            "investment" => Some(Self::Investment),
            "payout" => Some(Self::Payout),
            "maturity" => Some(Self::Maturity),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record status. `Pending` moves once to `Completed` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted transaction record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    /// Signed effect on `currency`: credits positive, debits negative
    pub amount: Decimal,
    pub currency: Currency,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub correlation_id: Option<String>,
    /// Reference price at the time of the write, when one was published
    pub reference_price: Option<Decimal>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TransactionRecord {
    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }

    /// Read a string field out of the metadata object
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// A record ready to be written. Built complete in one go; stores never
/// patch a half-initialised record after insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub account_id: Uuid,
    pub amount: Decimal,
    pub currency: Currency,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub correlation_id: Option<String>,
    pub reference_price: Option<Decimal>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl NewTransaction {
    /// `completed_at` is derived from `status`
    pub fn new(
        account_id: Uuid,
        amount: Decimal,
        currency: Currency,
        kind: TransactionKind,
        status: TransactionStatus,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            account_id,
            amount,
            currency,
            kind,
            status,
            correlation_id: None,
            reference_price: None,
            metadata: Value::Object(Default::default()),
            created_at: at,
            completed_at: (status == TransactionStatus::Completed).then_some(at),
        }
    }

    /// Zero-amount failed record carrying an error detail
    pub fn failure(
        account_id: Uuid,
        kind: TransactionKind,
        error: Value,
        at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            account_id,
            Decimal::ZERO,
            Currency::Primary,
            kind,
            TransactionStatus::Failed,
            at,
        )
        .with_metadata(serde_json::json!({ "error": error }))
    }

    pub fn with_correlation(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_reference_price(mut self, price: Option<Decimal>) -> Self {
        self.reference_price = price;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Materialise into a record with a fresh id
    pub fn into_record(self) -> TransactionRecord {
        TransactionRecord {
            id: Uuid::new_v4(),
            account_id: self.account_id,
            amount: self.amount,
            currency: self.currency,
            kind: self.kind,
            status: self.status,
            correlation_id: self.correlation_id,
            reference_price: self.reference_price,
            metadata: self.metadata,
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }
}

/// Merge the keys of `patch` into `base` when both are JSON objects
pub fn merge_metadata(base: &mut Value, patch: &Value) {
    match (base.as_object_mut(), patch.as_object()) {
        (Some(base), Some(patch)) => {
            for (key, value) in patch {
                base.insert(key.clone(), value.clone());
            }
        }
        _ => {
            if !patch.is_null() {
                *base = patch.clone();
            }
        }
    }
}
