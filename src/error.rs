use crate::database::DatabaseError;
use crate::models::{Currency, TransactionStatus};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::Error as SqlxError;
use thiserror::Error;
use uuid::Uuid;

/// Application-level error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Amount is zero, negative, non-finite or finer than a cent
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Balance does not cover the requested debit
    #[error("Insufficient {currency} balance: available {available}, requested {requested}")]
    InsufficientFunds {
        currency: Currency,
        available: Decimal,
        requested: Decimal,
    },

    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    /// No reference price has been published yet
    #[error("Reference price unavailable")]
    PriceUnavailable,

    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    /// Payment processor failed or timed out
    #[error("External service error: {0}")]
    ExternalService(String),

    /// Settlement event with no matching transaction record
    #[error("No {kind} transaction found for correlation id {correlation_id}")]
    RecordNotFound { kind: String, correlation_id: String },

    /// Idempotent no-op: the record already reached a terminal status
    #[error("Transaction {record_id} already settled as {status}")]
    AlreadySettled {
        record_id: Uuid,
        status: TransactionStatus,
    },

    #[error("Invalid investment tier: {0}")]
    InvalidTier(String),

    #[error("Account {0} is closed")]
    AccountClosed(Uuid),

    #[error("Account cannot be closed: {0}")]
    AccountNotClosable(String),

    #[error("Invalid webhook: {0}")]
    InvalidWebhook(String),

    /// Concurrent modification detected
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database errors
    #[error("SQL error: {0}")]
    Sqlx(#[from] SqlxError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Message(String),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Structured error for the audit trail: stable kind, human detail, correlation id
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorReport {
    pub kind: &'static str,
    pub detail: String,
    pub correlation_id: Option<String>,
}

impl AppError {
    /// Stable machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::InvalidAmount(_) => "invalid_amount",
            AppError::InsufficientFunds { .. } => "insufficient_funds",
            AppError::UnsupportedCurrency(_) => "unsupported_currency",
            AppError::PriceUnavailable => "price_unavailable",
            AppError::InvalidPrice(_) => "invalid_price",
            AppError::ExternalService(_) => "external_service_error",
            AppError::RecordNotFound { .. } => "record_not_found",
            AppError::AlreadySettled { .. } => "already_settled",
            AppError::InvalidTier(_) => "invalid_tier",
            AppError::AccountClosed(_) => "account_closed",
            AppError::AccountNotClosable(_) => "account_not_closable",
            AppError::InvalidWebhook(_) => "invalid_webhook",
            AppError::Conflict(_) => "conflict",
            AppError::Database(_) | AppError::Sqlx(_) => "database",
            AppError::Config(_) => "config",
            AppError::Validation(_) => "validation",
            AppError::NotFound(_) => "not_found",
            AppError::Serialization(_) => "serialization",
            AppError::Message(_) => "internal",
        }
    }

    /// Build the structured report kept in transaction metadata and audit logs
    pub fn report(&self, correlation_id: Option<&str>) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            detail: self.to_string(),
            correlation_id: correlation_id.map(str::to_string),
        }
    }

    /// Check if error is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_) | AppError::RecordNotFound { .. })
    }

    /// Idempotent no-op rather than a failure
    pub fn is_already_settled(&self) -> bool {
        matches!(self, AppError::AlreadySettled { .. })
    }

    /// Caller input problems, surfaced as-is to the requester
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::InvalidAmount(_)
                | AppError::InsufficientFunds { .. }
                | AppError::UnsupportedCurrency(_)
                | AppError::InvalidTier(_)
                | AppError::Validation(_)
        )
    }

    /// Get HTTP status code for the error
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::NotFound(_) | AppError::RecordNotFound { .. } => 404,
            AppError::InvalidWebhook(_) => 401,
            AppError::InvalidAmount(_)
            | AppError::UnsupportedCurrency(_)
            | AppError::InvalidTier(_)
            | AppError::InvalidPrice(_)
            | AppError::Validation(_) => 400,
            AppError::InsufficientFunds { .. }
            | AppError::AccountClosed(_)
            | AppError::AccountNotClosable(_)
            | AppError::Conflict(_) => 409,
            AppError::AlreadySettled { .. } => 200,
            AppError::PriceUnavailable => 503,
            AppError::ExternalService(_) => 502,
            AppError::Config(_) => 500,
            AppError::Database(_) | AppError::Sqlx(_) => 500,
            _ => 500,
        }
    }
}

/// Repository-specific error types
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Database query error
    #[error("Query error: {0}")]
    Query(SqlxError),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Duplicate record
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// Constraint violation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Business rule violation
    #[error("Business rule violation: {0}")]
    BusinessRule(String),

    /// Balance would go negative
    #[error("Insufficient {currency} balance: available {available}, requested {requested}")]
    InsufficientFunds {
        currency: Currency,
        available: Decimal,
        requested: Decimal,
    },

    /// Record left `pending` before this write could take its lock
    #[error("Transaction {record_id} already {status}")]
    AlreadySettled {
        record_id: Uuid,
        status: TransactionStatus,
    },

    #[error("Account {0} is closed")]
    AccountClosed(Uuid),

    /// Optimistic check failed under lock
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(msg) => AppError::NotFound(msg),
            RepositoryError::Query(e) => AppError::Sqlx(e),
            RepositoryError::Duplicate(msg) => AppError::Conflict(format!("Duplicate: {}", msg)),
            RepositoryError::ConstraintViolation(msg) => AppError::Validation(msg),
            RepositoryError::InvalidInput(msg) => AppError::Validation(msg),
            RepositoryError::BusinessRule(msg) => AppError::AccountNotClosable(msg),
            RepositoryError::InsufficientFunds {
                currency,
                available,
                requested,
            } => AppError::InsufficientFunds {
                currency,
                available,
                requested,
            },
            RepositoryError::AlreadySettled { record_id, status } => {
                AppError::AlreadySettled { record_id, status }
            }
            RepositoryError::AccountClosed(id) => AppError::AccountClosed(id),
            RepositoryError::Conflict(msg) => AppError::Conflict(msg),
        }
    }
}

impl From<SqlxError> for RepositoryError {
    fn from(err: SqlxError) -> Self {
        match &err {
            SqlxError::RowNotFound => RepositoryError::NotFound("Record not found".to_string()),
            SqlxError::Database(db_err) => {
                // Check for common PostgreSQL error codes
                let code = db_err.code().map(|c| c.to_string());
                if code.as_deref() == Some("23505") {
                    // Unique violation
                    RepositoryError::Duplicate(db_err.message().to_string())
                } else if code.as_deref() == Some("23503") {
                    // Foreign key violation
                    RepositoryError::ConstraintViolation(db_err.message().to_string())
                } else if code.as_deref() == Some("23514") {
                    // Check constraint violation
                    RepositoryError::ConstraintViolation(db_err.message().to_string())
                } else if code.as_deref() == Some("40001") || code.as_deref() == Some("40P01") {
                    // Serialization failure / deadlock
                    RepositoryError::Conflict(db_err.message().to_string())
                } else {
                    RepositoryError::Query(err)
                }
            }
            _ => RepositoryError::Query(err),
        }
    }
}
