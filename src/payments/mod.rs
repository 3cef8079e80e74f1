//! Payment processor capability.
//!
//! The ledger never talks to a processor directly: it asks a [`PaymentGateway`]
//! to create charge intents and payouts, and receives settlement outcomes as
//! signed webhook events parsed into [`PaymentEvent`].

pub mod webhook;

pub use webhook::{parse_event, WebhookVerifier};

use crate::error::{AppError, AppResult};
use crate::models::{Account, Currency};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Processor-side failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("request declined: {0}")]
    Declined(String),

    #[error("processor unavailable: {0}")]
    Unavailable(String),

    #[error("processor timed out")]
    Timeout,
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        AppError::ExternalService(err.to_string())
    }
}

/// A charge the user still has to confirm with the processor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeIntent {
    pub intent_id: String,
    /// Handed to the client to confirm the charge
    pub client_secret: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Pending,
    Paid,
}

/// Processor acknowledgement of a payout request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutHandle {
    pub payout_id: String,
    pub status: PayoutStatus,
}

/// Settlement outcome delivered by the processor. Delivery is at least once
/// and in no particular order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentEvent {
    ChargeSucceeded {
        event_id: String,
        intent_id: String,
        account_id: Option<Uuid>,
    },
    ChargeFailed {
        event_id: String,
        intent_id: String,
        account_id: Option<Uuid>,
        reason: String,
    },
    PayoutPaid {
        event_id: String,
        payout_id: String,
        account_id: Option<Uuid>,
        /// Withdrawal record the payout was created for
        record_id: Option<Uuid>,
    },
    PayoutFailed {
        event_id: String,
        payout_id: String,
        account_id: Option<Uuid>,
        record_id: Option<Uuid>,
        reason: String,
    },
    /// Acknowledged and ignored
    Unhandled { event_id: String, event_type: String },
}

impl PaymentEvent {
    pub fn event_id(&self) -> &str {
        match self {
            Self::ChargeSucceeded { event_id, .. }
            | Self::ChargeFailed { event_id, .. }
            | Self::PayoutPaid { event_id, .. }
            | Self::PayoutFailed { event_id, .. }
            | Self::Unhandled { event_id, .. } => event_id,
        }
    }

    /// Processor id of the charge or payout the event settles
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::ChargeSucceeded { intent_id, .. } | Self::ChargeFailed { intent_id, .. } => {
                Some(intent_id)
            }
            Self::PayoutPaid { payout_id, .. } | Self::PayoutFailed { payout_id, .. } => {
                Some(payout_id)
            }
            Self::Unhandled { .. } => None,
        }
    }

    pub fn account_id(&self) -> Option<Uuid> {
        match self {
            Self::ChargeSucceeded { account_id, .. }
            | Self::ChargeFailed { account_id, .. }
            | Self::PayoutPaid { account_id, .. }
            | Self::PayoutFailed { account_id, .. } => *account_id,
            Self::Unhandled { .. } => None,
        }
    }

    /// Ledger record id echoed back from the payout request metadata
    pub fn record_id(&self) -> Option<Uuid> {
        match self {
            Self::PayoutPaid { record_id, .. } | Self::PayoutFailed { record_id, .. } => *record_id,
            _ => None,
        }
    }
}

/// Outbound calls to the payment processor plus webhook authentication
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_charge_intent(
        &self,
        account: &Account,
        amount: Decimal,
        currency: Currency,
    ) -> Result<ChargeIntent, GatewayError>;

    /// `reference` is the id of the pending withdrawal record. Implementations
    /// send it as `record_id` payout metadata so payout events carry it back.
    async fn create_payout(
        &self,
        account: &Account,
        amount: Decimal,
        currency: Currency,
        reference: Uuid,
    ) -> Result<PayoutHandle, GatewayError>;

    fn verify_and_parse_webhook(&self, payload: &[u8], signature: &str) -> AppResult<PaymentEvent>;
}
