//! Settlement reconciliation for asynchronous processor events.
//!
//! Events arrive at least once and out of order, and may beat the commit of
//! the record they settle. Each event is matched to its record by correlation
//! id (retrying with bounded backoff) and applied with [`Ledger::resolve`],
//! which only ever moves a record out of `pending`.

use crate::config::ReconcilerConfig;
use crate::error::{AppError, AppResult};
use crate::models::{TransactionKind, TransactionRecord};
use crate::payments::{PaymentEvent, PaymentGateway};
use crate::repositories::TransactionStore;
use crate::services::audit::AuditTrail;
use crate::services::ledger::{Ledger, Resolution};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// What an event did
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The record moved to a terminal status
    Settled { record: TransactionRecord },
    /// Redelivery or late event for a finished record; nothing changed
    AlreadySettled { record_id: Uuid },
    /// Event type the ledger does not act on
    Ignored { event_type: String },
}

pub struct SettlementReconciler {
    ledger: Arc<Ledger>,
    transactions: Arc<dyn TransactionStore>,
    audit: Option<Arc<AuditTrail>>,
    config: ReconcilerConfig,
}

impl SettlementReconciler {
    pub fn new(
        ledger: Arc<Ledger>,
        transactions: Arc<dyn TransactionStore>,
        audit: Option<Arc<AuditTrail>>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            ledger,
            transactions,
            audit,
            config,
        }
    }

    /// Verify a raw webhook through the gateway, then apply it
    pub async fn handle_webhook(
        &self,
        gateway: &dyn PaymentGateway,
        payload: &[u8],
        signature: &str,
    ) -> AppResult<ReconcileOutcome> {
        let event = gateway.verify_and_parse_webhook(payload, signature)?;
        self.on_external_event(event).await
    }

    /// Apply one processor event. Replays end in the same state as the first
    /// delivery and return `AlreadySettled`.
    pub async fn on_external_event(&self, event: PaymentEvent) -> AppResult<ReconcileOutcome> {
        let (kind, resolution) = match &event {
            PaymentEvent::ChargeSucceeded { .. } => {
                (TransactionKind::Deposit, Resolution::CompleteAndCredit)
            }
            PaymentEvent::ChargeFailed { reason, .. } => (
                TransactionKind::Deposit,
                Resolution::Fail {
                    reason: reason.clone(),
                },
            ),
            PaymentEvent::PayoutPaid { .. } => (TransactionKind::Withdrawal, Resolution::Complete),
            PaymentEvent::PayoutFailed { reason, .. } => (
                TransactionKind::Withdrawal,
                Resolution::FailAndReverse {
                    reason: reason.clone(),
                },
            ),
            PaymentEvent::Unhandled { event_type, .. } => {
                info!("Ignoring {} event {}", event_type, event.event_id());
                return Ok(ReconcileOutcome::Ignored {
                    event_type: event_type.clone(),
                });
            }
        };

        let correlation_id = event
            .correlation_id()
            .ok_or_else(|| AppError::InvalidWebhook("event has no correlation id".to_string()))?;

        let record = match self.find_with_retry(kind, correlation_id, &event).await? {
            Some(record) => record,
            None => return Err(self.drop_unmatched(&event, kind, correlation_id).await),
        };

        if !record.is_pending() {
            warn!(
                "Event {} for {} {} ignored: record already {}",
                event.event_id(),
                kind,
                record.id,
                record.status
            );
            return Ok(ReconcileOutcome::AlreadySettled {
                record_id: record.id,
            });
        }

        let compensating = matches!(resolution, Resolution::FailAndReverse { .. });
        match self.ledger.resolve(record.id, resolution).await {
            Ok(receipt) => {
                if compensating {
                    if let Some(audit) = &self.audit {
                        let reason = receipt
                            .record
                            .metadata_str("failure_reason")
                            .unwrap_or_default()
                            .to_string();
                        // The reversal is committed; a lost audit line must not fail the event
                        if let Err(e) = audit
                            .log_compensation(
                                receipt.account.id,
                                receipt.record.id,
                                -receipt.record.amount,
                                &reason,
                            )
                            .await
                        {
                            error!(
                                "Failed to audit reversal of withdrawal {}: {}",
                                receipt.record.id, e
                            );
                        }
                    }
                }
                info!(
                    "Event {} settled {} {} as {}",
                    event.event_id(),
                    kind,
                    receipt.record.id,
                    receipt.record.status
                );
                Ok(ReconcileOutcome::Settled {
                    record: receipt.record,
                })
            }
            // A concurrent delivery of the same event won the record lock
            Err(AppError::AlreadySettled { record_id, status }) => {
                warn!(
                    "Event {} lost the race for {} {}: already {}",
                    event.event_id(),
                    kind,
                    record_id,
                    status
                );
                Ok(ReconcileOutcome::AlreadySettled { record_id })
            }
            Err(e) => Err(e),
        }
    }

    /// Look the record up, backing off between attempts while it is missing
    async fn find_with_retry(
        &self,
        kind: TransactionKind,
        correlation_id: &str,
        event: &PaymentEvent,
    ) -> AppResult<Option<TransactionRecord>> {
        let attempts = self.config.max_attempts.max(1);
        for attempt in 1..=attempts {
            let found = self.match_record(kind, correlation_id, event).await?;
            if found.is_some() {
                return Ok(found);
            }
            if attempt < attempts {
                let delay = self.config.backoff(attempt);
                warn!(
                    "No {} record for {} yet (attempt {}/{}), retrying in {:?}",
                    kind, correlation_id, attempt, attempts, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
        Ok(None)
    }

    /// Match by correlation id, falling back to the record id the event
    /// carries when the correlation id never reached the record. A record
    /// that belongs to another account, or that is tied to another processor
    /// object, counts as missing.
    async fn match_record(
        &self,
        kind: TransactionKind,
        correlation_id: &str,
        event: &PaymentEvent,
    ) -> AppResult<Option<TransactionRecord>> {
        let same_account =
            |r: &TransactionRecord| event.account_id().map_or(true, |id| r.account_id == id);

        let by_correlation = self
            .transactions
            .find_by_correlation(kind, correlation_id)
            .await?
            .filter(|r| same_account(r))
            .filter(|r| event.record_id().map_or(true, |id| r.id == id));
        if by_correlation.is_some() {
            return Ok(by_correlation);
        }

        let Some(record_id) = event.record_id() else {
            return Ok(None);
        };
        let by_reference = self.transactions.find_record(record_id).await?.filter(|r| {
            r.kind == kind
                && same_account(r)
                && r.correlation_id.as_deref().map_or(true, |c| c == correlation_id)
        });
        if let Some(record) = &by_reference {
            warn!(
                "Matched {} {} by record id; correlation id {} is not on the record",
                kind, record.id, correlation_id
            );
        }
        Ok(by_reference)
    }

    /// Audit and record a miss; no funds are created
    async fn drop_unmatched(
        &self,
        event: &PaymentEvent,
        kind: TransactionKind,
        correlation_id: &str,
    ) -> AppError {
        let err = AppError::RecordNotFound {
            kind: kind.to_string(),
            correlation_id: correlation_id.to_string(),
        };
        error!("Dropping event {}: {}", event.event_id(), err);

        if let Some(audit) = &self.audit {
            let event_type = match event {
                PaymentEvent::ChargeSucceeded { .. } => "charge_succeeded",
                PaymentEvent::ChargeFailed { .. } => "charge_failed",
                PaymentEvent::PayoutPaid { .. } => "payout_paid",
                PaymentEvent::PayoutFailed { .. } => "payout_failed",
                PaymentEvent::Unhandled { .. } => "unhandled",
            };
            if let Err(e) = audit
                .log_reconciliation_miss(
                    event.event_id(),
                    event_type,
                    correlation_id,
                    event.account_id(),
                    self.config.max_attempts,
                )
                .await
            {
                error!("Failed to audit reconciliation miss: {}", e);
            }
        }

        if let Some(account_id) = event.account_id() {
            if let Err(e) = self
                .ledger
                .record_failure(account_id, kind, &err.report(Some(correlation_id)))
                .await
            {
                warn!("Could not record reconciliation miss for {}: {}", account_id, e);
            }
        }

        err
    }
}
