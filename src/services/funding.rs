//! Deposits and withdrawals through the payment processor

use crate::error::{AppError, AppResult};
use crate::models::{
    validate_amount, Currency, TransactionKind, TransactionRecord, TransactionStatus,
};
use crate::payments::{ChargeIntent, PaymentGateway, PayoutStatus};
use crate::services::audit::AuditTrail;
use crate::services::ledger::{Ledger, Resolution};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// A deposit waiting for the processor to confirm the charge
#[derive(Debug, Clone, PartialEq)]
pub struct DepositInitiation {
    pub intent: ChargeIntent,
    pub record: TransactionRecord,
}

pub struct FundingService {
    ledger: Arc<Ledger>,
    gateway: Arc<dyn PaymentGateway>,
    audit: Option<Arc<AuditTrail>>,
}

impl FundingService {
    pub fn new(
        ledger: Arc<Ledger>,
        gateway: Arc<dyn PaymentGateway>,
        audit: Option<Arc<AuditTrail>>,
    ) -> Self {
        Self {
            ledger,
            gateway,
            audit,
        }
    }

    /// Create a charge intent and a pending deposit correlated with it.
    /// Balances change only when the charge-succeeded event arrives.
    pub async fn initiate_deposit(
        &self,
        account_id: Uuid,
        amount: Decimal,
    ) -> AppResult<DepositInitiation> {
        let amount = validate_amount(amount)?;
        let account = self.ledger.account(account_id).await?;
        if !account.is_open() {
            return Err(AppError::AccountClosed(account_id));
        }

        let intent = match self
            .gateway
            .create_charge_intent(&account, amount, Currency::Primary)
            .await
        {
            Ok(intent) => intent,
            Err(e) => {
                let err = AppError::from(e);
                error!("Charge intent failed for account {}: {}", account_id, err);
                self.ledger
                    .record_failure(account_id, TransactionKind::Deposit, &err.report(None))
                    .await?;
                return Err(err);
            }
        };

        let record = self
            .ledger
            .record_intent(
                account_id,
                amount,
                Currency::Primary,
                TransactionKind::Deposit,
                &intent.intent_id,
            )
            .await?;

        info!(
            "Deposit of {} initiated for account {} (intent {})",
            amount, account_id, intent.intent_id
        );
        Ok(DepositInitiation { intent, record })
    }

    /// Debit the primary balance, then ask the processor to pay it out.
    /// A processor failure reverses the debit before returning the error.
    /// Once the payout exists the withdrawal stays pending until its
    /// settlement event arrives.
    pub async fn initiate_withdrawal(
        &self,
        account_id: Uuid,
        amount: Decimal,
    ) -> AppResult<TransactionRecord> {
        let amount = validate_amount(amount)?;
        let account = self.ledger.account(account_id).await?;

        let pending = self
            .ledger
            .debit(
                account_id,
                amount,
                Currency::Primary,
                TransactionKind::Withdrawal,
                TransactionStatus::Pending,
            )
            .await?
            .record;

        let payout = match self
            .gateway
            .create_payout(&account, amount, Currency::Primary, pending.id)
            .await
        {
            Ok(payout) => payout,
            Err(e) => {
                let err = AppError::from(e);
                error!(
                    "Payout request failed for account {}: {}; reversing withdrawal {}",
                    account_id, err, pending.id
                );
                self.ledger
                    .resolve(
                        pending.id,
                        Resolution::FailAndReverse {
                            reason: err.to_string(),
                        },
                    )
                    .await?;
                if let Some(audit) = &self.audit {
                    if let Err(e) = audit
                        .log_compensation(account_id, pending.id, amount, &err.to_string())
                        .await
                    {
                        error!("Failed to audit reversal of withdrawal {}: {}", pending.id, e);
                    }
                }
                return Err(err);
            }
        };

        // The payout exists, so the debit stands either way. Without the
        // correlation id its events are matched by the record id they carry.
        let mut record = match self
            .ledger
            .attach_correlation_id(pending.id, &payout.payout_id)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                error!(
                    "Could not link payout {} to withdrawal {}: {}",
                    payout.payout_id, pending.id, e
                );
                if let Some(audit) = &self.audit {
                    if let Err(audit_err) = audit
                        .log_unlinked_payout(
                            account_id,
                            pending.id,
                            &payout.payout_id,
                            &e.to_string(),
                        )
                        .await
                    {
                        error!(
                            "Failed to audit unlinked payout {}: {}",
                            payout.payout_id, audit_err
                        );
                    }
                }
                pending
            }
        };

        if payout.status == PayoutStatus::Paid {
            match self.ledger.resolve(record.id, Resolution::Complete).await {
                Ok(receipt) => record = receipt.record,
                // The paid webhook got there first
                Err(e) if e.is_already_settled() => {}
                Err(e) => return Err(e),
            }
        }

        info!(
            "Withdrawal of {} for account {} submitted (payout {}, {})",
            amount, account_id, payout.payout_id, record.status
        );
        Ok(record)
    }
}
