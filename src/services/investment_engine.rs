//! Fixed-term investment positions and the recurring payout cycle

use crate::clock::Clock;
use crate::error::{AppError, AppResult, ErrorReport};
use crate::models::{
    default_tiers, quantize, Account, BalanceDelta, Currency, InvestmentPosition, InvestmentTier,
    NewPosition, NewTier, NewTransaction, TransactionKind, TransactionRecord, TransactionStatus,
};
use crate::repositories::{LedgerEntry, PayoutApplication, PositionStore};
use crate::services::audit::AuditTrail;
use crate::services::ledger::Ledger;
use crate::services::oracle::PriceFeed;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A newly opened position and the debit that funded it
#[derive(Debug, Clone, PartialEq)]
pub struct OpenedPosition {
    pub account: Account,
    pub record: TransactionRecord,
    pub position: InvestmentPosition,
}

/// A position the cycle could not pay
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionFailure {
    pub position_id: Uuid,
    pub account_id: Uuid,
    pub error: ErrorReport,
}

/// Summary of one payout cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PayoutCycleReport {
    pub examined: usize,
    pub paid: usize,
    pub matured: usize,
    pub skipped: usize,
    pub failures: Vec<PositionFailure>,
}

enum PositionOutcome {
    Paid,
    Matured,
}

pub struct InvestmentPositionEngine {
    ledger: Arc<Ledger>,
    positions: Arc<dyn PositionStore>,
    prices: Arc<dyn PriceFeed>,
    clock: Arc<dyn Clock>,
    audit: Option<Arc<AuditTrail>>,
}

impl InvestmentPositionEngine {
    pub fn new(
        ledger: Arc<Ledger>,
        positions: Arc<dyn PositionStore>,
        prices: Arc<dyn PriceFeed>,
        clock: Arc<dyn Clock>,
        audit: Option<Arc<AuditTrail>>,
    ) -> Self {
        Self {
            ledger,
            positions,
            prices,
            clock,
            audit,
        }
    }

    /// Store the standard tier catalogue; existing tiers are left as they are
    pub async fn seed_default_tiers(&self) -> AppResult<Vec<InvestmentTier>> {
        let mut tiers = Vec::new();
        for tier in default_tiers() {
            tiers.push(self.positions.upsert_tier(tier).await?);
        }
        info!("Investment tiers ready: {}", tiers.len());
        Ok(tiers)
    }

    pub async fn add_tier(&self, tier: NewTier) -> AppResult<InvestmentTier> {
        Ok(self.positions.upsert_tier(tier).await?)
    }

    pub async fn tiers(&self, active_only: bool) -> AppResult<Vec<InvestmentTier>> {
        Ok(self.positions.list_tiers(active_only).await?)
    }

    pub async fn positions(
        &self,
        account_id: Uuid,
        active_only: bool,
    ) -> AppResult<Vec<InvestmentPosition>> {
        Ok(self
            .positions
            .positions_for_account(account_id, active_only)
            .await?)
    }

    async fn active_tier(&self, tier_id: Uuid) -> AppResult<InvestmentTier> {
        match self.positions.find_tier(tier_id).await? {
            Some(tier) if tier.is_active => Ok(tier),
            Some(tier) => Err(AppError::InvalidTier(format!("tier {} is not offered", tier.name))),
            None => Err(AppError::InvalidTier(format!("unknown tier {}", tier_id))),
        }
    }

    /// Debit the tier principal from the primary balance and open a position
    pub async fn open(&self, account_id: Uuid, tier_id: Uuid) -> AppResult<OpenedPosition> {
        let tier = self.active_tier(tier_id).await?;
        let price = self.prices.current().await?.price;
        let now = self.clock.now();

        let record = NewTransaction::new(
            account_id,
            -tier.principal,
            Currency::Primary,
            TransactionKind::Investment,
            TransactionStatus::Completed,
            now,
        )
        .with_reference_price(Some(price))
        .with_metadata(json!({
            "tier": tier.name,
            "tier_id": tier.id.to_string(),
        }));
        let funding = LedgerEntry::new(
            BalanceDelta::single(Currency::Primary, -tier.principal),
            record,
        );
        let position = NewPosition::for_tier(account_id, &tier, price, now);

        let (receipt, position) = self.positions.open_position(funding, position).await?;

        info!(
            "Opened {} position {} for account {} (principal {}, matures {})",
            tier.name, position.id, account_id, position.principal, position.maturity_date
        );
        Ok(OpenedPosition {
            account: receipt.account,
            record: receipt.record,
            position,
        })
    }

    /// Pay every active position once for today. Each position is its own
    /// unit of work; a failing position is recorded and the cycle moves on.
    pub async fn run_payout_cycle(&self) -> AppResult<PayoutCycleReport> {
        let positions = self.positions.active_positions().await?;
        let now = self.clock.now();
        let mut report = PayoutCycleReport {
            examined: positions.len(),
            ..Default::default()
        };

        for position in positions {
            if position.paid_on(now) {
                debug!("Position {} already paid on {}", position.id, now.date_naive());
                report.skipped += 1;
                continue;
            }

            match self.pay_position(&position, now).await {
                Ok(PositionOutcome::Paid) => report.paid += 1,
                Ok(PositionOutcome::Matured) => {
                    report.paid += 1;
                    report.matured += 1;
                }
                Err(AppError::Conflict(msg)) => {
                    warn!("Position {} skipped: {}", position.id, msg);
                    report.skipped += 1;
                }
                Err(e) => {
                    let failure = self.record_position_failure(&position, &e).await;
                    report.failures.push(failure);
                }
            }
        }

        info!(
            "Payout cycle: {} examined, {} paid, {} matured, {} skipped, {} failed",
            report.examined,
            report.paid,
            report.matured,
            report.skipped,
            report.failures.len()
        );
        Ok(report)
    }

    async fn pay_position(
        &self,
        position: &InvestmentPosition,
        now: DateTime<Utc>,
    ) -> AppResult<PositionOutcome> {
        let tier = self
            .positions
            .find_tier(position.tier_id)
            .await?
            .ok_or_else(|| AppError::InvalidTier(format!("unknown tier {}", position.tier_id)))?;
        let price = self.prices.current().await?.price;

        let rate = tier.effective_rate(price, position.initial_reference_price);
        let payout_primary = quantize(position.current_value * rate);
        let payout_pegged = quantize(payout_primary / price);
        let new_current_value = position.current_value + payout_primary;
        let new_total_earned = position.total_earned + payout_primary;

        let mut entries = Vec::with_capacity(2);
        if payout_pegged > Decimal::ZERO {
            let record = NewTransaction::new(
                position.account_id,
                payout_pegged,
                Currency::Pegged,
                TransactionKind::Payout,
                TransactionStatus::Completed,
                now,
            )
            .with_reference_price(Some(price))
            .with_metadata(json!({
                "position_id": position.id.to_string(),
                "primary_equivalent": payout_primary.to_string(),
                "rate": rate.to_string(),
            }));
            entries.push(LedgerEntry::new(
                BalanceDelta::single(Currency::Pegged, payout_pegged),
                record,
            ));
        } else {
            debug!(
                "Position {} payout {} rounds to no pegged units; accrued only",
                position.id, payout_primary
            );
        }

        let matures = position.is_mature(now);
        if matures {
            let final_pegged = quantize(new_current_value / price);
            if final_pegged > Decimal::ZERO {
                let record = NewTransaction::new(
                    position.account_id,
                    final_pegged,
                    Currency::Pegged,
                    TransactionKind::Maturity,
                    TransactionStatus::Completed,
                    now,
                )
                .with_reference_price(Some(price))
                .with_metadata(json!({
                    "position_id": position.id.to_string(),
                    "primary_equivalent": new_current_value.to_string(),
                }));
                entries.push(LedgerEntry::new(
                    BalanceDelta::single(Currency::Pegged, final_pegged),
                    record,
                ));
            }
        }

        let receipt = self
            .positions
            .apply_payout(PayoutApplication {
                position_id: position.id,
                expected_current_value: position.current_value,
                payout_date: now.date_naive(),
                new_current_value,
                new_total_earned,
                deactivate: matures,
                entries,
                at: now,
            })
            .await?;

        info!(
            "Payout of {} ({} {}) applied to position {}",
            payout_primary,
            payout_pegged,
            Currency::Pegged,
            position.id
        );
        if matures {
            info!(
                "Position {} matured at value {}",
                position.id, receipt.position.current_value
            );
            Ok(PositionOutcome::Matured)
        } else {
            Ok(PositionOutcome::Paid)
        }
    }

    async fn record_position_failure(
        &self,
        position: &InvestmentPosition,
        err: &AppError,
    ) -> PositionFailure {
        let mut report = err.report(None);
        report.detail = format!("Investment {} failed: {}", position.id, err);
        error!("Payout failed for account {}: {}", position.account_id, report.detail);

        if let Err(e) = self
            .ledger
            .record_failure(position.account_id, TransactionKind::Payout, &report)
            .await
        {
            error!("Could not record payout failure for {}: {}", position.id, e);
        }
        if let Some(audit) = &self.audit {
            if let Err(e) = audit
                .log_payout_failure(position.account_id, position.id, &report.detail)
                .await
            {
                error!("Failed to audit payout failure: {}", e);
            }
        }

        PositionFailure {
            position_id: position.id,
            account_id: position.account_id,
            error: report,
        }
    }
}
