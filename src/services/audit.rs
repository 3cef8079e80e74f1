use crate::error::{AppError, AppResult};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub timestamp: i64,
    pub event_type: String, // "reconciliation_miss", "withdrawal_reversed", "payout_unlinked", "payout_failed", "account_closed"
    pub account_id: Option<Uuid>,
    pub correlation_id: Option<String>,
    pub details: serde_json::Value,
}

struct AuditFile {
    date: NaiveDate,
    file: File,
}

/// Append-only JSON-lines audit trail, one file per UTC day
pub struct AuditTrail {
    log_directory: PathBuf,
    current: Mutex<AuditFile>,
}

fn open_log(log_directory: &Path, date: NaiveDate) -> AppResult<File> {
    let log_file = log_directory.join(format!("audit_{}.log", date.format("%Y-%m-%d")));
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .map_err(|e| AppError::Message(format!("Failed to open audit log file: {}", e)))
}

impl AuditTrail {
    /// Create a new audit trail writing under `log_directory`
    pub fn new(log_directory: impl Into<PathBuf>) -> AppResult<Self> {
        let log_directory = log_directory.into();
        std::fs::create_dir_all(&log_directory)
            .map_err(|e| AppError::Message(format!("Failed to create log directory: {}", e)))?;

        let date = Utc::now().date_naive();
        let file = open_log(&log_directory, date)?;

        info!("Audit trail initialized: {:?}", log_directory);

        Ok(Self {
            log_directory,
            current: Mutex::new(AuditFile { date, file }),
        })
    }

    pub fn log_directory(&self) -> &Path {
        &self.log_directory
    }

    /// Append an entry, rolling to a new file when the day changes
    pub async fn log(&self, entry: AuditLogEntry) -> AppResult<()> {
        let json = serde_json::to_string(&entry)?;
        let date = DateTime::<Utc>::from_timestamp(entry.timestamp, 0)
            .map(|t| t.date_naive())
            .unwrap_or_else(|| Utc::now().date_naive());

        let mut current = self.current.lock().await;
        if current.date != date {
            current.file = open_log(&self.log_directory, date)?;
            current.date = date;
        }

        writeln!(current.file, "{}", json)
            .map_err(|e| AppError::Message(format!("Failed to write audit log: {}", e)))?;
        current
            .file
            .flush()
            .map_err(|e| AppError::Message(format!("Failed to flush audit log: {}", e)))?;

        Ok(())
    }

    /// Settlement event with no matching record, dropped after retries
    pub async fn log_reconciliation_miss(
        &self,
        event_id: &str,
        event_type: &str,
        correlation_id: &str,
        account_id: Option<Uuid>,
        attempts: u32,
    ) -> AppResult<()> {
        let entry = AuditLogEntry {
            timestamp: Utc::now().timestamp(),
            event_type: "reconciliation_miss".to_string(),
            account_id,
            correlation_id: Some(correlation_id.to_string()),
            details: serde_json::json!({
                "event_id": event_id,
                "event": event_type,
                "attempts": attempts,
            }),
        };

        self.log(entry).await
    }

    /// Withdrawal debit credited back after a payout failure
    pub async fn log_compensation(
        &self,
        account_id: Uuid,
        record_id: Uuid,
        amount: Decimal,
        reason: &str,
    ) -> AppResult<()> {
        let entry = AuditLogEntry {
            timestamp: Utc::now().timestamp(),
            event_type: "withdrawal_reversed".to_string(),
            account_id: Some(account_id),
            correlation_id: None,
            details: serde_json::json!({
                "record_id": record_id.to_string(),
                "amount": amount.to_string(),
                "reason": reason,
            }),
        };

        self.log(entry).await
    }

    /// Payout created but its id could not be stored on the withdrawal record.
    /// Its events are matched by record id instead.
    pub async fn log_unlinked_payout(
        &self,
        account_id: Uuid,
        record_id: Uuid,
        payout_id: &str,
        error: &str,
    ) -> AppResult<()> {
        let entry = AuditLogEntry {
            timestamp: Utc::now().timestamp(),
            event_type: "payout_unlinked".to_string(),
            account_id: Some(account_id),
            correlation_id: Some(payout_id.to_string()),
            details: serde_json::json!({
                "record_id": record_id.to_string(),
                "error": error,
            }),
        };

        self.log(entry).await
    }

    /// Position skipped by a payout cycle because of an error
    pub async fn log_payout_failure(
        &self,
        account_id: Uuid,
        position_id: Uuid,
        detail: &str,
    ) -> AppResult<()> {
        let entry = AuditLogEntry {
            timestamp: Utc::now().timestamp(),
            event_type: "payout_failed".to_string(),
            account_id: Some(account_id),
            correlation_id: None,
            details: serde_json::json!({
                "position_id": position_id.to_string(),
                "error": detail,
            }),
        };

        self.log(entry).await
    }

    pub async fn log_account_closed(&self, account_id: Uuid, owner_ref: &str) -> AppResult<()> {
        let entry = AuditLogEntry {
            timestamp: Utc::now().timestamp(),
            event_type: "account_closed".to_string(),
            account_id: Some(account_id),
            correlation_id: None,
            details: serde_json::json!({ "owner_ref": owner_ref }),
        };

        self.log(entry).await
    }
}
