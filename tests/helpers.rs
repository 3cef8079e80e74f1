#![allow(dead_code)]

use async_trait::async_trait;
use bullion_ledger::clock::{Clock, ManualClock};
use bullion_ledger::config::{AppConfig, ReconcilerConfig};
use bullion_ledger::error::{AppResult, RepositoryError};
use bullion_ledger::models::*;
use bullion_ledger::payments::*;
use bullion_ledger::repositories::*;
use bullion_ledger::services::*;
use bullion_ledger::{AppState, Stores};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Noon UTC on 2025-01-01
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
}

/// Retry settings short enough for tests
pub fn fast_reconciler() -> ReconcilerConfig {
    ReconcilerConfig {
        max_attempts: 3,
        initial_backoff_ms: 5,
        max_backoff_ms: 20,
    }
}

/// In-memory application with a manual clock, a flat price model and an
/// audit trail in a temporary directory
pub struct TestLedger {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub audit_dir: TempDir,
}

impl TestLedger {
    pub fn new() -> Self {
        Self::with_audit_dir(tempfile::tempdir().expect("Failed to create audit dir"))
    }

    /// Audit trail whose writes fail: today's and tomorrow's log files point
    /// at `/dev/full`. Do not call [`TestLedger::audit_lines`] on it.
    #[cfg(target_os = "linux")]
    pub fn with_unwritable_audit() -> Self {
        let audit_dir = tempfile::tempdir().expect("Failed to create audit dir");
        let today = Utc::now().date_naive();
        for date in [today, today + chrono::Duration::days(1)] {
            let file = audit_dir
                .path()
                .join(format!("audit_{}.log", date.format("%Y-%m-%d")));
            std::os::unix::fs::symlink("/dev/full", file).expect("Failed to link /dev/full");
        }
        Self::with_audit_dir(audit_dir)
    }

    fn with_audit_dir(audit_dir: TempDir) -> Self {
        let store = Arc::new(MemoryStore::new());
        let stores = Stores {
            accounts: store.clone(),
            transactions: store.clone(),
            prices: store.clone(),
            positions: store.clone(),
        };
        let clock = Arc::new(ManualClock::new(start_time()));
        let audit = Arc::new(AuditTrail::new(audit_dir.path()).expect("Failed to create audit trail"));

        let mut config = AppConfig::default();
        config.reconciler = fast_reconciler();
        config.webhook.secret = WEBHOOK_SECRET.to_string();

        let state = AppState::new(
            stores,
            clock.clone(),
            Arc::new(FixedSampler(0.0)),
            Some(audit),
            &config,
        );

        Self {
            state,
            store,
            clock,
            audit_dir,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.state.ledger
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Publish `price` as the current reference price
    pub async fn set_price(&self, price: Decimal) {
        self.state
            .oracle
            .record_external(price, "Test")
            .await
            .expect("Failed to set price");
    }

    pub async fn open_account(&self, owner: &str) -> Account {
        self.state
            .accounts
            .provision(owner)
            .await
            .expect("Failed to provision account")
    }

    /// New account holding `primary` already settled
    pub async fn funded_account(&self, owner: &str, primary: Decimal) -> Account {
        let account = self.open_account(owner).await;
        self.ledger()
            .credit(
                account.id,
                primary,
                Currency::Primary,
                TransactionKind::Deposit,
                None,
                TransactionStatus::Completed,
            )
            .await
            .expect("Failed to fund account")
            .account
    }

    pub async fn account(&self, id: Uuid) -> Account {
        self.ledger().account(id).await.expect("Account missing")
    }

    pub async fn history(&self, id: Uuid) -> Vec<TransactionRecord> {
        self.ledger().history(id, 100).await.expect("Failed to list records")
    }

    pub fn funding(&self, gateway: Arc<MockGateway>) -> FundingService {
        self.state.funding(gateway)
    }

    /// Every line written to the audit directory
    pub fn audit_lines(&self) -> Vec<serde_json::Value> {
        let mut lines = Vec::new();
        for entry in std::fs::read_dir(self.audit_dir.path()).expect("audit dir") {
            let content = std::fs::read_to_string(entry.expect("entry").path()).expect("audit file");
            for line in content.lines() {
                lines.push(serde_json::from_str(line).expect("audit line is json"));
            }
        }
        lines
    }
}

/// Payment processor double. Ids are sequential; webhooks are checked with
/// the real verifier against [`WEBHOOK_SECRET`].
pub struct MockGateway {
    verifier: WebhookVerifier,
    next_id: AtomicU64,
    pub fail_charges: AtomicBool,
    pub fail_payouts: AtomicBool,
    pub pay_immediately: AtomicBool,
    /// Returned for every payout instead of a fresh id
    reused_payout_id: Mutex<Option<String>>,
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            verifier: WebhookVerifier::new(WEBHOOK_SECRET, 300),
            next_id: AtomicU64::new(1),
            fail_charges: AtomicBool::new(false),
            fail_payouts: AtomicBool::new(false),
            pay_immediately: AtomicBool::new(false),
            reused_payout_id: Mutex::new(None),
        })
    }

    /// Hand out `payout_id` for every payout from now on
    pub fn reuse_payout_id(&self, payout_id: &str) {
        *self.reused_payout_id.lock().unwrap() = Some(payout_id.to_string());
    }

    fn next(&self, prefix: &str) -> String {
        format!("{}_{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Signature header for `payload`, timestamped now
    pub fn sign(&self, payload: &[u8]) -> String {
        self.verifier
            .sign(payload, Utc::now().timestamp())
            .expect("Failed to sign payload")
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_charge_intent(
        &self,
        _account: &Account,
        _amount: Decimal,
        _currency: Currency,
    ) -> Result<ChargeIntent, GatewayError> {
        if self.fail_charges.load(Ordering::SeqCst) {
            return Err(GatewayError::Declined("card_declined".to_string()));
        }
        let intent_id = self.next("pi");
        Ok(ChargeIntent {
            client_secret: format!("{}_secret", intent_id),
            intent_id,
        })
    }

    async fn create_payout(
        &self,
        _account: &Account,
        _amount: Decimal,
        _currency: Currency,
        _reference: Uuid,
    ) -> Result<PayoutHandle, GatewayError> {
        if self.fail_payouts.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("payouts paused".to_string()));
        }
        let status = if self.pay_immediately.load(Ordering::SeqCst) {
            PayoutStatus::Paid
        } else {
            PayoutStatus::Pending
        };
        let payout_id = match self.reused_payout_id.lock().unwrap().clone() {
            Some(id) => id,
            None => self.next("po"),
        };
        Ok(PayoutHandle { payout_id, status })
    }

    fn verify_and_parse_webhook(&self, payload: &[u8], signature: &str) -> AppResult<PaymentEvent> {
        self.verifier.verify_and_parse(payload, signature, Utc::now())
    }
}

/// Processor-shaped event body
pub fn event_body(event_id: &str, event_type: &str, object_id: &str, account_id: Uuid) -> Vec<u8> {
    serde_json::json!({
        "id": event_id,
        "type": event_type,
        "data": {
            "object": {
                "id": object_id,
                "metadata": { "account_id": account_id.to_string() },
                "failure_message": "bank rejected transfer"
            }
        }
    })
    .to_string()
    .into_bytes()
}

pub fn charge_succeeded(event_id: &str, intent_id: &str, account_id: Uuid) -> PaymentEvent {
    PaymentEvent::ChargeSucceeded {
        event_id: event_id.to_string(),
        intent_id: intent_id.to_string(),
        account_id: Some(account_id),
    }
}

pub fn payout_paid(event_id: &str, payout_id: &str, account_id: Uuid) -> PaymentEvent {
    PaymentEvent::PayoutPaid {
        event_id: event_id.to_string(),
        payout_id: payout_id.to_string(),
        account_id: Some(account_id),
        record_id: None,
    }
}

pub fn payout_failed(event_id: &str, payout_id: &str, account_id: Uuid) -> PaymentEvent {
    payout_failed_for(event_id, payout_id, account_id, None)
}

/// Failed payout event echoing the withdrawal record id from its metadata
pub fn payout_failed_for(
    event_id: &str,
    payout_id: &str,
    account_id: Uuid,
    record_id: Option<Uuid>,
) -> PaymentEvent {
    PaymentEvent::PayoutFailed {
        event_id: event_id.to_string(),
        payout_id: payout_id.to_string(),
        account_id: Some(account_id),
        record_id,
        reason: "account_closed".to_string(),
    }
}

/// Position store whose payout writes fail for selected positions
pub struct FlakyPositions {
    inner: Arc<MemoryStore>,
    failing: Mutex<HashSet<Uuid>>,
}

impl FlakyPositions {
    pub fn new(inner: Arc<MemoryStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failing: Mutex::new(HashSet::new()),
        })
    }

    pub fn fail_for(&self, position_id: Uuid) {
        self.failing.lock().unwrap().insert(position_id);
    }
}

#[async_trait]
impl PositionStore for FlakyPositions {
    async fn upsert_tier(&self, tier: NewTier) -> Result<InvestmentTier, RepositoryError> {
        self.inner.upsert_tier(tier).await
    }

    async fn list_tiers(&self, active_only: bool) -> Result<Vec<InvestmentTier>, RepositoryError> {
        self.inner.list_tiers(active_only).await
    }

    async fn find_tier(&self, id: Uuid) -> Result<Option<InvestmentTier>, RepositoryError> {
        self.inner.find_tier(id).await
    }

    async fn open_position(
        &self,
        funding: LedgerEntry,
        position: NewPosition,
    ) -> Result<(LedgerReceipt, InvestmentPosition), RepositoryError> {
        self.inner.open_position(funding, position).await
    }

    async fn find_position(&self, id: Uuid) -> Result<Option<InvestmentPosition>, RepositoryError> {
        self.inner.find_position(id).await
    }

    async fn active_positions(&self) -> Result<Vec<InvestmentPosition>, RepositoryError> {
        self.inner.active_positions().await
    }

    async fn positions_for_account(
        &self,
        account_id: Uuid,
        active_only: bool,
    ) -> Result<Vec<InvestmentPosition>, RepositoryError> {
        self.inner.positions_for_account(account_id, active_only).await
    }

    async fn apply_payout(
        &self,
        payout: PayoutApplication,
    ) -> Result<PayoutReceipt, RepositoryError> {
        if self.failing.lock().unwrap().contains(&payout.position_id) {
            return Err(RepositoryError::ConstraintViolation(format!(
                "payout write rejected for {}",
                payout.position_id
            )));
        }
        self.inner.apply_payout(payout).await
    }
}
