mod helpers;

use bullion_ledger::error::AppError;
use bullion_ledger::models::*;
use bullion_ledger::repositories::PositionStore;
use bullion_ledger::services::{InvestmentPositionEngine, PriceFeed};
use chrono::Duration;
use helpers::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

async fn tier(t: &TestLedger, name: &str, principal: Decimal, rate: Decimal, term_days: i32) -> InvestmentTier {
    t.state
        .engine
        .add_tier(NewTier::new(name, principal, rate, ReturnRateKind::Fixed, term_days).unwrap())
        .await
        .unwrap()
}

// ============================================================================
// Tiers and opening
// ============================================================================

#[tokio::test]
async fn test_default_tiers_seed_once() {
    let t = TestLedger::new();
    let first = t.state.engine.seed_default_tiers().await.unwrap();
    let second = t.state.engine.seed_default_tiers().await.unwrap();

    assert_eq!(first.len(), 6);
    assert_eq!(t.state.engine.tiers(true).await.unwrap().len(), 6);
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.id, b.id);
    }

    let gold = first.iter().find(|t| t.name == "Gold").unwrap();
    assert_eq!(gold.principal, dec!(5000));
    assert_eq!(gold.daily_return_rate, dec!(0.001038));
    assert_eq!(gold.term_days, DEFAULT_TERM_DAYS);
}

#[tokio::test]
async fn test_open_debits_principal() {
    let t = TestLedger::new();
    t.set_price(dec!(2000.00)).await;
    let tiers = t.state.engine.seed_default_tiers().await.unwrap();
    let gold = tiers.iter().find(|t| t.name == "Gold").unwrap();
    let account = t.funded_account("user-1", dec!(6000.00)).await;

    let opened = t.state.engine.open(account.id, gold.id).await.unwrap();

    assert_eq!(opened.account.primary_balance, dec!(1000.00));
    assert_eq!(opened.record.kind, TransactionKind::Investment);
    assert_eq!(opened.record.amount, dec!(-5000));
    assert_eq!(opened.record.metadata_str("tier"), Some("Gold"));
    assert_eq!(opened.position.principal, dec!(5000));
    assert_eq!(opened.position.current_value, dec!(5000));
    assert_eq!(opened.position.initial_reference_price, dec!(2000.00));
    assert_eq!(
        opened.position.maturity_date,
        t.now() + Duration::days(i64::from(DEFAULT_TERM_DAYS))
    );
}

#[tokio::test]
async fn test_open_without_funds_leaves_nothing() {
    let t = TestLedger::new();
    t.set_price(dec!(2000.00)).await;
    let gold = tier(&t, "Gold", dec!(5000), dec!(0.001038), 1050).await;
    let account = t.funded_account("user-1", dec!(4999.99)).await;

    let err = t.state.engine.open(account.id, gold.id).await.unwrap_err();
    assert!(matches!(err, AppError::InsufficientFunds { .. }));
    assert!(t.state.engine.positions(account.id, false).await.unwrap().is_empty());
    assert_eq!(t.account(account.id).await.primary_balance, dec!(4999.99));
}

#[tokio::test]
async fn test_open_unknown_tier() {
    let t = TestLedger::new();
    t.set_price(dec!(2000.00)).await;
    let account = t.funded_account("user-1", dec!(100.00)).await;

    let err = t
        .state
        .engine
        .open(account.id, uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTier(_)));
}

#[tokio::test]
async fn test_open_without_price() {
    let t = TestLedger::new();
    let small = tier(&t, "Small", dec!(10), dec!(0.01), 10).await;
    let account = t.funded_account("user-1", dec!(100.00)).await;

    let err = t.state.engine.open(account.id, small.id).await.unwrap_err();
    assert!(matches!(err, AppError::PriceUnavailable));
    assert_eq!(t.account(account.id).await.primary_balance, dec!(100.00));
}

// ============================================================================
// Payout cycle
// ============================================================================

#[tokio::test]
async fn test_payout_below_one_cent_of_pegged_accrues_only() {
    let t = TestLedger::new();
    t.set_price(dec!(2000.00)).await;
    let test_tier = tier(&t, "Test", dec!(5000), dec!(0.001332), 1050).await;
    let account = t.funded_account("user-1", dec!(5000.00)).await;
    let opened = t.state.engine.open(account.id, test_tier.id).await.unwrap();

    t.clock.advance(Duration::days(1));
    let report = t.state.engine.run_payout_cycle().await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.paid, 1);
    assert!(report.failures.is_empty());

    let position = t.state.stores.positions.find_position(opened.position.id).await.unwrap().unwrap();
    assert_eq!(position.current_value, dec!(5006.66));
    assert_eq!(position.total_earned, dec!(6.66));
    assert_eq!(position.last_payout_on, Some(t.now().date_naive()));

    assert_eq!(t.account(account.id).await.pegged_balance, Decimal::ZERO);
    assert!(t
        .history(account.id)
        .await
        .iter()
        .all(|r| r.kind != TransactionKind::Payout));
}

#[tokio::test]
async fn test_payout_credits_pegged_and_compounds() {
    let t = TestLedger::new();
    t.set_price(dec!(1.00)).await;
    let small = tier(&t, "Small", dec!(100), dec!(0.01), 30).await;
    let account = t.funded_account("user-1", dec!(100.00)).await;
    let opened = t.state.engine.open(account.id, small.id).await.unwrap();

    let mut last_value = opened.position.current_value;
    for expected in [dec!(101.00), dec!(102.01), dec!(103.03)] {
        t.clock.advance(Duration::days(1));
        t.state.engine.run_payout_cycle().await.unwrap();
        let position = t.state.stores.positions.find_position(opened.position.id).await.unwrap().unwrap();
        assert!(position.current_value > last_value);
        assert!(position.current_value >= position.principal);
        assert_eq!(position.current_value, expected);
        last_value = position.current_value;
    }

    // 1.00 + 1.01 + 1.02
    let account = t.account(account.id).await;
    assert_eq!(account.pegged_balance, dec!(3.03));

    let payouts: Vec<_> = t
        .history(account.id)
        .await
        .into_iter()
        .filter(|r| r.kind == TransactionKind::Payout)
        .collect();
    assert_eq!(payouts.len(), 3);
    assert!(payouts.iter().all(|r| r.currency == Currency::Pegged));
    assert!(payouts
        .iter()
        .all(|r| r.metadata_str("position_id") == Some(opened.position.id.to_string().as_str())));
}

#[tokio::test]
async fn test_second_run_same_day_is_noop() {
    let t = TestLedger::new();
    t.set_price(dec!(1.00)).await;
    let small = tier(&t, "Small", dec!(100), dec!(0.01), 30).await;
    let account = t.funded_account("user-1", dec!(100.00)).await;
    t.state.engine.open(account.id, small.id).await.unwrap();

    t.clock.advance(Duration::days(1));
    let first = t.state.engine.run_payout_cycle().await.unwrap();
    t.clock.advance(Duration::hours(2));
    let second = t.state.engine.run_payout_cycle().await.unwrap();

    assert_eq!(first.paid, 1);
    assert_eq!(second.paid, 0);
    assert_eq!(second.skipped, 1);
    assert_eq!(t.account(account.id).await.pegged_balance, dec!(1.00));
}

#[tokio::test]
async fn test_price_relative_rate_follows_price() {
    let t = TestLedger::new();
    t.set_price(dec!(1.00)).await;
    let relative = t
        .state
        .engine
        .add_tier(NewTier::new("Relative", dec!(100), dec!(0.01), ReturnRateKind::PriceRelative, 30).unwrap())
        .await
        .unwrap();
    let account = t.funded_account("user-1", dec!(100.00)).await;
    let opened = t.state.engine.open(account.id, relative.id).await.unwrap();

    t.set_price(dec!(2.00)).await;
    t.clock.advance(Duration::days(1));
    t.state.engine.run_payout_cycle().await.unwrap();

    let position = t.state.stores.positions.find_position(opened.position.id).await.unwrap().unwrap();
    assert_eq!(position.current_value, dec!(102.00));
    assert_eq!(t.account(account.id).await.pegged_balance, dec!(1.00));
}

#[tokio::test]
async fn test_maturity_returns_value_and_closes() {
    let t = TestLedger::new();
    t.set_price(dec!(1.00)).await;
    let short = tier(&t, "Short", dec!(100), dec!(0.01), 1).await;
    let account = t.funded_account("user-1", dec!(100.00)).await;
    let opened = t.state.engine.open(account.id, short.id).await.unwrap();

    t.clock.advance(Duration::days(1));
    let report = t.state.engine.run_payout_cycle().await.unwrap();
    assert_eq!(report.paid, 1);
    assert_eq!(report.matured, 1);

    let position = t.state.stores.positions.find_position(opened.position.id).await.unwrap().unwrap();
    assert!(!position.is_active);
    assert_eq!(position.closed_at, Some(t.now()));
    assert_eq!(position.current_value, dec!(101.00));

    let kinds: Vec<_> = t.history(account.id).await.iter().map(|r| r.kind).collect();
    assert!(kinds.contains(&TransactionKind::Payout));
    assert!(kinds.contains(&TransactionKind::Maturity));

    // Daily payout plus the matured value
    assert_eq!(t.account(account.id).await.pegged_balance, dec!(102.00));

    t.clock.advance(Duration::days(1));
    let after = t.state.engine.run_payout_cycle().await.unwrap();
    assert_eq!(after.examined, 0);
    assert_eq!(t.account(account.id).await.pegged_balance, dec!(102.00));
}

#[tokio::test]
async fn test_payout_without_price_fails_per_position() {
    let t = TestLedger::new();
    let prices = Arc::new(bullion_ledger::repositories::MemoryStore::new());
    t.set_price(dec!(1.00)).await;
    let small = tier(&t, "Small", dec!(100), dec!(0.01), 30).await;
    let account = t.funded_account("user-1", dec!(100.00)).await;
    t.state.engine.open(account.id, small.id).await.unwrap();

    // Engine reading an empty price series
    let empty_feed = Arc::new(bullion_ledger::services::ReferencePriceOracle::new(
        prices,
        Arc::new(bullion_ledger::services::FixedSampler(0.0)),
        t.clock.clone(),
        Default::default(),
    ));
    let engine = InvestmentPositionEngine::new(
        t.state.ledger.clone(),
        t.state.stores.positions.clone(),
        empty_feed,
        t.clock.clone(),
        t.state.audit.clone(),
    );

    t.clock.advance(Duration::days(1));
    let report = engine.run_payout_cycle().await.unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].error.kind, "price_unavailable");
}

#[tokio::test]
async fn test_failing_position_does_not_stop_cycle() {
    let t = TestLedger::new();
    t.set_price(dec!(1.00)).await;
    let flaky = FlakyPositions::new(t.store.clone());
    let prices: Arc<dyn PriceFeed> = t.state.oracle.clone();
    let engine = InvestmentPositionEngine::new(
        t.state.ledger.clone(),
        flaky.clone(),
        prices,
        t.clock.clone(),
        t.state.audit.clone(),
    );

    let small = engine
        .add_tier(NewTier::new("Small", dec!(100), dec!(0.01), ReturnRateKind::Fixed, 30).unwrap())
        .await
        .unwrap();
    let healthy = t.funded_account("user-1", dec!(100.00)).await;
    let broken = t.funded_account("user-2", dec!(100.00)).await;
    engine.open(healthy.id, small.id).await.unwrap();
    let bad = engine.open(broken.id, small.id).await.unwrap();
    flaky.fail_for(bad.position.id);

    t.clock.advance(Duration::days(1));
    let report = engine.run_payout_cycle().await.unwrap();

    assert_eq!(report.examined, 2);
    assert_eq!(report.paid, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].position_id, bad.position.id);
    assert_eq!(report.failures[0].account_id, broken.id);

    assert_eq!(t.account(healthy.id).await.pegged_balance, dec!(1.00));
    assert_eq!(t.account(broken.id).await.pegged_balance, Decimal::ZERO);

    let failure = t
        .history(broken.id)
        .await
        .into_iter()
        .find(|r| r.kind == TransactionKind::Payout)
        .unwrap();
    assert_eq!(failure.status, TransactionStatus::Failed);
    let detail = failure.metadata["error"]["detail"].as_str().unwrap();
    assert!(detail.starts_with(&format!("Investment {} failed", bad.position.id)));

    assert!(t
        .audit_lines()
        .iter()
        .any(|line| line["event_type"] == "payout_failed"));
}

// ============================================================================
// Portfolio valuation
// ============================================================================

#[tokio::test]
async fn test_portfolio_valuation() {
    let t = TestLedger::new();
    t.set_price(dec!(2000.00)).await;
    let tiers = t.state.engine.seed_default_tiers().await.unwrap();
    let gold = tiers.iter().find(|t| t.name == "Gold").unwrap();
    let account = t.funded_account("user-1", dec!(6000.00)).await;
    t.state.engine.open(account.id, gold.id).await.unwrap();
    t.ledger()
        .convert(account.id, dec!(500.00), ConversionDirection::PrimaryToPegged)
        .await
        .unwrap();

    let snapshot = t.state.portfolio.valuation(account.id).await.unwrap();
    assert_eq!(snapshot.primary_balance, dec!(500.00));
    assert_eq!(snapshot.pegged_balance, dec!(0.25));
    assert_eq!(snapshot.pegged_value, dec!(500.00));
    assert_eq!(snapshot.invested_principal, dec!(5000));
    assert_eq!(snapshot.investments_value, dec!(5000));
    assert_eq!(snapshot.net_worth, dec!(6000.00));
    assert_eq!(snapshot.positions.len(), 1);
    assert_eq!(snapshot.positions[0].tier, "Gold");
    assert_eq!(snapshot.positions[0].days_remaining, i64::from(DEFAULT_TERM_DAYS));

    t.set_price(dec!(2100.00)).await;
    let repriced = t.state.portfolio.valuation(account.id).await.unwrap();
    assert_eq!(repriced.pegged_value, dec!(525.00));
    assert_eq!(repriced.net_worth, dec!(6025.00));
}

#[tokio::test]
async fn test_portfolio_without_price_fails_closed() {
    let t = TestLedger::new();
    let account = t.funded_account("user-1", dec!(10.00)).await;

    let err = t.state.portfolio.valuation(account.id).await.unwrap_err();
    assert!(matches!(err, AppError::PriceUnavailable));
}

// ============================================================================
// Account lifecycle
// ============================================================================

#[tokio::test]
async fn test_account_close_preconditions() {
    let t = TestLedger::new();
    t.set_price(dec!(1.00)).await;
    let account = t.funded_account("user-1", dec!(10.00)).await;

    let err = t.state.accounts.close(account.id).await.unwrap_err();
    assert!(matches!(err, AppError::AccountNotClosable(_)));

    t.ledger()
        .debit(
            account.id,
            dec!(10.00),
            Currency::Primary,
            TransactionKind::Withdrawal,
            TransactionStatus::Completed,
        )
        .await
        .unwrap();
    let closed = t.state.accounts.close(account.id).await.unwrap();
    assert_eq!(closed.status, AccountStatus::Closed);

    // Closing again is a no-op
    let again = t.state.accounts.close(account.id).await.unwrap();
    assert_eq!(again.status, AccountStatus::Closed);

    let err = t
        .ledger()
        .credit(
            account.id,
            dec!(1.00),
            Currency::Primary,
            TransactionKind::Deposit,
            None,
            TransactionStatus::Completed,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AccountClosed(_)));

    // History survives closure
    assert_eq!(t.history(account.id).await.len(), 2);
    assert!(t
        .audit_lines()
        .iter()
        .any(|line| line["event_type"] == "account_closed"));
}

#[tokio::test]
async fn test_account_with_active_position_not_closable() {
    let t = TestLedger::new();
    t.set_price(dec!(1.00)).await;
    let small = tier(&t, "Small", dec!(100), dec!(0.01), 30).await;
    let account = t.funded_account("user-1", dec!(100.00)).await;
    t.state.engine.open(account.id, small.id).await.unwrap();

    let err = t.state.accounts.close(account.id).await.unwrap_err();
    assert!(matches!(err, AppError::AccountNotClosable(_)));
}

#[tokio::test]
async fn test_provision_rejects_duplicates() {
    let t = TestLedger::new();
    t.open_account("user-1").await;

    let err = t.state.accounts.provision("user-1").await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert!(t.state.accounts.provision("   ").await.unwrap_err().is_validation());

    let linked = t
        .state
        .accounts
        .find_by_owner("user-1")
        .await
        .unwrap()
        .unwrap();
    let linked = t
        .state
        .accounts
        .link_processor_ids(linked.id, Some("cus_1"), None)
        .await
        .unwrap();
    assert_eq!(linked.processor_customer_id.as_deref(), Some("cus_1"));
    assert_eq!(linked.processor_payout_id, None);
}
