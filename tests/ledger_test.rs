mod helpers;

use bullion_ledger::error::AppError;
use bullion_ledger::models::*;
use helpers::*;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

// ============================================================================
// Credit / Debit
// ============================================================================

#[tokio::test]
async fn test_credit_records_price_snapshot() {
    let t = TestLedger::new();
    t.set_price(dec!(2000.00)).await;
    let account = t.open_account("user-1").await;

    let receipt = t
        .ledger()
        .credit(
            account.id,
            dec!(250.00),
            Currency::Primary,
            TransactionKind::Deposit,
            Some("manual-1"),
            TransactionStatus::Completed,
        )
        .await
        .unwrap();

    assert_eq!(receipt.account.primary_balance, dec!(250.00));
    assert_eq!(receipt.record.amount, dec!(250.00));
    assert_eq!(receipt.record.reference_price, Some(dec!(2000.00)));
    assert_eq!(receipt.record.correlation_id.as_deref(), Some("manual-1"));
    assert!(receipt.record.completed_at.is_some());
}

#[tokio::test]
async fn test_credit_without_price_has_no_snapshot() {
    let t = TestLedger::new();
    let account = t.funded_account("user-1", dec!(10.00)).await;

    let records = t.history(account.id).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].reference_price, None);
}

#[tokio::test]
async fn test_invalid_amounts_rejected() {
    let t = TestLedger::new();
    let account = t.open_account("user-1").await;

    for amount in [dec!(0), dec!(-5.00), dec!(1.001)] {
        let err = t
            .ledger()
            .credit(
                account.id,
                amount,
                Currency::Primary,
                TransactionKind::Deposit,
                None,
                TransactionStatus::Completed,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidAmount(_)), "{}", amount);
    }
    assert!(t.history(account.id).await.is_empty());
}

#[tokio::test]
async fn test_credit_rejects_failed_status() {
    let t = TestLedger::new();
    let account = t.open_account("user-1").await;

    let err = t
        .ledger()
        .credit(
            account.id,
            dec!(1.00),
            Currency::Primary,
            TransactionKind::Deposit,
            None,
            TransactionStatus::Failed,
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_debit_records_negative_amount() {
    let t = TestLedger::new();
    let account = t.funded_account("user-1", dec!(100.00)).await;

    let receipt = t
        .ledger()
        .debit(
            account.id,
            dec!(40.00),
            Currency::Primary,
            TransactionKind::Withdrawal,
            TransactionStatus::Completed,
        )
        .await
        .unwrap();

    assert_eq!(receipt.account.primary_balance, dec!(60.00));
    assert_eq!(receipt.record.amount, dec!(-40.00));
}

#[tokio::test]
async fn test_debit_of_pegged_without_balance_fails() {
    let t = TestLedger::new();
    let account = t.funded_account("user-1", dec!(100.00)).await;

    let err = t
        .ledger()
        .debit(
            account.id,
            dec!(0.01),
            Currency::Pegged,
            TransactionKind::Withdrawal,
            TransactionStatus::Completed,
        )
        .await
        .unwrap_err();

    match err {
        AppError::InsufficientFunds {
            currency,
            available,
            requested,
        } => {
            assert_eq!(currency, Currency::Pegged);
            assert_eq!(available, Decimal::ZERO);
            assert_eq!(requested, dec!(0.01));
        }
        other => panic!("expected InsufficientFunds, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_account() {
    let t = TestLedger::new();
    let err = t
        .ledger()
        .credit(
            uuid::Uuid::new_v4(),
            dec!(1.00),
            Currency::Primary,
            TransactionKind::Deposit,
            None,
            TransactionStatus::Completed,
        )
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

// ============================================================================
// Conversion
// ============================================================================

#[tokio::test]
async fn test_convert_then_overdraw() {
    let t = TestLedger::new();
    t.set_price(dec!(2000.00)).await;
    let account = t.funded_account("user-1", dec!(1000.00)).await;

    let receipt = t
        .ledger()
        .convert(account.id, dec!(500.00), ConversionDirection::PrimaryToPegged)
        .await
        .unwrap();

    assert_eq!(receipt.account.primary_balance, dec!(500.00));
    assert_eq!(receipt.account.pegged_balance, dec!(0.25));
    assert_eq!(receipt.converted_amount, dec!(0.25));
    assert_eq!(receipt.converted_currency, Currency::Pegged);
    assert_eq!(receipt.record.kind, TransactionKind::Conversion);
    assert_eq!(receipt.record.amount, dec!(-500.00));
    assert_eq!(receipt.record.currency, Currency::Primary);
    assert_eq!(receipt.record.reference_price, Some(dec!(2000.00)));
    assert_eq!(receipt.record.metadata_str("converted_amount"), Some("0.25"));

    let before = t.history(account.id).await.len();
    let err = t
        .ledger()
        .debit(
            account.id,
            dec!(600.00),
            Currency::Primary,
            TransactionKind::Withdrawal,
            TransactionStatus::Completed,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InsufficientFunds { .. }));

    let after = t.account(account.id).await;
    assert_eq!(after.primary_balance, dec!(500.00));
    assert_eq!(after.pegged_balance, dec!(0.25));
    assert_eq!(t.history(account.id).await.len(), before);
}

#[tokio::test]
async fn test_convert_without_price_fails_closed() {
    let t = TestLedger::new();
    let account = t.funded_account("user-1", dec!(100.00)).await;

    let err = t
        .ledger()
        .convert(account.id, dec!(10.00), ConversionDirection::PrimaryToPegged)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::PriceUnavailable));
    assert_eq!(t.account(account.id).await.primary_balance, dec!(100.00));
}

#[tokio::test]
async fn test_convert_to_nothing_rejected() {
    let t = TestLedger::new();
    t.set_price(dec!(2000.00)).await;
    let account = t.funded_account("user-1", dec!(100.00)).await;

    // 1.00 / 2000 rounds to 0.00
    let err = t
        .ledger()
        .convert(account.id, dec!(1.00), ConversionDirection::PrimaryToPegged)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidAmount(_)));
}

#[tokio::test]
async fn test_convert_back_to_primary() {
    let t = TestLedger::new();
    t.set_price(dec!(2000.00)).await;
    let account = t.funded_account("user-1", dec!(1000.00)).await;
    t.ledger()
        .convert(account.id, dec!(1000.00), ConversionDirection::PrimaryToPegged)
        .await
        .unwrap();

    t.set_price(dec!(2100.00)).await;
    let receipt = t
        .ledger()
        .convert(account.id, dec!(0.50), ConversionDirection::PeggedToPrimary)
        .await
        .unwrap();

    assert_eq!(receipt.account.pegged_balance, Decimal::ZERO);
    assert_eq!(receipt.account.primary_balance, dec!(1050.00));
    assert_eq!(receipt.record.currency, Currency::Pegged);
    assert_eq!(receipt.record.amount, dec!(-0.50));
}

#[tokio::test]
async fn test_round_trip_cannot_mint_primary() {
    let t = TestLedger::new();
    t.set_price(dec!(2000.00)).await;
    let account = t.funded_account("user-1", dec!(1010.00)).await;

    let there = t
        .ledger()
        .convert(account.id, dec!(1010.00), ConversionDirection::PrimaryToPegged)
        .await
        .unwrap();
    assert_eq!(there.converted_amount, dec!(0.50));
    assert_eq!(there.account.primary_balance, Decimal::ZERO);
    assert_eq!(there.record.metadata["converted_amount"], "0.50");

    let back = t
        .ledger()
        .convert(account.id, there.converted_amount, ConversionDirection::PeggedToPrimary)
        .await
        .unwrap();
    assert_eq!(back.account.primary_balance, dec!(1000.00));
    assert_eq!(back.account.pegged_balance, Decimal::ZERO);
}

// ============================================================================
// Failures and pending records
// ============================================================================

#[tokio::test]
async fn test_record_failure_keeps_balances() {
    let t = TestLedger::new();
    let account = t.funded_account("user-1", dec!(100.00)).await;

    let err = AppError::ExternalService("processor unavailable".to_string());
    let record = t
        .ledger()
        .record_failure(account.id, TransactionKind::Withdrawal, &err.report(None))
        .await
        .unwrap();

    assert_eq!(record.status, TransactionStatus::Failed);
    assert_eq!(record.amount, Decimal::ZERO);
    assert_eq!(record.metadata["error"]["kind"], "external_service_error");
    assert_eq!(t.account(account.id).await.primary_balance, dec!(100.00));
}

#[tokio::test]
async fn test_resolve_twice_is_already_settled() {
    let t = TestLedger::new();
    let account = t.open_account("user-1").await;
    let record = t
        .ledger()
        .record_intent(
            account.id,
            dec!(75.00),
            Currency::Primary,
            TransactionKind::Deposit,
            "pi_manual",
        )
        .await
        .unwrap();
    assert_eq!(t.account(account.id).await.primary_balance, Decimal::ZERO);

    let receipt = t
        .ledger()
        .resolve(record.id, bullion_ledger::services::Resolution::CompleteAndCredit)
        .await
        .unwrap();
    assert_eq!(receipt.account.primary_balance, dec!(75.00));

    let err = t
        .ledger()
        .resolve(record.id, bullion_ledger::services::Resolution::CompleteAndCredit)
        .await
        .unwrap_err();
    assert!(err.is_already_settled());
    assert_eq!(t.account(account.id).await.primary_balance, dec!(75.00));
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_debits_never_overdraw() {
    let t = TestLedger::new();
    let account = t.funded_account("user-1", dec!(1000.00)).await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let ledger = Arc::clone(&t.state.ledger);
        handles.push(tokio::spawn(async move {
            ledger
                .debit(
                    account.id,
                    dec!(150.00),
                    Currency::Primary,
                    TransactionKind::Withdrawal,
                    TransactionStatus::Completed,
                )
                .await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(e) => assert!(matches!(e, AppError::InsufficientFunds { .. })),
        }
    }

    assert_eq!(succeeded, 6);
    assert_eq!(t.account(account.id).await.primary_balance, dec!(100.00));
    // Initial deposit plus six debits
    assert_eq!(t.history(account.id).await.len(), 7);
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_balance_equals_sum_of_records(ops in prop::collection::vec((any::<bool>(), 1i64..50_000), 1..20)) {
        tokio_test::block_on(async {
            let t = TestLedger::new();
            let account = t.open_account("prop").await;
            let mut expected = Decimal::ZERO;

            for (is_credit, cents) in ops {
                let amount = Decimal::new(cents, 2);
                if is_credit {
                    t.ledger()
                        .credit(account.id, amount, Currency::Primary, TransactionKind::Deposit, None, TransactionStatus::Completed)
                        .await
                        .unwrap();
                    expected += amount;
                } else {
                    match t.ledger()
                        .debit(account.id, amount, Currency::Primary, TransactionKind::Withdrawal, TransactionStatus::Completed)
                        .await
                    {
                        Ok(_) => expected -= amount,
                        Err(e) => {
                            assert!(matches!(e, AppError::InsufficientFunds { .. }));
                            assert!(amount > expected);
                        }
                    }
                }
            }

            let balance = t.account(account.id).await.primary_balance;
            let recorded: Decimal = t.history(account.id).await.iter().map(|r| r.amount).sum();
            assert_eq!(balance, expected);
            assert_eq!(balance, recorded);
            assert!(balance >= Decimal::ZERO);
        });
    }

    #[test]
    fn prop_round_trip_at_low_price_loses_at_most_a_cent(cents in 100i64..1_000_000, price_cents in 1i64..=100) {
        tokio_test::block_on(async {
            let t = TestLedger::new();
            let price = Decimal::new(price_cents, 2);
            let amount = Decimal::new(cents, 2);
            t.set_price(price).await;
            let account = t.funded_account("prop", amount).await;

            let there = t.ledger()
                .convert(account.id, amount, ConversionDirection::PrimaryToPegged)
                .await
                .unwrap();
            let back = t.ledger()
                .convert(account.id, there.converted_amount, ConversionDirection::PeggedToPrimary)
                .await
                .unwrap();

            assert!(back.account.primary_balance <= amount);
            assert!(amount - back.account.primary_balance <= dec!(0.01));
            assert_eq!(back.account.pegged_balance, Decimal::ZERO);
        });
    }

    #[test]
    fn prop_round_trip_never_creates_value(cents in 5_000i64..100_000_000, price_cents in 10_000i64..=500_000) {
        tokio_test::block_on(async {
            let t = TestLedger::new();
            let price = Decimal::new(price_cents, 2);
            let amount = Decimal::new(cents, 2);
            t.set_price(price).await;
            let account = t.funded_account("prop", amount).await;

            let there = match t.ledger()
                .convert(account.id, amount, ConversionDirection::PrimaryToPegged)
                .await
            {
                Ok(receipt) => receipt,
                Err(e) => {
                    // below one pegged cent at this price
                    assert!(matches!(e, AppError::InvalidAmount(_)));
                    assert!(amount / price < dec!(0.01));
                    return;
                }
            };
            assert!(there.converted_amount * price <= amount);

            let back = t.ledger()
                .convert(account.id, there.converted_amount, ConversionDirection::PeggedToPrimary)
                .await
                .unwrap();

            assert!(back.account.primary_balance <= amount);
            assert!(amount - back.account.primary_balance < price / Decimal::ONE_HUNDRED + dec!(0.01));
            assert_eq!(back.account.pegged_balance, Decimal::ZERO);
        });
    }
}
