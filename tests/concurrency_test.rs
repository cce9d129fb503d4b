mod common;

use std::time::Duration;

use anyhow::Result;
use common::{open_funded, test_engine, test_engine_with};
use tellerbook::application::LedgerError;
use tellerbook::domain::TransactionType;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_withdrawals_never_overdraw() -> Result<()> {
    let (engine, _temp) = test_engine().await?;
    let acc = open_funded(&engine, "Alice", 100000).await?;

    let first = tokio::spawn({
        let engine = engine.clone();
        async move { engine.withdraw(acc, 60000).await }
    });
    let second = tokio::spawn({
        let engine = engine.clone();
        async move { engine.withdraw(acc, 60000).await }
    });
    let results = [first.await?, second.await?];

    let successes: Vec<i64> = results
        .iter()
        .filter_map(|r| r.as_ref().ok().copied())
        .collect();
    assert_eq!(successes, vec![40000]);
    for result in &results {
        if let Err(err) = result {
            assert!(
                matches!(
                    err,
                    LedgerError::InsufficientFunds { .. } | LedgerError::Conflict { .. }
                ),
                "unexpected error: {err}"
            );
        }
    }

    assert_eq!(engine.get_balance(acc).await?, 40000);
    let withdrawals = engine
        .get_history(acc, None)
        .await?
        .into_iter()
        .filter(|r| r.kind == TransactionType::Withdrawal)
        .count();
    assert_eq!(withdrawals, 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_withdrawal_race_drains_to_floor() -> Result<()> {
    let (engine, _temp) = test_engine().await?;
    let acc = open_funded(&engine, "Alice", 100000).await?;

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.withdraw(acc, 15000).await })
        })
        .collect();

    let mut succeeded = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await? {
            Ok(balance) => {
                assert!(balance >= 0);
                succeeded += 1;
            }
            Err(LedgerError::InsufficientFunds { .. }) => {}
            Err(LedgerError::Conflict { .. }) => conflicts += 1,
            Err(err) => panic!("unexpected error: {err}"),
        }
    }

    let balance = engine.get_balance(acc).await?;
    assert_eq!(balance, 100000 - succeeded * 15000);
    assert!(succeeded <= 6);
    assert!(succeeded == 6 || conflicts > 0);
    assert!(engine.reconcile().await?.is_consistent());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_crossing_transfers_conserve_total() -> Result<()> {
    let (engine, _temp) = test_engine().await?;
    let a = open_funded(&engine, "Alice", 100000).await?;
    let b = open_funded(&engine, "Bob", 100000).await?;

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let engine = engine.clone();
            let (from, to) = if i % 2 == 0 { (a, b) } else { (b, a) };
            tokio::spawn(async move { (from, engine.transfer(from, to, 1000).await) })
        })
        .collect();

    let mut a_to_b = 0;
    let mut b_to_a = 0;
    for handle in handles {
        let (from, result) = handle.await?;
        match result {
            Ok(_) if from == a => a_to_b += 1,
            Ok(_) => b_to_a += 1,
            Err(LedgerError::Conflict { .. }) => {}
            Err(err) => panic!("unexpected error: {err}"),
        }
    }

    let balance_a = engine.get_balance(a).await?;
    let balance_b = engine.get_balance(b).await?;
    assert_eq!(balance_a + balance_b, 200000);
    assert_eq!(balance_a, 100000 - 1000 * a_to_b + 1000 * b_to_a);
    assert!(engine.reconcile().await?.is_consistent());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deposits_all_land() -> Result<()> {
    let (engine, _temp) = test_engine().await?;
    let acc = open_funded(&engine, "Alice", 0).await?;

    let handles: Vec<_> = (1..=16)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.deposit(acc, i * 100).await })
        })
        .collect();

    let mut expected = 0;
    for (i, handle) in (1..=16).zip(handles) {
        if handle.await?.is_ok() {
            expected += i * 100;
        }
    }

    assert_eq!(engine.get_balance(acc).await?, expected);
    assert!(engine.reconcile().await?.is_consistent());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocked_unit_of_work_times_out_without_writing() -> Result<()> {
    let (engine, _temp) = test_engine_with(|config| {
        config
            .with_operation_timeout(Duration::from_millis(200))
            .with_busy_timeout(Duration::from_secs(5))
            .with_max_retries(0)
    })
    .await?;
    let acc = open_funded(&engine, "Alice", 10000).await?;

    // Another connection holds the write lock for longer than the deadline
    let mut blocker = engine.repository().pool().begin().await?;
    sqlx::query("UPDATE accounts SET balance_cents = balance_cents WHERE account_number = ?")
        .bind(acc)
        .execute(&mut *blocker)
        .await?;

    let result = engine.deposit(acc, 5000).await;
    assert!(
        matches!(
            result,
            Err(LedgerError::Timeout) | Err(LedgerError::Conflict { .. })
        ),
        "unexpected result: {result:?}"
    );

    blocker.rollback().await?;

    assert_eq!(engine.get_balance(acc).await?, 10000);
    assert_eq!(engine.get_history(acc, None).await?.len(), 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_conflict_returned_after_retry_budget() -> Result<()> {
    let (engine, _temp) = test_engine_with(|config| {
        config
            .with_busy_timeout(Duration::ZERO)
            .with_max_retries(2)
            .with_retry_backoff(Duration::from_millis(10))
    })
    .await?;
    let acc = open_funded(&engine, "Alice", 10000).await?;

    let mut blocker = engine.repository().pool().begin().await?;
    sqlx::query("UPDATE accounts SET balance_cents = balance_cents WHERE account_number = ?")
        .bind(acc)
        .execute(&mut *blocker)
        .await?;

    let result = engine.withdraw(acc, 100).await;
    assert!(
        matches!(result, Err(LedgerError::Conflict { attempts: 3 })),
        "unexpected result: {result:?}"
    );

    blocker.rollback().await?;

    assert_eq!(engine.get_balance(acc).await?, 10000);
    assert_eq!(engine.get_history(acc, None).await?.len(), 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_conflict_retried_until_lock_released() -> Result<()> {
    let (engine, _temp) = test_engine_with(|config| {
        config
            .with_busy_timeout(Duration::ZERO)
            .with_max_retries(5)
            .with_retry_backoff(Duration::from_millis(25))
    })
    .await?;
    let acc = open_funded(&engine, "Alice", 10000).await?;

    let mut blocker = engine.repository().pool().begin().await?;
    sqlx::query("UPDATE accounts SET balance_cents = balance_cents WHERE account_number = ?")
        .bind(acc)
        .execute(&mut *blocker)
        .await?;

    let withdrawal = tokio::spawn({
        let engine = engine.clone();
        async move { engine.withdraw(acc, 100).await }
    });

    // Release while the engine is backing off between attempts
    tokio::time::sleep(Duration::from_millis(60)).await;
    blocker.rollback().await?;

    assert_eq!(withdrawal.await??, 9900);
    assert_eq!(engine.get_balance(acc).await?, 9900);

    let withdrawals = engine
        .get_history(acc, None)
        .await?
        .into_iter()
        .filter(|r| r.kind == TransactionType::Withdrawal)
        .count();
    assert_eq!(withdrawals, 1);

    Ok(())
}
