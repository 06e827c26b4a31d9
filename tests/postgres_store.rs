//! PostgreSQL store tests; skipped unless LEDGER_TEST_DATABASE_URL is set

use points_ledger::domain::OrderStatus;
use points_ledger::error::LedgerError;
use points_ledger::persistence::{LedgerStore, OrderStore, PostgresStore, UserStore};
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

async fn store() -> Option<PostgresStore> {
    let Ok(url) = std::env::var("LEDGER_TEST_DATABASE_URL") else {
        eprintln!("LEDGER_TEST_DATABASE_URL not set, skipping");
        return None;
    };
    let store = PostgresStore::new(&url, 5)
        .await
        .expect("failed to connect to test database");
    store.migrate().await.expect("failed to run migrations");
    Some(store)
}

/// Unique suffix so reruns against the same database do not collide
fn unique(prefix: &str) -> String {
    format!("{}{}", prefix, rand::thread_rng().gen_range(1_000_000_000u64..9_999_999_999))
}

#[tokio::test]
async fn registration_opens_zero_balance() {
    let Some(store) = store().await else { return };
    let login = unique("user-");

    let user = store.create_user(&login, "hash").await.unwrap();
    let balance = store.balance(user.id).await.unwrap();
    assert_eq!(balance.current, Decimal::ZERO);
    assert_eq!(balance.withdrawn, Decimal::ZERO);

    let err = store.create_user(&login, "hash").await.unwrap_err();
    assert!(matches!(err, LedgerError::LoginTaken(_)));
    let found = store.find_user_by_login(&login).await.unwrap().unwrap();
    assert_eq!(found.id, user.id);
}

#[tokio::test]
async fn order_lifecycle_and_credit() {
    let Some(store) = store().await else { return };
    let user = store.create_user(&unique("user-"), "hash").await.unwrap();
    let number = unique("");

    let order = store.create_order(&number, user.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::New);
    assert!(matches!(
        store.create_order(&number, user.id).await,
        Err(LedgerError::OrderAlreadyExists(_))
    ));

    store
        .set_status(order.id, OrderStatus::Processing)
        .await
        .unwrap();
    assert!(matches!(
        store.set_status(order.id, OrderStatus::Processed).await,
        Err(LedgerError::InvalidTransitionTarget(_))
    ));

    store
        .set_processed_and_credit(&order, dec!(729.98))
        .await
        .unwrap();
    let stored = store.find_order_by_number(&number).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Processed);
    assert_eq!(stored.accrual, Some(dec!(729.98)));
    assert_eq!(store.balance(user.id).await.unwrap().current, dec!(729.98));

    // A second credit for the same order violates the accruals constraint and rolls back
    assert!(store.set_processed_and_credit(&order, dec!(1)).await.is_err());
    assert_eq!(store.balance(user.id).await.unwrap().current, dec!(729.98));
}

#[tokio::test]
async fn withdrawals_are_serialized_per_user() {
    let Some(store) = store().await else { return };
    let store = Arc::new(store);
    let user = store.create_user(&unique("user-"), "hash").await.unwrap();
    let order = store.create_order(&unique(""), user.id).await.unwrap();
    store
        .set_processed_and_credit(&order, dec!(100))
        .await
        .unwrap();
    let user_id = user.id;

    let first = {
        let store = store.clone();
        let number = unique("w");
        tokio::spawn(async move { store.withdraw(&number, dec!(60), user_id).await })
    };
    let second = {
        let store = store.clone();
        let number = unique("w");
        tokio::spawn(async move { store.withdraw(&number, dec!(60), user_id).await })
    };
    let results = [first.await.unwrap(), second.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(LedgerError::InsufficientBalance { .. }))));

    let balance = store.balance(user.id).await.unwrap();
    assert_eq!(balance.current, dec!(40));
    assert_eq!(balance.withdrawn, dec!(60));
    assert_eq!(store.withdrawals_by_user(user.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn duplicate_withdrawal_number_is_rejected() {
    let Some(store) = store().await else { return };
    let user = store.create_user(&unique("user-"), "hash").await.unwrap();
    let order = store.create_order(&unique(""), user.id).await.unwrap();
    store
        .set_processed_and_credit(&order, dec!(100))
        .await
        .unwrap();

    let number = unique("w");
    store.withdraw(&number, dec!(10), user.id).await.unwrap();
    assert!(matches!(
        store.withdraw(&number, dec!(10), user.id).await,
        Err(LedgerError::DuplicateWithdrawalOrder(_))
    ));
    assert_eq!(store.balance(user.id).await.unwrap().current, dec!(90));
}
