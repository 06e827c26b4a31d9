//! In-memory store
//!
//! Implements every store trait with the same transactional guarantees as the
//! Postgres adapter: each balance sits behind its own async mutex (the row
//! lock), and multi-step updates validate everything before mutating anything.
//! Used by tests and by the `--in-memory` run mode.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, instrument};

use super::traits::{LedgerStore, OrderStore, UserStore};
use crate::domain::{Balance, Order, OrderStatus, User, Withdrawal};
use crate::error::{LedgerError, Result};

#[derive(Default)]
struct Tables {
    orders: Vec<Order>,
    withdrawals: Vec<Withdrawal>,
    users: Vec<User>,
    next_order_id: i64,
    next_withdrawal_id: i64,
    next_user_id: i64,
}

/// Scripted failures, consumed one per matching call
#[derive(Default)]
struct Faults {
    credit: AtomicU32,
    status: Mutex<HashMap<OrderStatus, u32>>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    balances: DashMap<i64, Arc<tokio::sync::Mutex<Balance>>>,
    faults: Faults,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls to `set_processed_and_credit` fail before committing
    pub fn fail_next_credits(&self, count: u32) {
        self.faults.credit.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` `set_status(_, status)` calls fail
    pub fn fail_next_status_updates(&self, status: OrderStatus, count: u32) {
        let mut faults = self
            .faults
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        faults.insert(status, count);
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn balance_row(&self, user_id: i64) -> Result<Arc<tokio::sync::Mutex<Balance>>> {
        self.balances
            .get(&user_id)
            .map(|row| row.value().clone())
            .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))
    }

    fn take_credit_fault(&self) -> bool {
        self.faults
            .credit
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn take_status_fault(&self, status: OrderStatus) -> bool {
        let mut faults = self
            .faults
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match faults.get_mut(&status) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    #[instrument(skip(self))]
    async fn create_order(&self, number: &str, user_id: i64) -> Result<Order> {
        let mut tables = self.tables();
        if tables.orders.iter().any(|o| o.number == number) {
            debug!("Order {} already registered", number);
            return Err(LedgerError::OrderAlreadyExists(number.to_string()));
        }

        tables.next_order_id += 1;
        let order = Order {
            id: tables.next_order_id,
            user_id,
            number: number.to_string(),
            status: OrderStatus::New,
            accrual: None,
            created_at: Utc::now(),
        };
        tables.orders.push(order.clone());
        Ok(order)
    }

    async fn find_order_by_number(&self, number: &str) -> Result<Option<Order>> {
        Ok(self
            .tables()
            .orders
            .iter()
            .find(|o| o.number == number)
            .cloned())
    }

    async fn orders_by_user(&self, user_id: i64) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .tables()
            .orders
            .iter()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(orders)
    }

    async fn orders_by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        // Insertion order is creation order
        Ok(self
            .tables()
            .orders
            .iter()
            .filter(|o| o.status == status)
            .cloned()
            .collect())
    }

    #[instrument(skip(self))]
    async fn set_status(&self, order_id: i64, status: OrderStatus) -> Result<()> {
        let status = status.ensure_simple_target()?;
        if self.take_status_fault(status) {
            return Err(LedgerError::Internal(format!(
                "injected failure setting order {} to {}",
                order_id, status
            )));
        }

        let mut tables = self.tables();
        let order = tables
            .orders
            .iter_mut()
            .find(|o| o.id == order_id)
            .ok_or_else(|| LedgerError::OrderNotFound(order_id.to_string()))?;
        order.status = status;
        Ok(())
    }

    #[instrument(skip(self, order), fields(order_id = order.id))]
    async fn set_processed_and_credit(&self, order: &Order, amount: Decimal) -> Result<()> {
        if self.take_credit_fault() {
            return Err(LedgerError::Internal(format!(
                "injected failure crediting order {}",
                order.id
            )));
        }

        let row = self.balance_row(order.user_id)?;
        let mut balance = row.lock().await;

        let mut tables = self.tables();
        let stored = tables
            .orders
            .iter_mut()
            .find(|o| o.id == order.id)
            .ok_or_else(|| LedgerError::OrderNotFound(order.id.to_string()))?;

        balance.credit(amount)?;
        stored.status = OrderStatus::Processed;
        stored.accrual = Some(amount);
        debug!("Credited {} to user {}", amount, order.user_id);
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn balance(&self, user_id: i64) -> Result<Balance> {
        let row = self.balance_row(user_id)?;
        let balance = *row.lock().await;
        Ok(balance)
    }

    #[instrument(skip(self))]
    async fn withdraw(&self, order_number: &str, amount: Decimal, user_id: i64) -> Result<i64> {
        let row = self.balance_row(user_id)?;
        let mut balance = row.lock().await;

        let mut next = *balance;
        next.debit(amount)?;

        let mut tables = self.tables();
        if tables
            .withdrawals
            .iter()
            .any(|w| w.order_number == order_number)
        {
            return Err(LedgerError::DuplicateWithdrawalOrder(
                order_number.to_string(),
            ));
        }

        tables.next_withdrawal_id += 1;
        let id = tables.next_withdrawal_id;
        tables.withdrawals.push(Withdrawal {
            id,
            user_id,
            order_number: order_number.to_string(),
            amount,
            created_at: Utc::now(),
        });
        *balance = next;
        Ok(id)
    }

    async fn withdrawals_by_user(&self, user_id: i64) -> Result<Vec<Withdrawal>> {
        Ok(self
            .tables()
            .withdrawals
            .iter()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, login: &str, password_hash: &str) -> Result<User> {
        let user = {
            let mut tables = self.tables();
            if tables.users.iter().any(|u| u.login == login) {
                return Err(LedgerError::LoginTaken(login.to_string()));
            }
            tables.next_user_id += 1;
            let user = User {
                id: tables.next_user_id,
                login: login.to_string(),
                password_hash: password_hash.to_string(),
            };
            tables.users.push(user.clone());
            user
        };

        self.balances
            .insert(user.id, Arc::new(tokio::sync::Mutex::new(Balance::default())));
        Ok(user)
    }

    async fn find_user_by_login(&self, login: &str) -> Result<Option<User>> {
        Ok(self
            .tables()
            .users
            .iter()
            .find(|u| u.login == login)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn store_with_user() -> (MemoryStore, i64) {
        let store = MemoryStore::new();
        let user = store.create_user("alice", "hash").await.unwrap();
        (store, user.id)
    }

    #[tokio::test]
    async fn test_order_numbers_are_globally_unique() {
        let (store, user_id) = store_with_user().await;
        store.create_order("79927398713", user_id).await.unwrap();
        let err = store
            .create_order("79927398713", user_id + 1)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::OrderAlreadyExists(_)));
        assert_eq!(store.orders_by_user(user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_set_status_refuses_processed() {
        let (store, user_id) = store_with_user().await;
        let order = store.create_order("79927398713", user_id).await.unwrap();
        let err = store
            .set_status(order.id, OrderStatus::Processed)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransitionTarget(_)));
        let stored = store
            .find_order_by_number("79927398713")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, OrderStatus::New);
    }

    #[tokio::test]
    async fn test_credit_is_all_or_nothing() {
        let (store, user_id) = store_with_user().await;
        let order = store.create_order("79927398713", user_id).await.unwrap();
        store
            .set_status(order.id, OrderStatus::Processing)
            .await
            .unwrap();

        store.fail_next_credits(1);
        assert!(store
            .set_processed_and_credit(&order, dec!(500))
            .await
            .is_err());
        let stored = store
            .find_order_by_number("79927398713")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, OrderStatus::Processing);
        assert_eq!(stored.accrual, None);
        assert_eq!(store.balance(user_id).await.unwrap().current, Decimal::ZERO);

        store
            .set_processed_and_credit(&order, dec!(500))
            .await
            .unwrap();
        let stored = store
            .find_order_by_number("79927398713")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, OrderStatus::Processed);
        assert_eq!(stored.accrual, Some(dec!(500)));
        assert_eq!(store.balance(user_id).await.unwrap().current, dec!(500));
    }

    #[tokio::test]
    async fn test_negative_credit_changes_nothing() {
        let (store, user_id) = store_with_user().await;
        let order = store.create_order("79927398713", user_id).await.unwrap();
        store
            .set_status(order.id, OrderStatus::Processing)
            .await
            .unwrap();

        let err = store
            .set_processed_and_credit(&order, dec!(-50))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let stored = store
            .find_order_by_number("79927398713")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, OrderStatus::Processing);
        assert_eq!(stored.accrual, None);
        assert_eq!(store.balance(user_id).await.unwrap().current, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_credit_for_unknown_user_changes_nothing() {
        let store = MemoryStore::new();
        let order = store.create_order("79927398713", 42).await.unwrap();
        let err = store
            .set_processed_and_credit(&order, dec!(10))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::UserNotFound(_)));
        let stored = store
            .find_order_by_number("79927398713")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, OrderStatus::New);
    }

    #[tokio::test]
    async fn test_duplicate_withdrawal_leaves_balance_untouched() {
        let (store, user_id) = store_with_user().await;
        let order = store.create_order("79927398713", user_id).await.unwrap();
        store
            .set_processed_and_credit(&order, dec!(100))
            .await
            .unwrap();

        store.withdraw("2377225624", dec!(10), user_id).await.unwrap();
        let err = store
            .withdraw("2377225624", dec!(10), user_id)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateWithdrawalOrder(_)));

        let balance = store.balance(user_id).await.unwrap();
        assert_eq!(balance.current, dec!(90));
        assert_eq!(balance.withdrawn, dec!(10));
        assert_eq!(store.withdrawals_by_user(user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_status_fault_is_consumed_once() {
        let (store, user_id) = store_with_user().await;
        let order = store.create_order("79927398713", user_id).await.unwrap();
        store.fail_next_status_updates(OrderStatus::Invalid, 1);
        assert!(store
            .set_status(order.id, OrderStatus::Invalid)
            .await
            .is_err());
        store
            .set_status(order.id, OrderStatus::Invalid)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_login_taken() {
        let (store, _) = store_with_user().await;
        let err = store.create_user("alice", "other").await.unwrap_err();
        assert!(matches!(err, LedgerError::LoginTaken(_)));
    }
}
