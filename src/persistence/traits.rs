use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::{Balance, Order, OrderStatus, User, Withdrawal};
use crate::error::Result;

/// Persistent order records and their status transitions.
///
/// The two update operations are disjoint: `set_status` never
/// reaches PROCESSED, and `set_processed_and_credit` is the only path that does.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert a NEW order; a taken number yields `LedgerError::OrderAlreadyExists`
    async fn create_order(&self, number: &str, user_id: i64) -> Result<Order>;

    async fn find_order_by_number(&self, number: &str) -> Result<Option<Order>>;

    /// Orders of one user, newest first
    async fn orders_by_user(&self, user_id: i64) -> Result<Vec<Order>>;

    /// Orders in `status`, oldest first
    async fn orders_by_status(&self, status: OrderStatus) -> Result<Vec<Order>>;

    /// Single-row status update; refuses PROCESSED
    async fn set_status(&self, order_id: i64, status: OrderStatus) -> Result<()>;

    /// Atomically mark PROCESSED, record the credit and increase the owner's balance
    async fn set_processed_and_credit(&self, order: &Order, amount: Decimal) -> Result<()>;
}

/// Per-user balances and the withdrawals debited from them
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn balance(&self, user_id: i64) -> Result<Balance>;

    /// Debit under an exclusive per-user lock and record the withdrawal
    async fn withdraw(&self, order_number: &str, amount: Decimal, user_id: i64) -> Result<i64>;

    async fn withdrawals_by_user(&self, user_id: i64) -> Result<Vec<Withdrawal>>;
}

/// Registered users; creating one also opens a zero balance
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, login: &str, password_hash: &str) -> Result<User>;

    async fn find_user_by_login(&self, login: &str) -> Result<Option<User>>;
}
