//! Point withdrawals
//!
//! Debits are serialized per user by the store's row lock, so concurrent
//! withdrawals can never take the balance below zero.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::domain::Withdrawal;
use crate::error::Result;
use crate::persistence::LedgerStore;
use crate::validation::{validate_amount, validate_order_number};

pub struct WithdrawalService {
    ledger: Arc<dyn LedgerStore>,
}

impl WithdrawalService {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    /// Spend `amount` points against an external order number
    #[instrument(skip(self))]
    pub async fn create(&self, order_number: &str, amount: Decimal, user_id: i64) -> Result<i64> {
        let order_number = validate_order_number(order_number)?;
        validate_amount(amount)?;

        let id = self.ledger.withdraw(&order_number, amount, user_id).await?;
        info!(
            "User {} withdrew {} against order {}",
            user_id, amount, order_number
        );
        Ok(id)
    }

    pub async fn read_all_by_user(&self, user_id: i64) -> Result<Vec<Withdrawal>> {
        self.ledger.withdrawals_by_user(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use crate::persistence::{MemoryStore, OrderStore, UserStore};
    use rust_decimal_macros::dec;

    async fn funded(amount: Decimal) -> (Arc<MemoryStore>, WithdrawalService, i64) {
        let store = Arc::new(MemoryStore::new());
        let user = store.create_user("alice", "hash").await.unwrap();
        let order = store.create_order("79927398713", user.id).await.unwrap();
        store.set_processed_and_credit(&order, amount).await.unwrap();
        let service = WithdrawalService::new(store.clone());
        (store, service, user.id)
    }

    #[tokio::test]
    async fn test_withdraw_moves_points() {
        let (store, service, user_id) = funded(dec!(100)).await;
        service.create("2377225624", dec!(40.5), user_id).await.unwrap();

        let balance = store.balance(user_id).await.unwrap();
        assert_eq!(balance.current, dec!(59.5));
        assert_eq!(balance.withdrawn, dec!(40.5));
        let history = service.read_all_by_user(user_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].order_number, "2377225624");
    }

    #[tokio::test]
    async fn test_insufficient_balance_leaves_state() {
        let (store, service, user_id) = funded(dec!(100)).await;
        let err = service
            .create("2377225624", dec!(150), user_id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance { requested, available }
                if requested == dec!(150) && available == dec!(100)
        ));

        let balance = store.balance(user_id).await.unwrap();
        assert_eq!(balance.current, dec!(100));
        assert_eq!(balance.withdrawn, Decimal::ZERO);
        assert!(service.read_all_by_user(user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_bad_input() {
        let (store, service, user_id) = funded(dec!(100)).await;
        assert!(matches!(
            service.create("2377225625", dec!(10), user_id).await,
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            service.create("2377225624", dec!(0), user_id).await,
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            service.create("2377225624", dec!(-5), user_id).await,
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            service.create("2377225624", dec!(0.004), user_id).await,
            Err(LedgerError::Validation(_))
        ));
        assert_eq!(store.balance(user_id).await.unwrap().current, dec!(100));
        assert!(service.read_all_by_user(user_id).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_withdrawals_never_overdraw() {
        let (store, service, user_id) = funded(dec!(100)).await;
        let service = Arc::new(service);

        let first = {
            let service = service.clone();
            tokio::spawn(async move { service.create("2377225624", dec!(60), user_id).await })
        };
        let second = {
            let service = service.clone();
            tokio::spawn(async move { service.create("79927398713", dec!(60), user_id).await })
        };
        let results = [first.await.unwrap(), second.await.unwrap()];

        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(LedgerError::InsufficientBalance { .. }))));

        let balance = store.balance(user_id).await.unwrap();
        assert_eq!(balance.current, dec!(40));
        assert_eq!(balance.withdrawn, dec!(60));
    }
}
