//! Order submission and the order state machine
//!
//! An order in PROCESSING is resolved against the accrual authority and moved
//! to a terminal state or back to NEW. No path through
//! [`OrderService::update_order_status`] leaves it in PROCESSING, except when
//! the store itself cannot be written (startup recovery handles that case).

use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::accrual::AccrualApi;
use crate::domain::{ExternalStatus, Order, OrderStatus, SubmitOutcome};
use crate::error::{AccrualError, LedgerError, Result};
use crate::persistence::OrderStore;
use crate::validation::{validate_credit, validate_order_number};
use rust_decimal::Decimal;

/// Where an order ended up after one reconciliation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// PROCESSED with this credit applied
    Processed(Decimal),
    /// INVALID, terminal
    Invalidated,
    /// Back to NEW for the next cycle
    Retried,
}

pub struct OrderService {
    orders: Arc<dyn OrderStore>,
    accrual: Arc<dyn AccrualApi>,
}

impl OrderService {
    pub fn new(orders: Arc<dyn OrderStore>, accrual: Arc<dyn AccrualApi>) -> Self {
        Self { orders, accrual }
    }

    /// Register an order number for `user_id`.
    ///
    /// Re-submitting a number the same user owns is reported, not rejected.
    /// A number owned by someone else is a conflict.
    #[instrument(skip(self))]
    pub async fn create(&self, number: &str, user_id: i64) -> Result<SubmitOutcome> {
        let number = validate_order_number(number)?;

        match self.orders.create_order(&number, user_id).await {
            Ok(order) => {
                info!("Order {} registered for user {}", order.number, user_id);
                Ok(SubmitOutcome::Created(order.id))
            }
            Err(LedgerError::OrderAlreadyExists(_)) => {
                let existing = self
                    .orders
                    .find_order_by_number(&number)
                    .await?
                    .ok_or_else(|| LedgerError::OrderNotFound(number.clone()))?;

                if existing.user_id == user_id {
                    info!("Order {} with id {} is already registered", number, existing.id);
                    Ok(SubmitOutcome::AlreadyRegistered(existing.id))
                } else {
                    Err(LedgerError::OrderOwnedByAnotherUser { number })
                }
            }
            Err(e) => Err(e),
        }
    }

    pub async fn read_all_by_user(&self, user_id: i64) -> Result<Vec<Order>> {
        self.orders.orders_by_user(user_id).await
    }

    /// Orders waiting for dispatch, oldest first
    pub async fn orders_for_processing(&self) -> Result<Vec<Order>> {
        self.orders.orders_by_status(OrderStatus::New).await
    }

    /// Mark an order in flight before it is queued
    pub async fn claim(&self, order: &Order) -> Result<()> {
        self.orders
            .set_status(order.id, OrderStatus::Processing)
            .await
    }

    /// Return an in-flight order to NEW
    pub async fn release(&self, order: &Order) -> Result<()> {
        self.orders.set_status(order.id, OrderStatus::New).await
    }

    /// Return every order left in PROCESSING to NEW.
    ///
    /// Only safe while no reconciler is running.
    pub async fn release_in_flight(&self) -> Result<usize> {
        let stranded = self.orders.orders_by_status(OrderStatus::Processing).await?;
        for order in &stranded {
            self.release(order).await?;
        }
        if !stranded.is_empty() {
            warn!("Released {} orders left in PROCESSING", stranded.len());
        }
        Ok(stranded.len())
    }

    /// Resolve one PROCESSING order against the authority and apply the transition
    #[instrument(skip(self, order), fields(order_id = order.id, number = %order.number))]
    pub async fn update_order_status(&self, order: &Order) -> Result<Transition> {
        let resolution = match self.accrual.resolve(&order.number).await {
            Ok(resolution) => resolution,
            Err(AccrualError::NotRegistered) => {
                let outcome = self.orders.set_status(order.id, OrderStatus::Invalid).await;
                return self.settle(order, outcome, Transition::Invalidated).await;
            }
            Err(err) => {
                warn!(
                    "Error getting order {} from accrual system, passing for now: {}",
                    order.id, err
                );
                return self.retry(order).await;
            }
        };

        match resolution.status {
            ExternalStatus::Registered | ExternalStatus::Processing => {
                debug!("Order {} is still being processed by the authority", order.id);
                self.retry(order).await
            }
            ExternalStatus::Processed => {
                let amount = resolution.credit();
                if let Err(e) = validate_credit(amount) {
                    warn!(
                        "Order {} resolved with an unusable accrual, passing for now: {}",
                        order.number, e
                    );
                    return self.retry(order).await;
                }
                let outcome = self.orders.set_processed_and_credit(order, amount).await;
                self.settle(order, outcome, Transition::Processed(amount))
                    .await
            }
            ExternalStatus::Invalid => {
                let outcome = self.orders.set_status(order.id, OrderStatus::Invalid).await;
                self.settle(order, outcome, Transition::Invalidated).await
            }
            ExternalStatus::Unknown(raw) => {
                warn!("Order {} is in unknown external status: {}", order.number, raw);
                self.retry(order).await
            }
        }
    }

    async fn retry(&self, order: &Order) -> Result<Transition> {
        self.release(order).await.map_err(|e| {
            warn!("Failed to return order {} to NEW: {}", order.id, e);
            e
        })?;
        Ok(Transition::Retried)
    }

    /// Accept a terminal write, or fall back to NEW and surface its error
    async fn settle(
        &self,
        order: &Order,
        outcome: Result<()>,
        transition: Transition,
    ) -> Result<Transition> {
        let Err(err) = outcome else {
            return Ok(transition);
        };

        warn!(
            "Failed to move order {} to {:?}: {}",
            order.number, transition, err
        );
        if let Err(revert_err) = self.release(order).await {
            error!("Error returning order {} to NEW: {}", order.id, revert_err);
            return Err(revert_err);
        }
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accrual::MockAccrualApi;
    use crate::domain::ExternalResolution;
    use crate::persistence::{LedgerStore, MemoryStore, UserStore};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    const NUMBER: &str = "79927398713";

    struct Fixture {
        store: Arc<MemoryStore>,
        service: OrderService,
        user_id: i64,
    }

    async fn fixture(accrual: MockAccrualApi) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let user = store.create_user("alice", "hash").await.unwrap();
        let service = OrderService::new(store.clone(), Arc::new(accrual));
        Fixture {
            store,
            service,
            user_id: user.id,
        }
    }

    fn resolution(status: &str, accrual: Option<Decimal>) -> ExternalResolution {
        ExternalResolution {
            order: NUMBER.to_string(),
            status: ExternalStatus::from(status.to_string()),
            accrual,
        }
    }

    fn accrual_returning(
        result: std::result::Result<ExternalResolution, AccrualError>,
    ) -> MockAccrualApi {
        let mut mock = MockAccrualApi::new();
        mock.expect_resolve()
            .withf(|number| number == NUMBER)
            .times(1)
            .returning(move |_| result.clone());
        mock
    }

    async fn in_flight(fx: &Fixture) -> Order {
        fx.service.create(NUMBER, fx.user_id).await.unwrap();
        let order = fx
            .store
            .find_order_by_number(NUMBER)
            .await
            .unwrap()
            .unwrap();
        fx.service.claim(&order).await.unwrap();
        order
    }

    async fn status_of(fx: &Fixture) -> OrderStatus {
        fx.store
            .find_order_by_number(NUMBER)
            .await
            .unwrap()
            .unwrap()
            .status
    }

    #[tokio::test]
    async fn test_create_is_idempotent_for_owner() {
        let fx = fixture(MockAccrualApi::new()).await;
        let first = fx.service.create(NUMBER, fx.user_id).await.unwrap();
        let second = fx.service.create(NUMBER, fx.user_id).await.unwrap();
        assert!(matches!(first, SubmitOutcome::Created(_)));
        assert_eq!(second, SubmitOutcome::AlreadyRegistered(first.order_id()));
        assert_eq!(fx.service.read_all_by_user(fx.user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_conflicts_for_other_user() {
        let fx = fixture(MockAccrualApi::new()).await;
        fx.service.create(NUMBER, fx.user_id).await.unwrap();
        let err = fx.service.create(NUMBER, fx.user_id + 1).await.unwrap_err();
        assert!(matches!(err, LedgerError::OrderOwnedByAnotherUser { .. }));
        assert!(fx
            .service
            .read_all_by_user(fx.user_id + 1)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_bad_luhn() {
        let fx = fixture(MockAccrualApi::new()).await;
        let err = fx.service.create("79927398710", fx.user_id).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_processed_credits_balance() {
        let fx = fixture(accrual_returning(Ok(resolution("PROCESSED", Some(dec!(500)))))).await;
        let order = in_flight(&fx).await;

        let transition = fx.service.update_order_status(&order).await.unwrap();
        assert_eq!(transition, Transition::Processed(dec!(500)));
        assert_eq!(status_of(&fx).await, OrderStatus::Processed);
        assert_eq!(fx.store.balance(fx.user_id).await.unwrap().current, dec!(500));
    }

    #[tokio::test]
    async fn test_negative_accrual_is_retried_without_credit() {
        let fx = fixture(accrual_returning(Ok(resolution("PROCESSED", Some(dec!(-50)))))).await;
        let order = in_flight(&fx).await;

        let transition = fx.service.update_order_status(&order).await.unwrap();
        assert_eq!(transition, Transition::Retried);
        assert_eq!(status_of(&fx).await, OrderStatus::New);
        assert_eq!(fx.store.balance(fx.user_id).await.unwrap().current, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_not_registered_invalidates() {
        let fx = fixture(accrual_returning(Err(AccrualError::NotRegistered))).await;
        let order = in_flight(&fx).await;

        let transition = fx.service.update_order_status(&order).await.unwrap();
        assert_eq!(transition, Transition::Invalidated);
        assert_eq!(status_of(&fx).await, OrderStatus::Invalid);
    }

    #[tokio::test]
    async fn test_external_invalid_invalidates() {
        let fx = fixture(accrual_returning(Ok(resolution("INVALID", None)))).await;
        let order = in_flight(&fx).await;

        fx.service.update_order_status(&order).await.unwrap();
        assert_eq!(status_of(&fx).await, OrderStatus::Invalid);
        assert_eq!(fx.store.balance(fx.user_id).await.unwrap().current, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_pending_external_states_retry() {
        for status in ["REGISTERED", "PROCESSING", "SOMETHING_NEW"] {
            let fx = fixture(accrual_returning(Ok(resolution(status, None)))).await;
            let order = in_flight(&fx).await;

            let transition = fx.service.update_order_status(&order).await.unwrap();
            assert_eq!(transition, Transition::Retried, "status {status}");
            assert_eq!(status_of(&fx).await, OrderStatus::New, "status {status}");
        }
    }

    #[tokio::test]
    async fn test_transient_authority_failures_retry() {
        let failures = [
            AccrualError::RateLimited {
                retry_after: Duration::from_secs(5),
            },
            AccrualError::Unavailable {
                reason: "status 500".to_string(),
            },
            AccrualError::UnexpectedResponse {
                status: 418,
                detail: String::new(),
            },
        ];
        for failure in failures {
            let fx = fixture(accrual_returning(Err(failure.clone()))).await;
            let order = in_flight(&fx).await;

            let transition = fx.service.update_order_status(&order).await.unwrap();
            assert_eq!(transition, Transition::Retried, "{failure}");
            assert_eq!(status_of(&fx).await, OrderStatus::New, "{failure}");
        }
    }

    #[tokio::test]
    async fn test_failed_credit_reverts_to_new() {
        let fx = fixture(accrual_returning(Ok(resolution("PROCESSED", Some(dec!(500)))))).await;
        let order = in_flight(&fx).await;
        fx.store.fail_next_credits(1);

        let err = fx.service.update_order_status(&order).await.unwrap_err();
        assert!(matches!(err, LedgerError::Internal(_)));
        assert_eq!(status_of(&fx).await, OrderStatus::New);
        assert_eq!(fx.store.balance(fx.user_id).await.unwrap().current, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_failed_invalidation_reverts_to_new() {
        let fx = fixture(accrual_returning(Ok(resolution("INVALID", None)))).await;
        let order = in_flight(&fx).await;
        fx.store.fail_next_status_updates(OrderStatus::Invalid, 1);

        assert!(fx.service.update_order_status(&order).await.is_err());
        assert_eq!(status_of(&fx).await, OrderStatus::New);
    }

    #[tokio::test]
    async fn test_release_in_flight() {
        let fx = fixture(MockAccrualApi::new()).await;
        in_flight(&fx).await;
        assert_eq!(fx.service.release_in_flight().await.unwrap(), 1);
        assert_eq!(status_of(&fx).await, OrderStatus::New);
        assert_eq!(fx.service.release_in_flight().await.unwrap(), 0);
    }
}
