use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::api::auth::SessionKeys;
use crate::services::{OrderService, UserService, WithdrawalService};

/// Shared application state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderService>,
    pub withdrawals: Arc<WithdrawalService>,
    pub users: Arc<UserService>,
    /// Session token signing
    pub sessions: SessionKeys,
    /// Application start time
    pub start_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        orders: Arc<OrderService>,
        withdrawals: Arc<WithdrawalService>,
        users: Arc<UserService>,
        sessions: SessionKeys,
    ) -> Self {
        Self {
            orders,
            withdrawals,
            users,
            sessions,
            start_time: Utc::now(),
        }
    }

    /// Get system uptime in seconds
    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.start_time).num_seconds()
    }
}
