//! External accrual authority
//!
//! The authority decides how many points an order earns. It is rate limited,
//! so all callers share one client and its [`Cooldown`].

pub mod client;
pub mod cooldown;

use async_trait::async_trait;

use crate::domain::ExternalResolution;
use crate::error::AccrualError;

pub use client::{AccrualClient, AccrualClientConfig};
pub use cooldown::Cooldown;

/// Lookup of one order's resolution at the authority
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccrualApi: Send + Sync {
    async fn resolve(&self, order_number: &str) -> Result<ExternalResolution, AccrualError>;
}
