use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{LedgerError, Result};

/// Order status as tracked by the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    /// Registered, waiting to be dispatched to the authority
    New,
    /// Claimed by the reconciler, a worker owns it
    Processing,
    /// Accrual credited to the owner's balance
    Processed,
    /// Rejected by the authority
    Invalid,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Processed => "PROCESSED",
            OrderStatus::Invalid => "INVALID",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Processed | OrderStatus::Invalid)
    }

    /// Guard for the plain status update.
    ///
    /// PROCESSED is only reachable together with a credit, so it is refused here.
    pub fn ensure_simple_target(self) -> Result<Self> {
        match self {
            OrderStatus::Processed => Err(LedgerError::InvalidTransitionTarget(self)),
            other => Ok(other),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = LedgerError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "NEW" => Ok(OrderStatus::New),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "PROCESSED" => Ok(OrderStatus::Processed),
            "INVALID" => Ok(OrderStatus::Invalid),
            other => Err(LedgerError::Internal(format!(
                "unknown order status in store: {other}"
            ))),
        }
    }
}

/// Purchase order submitted for accrual
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub number: String,
    pub status: OrderStatus,
    /// Credited amount, present once the order is PROCESSED
    pub accrual: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

/// Result of submitting an order number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A new order row was created
    Created(i64),
    /// The same user already owns this number; nothing was created
    AlreadyRegistered(i64),
}

impl SubmitOutcome {
    pub fn order_id(&self) -> i64 {
        match self {
            SubmitOutcome::Created(id) | SubmitOutcome::AlreadyRegistered(id) => *id,
        }
    }
}
