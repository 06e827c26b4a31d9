use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::validation::validate_credit;

/// Spendable points of one user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balance {
    #[serde(with = "rust_decimal::serde::float")]
    pub current: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub withdrawn: Decimal,
}

impl Balance {
    pub fn credit(&mut self, amount: Decimal) -> Result<()> {
        validate_credit(amount)?;
        self.current += amount;
        Ok(())
    }

    /// Debit `amount`, keeping `current` non-negative
    pub fn debit(&mut self, amount: Decimal) -> Result<()> {
        if amount > self.current {
            return Err(LedgerError::InsufficientBalance {
                requested: amount,
                available: self.current,
            });
        }
        self.current -= amount;
        self.withdrawn += amount;
        Ok(())
    }
}

/// Points spent against an external order number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: i64,
    pub user_id: i64,
    pub order_number: String,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Registered account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub login: String,
    pub password_hash: String,
}
