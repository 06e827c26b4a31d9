use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

use crate::domain::OrderStatus;

/// Main error type for the ledger service
#[derive(Error, Debug)]
pub enum LedgerError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Accrual authority error: {0}")]
    Accrual(#[from] AccrualError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Order errors
    #[error("Order number already exists: {0}")]
    OrderAlreadyExists(String),

    #[error("Order {number} is already registered by another user")]
    OrderOwnedByAnotherUser { number: String },

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Status {0} cannot be set directly, use the processed-and-credit path")]
    InvalidTransitionTarget(OrderStatus),

    // Ledger errors
    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        requested: Decimal,
        available: Decimal,
    },

    #[error("Withdrawal order number already used: {0}")]
    DuplicateWithdrawalOrder(String),

    // User errors
    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Login already taken: {0}")]
    LoginTaken(String),

    #[error("Invalid login or password")]
    InvalidCredentials,

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Authentication errors
    #[error("Authentication error: {0}")]
    Auth(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for LedgerError
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Failures reported by the external accrual authority
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccrualError {
    #[error("Order is not registered in the accrual system")]
    NotRegistered,

    #[error("Accrual system rate limited the request, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Accrual system not available: {reason}")]
    Unavailable { reason: String },

    #[error("Accrual system acting unexpectedly (status {status}): {detail}")]
    UnexpectedResponse { status: u16, detail: String },
}

impl AccrualError {
    /// Transient failures leave the order resolvable on a later cycle
    pub fn is_transient(&self) -> bool {
        !matches!(self, AccrualError::NotRegistered)
    }
}

impl LedgerError {
    /// Business rejections that are reported to the caller rather than logged as faults
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            LedgerError::OrderOwnedByAnotherUser { .. }
                | LedgerError::InsufficientBalance { .. }
                | LedgerError::DuplicateWithdrawalOrder(_)
                | LedgerError::LoginTaken(_)
                | LedgerError::InvalidCredentials
                | LedgerError::Validation(_)
        )
    }
}
