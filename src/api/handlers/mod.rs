pub mod balance;
pub mod orders;
pub mod system;
pub mod users;

pub use balance::*;
pub use orders::*;
pub use system::*;
pub use users::*;

use axum::http::StatusCode;
use tracing::error;

use crate::error::LedgerError;

pub type ApiResult<T> = std::result::Result<T, (StatusCode, String)>;

/// Map a service error onto a response; faults are logged and hidden
pub(crate) fn reject(err: LedgerError) -> (StatusCode, String) {
    let status = match &err {
        LedgerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        LedgerError::OrderOwnedByAnotherUser { .. } | LedgerError::LoginTaken(_) => {
            StatusCode::CONFLICT
        }
        LedgerError::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
        LedgerError::DuplicateWithdrawalOrder(_) => StatusCode::BAD_REQUEST,
        LedgerError::InvalidCredentials | LedgerError::Auth(_) | LedgerError::UserNotFound(_) => {
            StatusCode::UNAUTHORIZED
        }
        _ => {
            error!("Request failed: {}", err);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
            );
        }
    };
    (status, err.to_string())
}
