//! Input validation for user-supplied order numbers, amounts and credentials
//!
//! Order numbers (both accrual orders and withdrawal orders) must be
//! non-empty strings of ASCII digits that pass the Luhn checksum.

use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;

/// Longest order number accepted from a client
const MAX_ORDER_NUMBER_LEN: usize = 64;

const MAX_LOGIN_LEN: usize = 128;

/// Decimal places kept for point amounts
pub const AMOUNT_SCALE: u32 = 2;

/// Luhn checksum over a string of ASCII digits
///
/// Returns `false` for empty input or any non-digit character.
pub fn luhn_valid(number: &str) -> bool {
    if number.is_empty() {
        return false;
    }

    let mut sum = 0u32;
    for (idx, ch) in number.bytes().rev().enumerate() {
        if !ch.is_ascii_digit() {
            return false;
        }
        let mut digit = u32::from(ch - b'0');
        if idx % 2 == 1 {
            digit *= 2;
            if digit > 9 {
                digit -= 9;
            }
        }
        sum += digit;
    }

    sum % 10 == 0
}

/// Validate an order number and return it trimmed
pub fn validate_order_number(raw: &str) -> Result<String> {
    let number = raw.trim();

    if number.is_empty() {
        return Err(LedgerError::Validation(
            "Order number cannot be empty".to_string(),
        ));
    }

    if number.len() > MAX_ORDER_NUMBER_LEN {
        return Err(LedgerError::Validation(format!(
            "Order number is too long: {} digits (maximum: {})",
            number.len(),
            MAX_ORDER_NUMBER_LEN
        )));
    }

    if !luhn_valid(number) {
        return Err(LedgerError::Validation(format!(
            "Order number failed the Luhn check: {}",
            number
        )));
    }

    Ok(number.to_string())
}

/// Validate a withdrawal amount (must be strictly positive)
pub fn validate_amount(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::Validation(format!(
            "Amount must be positive: {}",
            amount
        )));
    }

    if amount.normalize().scale() > AMOUNT_SCALE {
        return Err(LedgerError::Validation(format!(
            "Amount has more than {} decimal places: {}",
            AMOUNT_SCALE, amount
        )));
    }

    Ok(())
}

/// A credit may be zero but never negative
pub fn validate_credit(amount: Decimal) -> Result<()> {
    if amount < Decimal::ZERO {
        return Err(LedgerError::Validation(format!(
            "Credit cannot be negative: {}",
            amount
        )));
    }

    Ok(())
}

/// Validate registration or login input; returns the trimmed login
pub fn validate_credentials(login: &str, password: &str) -> Result<String> {
    let login = login.trim();
    if login.is_empty() {
        return Err(LedgerError::Validation("Login cannot be empty".to_string()));
    }
    if login.len() > MAX_LOGIN_LEN {
        return Err(LedgerError::Validation(format!(
            "Login is too long (maximum: {})",
            MAX_LOGIN_LEN
        )));
    }
    if password.is_empty() {
        return Err(LedgerError::Validation(
            "Password cannot be empty".to_string(),
        ));
    }

    Ok(login.to_string())
}
