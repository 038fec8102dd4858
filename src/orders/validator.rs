// Order number validation: Luhn mod-10 checksum plus a minimum length floor.
// Shared by order intake and withdrawals.

use crate::error::{AppError, AppResult};

/// Shortest order number accepted, regardless of checksum.
pub const MIN_ORDER_NUMBER_LEN: usize = 3;

/// Validate a claimed order number.
///
/// Only ASCII digits are accepted; whitespace is not trimmed here.
pub fn validate_order_number(raw: &str) -> AppResult<()> {
    if raw.len() < MIN_ORDER_NUMBER_LEN {
        return Err(AppError::InvalidOrderNumber(raw.to_string()));
    }

    if !luhn_checksum_ok(raw) {
        return Err(AppError::InvalidOrderNumber(raw.to_string()));
    }

    Ok(())
}

/// Luhn check over a digit string. Any non-digit fails the check.
fn luhn_checksum_ok(digits: &str) -> bool {
    let mut sum = 0u32;

    for (idx, ch) in digits.chars().rev().enumerate() {
        let Some(mut digit) = ch.to_digit(10) else {
            return false;
        };

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_order_numbers() {
        for number in ["12345678903", "2377225624", "79927398713", "4561261212345467", "9278923470"] {
            assert!(validate_order_number(number).is_ok(), "{} should be valid", number);
        }
    }

    #[test]
    fn test_checksum_failure() {
        assert!(matches!(
            validate_order_number("1234"),
            Err(AppError::InvalidOrderNumber(n)) if n == "1234"
        ));
        assert!(validate_order_number("12345678902").is_err());
    }

    #[test]
    fn test_minimum_length_floor() {
        // "18" and "0" pass Luhn but are too short
        assert!(validate_order_number("18").is_err());
        assert!(validate_order_number("0").is_err());
        assert!(validate_order_number("").is_err());
        assert!(validate_order_number("000").is_ok());
    }

    #[test]
    fn test_non_digit_rejected() {
        assert!(validate_order_number("12345678a03").is_err());
        assert!(validate_order_number(" 12345678903").is_err());
        assert!(validate_order_number("-2377225624").is_err());
    }
}
