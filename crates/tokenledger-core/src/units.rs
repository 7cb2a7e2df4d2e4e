//! Integer token-unit math.
//!
//! All token-quantity conversions round up: a fraction of a billing token is
//! billed as a whole token, and no fractional quantity ever persists.

use crate::error::{LedgerError, Result};

/// Ceiling division for non-negative operands.
const fn ceil_div(numerator: i64, denominator: i64) -> i64 {
    (numerator + denominator - 1) / denominator
}

/// Convert raw usage units (LLM tokens, pages, calls) to billing tokens.
///
/// `units_per_token` is the conversion ratio; the result is
/// `ceil(raw_units / units_per_token)`.
///
/// # Errors
///
/// Returns `LedgerError::InvalidAmount` when the ratio is not positive.
pub fn billing_tokens(raw_units: i64, units_per_token: i64) -> Result<i64> {
    if units_per_token <= 0 {
        return Err(LedgerError::InvalidAmount(format!(
            "units_per_token must be positive, got {units_per_token}"
        )));
    }
    if raw_units < 0 {
        return Err(LedgerError::InvalidAmount(format!(
            "raw_units must be non-negative, got {raw_units}"
        )));
    }
    Ok(ceil_div(raw_units, units_per_token))
}

/// Apply the estimation-time safety factor to a token estimate.
///
/// `safety_factor_percent` is the full multiplier in percent (e.g. 120 for a
/// 1.2x margin); the result rounds up. This factor exists only before a
/// reservation is created; commit-time actuals are never multiplied.
///
/// # Errors
///
/// Returns `LedgerError::InvalidAmount` for a factor below 100 percent.
pub fn estimate_with_safety(tokens: i64, safety_factor_percent: i64) -> Result<i64> {
    if safety_factor_percent < 100 {
        return Err(LedgerError::InvalidAmount(format!(
            "safety factor must be at least 100 percent, got {safety_factor_percent}"
        )));
    }
    if tokens < 0 {
        return Err(LedgerError::InvalidAmount(format!(
            "token estimate must be non-negative, got {tokens}"
        )));
    }
    Ok(ceil_div(tokens * safety_factor_percent, 100))
}

/// Proportional token share of a partial amount: the tokens corresponding to
/// `part_cents` out of a payment of `total_cents` that credited
/// `credited_tokens`, rounded up.
///
/// # Errors
///
/// Returns `LedgerError::InvalidAmount` when `total_cents` is not positive or
/// either share operand is negative.
pub fn proportional_tokens(credited_tokens: i64, part_cents: i64, total_cents: i64) -> Result<i64> {
    if total_cents <= 0 {
        return Err(LedgerError::InvalidAmount(format!(
            "total_cents must be positive, got {total_cents}"
        )));
    }
    if credited_tokens < 0 || part_cents < 0 {
        return Err(LedgerError::InvalidAmount(
            "proportional share operands must be non-negative".into(),
        ));
    }
    Ok(ceil_div(credited_tokens * part_cents, total_cents))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn billing_tokens_round_up() {
        assert_eq!(billing_tokens(1000, 1000).unwrap(), 1);
        assert_eq!(billing_tokens(1001, 1000).unwrap(), 2);
        assert_eq!(billing_tokens(1999, 1000).unwrap(), 2);
        assert_eq!(billing_tokens(0, 1000).unwrap(), 0);
    }

    #[test]
    fn billing_tokens_reject_bad_ratio() {
        assert!(billing_tokens(100, 0).is_err());
        assert!(billing_tokens(-1, 10).is_err());
    }

    #[test]
    fn safety_factor_rounds_up() {
        assert_eq!(estimate_with_safety(100, 120).unwrap(), 120);
        assert_eq!(estimate_with_safety(101, 120).unwrap(), 122); // 121.2 -> 122
        assert_eq!(estimate_with_safety(50, 100).unwrap(), 50);
    }

    #[test]
    fn safety_factor_rejects_discount() {
        assert!(estimate_with_safety(100, 99).is_err());
    }

    #[test]
    fn proportional_even_division() {
        // 500 of 1000 cents against 100 credited tokens.
        assert_eq!(proportional_tokens(100, 500, 1000).unwrap(), 50);
        // Full refund claws back everything.
        assert_eq!(proportional_tokens(100, 1000, 1000).unwrap(), 100);
    }

    #[test]
    fn proportional_uneven_division_rounds_up() {
        // 100 * 333 / 1000 = 33.3 -> 34
        assert_eq!(proportional_tokens(100, 333, 1000).unwrap(), 34);
        // 7 * 1 / 3 = 2.33 -> 3
        assert_eq!(proportional_tokens(7, 1, 3).unwrap(), 3);
    }

    #[test]
    fn proportional_rejects_zero_total() {
        assert!(proportional_tokens(100, 10, 0).is_err());
    }
}
