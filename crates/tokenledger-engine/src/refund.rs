//! Refund policy: proportional token clawback and restoration.
//!
//! The calculator is pure; applying the result to the ledger happens in the
//! event processor through ADJUSTMENT transactions keyed by the refund or
//! dispute id.

use serde::{Deserialize, Serialize};

use tokenledger_core::{units, LedgerError, Payment, Result};

/// Which policy produced a calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundPolicy {
    /// Tokens proportional to the refunded share of the payment amount,
    /// rounded up.
    Proportional,
}

/// Result of a refund calculation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundCalculation {
    /// Tokens to claw back from the account.
    pub tokens_to_deduct: i64,

    /// The refunded amount in cents, echoed for bookkeeping.
    pub refund_amount_cents: i64,

    /// The policy that was applied.
    pub policy_applied: RefundPolicy,
}

/// Compute the token clawback for a partial or full refund.
///
/// Proportional policy:
/// `tokens = ceil(credited_tokens * refund_cents / amount_cents)`, the same
/// ceiling rule as every other token-quantity derivation. A full refund
/// claws back exactly the credited amount.
///
/// # Errors
///
/// - `LedgerError::InvalidAmount` for a non-positive refund amount or one
///   exceeding what is still refundable on the payment.
pub fn calculate_refund(payment: &Payment, refund_amount_cents: i64) -> Result<RefundCalculation> {
    if refund_amount_cents <= 0 {
        return Err(LedgerError::InvalidAmount(format!(
            "refund amount must be positive, got {refund_amount_cents}"
        )));
    }
    if refund_amount_cents > payment.refundable_cents() {
        return Err(LedgerError::InvalidAmount(format!(
            "refund of {refund_amount_cents} cents exceeds refundable {} cents",
            payment.refundable_cents()
        )));
    }

    let tokens_to_deduct = units::proportional_tokens(
        payment.credited_tokens,
        refund_amount_cents,
        payment.amount_cents,
    )?;

    Ok(RefundCalculation {
        tokens_to_deduct,
        refund_amount_cents,
        policy_applied: RefundPolicy::Proportional,
    })
}
