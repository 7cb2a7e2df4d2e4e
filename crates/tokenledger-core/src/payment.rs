//! Payment records for completed purchases.
//!
//! A payment row is created on first sight of a checkout completion and is
//! the correlation anchor for later refunds and disputes, looked up by the
//! provider-assigned session or payment-intent id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, PaymentId};

/// Status of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Checkout seen but not yet paid.
    Pending,

    /// Paid in full; tokens credited.
    Completed,

    /// Partially refunded; some tokens clawed back.
    PartiallyRefunded,

    /// Fully refunded.
    Refunded,

    /// Under an open dispute.
    Disputed,
}

/// A completed or pending purchase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    /// Internal payment ID.
    pub id: PaymentId,

    /// The purchasing account.
    pub account_id: AccountId,

    /// Charged amount in cents.
    pub amount_cents: i64,

    /// ISO currency code (e.g. "usd").
    pub currency: String,

    /// Tokens credited for this payment.
    pub credited_tokens: i64,

    /// Provider checkout session id, if the purchase came through checkout.
    pub session_id: Option<String>,

    /// Provider payment-intent id.
    pub payment_intent_id: Option<String>,

    /// Provider-reported refund volume in cents. Monotonically increasing;
    /// a canceled refund restores tokens but never decrements this field.
    pub refunded_amount_cents: i64,

    /// Current status.
    pub status: PaymentStatus,

    /// When the payment was first seen.
    pub created_at: DateTime<Utc>,

    /// When the payment was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Create a completed payment record from a paid checkout session.
    #[must_use]
    pub fn completed(
        account_id: AccountId,
        amount_cents: i64,
        currency: impl Into<String>,
        credited_tokens: i64,
        session_id: Option<String>,
        payment_intent_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: PaymentId::generate(),
            account_id,
            amount_cents,
            currency: currency.into(),
            credited_tokens,
            session_id,
            payment_intent_id,
            refunded_amount_cents: 0,
            status: PaymentStatus::Completed,
            created_at: now,
            updated_at: now,
        }
    }

    /// Cents still refundable against this payment.
    #[must_use]
    pub const fn refundable_cents(&self) -> i64 {
        self.amount_cents - self.refunded_amount_cents
    }

    /// Record a provider refund of `amount_cents`, updating the status.
    pub fn record_refund(&mut self, amount_cents: i64) {
        self.refunded_amount_cents += amount_cents;
        self.status = if self.refunded_amount_cents >= self.amount_cents {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };
        self.updated_at = Utc::now();
    }

    /// Mark the payment as disputed.
    pub fn mark_disputed(&mut self) {
        self.status = PaymentStatus::Disputed;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment() -> Payment {
        Payment::completed(
            AccountId::generate(),
            1000,
            "usd",
            100,
            Some("cs_1".into()),
            Some("pi_1".into()),
        )
    }

    #[test]
    fn partial_refund_updates_status() {
        let mut p = payment();
        p.record_refund(500);

        assert_eq!(p.refunded_amount_cents, 500);
        assert_eq!(p.status, PaymentStatus::PartiallyRefunded);
        assert_eq!(p.refundable_cents(), 500);
    }

    #[test]
    fn full_refund_reaches_refunded() {
        let mut p = payment();
        p.record_refund(500);
        p.record_refund(500);

        assert_eq!(p.status, PaymentStatus::Refunded);
        assert_eq!(p.refundable_cents(), 0);
    }
}
