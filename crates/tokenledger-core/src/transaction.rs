//! Ledger transaction types for tokenledger.
//!
//! Every balance-relevant effect appends exactly one immutable transaction
//! row. Rows are never updated or deleted; they are the audit trail the
//! balance invariants are checked against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, ReservationId, TransactionId};

/// An immutable ledger entry.
///
/// Transactions use ULIDs for time-ordered IDs. The pair
/// `(idempotency_key, tx_type)` is unique per logical operation; the store
/// enforces this, turning retries and races into duplicate outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenTransaction {
    /// Unique transaction ID (ULID for time-ordering).
    pub id: TransactionId,

    /// The account whose ledger this row belongs to.
    pub account_id: AccountId,

    /// The reservation this row resolves, if any. `None` for credits and
    /// adjustments.
    pub reservation_id: Option<ReservationId>,

    /// Type of transaction.
    pub tx_type: TransactionType,

    /// Signed token amount. Credits positive, clawbacks negative; RESERVE,
    /// COMMIT, and RELEASE rows carry the positive magnitude and their
    /// balance effect is defined by the type.
    pub amount_tokens: i64,

    /// Idempotency key for the logical operation that produced this row.
    pub idempotency_key: String,

    /// Additional context (source, provider ids, refund refs, ...).
    pub metadata: serde_json::Value,

    /// When the transaction was created.
    pub created_at: DateTime<Utc>,
}

impl TokenTransaction {
    fn base(
        account_id: AccountId,
        reservation_id: Option<ReservationId>,
        tx_type: TransactionType,
        amount_tokens: i64,
        idempotency_key: String,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            account_id,
            reservation_id,
            tx_type,
            amount_tokens,
            idempotency_key,
            metadata,
            created_at: Utc::now(),
        }
    }

    /// Create a RESERVE transaction recording a new hold.
    #[must_use]
    pub fn reserve(
        account_id: AccountId,
        reservation_id: ReservationId,
        estimated_tokens: i64,
        idempotency_key: String,
    ) -> Self {
        Self::base(
            account_id,
            Some(reservation_id),
            TransactionType::Reserve,
            estimated_tokens,
            idempotency_key,
            serde_json::Value::Null,
        )
    }

    /// Create a COMMIT transaction for the capped actual usage.
    #[must_use]
    pub fn commit(
        account_id: AccountId,
        reservation_id: ReservationId,
        committed_tokens: i64,
        idempotency_key: String,
    ) -> Self {
        Self::base(
            account_id,
            Some(reservation_id),
            TransactionType::Commit,
            committed_tokens,
            idempotency_key,
            serde_json::Value::Null,
        )
    }

    /// Create a RELEASE transaction returning unused held tokens.
    #[must_use]
    pub fn release(
        account_id: AccountId,
        reservation_id: ReservationId,
        released_tokens: i64,
        idempotency_key: String,
    ) -> Self {
        Self::base(
            account_id,
            Some(reservation_id),
            TransactionType::Release,
            released_tokens,
            idempotency_key,
            serde_json::Value::Null,
        )
    }

    /// Create a CREDIT transaction from a purchase or subscription grant.
    #[must_use]
    pub fn credit(
        account_id: AccountId,
        amount_tokens: i64,
        idempotency_key: String,
        source: CreditSource,
        metadata: serde_json::Value,
    ) -> Self {
        let metadata = match metadata {
            serde_json::Value::Null => serde_json::json!({ "source": source.as_str() }),
            mut value => {
                if let Some(map) = value.as_object_mut() {
                    map.insert("source".into(), source.as_str().into());
                }
                value
            }
        };
        Self::base(
            account_id,
            None,
            TransactionType::Credit,
            amount_tokens,
            idempotency_key,
            metadata,
        )
    }

    /// Create a signed ADJUSTMENT transaction (refund clawback, restoration,
    /// manual correction).
    #[must_use]
    pub fn adjustment(
        account_id: AccountId,
        amount_tokens: i64,
        idempotency_key: String,
        metadata: serde_json::Value,
    ) -> Self {
        Self::base(
            account_id,
            None,
            TransactionType::Adjustment,
            amount_tokens,
            idempotency_key,
            metadata,
        )
    }

    /// Signed effect of this row on `balance_tokens`.
    ///
    /// RESERVE and RELEASE rows move the hold, not the balance; COMMIT
    /// debits; CREDIT and ADJUSTMENT apply their signed amount.
    #[must_use]
    pub fn balance_delta(&self) -> i64 {
        match self.tx_type {
            TransactionType::Reserve | TransactionType::Release => 0,
            TransactionType::Commit => -self.amount_tokens,
            TransactionType::Credit | TransactionType::Adjustment => self.amount_tokens,
        }
    }
}

/// Type of ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// A provisional hold was created.
    Reserve,

    /// Actual usage was finalized against a hold.
    Commit,

    /// Unused held tokens were returned to availability.
    Release,

    /// Tokens were granted from a purchase or subscription.
    Credit,

    /// A signed correction (refund clawback, dispute restoration).
    Adjustment,
}

impl TransactionType {
    /// Type name as a static string, for index keys and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Reserve => "reserve",
            Self::Commit => "commit",
            Self::Release => "release",
            Self::Credit => "credit",
            Self::Adjustment => "adjustment",
        }
    }
}

/// Origin of a CREDIT transaction, used for metrics tagging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditSource {
    /// One-off token pack purchase.
    Purchase,

    /// Recurring subscription period grant.
    Subscription,

    /// Manual or promotional grant.
    Manual,
}

impl CreditSource {
    /// Source name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Subscription => "subscription",
            Self::Manual => "manual",
        }
    }
}
