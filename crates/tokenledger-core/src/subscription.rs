//! Subscription standing: the per-account blocked/active flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AccountId;

/// Per-account blocked/active record, created lazily on the first lifecycle
/// transition. An absent record reads as active: there is nothing blocking
/// an account that never had a failed payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionStanding {
    /// The account this record belongs to.
    pub account_id: AccountId,

    /// Whether the account is blocked from subscription-funded usage.
    pub blocked: bool,

    /// Why the account was blocked, when it is.
    pub reason: Option<String>,

    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionStanding {
    /// A blocked record with the given reason.
    #[must_use]
    pub fn blocked(account_id: AccountId, reason: impl Into<String>) -> Self {
        Self {
            account_id,
            blocked: true,
            reason: Some(reason.into()),
            updated_at: Utc::now(),
        }
    }

    /// An active (unblocked) record.
    #[must_use]
    pub fn active(account_id: AccountId) -> Self {
        Self {
            account_id,
            blocked: false,
            reason: None,
            updated_at: Utc::now(),
        }
    }
}
