//! Account types for tokenledger.
//!
//! This module defines the metering account: the token balance and the sum of
//! outstanding reservation holds against it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AccountId;

/// A metering account for a user.
///
/// `balance_tokens` changes only through committed usage, credits, and
/// adjustments; creating or releasing a reservation never moves it.
/// `reserved_tokens` tracks the sum of ACTIVE holds, so the headroom for a
/// new reservation is `balance_tokens - reserved_tokens`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// The account ID.
    pub account_id: AccountId,

    /// Current token balance.
    pub balance_tokens: i64,

    /// Sum of tokens held by ACTIVE reservations.
    pub reserved_tokens: i64,

    /// Lifetime tokens credited (purchases, subscription grants, restorations).
    pub lifetime_credited_tokens: i64,

    /// Lifetime tokens committed through usage.
    pub lifetime_committed_tokens: i64,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account with zero balance.
    #[must_use]
    pub fn new(account_id: AccountId) -> Self {
        let now = Utc::now();
        Self {
            account_id,
            balance_tokens: 0,
            reserved_tokens: 0,
            lifetime_credited_tokens: 0,
            lifetime_committed_tokens: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Tokens available for a new reservation: balance minus ACTIVE holds.
    #[must_use]
    pub const fn available_tokens(&self) -> i64 {
        self.balance_tokens - self.reserved_tokens
    }

    /// Check whether a hold of `estimated_tokens` fits in the headroom.
    #[must_use]
    pub const fn can_reserve(&self, estimated_tokens: i64) -> bool {
        estimated_tokens <= self.available_tokens()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_account_has_zero_balance() {
        let account = Account::new(AccountId::generate());
        assert_eq!(account.balance_tokens, 0);
        assert_eq!(account.reserved_tokens, 0);
        assert_eq!(account.available_tokens(), 0);
    }

    #[test]
    fn available_subtracts_active_holds() {
        let mut account = Account::new(AccountId::generate());
        account.balance_tokens = 1000;
        account.reserved_tokens = 300;

        assert_eq!(account.available_tokens(), 700);
        assert!(account.can_reserve(700));
        assert!(!account.can_reserve(701));
    }
}
