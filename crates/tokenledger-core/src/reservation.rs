//! Reservation types and the hold state machine.
//!
//! A reservation is a provisional hold of estimated tokens against an account
//! for one billable operation. It starts ACTIVE and ends in exactly one
//! terminal state; terminal states are sticky and idempotent on re-entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::{AccountId, ReservationId};

/// State of a reservation.
///
/// Legal transitions: `Active -> {Committed, Released, Cancelled, Expired}`,
/// and `X -> X` for any terminal `X` (a no-op). Everything else is illegal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
    /// The hold is live; tokens are unavailable for new reservations.
    Active,

    /// Finalized with the actual token cost, capped at the estimate.
    Committed,

    /// Returned to availability without any usage committed.
    Released,

    /// Abandoned by the caller before completion.
    Cancelled,

    /// Timed out and swept after `expires_at` passed.
    Expired,
}

impl ReservationState {
    /// Whether this state is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }

    /// State name as a static string, for logs and index keys.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Committed => "committed",
            Self::Released => "released",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

/// Outcome of applying a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The reservation moved to a new state.
    Applied,

    /// The reservation was already in the requested terminal state.
    NoOp,
}

/// A provisional hold of estimated tokens against an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation ID.
    pub id: ReservationId,

    /// The account the hold is against.
    pub account_id: AccountId,

    /// Size of the hold, fixed at creation from the caller's estimate.
    pub estimated_tokens: i64,

    /// Current state.
    pub state: ReservationState,

    /// When the reservation was created.
    pub created_at: DateTime<Utc>,

    /// When the reservation becomes eligible for sweeper expiry.
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    /// Create a new ACTIVE reservation.
    #[must_use]
    pub fn new(
        account_id: AccountId,
        estimated_tokens: i64,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReservationId::generate(),
            account_id,
            estimated_tokens,
            state: ReservationState::Active,
            created_at: Utc::now(),
            expires_at,
        }
    }

    /// Whether the reservation is past its expiry deadline.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Apply a state transition, enforcing the legal table.
    ///
    /// Re-entering the current terminal state is accepted as a no-op.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::IllegalTransition` for any transition outside
    /// the table.
    pub fn transition(&mut self, to: ReservationState) -> Result<Transition> {
        match (self.state, to) {
            (ReservationState::Active, target) if target.is_terminal() => {
                self.state = target;
                Ok(Transition::Applied)
            }
            (from, target) if from == target && from.is_terminal() => Ok(Transition::NoOp),
            (from, target) => Err(LedgerError::IllegalTransition { from, to: target }),
        }
    }
}
