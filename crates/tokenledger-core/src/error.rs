//! Error types for tokenledger.

use crate::ids::IdError;
use crate::reservation::ReservationState;

/// Result type for tokenledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors that can occur in ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The account's available balance cannot cover the requested hold.
    #[error("insufficient tokens: requested={requested}, available={available}")]
    InsufficientTokens {
        /// Tokens requested by the operation.
        requested: i64,
        /// Tokens currently available for reservation.
        available: i64,
        /// `requested - available`.
        shortfall: i64,
    },

    /// A reservation state transition outside the legal table.
    ///
    /// Always a bug or race signal, never expected in normal operation.
    #[error("illegal reservation transition: {from:?} -> {to:?}")]
    IllegalTransition {
        /// The reservation's current state.
        from: ReservationState,
        /// The requested target state.
        to: ReservationState,
    },

    /// An idempotency key has already produced a ledger effect for this
    /// operation type.
    #[error("duplicate operation: {key}")]
    DuplicateOperation {
        /// The idempotency key that was replayed.
        key: String,
    },

    /// An externally-sourced event id has already been fully processed.
    #[error("duplicate event: {event_id}")]
    DuplicateEvent {
        /// The event id that was duplicated.
        event_id: String,
    },

    /// Reservation not found.
    #[error("reservation not found: {reservation_id}")]
    ReservationNotFound {
        /// The reservation id that was not found.
        reservation_id: String,
    },

    /// Payment not found for a provider-assigned identifier.
    #[error("payment not found: {reference}")]
    PaymentNotFound {
        /// The session, intent, or charge id used for the lookup.
        reference: String,
    },

    /// Invalid amount (non-positive credit, negative actual usage, ...).
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl LedgerError {
    /// Build an `InsufficientTokens` error from the request and headroom.
    #[must_use]
    pub fn insufficient(requested: i64, available: i64) -> Self {
        Self::InsufficientTokens {
            requested,
            available,
            shortfall: requested - available,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_carries_shortfall() {
        let err = LedgerError::insufficient(1000, 400);
        match err {
            LedgerError::InsufficientTokens {
                requested,
                available,
                shortfall,
            } => {
                assert_eq!(requested, 1000);
                assert_eq!(available, 400);
                assert_eq!(shortfall, 600);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
