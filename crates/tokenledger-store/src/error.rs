//! Error types for the tokenledger store.

use tokenledger_core::LedgerError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// The id that was looked up.
        id: String,
    },

    /// Insufficient available tokens for a new hold.
    #[error("insufficient tokens: requested={requested}, available={available}")]
    InsufficientTokens {
        /// Tokens requested by the hold.
        requested: i64,
        /// Tokens available for reservation.
        available: i64,
    },

    /// The event id was already processed.
    #[error("duplicate event: {event_id}")]
    DuplicateEvent {
        /// The event id that was duplicated.
        event_id: String,
    },

    /// The idempotency key already produced an effect for this operation type.
    #[error("duplicate operation: {key}")]
    DuplicateOperation {
        /// The idempotency key that was replayed.
        key: String,
    },
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Database(msg) => Self::Storage(msg),
            StoreError::Serialization(msg) => Self::Serialization(msg),
            StoreError::NotFound { entity, id } => match entity {
                "reservation" => Self::ReservationNotFound { reservation_id: id },
                "payment" => Self::PaymentNotFound { reference: id },
                _ => Self::Storage(format!("{entity} not found: {id}")),
            },
            StoreError::InsufficientTokens {
                requested,
                available,
            } => Self::insufficient(requested, available),
            StoreError::DuplicateEvent { event_id } => Self::DuplicateEvent { event_id },
            StoreError::DuplicateOperation { key } => Self::DuplicateOperation { key },
        }
    }
}
