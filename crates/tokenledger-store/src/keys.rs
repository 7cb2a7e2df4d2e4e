//! Key encoding utilities for `RocksDB`.
//!
//! This module provides functions for encoding and decoding keys used in
//! column families.

use chrono::{DateTime, Utc};
use tokenledger_core::{AccountId, PaymentId, ReservationId, TransactionId, TransactionType};

/// Create an account key from an account ID.
#[must_use]
pub fn account_key(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Create a reservation key from a reservation ID.
#[must_use]
pub fn reservation_key(reservation_id: &ReservationId) -> Vec<u8> {
    reservation_id.as_bytes().to_vec()
}

/// Create an expiry-index key.
///
/// Format: `expires_at_millis (8 bytes BE) || reservation_id (16 bytes)`,
/// so iterating from the start of the column family visits reservations in
/// deadline order.
#[must_use]
pub fn expiry_key(expires_at: DateTime<Utc>, reservation_id: &ReservationId) -> Vec<u8> {
    let mut key = Vec::with_capacity(24);
    #[allow(clippy::cast_sign_loss)]
    key.extend_from_slice(&(expires_at.timestamp_millis().max(0) as u64).to_be_bytes());
    key.extend_from_slice(reservation_id.as_bytes());
    key
}

/// Extract the reservation ID from an expiry-index key.
///
/// # Panics
///
/// Panics if the key is not at least 24 bytes.
#[must_use]
pub fn extract_reservation_id_from_expiry_key(key: &[u8]) -> ReservationId {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&key[8..24]);
    ReservationId::from_uuid(uuid::Uuid::from_bytes(bytes))
}

/// Extract the deadline millis from an expiry-index key.
///
/// # Panics
///
/// Panics if the key is not at least 8 bytes.
#[must_use]
pub fn extract_millis_from_expiry_key(key: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&key[..8]);
    u64::from_be_bytes(bytes)
}

/// Create a transaction key from a transaction ID.
#[must_use]
pub fn transaction_key(transaction_id: &TransactionId) -> Vec<u8> {
    transaction_id.to_bytes().to_vec()
}

/// Create an account-transaction index key.
///
/// Format: `account_id (16 bytes) || transaction_id (16 bytes)`.
///
/// Since ULIDs are time-ordered, transactions for an account sort by time.
#[must_use]
pub fn account_transaction_key(account_id: &AccountId, transaction_id: &TransactionId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(account_id.as_bytes());
    key.extend_from_slice(&transaction_id.to_bytes());
    key
}

/// Create a prefix for iterating all transactions for an account.
#[must_use]
pub fn account_transactions_prefix(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Create a reservation-transaction index key.
///
/// Format: `reservation_id (16 bytes) || transaction_id (16 bytes)`.
#[must_use]
pub fn reservation_transaction_key(
    reservation_id: &ReservationId,
    transaction_id: &TransactionId,
) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(reservation_id.as_bytes());
    key.extend_from_slice(&transaction_id.to_bytes());
    key
}

/// Create a prefix for iterating all transactions for a reservation.
#[must_use]
pub fn reservation_transactions_prefix(reservation_id: &ReservationId) -> Vec<u8> {
    reservation_id.as_bytes().to_vec()
}

/// Extract the transaction ID from a 32-byte composite index key.
///
/// # Panics
///
/// Panics if the key is not at least 32 bytes.
#[must_use]
pub fn extract_transaction_id_from_index_key(key: &[u8]) -> TransactionId {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&key[16..32]);
    TransactionId::from_bytes(bytes).expect("valid ULID bytes")
}

/// Create an idempotency-marker key.
///
/// Format: `tx_type || ':' || idempotency_key`. Scoping by type means the
/// same logical key may legally carry one COMMIT and one RELEASE row.
#[must_use]
pub fn idempotency_key(tx_type: TransactionType, key: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(tx_type.as_str().len() + 1 + key.len());
    out.extend_from_slice(tx_type.as_str().as_bytes());
    out.push(b':');
    out.extend_from_slice(key.as_bytes());
    out
}

/// Create a payment key from a payment ID.
#[must_use]
pub fn payment_key(payment_id: &PaymentId) -> Vec<u8> {
    payment_id.as_bytes().to_vec()
}

/// Create a session-index key from a provider session id.
#[must_use]
pub fn payment_session_key(session_id: &str) -> Vec<u8> {
    session_id.as_bytes().to_vec()
}

/// Create an intent-index key from a provider payment-intent id.
#[must_use]
pub fn payment_intent_key(intent_id: &str) -> Vec<u8> {
    intent_id.as_bytes().to_vec()
}

/// Create a processed-event key from a provider event id.
#[must_use]
pub fn processed_event_key(event_id: &str) -> Vec<u8> {
    event_id.as_bytes().to_vec()
}

/// Create a standing key from an account ID.
#[must_use]
pub fn standing_key(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_key_length() {
        let account_id = AccountId::generate();
        assert_eq!(account_key(&account_id).len(), 16);
    }

    #[test]
    fn expiry_key_orders_by_deadline() {
        let id = ReservationId::generate();
        let earlier = expiry_key(Utc::now(), &id);
        let later = expiry_key(Utc::now() + chrono::Duration::seconds(5), &id);
        assert!(earlier < later);
        assert_eq!(earlier.len(), 24);
    }

    #[test]
    fn expiry_key_roundtrip() {
        let id = ReservationId::generate();
        let at = Utc::now();
        let key = expiry_key(at, &id);

        assert_eq!(extract_reservation_id_from_expiry_key(&key), id);
        #[allow(clippy::cast_sign_loss)]
        let millis = at.timestamp_millis() as u64;
        assert_eq!(extract_millis_from_expiry_key(&key), millis);
    }

    #[test]
    fn account_transaction_key_format() {
        let account_id = AccountId::generate();
        let tx_id = TransactionId::generate();
        let key = account_transaction_key(&account_id, &tx_id);

        assert_eq!(key.len(), 32);
        assert_eq!(&key[..16], account_id.as_bytes());
        assert_eq!(&key[16..], tx_id.to_bytes());
        assert_eq!(extract_transaction_id_from_index_key(&key), tx_id);
    }

    #[test]
    fn idempotency_key_scoped_by_type() {
        let commit = idempotency_key(TransactionType::Commit, "op-1");
        let release = idempotency_key(TransactionType::Release, "op-1");
        assert_ne!(commit, release);
        assert_eq!(commit, b"commit:op-1".to_vec());
    }
}
