//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary account records, keyed by `account_id`.
    pub const ACCOUNTS: &str = "accounts";

    /// Reservation records, keyed by `reservation_id`.
    pub const RESERVATIONS: &str = "reservations";

    /// Index: ACTIVE reservations by deadline, keyed by
    /// `expires_at_millis (8 bytes BE) || reservation_id`. Value is empty.
    /// Entries are removed when the reservation leaves ACTIVE.
    pub const RESERVATION_EXPIRY: &str = "reservation_expiry";

    /// Ledger transactions, keyed by `transaction_id` (ULID).
    pub const TRANSACTIONS: &str = "transactions";

    /// Index: transactions by account, keyed by `account_id || transaction_id`.
    /// Value is empty (index only).
    pub const TRANSACTIONS_BY_ACCOUNT: &str = "transactions_by_account";

    /// Index: transactions by reservation, keyed by
    /// `reservation_id || transaction_id`. Value is empty.
    pub const TRANSACTIONS_BY_RESERVATION: &str = "transactions_by_reservation";

    /// Idempotency markers, keyed by `tx_type || ':' || idempotency_key`.
    /// The unique key is the at-most-once guarantee for ledger effects.
    pub const IDEMPOTENCY: &str = "idempotency";

    /// Payment records, keyed by internal `payment_id`.
    pub const PAYMENTS: &str = "payments";

    /// Index: payment id by provider checkout session id.
    pub const PAYMENTS_BY_SESSION: &str = "payments_by_session";

    /// Index: payment id by provider payment-intent id.
    pub const PAYMENTS_BY_INTENT: &str = "payments_by_intent";

    /// Processed-event markers, keyed by provider event id. Value is empty.
    /// Written only inside the same batch as the event's ledger effects.
    pub const PROCESSED_EVENTS: &str = "processed_events";

    /// Subscription standing records, keyed by `account_id`.
    pub const STANDINGS: &str = "standings";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ACCOUNTS,
        cf::RESERVATIONS,
        cf::RESERVATION_EXPIRY,
        cf::TRANSACTIONS,
        cf::TRANSACTIONS_BY_ACCOUNT,
        cf::TRANSACTIONS_BY_RESERVATION,
        cf::IDEMPOTENCY,
        cf::PAYMENTS,
        cf::PAYMENTS_BY_SESSION,
        cf::PAYMENTS_BY_INTENT,
        cf::PROCESSED_EVENTS,
        cf::STANDINGS,
    ]
}
