//! `RocksDB` ledger store for tokenledger.
//!
//! This crate provides persistent storage for accounts, reservations, ledger
//! transactions, payments, subscription standings, idempotency markers, and
//! processed-event markers, using `RocksDB` with column families for
//! efficient indexing.
//!
//! # Atomicity
//!
//! Every balance-affecting compound operation performs its constraint checks
//! (idempotency lookups, processed-event existence, reservation headroom)
//! and its writes under a single write gate, and commits one `WriteBatch`.
//! Races therefore surface as duplicate or insufficient-tokens outcomes,
//! never as partial state, and a crash between check and commit leaves
//! nothing behind.
//!
//! # Example
//!
//! ```no_run
//! use tokenledger_store::{RocksStore, Store};
//! use tokenledger_core::{Account, AccountId};
//!
//! let store = RocksStore::open("/tmp/tokenledger-db").unwrap();
//!
//! let account_id = AccountId::generate();
//! store.put_account(&Account::new(account_id)).unwrap();
//! let retrieved = store.get_account(&account_id).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tokenledger_core::{
    Account, AccountId, Payment, PaymentId, Reservation, ReservationId, SubscriptionStanding,
    TokenTransaction, TransactionId, TransactionType,
};

/// What an idempotency key already produced, recorded for replay reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// The ledger transaction the key produced.
    pub transaction_id: TransactionId,

    /// The reservation involved, when the operation created or resolved one.
    pub reservation_id: Option<ReservationId>,
}

/// Outcome of a `reserve` compound operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// The hold was created.
    Created,

    /// The idempotency key was already used; the existing reservation id.
    Duplicate(ReservationId),
}

/// Outcome of a `resolve_reservation` compound operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// The resolution was applied.
    Applied,

    /// Another actor already resolved the reservation (or replayed this key).
    AlreadyApplied,
}

/// The all-or-nothing effects of one inbound provider event.
///
/// Applied as a single `WriteBatch` together with the processed-event
/// marker; either everything becomes visible or nothing does.
#[derive(Debug, Clone, Default)]
pub struct EventEffects {
    /// The provider event id to mark processed.
    pub event_id: String,

    /// A payment row to insert with first-seen semantics: skipped when a
    /// payment for the same session or intent already exists.
    pub payment_insert: Option<Payment>,

    /// A payment row to overwrite (refund/dispute bookkeeping).
    pub payment_update: Option<Payment>,

    /// Ledger transactions to append. Rows whose `(idempotency_key,
    /// tx_type)` already exists are skipped as inert.
    pub transactions: Vec<TokenTransaction>,

    /// Subscription standing rows to write (last-writer-wins).
    pub standings: Vec<SubscriptionStanding>,
}

impl EventEffects {
    /// Effects carrying only the processed-event marker.
    #[must_use]
    pub fn marker_only(event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            ..Self::default()
        }
    }
}

/// Outcome of an `apply_event` compound operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventApplyOutcome {
    /// The effects were applied and the marker written.
    Applied {
        /// Ledger rows actually appended.
        transactions_applied: usize,
        /// Ledger rows skipped because their idempotency key was seen.
        transactions_skipped: usize,
    },

    /// The event id was already marked processed; nothing was written.
    Duplicate,
}

/// The storage trait defining all ledger database operations.
///
/// This trait abstracts the storage layer, allowing for different
/// implementations behind the engine.
pub trait Store: Send + Sync {
    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Insert or update an account record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_account(&self, account: &Account) -> Result<()>;

    /// Get an account by account ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>>;

    // =========================================================================
    // Reservation Operations
    // =========================================================================

    /// Get a reservation by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_reservation(&self, reservation_id: &ReservationId) -> Result<Option<Reservation>>;

    /// List ACTIVE reservations whose deadline passed, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reservation>>;

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    /// Get a transaction by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_transaction(&self, transaction_id: &TransactionId) -> Result<Option<TokenTransaction>>;

    /// List transactions for an account, ordered by time (newest first).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_transactions_by_account(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TokenTransaction>>;

    /// List transactions resolving a reservation, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_transactions_by_reservation(
        &self,
        reservation_id: &ReservationId,
    ) -> Result<Vec<TokenTransaction>>;

    /// Look up what an idempotency key already produced for an operation type.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_idempotent(
        &self,
        tx_type: TransactionType,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>>;

    // =========================================================================
    // Processed-Event Operations
    // =========================================================================

    /// Check whether an externally-sourced event id was fully handled.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn has_processed_event(&self, event_id: &str) -> Result<bool>;

    // =========================================================================
    // Payment Operations
    // =========================================================================

    /// Get a payment by internal ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_payment(&self, payment_id: &PaymentId) -> Result<Option<Payment>>;

    /// Find a payment by provider checkout session id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_payment_by_session(&self, session_id: &str) -> Result<Option<Payment>>;

    /// Find a payment by provider payment-intent id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_payment_by_intent(&self, intent_id: &str) -> Result<Option<Payment>>;

    // =========================================================================
    // Subscription Standing Operations
    // =========================================================================

    /// Get the standing record for an account, if one exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_standing(&self, account_id: &AccountId) -> Result<Option<SubscriptionStanding>>;

    /// Write a standing record (last-writer-wins, serialized by the gate).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_standing(&self, standing: &SubscriptionStanding) -> Result<()>;

    // =========================================================================
    // Compound Operations
    // =========================================================================

    /// Create a hold: reservation row, RESERVE transaction, expiry-index
    /// entry, idempotency marker, and the account's `reserved_tokens` bump,
    /// atomically.
    ///
    /// # Errors
    ///
    /// - `StoreError::InsufficientTokens` if the headroom is too small and
    ///   `allow_negative` is false.
    fn reserve(
        &self,
        reservation: &Reservation,
        tx: &TokenTransaction,
        allow_negative: bool,
    ) -> Result<ReserveOutcome>;

    /// Resolve a hold to a terminal state: updated reservation row, the
    /// COMMIT/RELEASE transactions, idempotency markers, expiry-index
    /// removal, and the account's balance/hold bookkeeping, atomically.
    ///
    /// `reservation` carries the terminal state; `committed_tokens` is the
    /// balance debit (zero for release/cancel/expire).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn resolve_reservation(
        &self,
        reservation: &Reservation,
        txs: &[TokenTransaction],
        committed_tokens: i64,
    ) -> Result<ResolveOutcome>;

    /// Append a CREDIT transaction and apply it to the account balance,
    /// atomically. Returns the new balance.
    ///
    /// # Errors
    ///
    /// - `StoreError::DuplicateOperation` if the idempotency key was seen.
    fn apply_credit(&self, tx: &TokenTransaction) -> Result<i64>;

    /// Append a signed ADJUSTMENT transaction and apply it to the account
    /// balance, atomically. Returns the new balance.
    ///
    /// # Errors
    ///
    /// - `StoreError::DuplicateOperation` if the idempotency key was seen.
    fn apply_adjustment(&self, tx: &TokenTransaction) -> Result<i64>;

    /// Apply the effects of one inbound event together with its
    /// processed-event marker as one batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn apply_event(&self, effects: &EventEffects) -> Result<EventApplyOutcome>;
}
