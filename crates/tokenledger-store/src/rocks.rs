//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};

use tokenledger_core::{
    Account, AccountId, Payment, PaymentId, Reservation, ReservationId, ReservationState,
    SubscriptionStanding, TokenTransaction, TransactionId, TransactionType,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{
    EventApplyOutcome, EventEffects, IdempotencyRecord, ReserveOutcome, ResolveOutcome, Store,
};

/// RocksDB-backed ledger store.
///
/// The write gate serializes balance-affecting compound operations so their
/// read-check-write sequences cannot interleave; within each operation all
/// writes commit through one `WriteBatch`.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    write_gate: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            write_gate: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_or_new_account(&self, account_id: &AccountId) -> Result<Account> {
        Ok(self
            .get_account(account_id)?
            .unwrap_or_else(|| Account::new(*account_id)))
    }

    /// Stage a ledger transaction with its indexes and idempotency marker.
    fn stage_transaction(&self, batch: &mut WriteBatch, tx: &TokenTransaction) -> Result<()> {
        let cf_tx = self.cf(cf::TRANSACTIONS)?;
        let cf_by_account = self.cf(cf::TRANSACTIONS_BY_ACCOUNT)?;
        let cf_idem = self.cf(cf::IDEMPOTENCY)?;

        batch.put_cf(&cf_tx, keys::transaction_key(&tx.id), Self::serialize(tx)?);
        batch.put_cf(
            &cf_by_account,
            keys::account_transaction_key(&tx.account_id, &tx.id),
            [],
        );
        if let Some(reservation_id) = &tx.reservation_id {
            let cf_by_reservation = self.cf(cf::TRANSACTIONS_BY_RESERVATION)?;
            batch.put_cf(
                &cf_by_reservation,
                keys::reservation_transaction_key(reservation_id, &tx.id),
                [],
            );
        }

        let record = IdempotencyRecord {
            transaction_id: tx.id,
            reservation_id: tx.reservation_id,
        };
        batch.put_cf(
            &cf_idem,
            keys::idempotency_key(tx.tx_type, &tx.idempotency_key),
            Self::serialize(&record)?,
        );

        Ok(())
    }

    fn stage_account(&self, batch: &mut WriteBatch, account: &Account) -> Result<()> {
        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        batch.put_cf(
            &cf_accounts,
            keys::account_key(&account.account_id),
            Self::serialize(account)?,
        );
        Ok(())
    }

    fn stage_payment(&self, batch: &mut WriteBatch, payment: &Payment) -> Result<()> {
        let cf_payments = self.cf(cf::PAYMENTS)?;
        batch.put_cf(
            &cf_payments,
            keys::payment_key(&payment.id),
            Self::serialize(payment)?,
        );
        if let Some(session_id) = &payment.session_id {
            let cf_by_session = self.cf(cf::PAYMENTS_BY_SESSION)?;
            batch.put_cf(
                &cf_by_session,
                keys::payment_session_key(session_id),
                payment.id.as_bytes(),
            );
        }
        if let Some(intent_id) = &payment.payment_intent_id {
            let cf_by_intent = self.cf(cf::PAYMENTS_BY_INTENT)?;
            batch.put_cf(
                &cf_by_intent,
                keys::payment_intent_key(intent_id),
                payment.id.as_bytes(),
            );
        }
        Ok(())
    }

    /// Append one credit/adjustment row and fold it into the account balance.
    fn apply_account_transaction(&self, tx: &TokenTransaction) -> Result<i64> {
        let _gate = self.write_gate.lock();

        if self
            .find_idempotent(tx.tx_type, &tx.idempotency_key)?
            .is_some()
        {
            return Err(StoreError::DuplicateOperation {
                key: tx.idempotency_key.clone(),
            });
        }

        let mut account = self.get_or_new_account(&tx.account_id)?;
        account.balance_tokens += tx.balance_delta();
        if tx.tx_type == TransactionType::Credit && tx.amount_tokens > 0 {
            account.lifetime_credited_tokens += tx.amount_tokens;
        }
        account.updated_at = chrono::Utc::now();

        let mut batch = WriteBatch::default();
        self.stage_transaction(&mut batch, tx)?;
        self.stage_account(&mut batch, &account)?;
        self.write(batch)?;

        Ok(account.balance_tokens)
    }

    fn payment_lookup(&self, cf_name: &str, key: Vec<u8>) -> Result<Option<Payment>> {
        let cf = self.cf(cf_name)?;
        let Some(id_bytes) = self
            .db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
        else {
            return Ok(None);
        };

        let mut bytes = [0u8; 16];
        if id_bytes.len() != 16 {
            return Err(StoreError::Serialization(
                "payment index value is not a 16-byte id".into(),
            ));
        }
        bytes.copy_from_slice(&id_bytes);
        let payment_id = PaymentId::from_uuid(uuid::Uuid::from_bytes(bytes));
        self.get_payment(&payment_id)
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    fn put_account(&self, account: &Account) -> Result<()> {
        let cf = self.cf(cf::ACCOUNTS)?;
        self.db
            .put_cf(
                &cf,
                keys::account_key(&account.account_id),
                Self::serialize(account)?,
            )
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        let cf = self.cf(cf::ACCOUNTS)?;
        self.db
            .get_cf(&cf, keys::account_key(account_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    // =========================================================================
    // Reservation Operations
    // =========================================================================

    fn get_reservation(&self, reservation_id: &ReservationId) -> Result<Option<Reservation>> {
        let cf = self.cf(cf::RESERVATIONS)?;
        self.db
            .get_cf(&cf, keys::reservation_key(reservation_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn list_expired_reservations(
        &self,
        now: chrono::DateTime<chrono::Utc>,
        limit: usize,
    ) -> Result<Vec<Reservation>> {
        let cf_expiry = self.cf(cf::RESERVATION_EXPIRY)?;
        #[allow(clippy::cast_sign_loss)]
        let now_millis = now.timestamp_millis().max(0) as u64;

        let mut expired = Vec::new();
        for item in self.db.iterator_cf(&cf_expiry, IteratorMode::Start) {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if keys::extract_millis_from_expiry_key(&key) > now_millis {
                break;
            }
            if expired.len() >= limit {
                break;
            }

            let reservation_id = keys::extract_reservation_id_from_expiry_key(&key);
            // Index entries are deleted with the resolving batch; an entry
            // pointing at a terminal reservation would be a stale artifact
            // and is skipped rather than surfaced.
            if let Some(reservation) = self.get_reservation(&reservation_id)? {
                if reservation.state == ReservationState::Active {
                    expired.push(reservation);
                }
            }
        }

        Ok(expired)
    }

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    fn get_transaction(&self, transaction_id: &TransactionId) -> Result<Option<TokenTransaction>> {
        let cf = self.cf(cf::TRANSACTIONS)?;
        self.db
            .get_cf(&cf, keys::transaction_key(transaction_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn list_transactions_by_account(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TokenTransaction>> {
        let cf_by_account = self.cf(cf::TRANSACTIONS_BY_ACCOUNT)?;
        let prefix = keys::account_transactions_prefix(account_id);

        let iter = self.db.iterator_cf(
            &cf_by_account,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        // ULIDs are time-ordered, so prefix order is chronological; collect
        // and reverse for newest-first.
        let mut all_keys: Vec<Vec<u8>> = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            all_keys.push(key.to_vec());
        }
        all_keys.reverse();

        let mut transactions = Vec::new();
        for key in all_keys.into_iter().skip(offset) {
            if transactions.len() >= limit {
                break;
            }
            let tx_id = keys::extract_transaction_id_from_index_key(&key);
            if let Some(tx) = self.get_transaction(&tx_id)? {
                transactions.push(tx);
            }
        }

        Ok(transactions)
    }

    fn list_transactions_by_reservation(
        &self,
        reservation_id: &ReservationId,
    ) -> Result<Vec<TokenTransaction>> {
        let cf_by_reservation = self.cf(cf::TRANSACTIONS_BY_RESERVATION)?;
        let prefix = keys::reservation_transactions_prefix(reservation_id);

        let iter = self.db.iterator_cf(
            &cf_by_reservation,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        let mut transactions = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            let tx_id = keys::extract_transaction_id_from_index_key(&key);
            if let Some(tx) = self.get_transaction(&tx_id)? {
                transactions.push(tx);
            }
        }

        Ok(transactions)
    }

    fn find_idempotent(
        &self,
        tx_type: TransactionType,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        let cf = self.cf(cf::IDEMPOTENCY)?;
        self.db
            .get_cf(&cf, keys::idempotency_key(tx_type, key))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    // =========================================================================
    // Processed-Event Operations
    // =========================================================================

    fn has_processed_event(&self, event_id: &str) -> Result<bool> {
        let cf = self.cf(cf::PROCESSED_EVENTS)?;
        Ok(self
            .db
            .get_cf(&cf, keys::processed_event_key(event_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some())
    }

    // =========================================================================
    // Payment Operations
    // =========================================================================

    fn get_payment(&self, payment_id: &PaymentId) -> Result<Option<Payment>> {
        let cf = self.cf(cf::PAYMENTS)?;
        self.db
            .get_cf(&cf, keys::payment_key(payment_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn find_payment_by_session(&self, session_id: &str) -> Result<Option<Payment>> {
        self.payment_lookup(cf::PAYMENTS_BY_SESSION, keys::payment_session_key(session_id))
    }

    fn find_payment_by_intent(&self, intent_id: &str) -> Result<Option<Payment>> {
        self.payment_lookup(cf::PAYMENTS_BY_INTENT, keys::payment_intent_key(intent_id))
    }

    // =========================================================================
    // Subscription Standing Operations
    // =========================================================================

    fn get_standing(&self, account_id: &AccountId) -> Result<Option<SubscriptionStanding>> {
        let cf = self.cf(cf::STANDINGS)?;
        self.db
            .get_cf(&cf, keys::standing_key(account_id))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn put_standing(&self, standing: &SubscriptionStanding) -> Result<()> {
        let _gate = self.write_gate.lock();
        let cf = self.cf(cf::STANDINGS)?;
        self.db
            .put_cf(
                &cf,
                keys::standing_key(&standing.account_id),
                Self::serialize(standing)?,
            )
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    // =========================================================================
    // Compound Operations
    // =========================================================================

    fn reserve(
        &self,
        reservation: &Reservation,
        tx: &TokenTransaction,
        allow_negative: bool,
    ) -> Result<ReserveOutcome> {
        let _gate = self.write_gate.lock();

        if let Some(record) = self.find_idempotent(TransactionType::Reserve, &tx.idempotency_key)? {
            let reservation_id = record.reservation_id.ok_or_else(|| {
                StoreError::Serialization("reserve marker without reservation id".into())
            })?;
            return Ok(ReserveOutcome::Duplicate(reservation_id));
        }

        let mut account = self.get_or_new_account(&reservation.account_id)?;
        if !allow_negative && !account.can_reserve(reservation.estimated_tokens) {
            return Err(StoreError::InsufficientTokens {
                requested: reservation.estimated_tokens,
                available: account.available_tokens(),
            });
        }
        account.reserved_tokens += reservation.estimated_tokens;
        account.updated_at = chrono::Utc::now();

        let cf_reservations = self.cf(cf::RESERVATIONS)?;
        let cf_expiry = self.cf(cf::RESERVATION_EXPIRY)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_reservations,
            keys::reservation_key(&reservation.id),
            Self::serialize(reservation)?,
        );
        batch.put_cf(
            &cf_expiry,
            keys::expiry_key(reservation.expires_at, &reservation.id),
            [],
        );
        self.stage_transaction(&mut batch, tx)?;
        self.stage_account(&mut batch, &account)?;
        self.write(batch)?;

        Ok(ReserveOutcome::Created)
    }

    fn resolve_reservation(
        &self,
        reservation: &Reservation,
        txs: &[TokenTransaction],
        committed_tokens: i64,
    ) -> Result<ResolveOutcome> {
        let _gate = self.write_gate.lock();

        let stored = self
            .get_reservation(&reservation.id)?
            .ok_or_else(|| StoreError::NotFound {
                entity: "reservation",
                id: reservation.id.to_string(),
            })?;
        // Another actor (a racing commit, or the sweeper) may have resolved
        // the hold between the caller's read and this gate acquisition.
        if stored.state.is_terminal() {
            return Ok(ResolveOutcome::AlreadyApplied);
        }
        if let Some(tx) = txs.first() {
            if self
                .find_idempotent(tx.tx_type, &tx.idempotency_key)?
                .is_some()
            {
                return Ok(ResolveOutcome::AlreadyApplied);
            }
        }

        let mut account = self.get_or_new_account(&reservation.account_id)?;
        account.reserved_tokens -= reservation.estimated_tokens;
        account.balance_tokens -= committed_tokens;
        account.lifetime_committed_tokens += committed_tokens;
        account.updated_at = chrono::Utc::now();

        let cf_reservations = self.cf(cf::RESERVATIONS)?;
        let cf_expiry = self.cf(cf::RESERVATION_EXPIRY)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_reservations,
            keys::reservation_key(&reservation.id),
            Self::serialize(reservation)?,
        );
        batch.delete_cf(&cf_expiry, keys::expiry_key(stored.expires_at, &stored.id));
        for tx in txs {
            self.stage_transaction(&mut batch, tx)?;
        }
        self.stage_account(&mut batch, &account)?;
        self.write(batch)?;

        Ok(ResolveOutcome::Applied)
    }

    fn apply_credit(&self, tx: &TokenTransaction) -> Result<i64> {
        debug_assert_eq!(tx.tx_type, TransactionType::Credit);
        self.apply_account_transaction(tx)
    }

    fn apply_adjustment(&self, tx: &TokenTransaction) -> Result<i64> {
        debug_assert_eq!(tx.tx_type, TransactionType::Adjustment);
        self.apply_account_transaction(tx)
    }

    fn apply_event(&self, effects: &EventEffects) -> Result<EventApplyOutcome> {
        let _gate = self.write_gate.lock();

        if self.has_processed_event(&effects.event_id)? {
            return Ok(EventApplyOutcome::Duplicate);
        }

        let mut batch = WriteBatch::default();

        if let Some(payment) = &effects.payment_insert {
            let already_seen = match (&payment.session_id, &payment.payment_intent_id) {
                (Some(session_id), _) => self.find_payment_by_session(session_id)?.is_some(),
                (None, Some(intent_id)) => self.find_payment_by_intent(intent_id)?.is_some(),
                (None, None) => false,
            };
            if already_seen {
                tracing::warn!(
                    event_id = %effects.event_id,
                    session_id = ?payment.session_id,
                    "Payment already recorded for this session, skipping insert"
                );
            } else {
                self.stage_payment(&mut batch, payment)?;
            }
        }
        if let Some(payment) = &effects.payment_update {
            self.stage_payment(&mut batch, payment)?;
        }

        let mut applied = 0usize;
        let mut skipped = 0usize;
        // Per-account running balances so several rows for one account in a
        // single event fold correctly.
        let mut touched: Vec<Account> = Vec::new();
        for tx in &effects.transactions {
            if self
                .find_idempotent(tx.tx_type, &tx.idempotency_key)?
                .is_some()
            {
                skipped += 1;
                continue;
            }

            let idx = match touched.iter().position(|a| a.account_id == tx.account_id) {
                Some(idx) => idx,
                None => {
                    touched.push(self.get_or_new_account(&tx.account_id)?);
                    touched.len() - 1
                }
            };
            let account = &mut touched[idx];
            account.balance_tokens += tx.balance_delta();
            if tx.tx_type == TransactionType::Credit && tx.amount_tokens > 0 {
                account.lifetime_credited_tokens += tx.amount_tokens;
            }
            account.updated_at = chrono::Utc::now();

            self.stage_transaction(&mut batch, tx)?;
            applied += 1;
        }
        for account in &touched {
            self.stage_account(&mut batch, account)?;
        }

        let cf_standings = self.cf(cf::STANDINGS)?;
        for standing in &effects.standings {
            batch.put_cf(
                &cf_standings,
                keys::standing_key(&standing.account_id),
                Self::serialize(standing)?,
            );
        }

        let cf_processed = self.cf(cf::PROCESSED_EVENTS)?;
        batch.put_cf(&cf_processed, keys::processed_event_key(&effects.event_id), []);

        self.write(batch)?;

        Ok(EventApplyOutcome::Applied {
            transactions_applied: applied,
            transactions_skipped: skipped,
        })
    }
}
