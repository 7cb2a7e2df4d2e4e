//! The reservation engine: reserve -> commit/release/cancel/expire, credits,
//! and adjustments.
//!
//! Every operation takes an idempotency key and is safe to retry; the store
//! turns races and replays into duplicate outcomes, which this layer either
//! absorbs (reservation replays return the original result) or surfaces
//! (`credit`/`adjust` report `DuplicateOperation` so callers can detect that
//! no new effect occurred).

use std::sync::Arc;

use chrono::{Duration, Utc};

use tokenledger_core::{
    units, AccountId, CreditSource, LedgerError, Reservation, ReservationId, ReservationState,
    Result, TokenTransaction, TransactionType,
};
use tokenledger_store::{ReserveOutcome, ResolveOutcome, Store};

use crate::config::EngineConfig;
use crate::metrics::MetricsSink;

/// Result of finalizing a reservation with actual usage.
#[derive(Debug, Clone)]
pub struct CommitResult {
    /// The reservation in its terminal state.
    pub reservation: Reservation,

    /// Tokens committed: `min(actual, estimated)`.
    pub committed_tokens: i64,

    /// Unused remainder returned to availability.
    pub released_tokens: i64,
}

/// Outcome of a sweeper-driven expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireOutcome {
    /// The reservation was expired and its hold released.
    Expired,

    /// Another actor resolved the reservation first; nothing to do.
    AlreadyTerminal,
}

/// The reservation engine.
pub struct ReservationEngine {
    store: Arc<dyn Store>,
    config: EngineConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl ReservationEngine {
    /// Create an engine over a store.
    pub fn new(
        store: Arc<dyn Store>,
        config: EngineConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            store,
            config,
            metrics,
        }
    }

    /// The backing store, for read queries by collaborating components.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Convert a raw usage estimate to a reservation size: ceiling unit
    /// conversion plus the estimation-time safety factor.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidAmount` on negative input.
    pub fn estimate_tokens(&self, raw_units: i64) -> Result<i64> {
        let tokens = units::billing_tokens(raw_units, self.config.units_per_token)?;
        units::estimate_with_safety(tokens, self.config.safety_factor_percent)
    }

    /// Create a hold of `estimated_tokens` against an account.
    ///
    /// Idempotent: a replayed key returns the existing reservation without a
    /// second ledger effect.
    ///
    /// # Errors
    ///
    /// - `LedgerError::InvalidAmount` for a non-positive estimate.
    /// - `LedgerError::InsufficientTokens` when the hold exceeds the
    ///   available headroom and negative balances are not configured.
    pub fn reserve(
        &self,
        account_id: AccountId,
        estimated_tokens: i64,
        idempotency_key: &str,
    ) -> Result<Reservation> {
        if estimated_tokens <= 0 {
            return Err(LedgerError::InvalidAmount(format!(
                "estimated_tokens must be positive, got {estimated_tokens}"
            )));
        }

        if let Some(record) = self
            .store
            .find_idempotent(TransactionType::Reserve, idempotency_key)?
        {
            if let Some(reservation_id) = record.reservation_id {
                return self.require_reservation(&reservation_id);
            }
        }

        let expires_at = Utc::now() + Duration::seconds(self.config.reservation_ttl_seconds);
        let reservation = Reservation::new(account_id, estimated_tokens, expires_at);
        let tx = TokenTransaction::reserve(
            account_id,
            reservation.id,
            estimated_tokens,
            idempotency_key.to_string(),
        );

        match self
            .store
            .reserve(&reservation, &tx, self.config.allow_negative_balance)?
        {
            ReserveOutcome::Created => {
                tracing::debug!(
                    reservation_id = %reservation.id,
                    account_id = %account_id,
                    estimated_tokens,
                    "Reservation created"
                );
                Ok(reservation)
            }
            ReserveOutcome::Duplicate(existing) => self.require_reservation(&existing),
        }
    }

    /// Finalize a reservation with the actual token cost.
    ///
    /// The commit is capped at the reserved amount; any remainder is
    /// released in the same atomic unit. Re-entry on an already-committed
    /// reservation returns the original result.
    ///
    /// # Errors
    ///
    /// - `LedgerError::InvalidAmount` for negative actuals.
    /// - `LedgerError::IllegalTransition` from released/cancelled/expired.
    pub fn commit(
        &self,
        reservation_id: &ReservationId,
        actual_tokens: i64,
        idempotency_key: &str,
    ) -> Result<CommitResult> {
        if actual_tokens < 0 {
            return Err(LedgerError::InvalidAmount(format!(
                "actual_tokens must be non-negative, got {actual_tokens}"
            )));
        }

        let mut reservation = self.require_reservation(reservation_id)?;
        match reservation.state {
            ReservationState::Active => {}
            ReservationState::Committed => return self.reconstruct_commit(reservation),
            from => {
                return Err(LedgerError::IllegalTransition {
                    from,
                    to: ReservationState::Committed,
                })
            }
        }

        // Cap rule: never more than reserved; the remainder goes back.
        // Actuals arrive as measured, without any estimation-time multiplier.
        let committed = actual_tokens.min(reservation.estimated_tokens);
        let released = reservation.estimated_tokens - committed;

        let mut txs = vec![TokenTransaction::commit(
            reservation.account_id,
            reservation.id,
            committed,
            idempotency_key.to_string(),
        )];
        if released > 0 {
            txs.push(TokenTransaction::release(
                reservation.account_id,
                reservation.id,
                released,
                idempotency_key.to_string(),
            ));
        }

        reservation.transition(ReservationState::Committed)?;
        match self
            .store
            .resolve_reservation(&reservation, &txs, committed)?
        {
            ResolveOutcome::Applied => {
                tracing::debug!(
                    reservation_id = %reservation.id,
                    committed,
                    released,
                    "Reservation committed"
                );
                Ok(CommitResult {
                    reservation,
                    committed_tokens: committed,
                    released_tokens: released,
                })
            }
            ResolveOutcome::AlreadyApplied => {
                let reservation = self.require_reservation(reservation_id)?;
                if reservation.state == ReservationState::Committed {
                    self.reconstruct_commit(reservation)
                } else {
                    Err(LedgerError::IllegalTransition {
                        from: reservation.state,
                        to: ReservationState::Committed,
                    })
                }
            }
        }
    }

    /// Release a reservation in full without committing any usage.
    ///
    /// # Errors
    ///
    /// - `LedgerError::IllegalTransition` from committed/cancelled/expired.
    pub fn release(
        &self,
        reservation_id: &ReservationId,
        idempotency_key: &str,
    ) -> Result<Reservation> {
        self.resolve_unused(reservation_id, idempotency_key, ReservationState::Released)
    }

    /// Cancel a reservation; bookkeeping matches `release` with terminal
    /// state CANCELLED.
    ///
    /// # Errors
    ///
    /// - `LedgerError::IllegalTransition` from committed/released/expired.
    pub fn cancel(
        &self,
        reservation_id: &ReservationId,
        idempotency_key: &str,
    ) -> Result<Reservation> {
        self.resolve_unused(reservation_id, idempotency_key, ReservationState::Cancelled)
    }

    /// Expire a stale reservation on behalf of the sweeper.
    ///
    /// An already-terminal reservation is a successful no-op: another actor
    /// finished it first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn expire(&self, reservation_id: &ReservationId) -> Result<ExpireOutcome> {
        let mut reservation = self.require_reservation(reservation_id)?;
        if reservation.state.is_terminal() {
            return Ok(ExpireOutcome::AlreadyTerminal);
        }

        let idempotency_key = format!("expire:{reservation_id}");
        let txs = vec![TokenTransaction::release(
            reservation.account_id,
            reservation.id,
            reservation.estimated_tokens,
            idempotency_key,
        )];
        reservation.transition(ReservationState::Expired)?;

        match self.store.resolve_reservation(&reservation, &txs, 0)? {
            ResolveOutcome::Applied => {
                tracing::info!(
                    reservation_id = %reservation.id,
                    account_id = %reservation.account_id,
                    estimated_tokens = reservation.estimated_tokens,
                    "Stale reservation expired"
                );
                Ok(ExpireOutcome::Expired)
            }
            ResolveOutcome::AlreadyApplied => Ok(ExpireOutcome::AlreadyTerminal),
        }
    }

    /// Credit tokens to an account.
    ///
    /// # Errors
    ///
    /// - `LedgerError::InvalidAmount` for non-positive amounts.
    /// - `LedgerError::DuplicateOperation` when the key already produced a
    ///   credit; no new effect occurred and callers must not count one.
    pub fn credit(
        &self,
        account_id: AccountId,
        amount_tokens: i64,
        idempotency_key: &str,
        source: CreditSource,
        metadata: serde_json::Value,
    ) -> Result<i64> {
        if amount_tokens <= 0 {
            return Err(LedgerError::InvalidAmount(format!(
                "credit amount must be positive, got {amount_tokens}"
            )));
        }

        let tx = TokenTransaction::credit(
            account_id,
            amount_tokens,
            idempotency_key.to_string(),
            source,
            metadata,
        );
        let balance = self.store.apply_credit(&tx)?;
        self.metrics.tokens_credited(source, amount_tokens);
        tracing::info!(
            account_id = %account_id,
            amount_tokens,
            source = source.as_str(),
            new_balance = balance,
            "Tokens credited"
        );
        Ok(balance)
    }

    /// Apply a signed adjustment (refund clawback, dispute restoration,
    /// manual correction) to an account.
    ///
    /// # Errors
    ///
    /// - `LedgerError::InvalidAmount` for a zero delta.
    /// - `LedgerError::DuplicateOperation` when the key was already applied.
    pub fn adjust(
        &self,
        account_id: AccountId,
        delta_tokens: i64,
        idempotency_key: &str,
        metadata: serde_json::Value,
    ) -> Result<i64> {
        if delta_tokens == 0 {
            return Err(LedgerError::InvalidAmount(
                "adjustment delta must be non-zero".into(),
            ));
        }

        let tx = TokenTransaction::adjustment(
            account_id,
            delta_tokens,
            idempotency_key.to_string(),
            metadata,
        );
        let balance = self.store.apply_adjustment(&tx)?;
        tracing::info!(
            account_id = %account_id,
            delta_tokens,
            new_balance = balance,
            "Balance adjusted"
        );
        Ok(balance)
    }

    /// Current token balance for an account (zero when never seen).
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn balance(&self, account_id: &AccountId) -> Result<i64> {
        Ok(self
            .store
            .get_account(account_id)?
            .map_or(0, |a| a.balance_tokens))
    }

    /// Tokens available for a new reservation: balance minus ACTIVE holds.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn available(&self, account_id: &AccountId) -> Result<i64> {
        Ok(self
            .store
            .get_account(account_id)?
            .map_or(0, |a| a.available_tokens()))
    }

    /// Look up a reservation by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn reservation(&self, reservation_id: &ReservationId) -> Result<Option<Reservation>> {
        Ok(self.store.get_reservation(reservation_id)?)
    }

    fn require_reservation(&self, reservation_id: &ReservationId) -> Result<Reservation> {
        self.store
            .get_reservation(reservation_id)?
            .ok_or_else(|| LedgerError::ReservationNotFound {
                reservation_id: reservation_id.to_string(),
            })
    }

    /// Rebuild a `CommitResult` from the reservation's ledger rows.
    fn reconstruct_commit(&self, reservation: Reservation) -> Result<CommitResult> {
        let txs = self
            .store
            .list_transactions_by_reservation(&reservation.id)?;
        let committed_tokens = txs
            .iter()
            .filter(|tx| tx.tx_type == TransactionType::Commit)
            .map(|tx| tx.amount_tokens)
            .sum();
        let released_tokens = txs
            .iter()
            .filter(|tx| tx.tx_type == TransactionType::Release)
            .map(|tx| tx.amount_tokens)
            .sum();
        Ok(CommitResult {
            reservation,
            committed_tokens,
            released_tokens,
        })
    }

    /// Shared path for `release` and `cancel`: full-amount RELEASE, chosen
    /// terminal state.
    fn resolve_unused(
        &self,
        reservation_id: &ReservationId,
        idempotency_key: &str,
        target: ReservationState,
    ) -> Result<Reservation> {
        let mut reservation = self.require_reservation(reservation_id)?;
        if reservation.state == target {
            return Ok(reservation);
        }
        if reservation.state != ReservationState::Active {
            return Err(LedgerError::IllegalTransition {
                from: reservation.state,
                to: target,
            });
        }

        let txs = vec![TokenTransaction::release(
            reservation.account_id,
            reservation.id,
            reservation.estimated_tokens,
            idempotency_key.to_string(),
        )];
        reservation.transition(target)?;

        match self.store.resolve_reservation(&reservation, &txs, 0)? {
            ResolveOutcome::Applied => {
                tracing::debug!(
                    reservation_id = %reservation.id,
                    state = reservation.state.as_str(),
                    "Reservation resolved without usage"
                );
                Ok(reservation)
            }
            ResolveOutcome::AlreadyApplied => {
                let reservation = self.require_reservation(reservation_id)?;
                if reservation.state == target {
                    Ok(reservation)
                } else {
                    Err(LedgerError::IllegalTransition {
                        from: reservation.state,
                        to: target,
                    })
                }
            }
        }
    }
}
