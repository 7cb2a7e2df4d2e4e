//! Subscription lifecycle: per-account blocked/active bookkeeping and
//! recurring token grants.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use tokenledger_core::{AccountId, CreditSource, LedgerError, Result, SubscriptionStanding};
use tokenledger_store::Store;

use crate::engine::ReservationEngine;

/// Price-id to tokens-per-period table.
///
/// The mapping is pure: the same `(subscription_id, price_id)` inputs always
/// yield the same token amount, so callers may cache results freely.
#[derive(Debug, Clone, Default)]
pub struct PlanCatalog {
    prices: HashMap<String, i64>,
}

impl PlanCatalog {
    /// Build a catalog from `(price_id, tokens_per_period)` pairs.
    #[must_use]
    pub fn new(pairs: impl IntoIterator<Item = (String, i64)>) -> Self {
        Self {
            prices: pairs.into_iter().collect(),
        }
    }

    /// Load from the `LEDGER_PLAN_TABLE` environment variable, formatted as
    /// comma-separated `price_id=tokens` pairs.
    #[must_use]
    pub fn from_env() -> Self {
        let raw = std::env::var("LEDGER_PLAN_TABLE").unwrap_or_default();
        let prices = raw
            .split(',')
            .filter_map(|pair| {
                let (price_id, tokens) = pair.split_once('=')?;
                Some((price_id.trim().to_string(), tokens.trim().parse().ok()?))
            })
            .collect();
        Self { prices }
    }

    /// Tokens granted per billing period for a subscription's price.
    #[must_use]
    pub fn tokens_per_period(&self, subscription_id: &str, price_id: &str) -> Option<i64> {
        let tokens = self.prices.get(price_id).copied();
        if tokens.is_none() {
            tracing::warn!(
                subscription_id,
                price_id,
                "No token mapping for subscription price"
            );
        }
        tokens
    }
}

/// Tracks per-account blocked/active state from recurring payment outcomes
/// and grants period tokens on success.
pub struct SubscriptionManager {
    store: Arc<dyn Store>,
    engine: Arc<ReservationEngine>,
    catalog: PlanCatalog,
}

impl SubscriptionManager {
    /// Create a manager over the store and engine.
    pub fn new(
        store: Arc<dyn Store>,
        engine: Arc<ReservationEngine>,
        catalog: PlanCatalog,
    ) -> Self {
        Self {
            store,
            engine,
            catalog,
        }
    }

    /// Tokens granted per billing period for a subscription's price.
    #[must_use]
    pub fn tokens_per_period(&self, subscription_id: &str, price_id: &str) -> Option<i64> {
        self.catalog.tokens_per_period(subscription_id, price_id)
    }

    /// Handle a successful recurring payment: credit the period's tokens and
    /// clear any block.
    ///
    /// Returns whether a new credit occurred. A duplicate grant for the same
    /// `(account, subscription, period_start, event_id)` tuple and any credit
    /// failure both come back as `false` - this path runs under retryable
    /// webhook handling one level up, so failures are logged, not propagated.
    ///
    /// # Errors
    ///
    /// - `LedgerError::InvalidAmount` when `tokens_per_period` is not
    ///   positive; this is caller input validation, not a credit failure.
    /// - Storage errors from the standing update.
    pub fn handle_payment_success(
        &self,
        account_id: AccountId,
        subscription_id: &str,
        period_start: DateTime<Utc>,
        tokens_per_period: i64,
        event_id: &str,
    ) -> Result<bool> {
        if tokens_per_period <= 0 {
            return Err(LedgerError::InvalidAmount(format!(
                "tokens_per_period must be positive, got {tokens_per_period}"
            )));
        }

        let idempotency_key = format!(
            "subscription:{account_id}:{subscription_id}:{}:{event_id}",
            period_start.timestamp()
        );
        let metadata = serde_json::json!({
            "subscription_id": subscription_id,
            "period_start": period_start.to_rfc3339(),
        });

        let credited = match self.engine.credit(
            account_id,
            tokens_per_period,
            &idempotency_key,
            CreditSource::Subscription,
            metadata,
        ) {
            Ok(balance) => {
                tracing::info!(
                    account_id = %account_id,
                    subscription_id,
                    tokens_per_period,
                    new_balance = balance,
                    "Subscription period tokens granted"
                );
                true
            }
            Err(LedgerError::DuplicateOperation { key }) => {
                tracing::debug!(
                    account_id = %account_id,
                    subscription_id,
                    idempotency_key = %key,
                    "Period already credited, skipping"
                );
                false
            }
            Err(err) => {
                tracing::warn!(
                    account_id = %account_id,
                    subscription_id,
                    error = %err,
                    "Subscription credit failed"
                );
                false
            }
        };

        // A paid period always clears the block, even when the credit itself
        // was a replay.
        self.store
            .put_standing(&SubscriptionStanding::active(account_id))?;

        Ok(credited)
    }

    /// Handle a failed recurring payment: block the account.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn handle_payment_failure(
        &self,
        account_id: AccountId,
        subscription_id: &str,
        reason: &str,
    ) -> Result<()> {
        tracing::warn!(
            account_id = %account_id,
            subscription_id,
            reason,
            "Subscription payment failed, blocking account"
        );
        self.store
            .put_standing(&SubscriptionStanding::blocked(
                account_id,
                format!("payment_failed: {reason}"),
            ))
            .map_err(Into::into)
    }

    /// Handle a deleted subscription: block the account.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn handle_deleted(
        &self,
        account_id: AccountId,
        subscription_id: &str,
        reason: &str,
    ) -> Result<()> {
        tracing::info!(
            account_id = %account_id,
            subscription_id,
            reason,
            "Subscription deleted, blocking account"
        );
        self.store
            .put_standing(&SubscriptionStanding::blocked(
                account_id,
                format!("subscription_deleted: {reason}"),
            ))
            .map_err(Into::into)
    }

    /// Administratively block an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn block(&self, account_id: AccountId, reason: &str) -> Result<()> {
        self.store
            .put_standing(&SubscriptionStanding::blocked(account_id, reason))
            .map_err(Into::into)
    }

    /// Administratively unblock an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn unblock(&self, account_id: AccountId) -> Result<()> {
        self.store
            .put_standing(&SubscriptionStanding::active(account_id))
            .map_err(Into::into)
    }

    /// Whether the account is active. Accounts with no standing record are
    /// active: there is no blocking record to honor.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn is_active(&self, account_id: &AccountId) -> Result<bool> {
        Ok(self
            .store
            .get_standing(account_id)?
            .map_or(true, |standing| !standing.blocked))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::metrics::CountingMetrics;
    use tempfile::TempDir;
    use tokenledger_store::RocksStore;

    fn manager() -> (SubscriptionManager, TempDir) {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn Store> = Arc::new(RocksStore::open(dir.path()).unwrap());
        let engine = Arc::new(ReservationEngine::new(
            Arc::clone(&store),
            EngineConfig::default(),
            Arc::new(CountingMetrics::new()),
        ));
        let catalog = PlanCatalog::new([("price_basic".to_string(), 2500)]);
        (SubscriptionManager::new(store, engine, catalog), dir)
    }

    #[test]
    fn catalog_is_deterministic() {
        let (manager, _dir) = manager();
        assert_eq!(manager.tokens_per_period("sub_1", "price_basic"), Some(2500));
        assert_eq!(manager.tokens_per_period("sub_2", "price_basic"), Some(2500));
        assert_eq!(manager.tokens_per_period("sub_1", "price_unknown"), None);
    }

    #[test]
    fn success_credits_once_per_tuple() {
        let (manager, _dir) = manager();
        let account_id = AccountId::generate();
        let period_start = Utc::now();

        let first = manager
            .handle_payment_success(account_id, "sub_1", period_start, 2500, "evt_1")
            .unwrap();
        let replay = manager
            .handle_payment_success(account_id, "sub_1", period_start, 2500, "evt_1")
            .unwrap();

        assert!(first);
        assert!(!replay, "replayed grant must report no new credit");
    }

    #[test]
    fn success_rejects_non_positive_tokens() {
        let (manager, _dir) = manager();
        let result =
            manager.handle_payment_success(AccountId::generate(), "sub_1", Utc::now(), 0, "evt_1");
        assert!(matches!(result, Err(LedgerError::InvalidAmount(_))));
    }

    #[test]
    fn failure_then_success_unblocks() {
        let (manager, _dir) = manager();
        let account_id = AccountId::generate();

        manager
            .handle_payment_failure(account_id, "sub_1", "card_declined")
            .unwrap();
        assert!(!manager.is_active(&account_id).unwrap());

        manager
            .handle_payment_success(account_id, "sub_1", Utc::now(), 2500, "evt_2")
            .unwrap();
        assert!(manager.is_active(&account_id).unwrap());
    }

    #[test]
    fn missing_standing_reads_active() {
        let (manager, _dir) = manager();
        assert!(manager.is_active(&AccountId::generate()).unwrap());
    }

    #[test]
    fn deleted_blocks_with_reason() {
        let (manager, _dir) = manager();
        let account_id = AccountId::generate();

        manager
            .handle_deleted(account_id, "sub_1", "customer request")
            .unwrap();
        assert!(!manager.is_active(&account_id).unwrap());
    }
}
