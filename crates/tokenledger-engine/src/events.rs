//! Idempotent processing of payment-provider webhook events.
//!
//! Protocol per delivery: verify the signature, check the processed-event
//! set, dispatch by event type, then persist the handler's effects together
//! with the processed-event marker in one atomic store batch. Any failure
//! before that point leaves no trace, so the provider's redelivery replays
//! from a clean state and produces exactly one ledger effect overall.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use tokenledger_core::{units, AccountId, CreditSource, LedgerError, Payment, TokenTransaction};
use tokenledger_store::{EventApplyOutcome, EventEffects, Store, StoreError};

use crate::config::WebhookConfig;
use crate::crypto::{self, SignatureError};
use crate::gateway::{
    CheckoutValidator, GatewayError, PaymentGateway, ProviderSubscription, ValidationError,
};
use crate::metrics::MetricsSink;
use crate::refund::calculate_refund;
use crate::subscription::SubscriptionManager;

/// A provider webhook event.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    /// Event ID.
    pub id: String,
    /// Event type (e.g., "checkout.session.completed").
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event data.
    pub data: WebhookEventData,
    /// Created timestamp (Unix).
    #[serde(default)]
    pub created: i64,
}

/// Webhook event data container.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    /// The event object.
    pub object: serde_json::Value,
}

/// Successful processing outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// The event was handled (or was a recognized no-op).
    Ok,

    /// The event id was already processed; nothing happened.
    Duplicate,
}

/// Failures the caller translates into a retry-triggering response.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The signature header did not verify.
    #[error("invalid webhook signature: {0}")]
    Signature(#[from] SignatureError),

    /// The payload is not a parseable event.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// Required correlation data is absent from the payload.
    #[error("missing event field: {0}")]
    MissingField(&'static str),

    /// The referenced price has no known token mapping.
    #[error("no token mapping for price: {0}")]
    UnknownPrice(String),

    /// Provider resource lookup failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Checkout business validation failed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Ledger or storage failure.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<StoreError> for EventError {
    fn from(err: StoreError) -> Self {
        Self::Ledger(err.into())
    }
}

/// The idempotent event processor.
pub struct EventProcessor {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    validator: Arc<dyn CheckoutValidator>,
    subscriptions: Arc<SubscriptionManager>,
    metrics: Arc<dyn MetricsSink>,
    config: WebhookConfig,
}

impl EventProcessor {
    /// Create a processor.
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        validator: Arc<dyn CheckoutValidator>,
        subscriptions: Arc<SubscriptionManager>,
        metrics: Arc<dyn MetricsSink>,
        config: WebhookConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            validator,
            subscriptions,
            metrics,
            config,
        }
    }

    /// Process one inbound delivery.
    ///
    /// # Errors
    ///
    /// Returns an [`EventError`] on any failure; no partial effects remain
    /// and the provider is expected to redeliver.
    pub async fn process(
        &self,
        payload: &str,
        signature_header: &str,
    ) -> Result<EventOutcome, EventError> {
        crypto::verify_signature(
            payload,
            signature_header,
            &self.config.signing_secret,
            self.config.tolerance_seconds,
            Utc::now().timestamp(),
        )?;

        let event: WebhookEvent =
            serde_json::from_str(payload).map_err(|e| EventError::Malformed(e.to_string()))?;

        tracing::info!(
            event_type = %event.event_type,
            event_id = %event.id,
            "Received provider webhook"
        );
        self.metrics.webhook_received(&event.event_type);

        if self.store.has_processed_event(&event.id)? {
            tracing::debug!(event_id = %event.id, "Event already processed");
            self.metrics.webhook_duplicate(&event.event_type);
            return Ok(EventOutcome::Duplicate);
        }

        match self.dispatch(&event).await {
            Ok(()) => {
                self.metrics.webhook_ok(&event.event_type);
                Ok(EventOutcome::Ok)
            }
            Err(err) => {
                tracing::warn!(
                    event_type = %event.event_type,
                    event_id = %event.id,
                    error = %err,
                    "Event processing failed, provider will redeliver"
                );
                self.metrics.webhook_failed(&event.event_type);
                Err(err)
            }
        }
    }

    async fn dispatch(&self, event: &WebhookEvent) -> Result<(), EventError> {
        match event.event_type.as_str() {
            "checkout.session.completed" => self.handle_checkout_completed(event).await,
            "invoice.payment_succeeded" => self.handle_invoice_succeeded(event).await,
            "invoice.payment_failed" => self.handle_invoice_failed(event).await,
            "customer.subscription.deleted" => self.handle_subscription_deleted(event).await,
            "refund.created" | "refund.updated" => self.handle_refund(event).await,
            "charge.dispute.created" => self.handle_dispute_created(event).await,
            "charge.dispute.funds_withdrawn" => self.handle_dispute_funds_withdrawn(event).await,
            "charge.dispute.closed" => self.handle_dispute_closed(event).await,
            _ => {
                // Forward compatibility: the provider's event catalogue grows;
                // unrecognized kinds are acknowledged without side effects.
                tracing::debug!(event_type = %event.event_type, "Unhandled provider event");
                Ok(())
            }
        }
    }

    // =========================================================================
    // Checkout
    // =========================================================================

    async fn handle_checkout_completed(&self, event: &WebhookEvent) -> Result<(), EventError> {
        let session_id = str_field(&event.data.object, "id", "checkout session id")?;
        let session = self
            .gateway
            .checkout_session(session_id, &["line_items"])
            .await?;

        if session.payment_status.as_deref() != Some("paid") {
            tracing::info!(
                session_id = %session_id,
                payment_status = ?session.payment_status,
                "Checkout session not paid yet, skipping"
            );
            self.store
                .apply_event(&EventEffects::marker_only(event.id.as_str()))?;
            return Ok(());
        }

        let account_id = parse_account_id(
            session
                .client_reference_id
                .as_deref()
                .ok_or(EventError::MissingField("client_reference_id"))?,
        )?;

        let resolved = self.validator.resolve(&session).await?;

        if self.store.find_payment_by_session(session_id)?.is_some() {
            // The provider occasionally re-emits completion under a fresh
            // event id; first-seen semantics cover the credit as well.
            tracing::warn!(
                session_id = %session_id,
                event_id = %event.id,
                "Session already recorded under another event, not crediting again"
            );
            self.store
                .apply_event(&EventEffects::marker_only(event.id.as_str()))?;
            return Ok(());
        }

        let payment = Payment::completed(
            account_id,
            resolved.amount_cents,
            resolved.currency.clone(),
            resolved.total_tokens,
            Some(session_id.to_string()),
            session.payment_intent.clone(),
        );
        let credit = TokenTransaction::credit(
            account_id,
            resolved.total_tokens,
            format!("{}:{}:{}", event.event_type, event.id, session_id),
            CreditSource::Purchase,
            serde_json::json!({ "session_id": session_id }),
        );

        let effects = EventEffects {
            event_id: event.id.clone(),
            payment_insert: Some(payment),
            payment_update: None,
            transactions: vec![credit],
            standings: vec![],
        };

        if let EventApplyOutcome::Applied {
            transactions_applied,
            ..
        } = self.store.apply_event(&effects)?
        {
            if transactions_applied > 0 {
                self.metrics
                    .tokens_credited(CreditSource::Purchase, resolved.total_tokens);
                tracing::info!(
                    account_id = %account_id,
                    session_id = %session_id,
                    tokens = resolved.total_tokens,
                    amount_cents = resolved.amount_cents,
                    "Purchase credited"
                );
            }
        }

        Ok(())
    }

    // =========================================================================
    // Subscription invoices
    // =========================================================================

    async fn handle_invoice_succeeded(&self, event: &WebhookEvent) -> Result<(), EventError> {
        let Some(subscription_id) = event
            .data
            .object
            .get("subscription")
            .and_then(|v| v.as_str())
        else {
            // One-time invoices carry no subscription reference; recognized
            // no-op.
            tracing::debug!(event_id = %event.id, "Invoice without subscription, skipping");
            self.store
                .apply_event(&EventEffects::marker_only(event.id.as_str()))?;
            return Ok(());
        };

        let subscription = self.gateway.subscription(subscription_id).await?;
        let account_id = self.resolve_subscription_account(&subscription).await?;

        let price_id = subscription
            .price_id
            .as_deref()
            .ok_or(EventError::MissingField("subscription price id"))?;
        let tokens = self
            .subscriptions
            .tokens_per_period(subscription_id, price_id)
            .ok_or_else(|| EventError::UnknownPrice(price_id.to_string()))?;
        let period_start = DateTime::from_timestamp(subscription.current_period_start, 0)
            .ok_or(EventError::MissingField("current_period_start"))?;

        let credited = self.subscriptions.handle_payment_success(
            account_id,
            subscription_id,
            period_start,
            tokens,
            &event.id,
        )?;
        tracing::info!(
            account_id = %account_id,
            subscription_id = %subscription_id,
            credited,
            "Subscription invoice settled"
        );

        self.store
            .apply_event(&EventEffects::marker_only(event.id.as_str()))?;
        Ok(())
    }

    async fn handle_invoice_failed(&self, event: &WebhookEvent) -> Result<(), EventError> {
        let Some(subscription_id) = event
            .data
            .object
            .get("subscription")
            .and_then(|v| v.as_str())
        else {
            tracing::debug!(event_id = %event.id, "Failed invoice without subscription, skipping");
            self.store
                .apply_event(&EventEffects::marker_only(event.id.as_str()))?;
            return Ok(());
        };

        let subscription = self.gateway.subscription(subscription_id).await?;
        let account_id = self.resolve_subscription_account(&subscription).await?;
        let reason = event
            .data
            .object
            .get("billing_reason")
            .and_then(|v| v.as_str())
            .unwrap_or("invoice.payment_failed");

        self.subscriptions
            .handle_payment_failure(account_id, subscription_id, reason)?;
        self.store
            .apply_event(&EventEffects::marker_only(event.id.as_str()))?;
        Ok(())
    }

    async fn handle_subscription_deleted(&self, event: &WebhookEvent) -> Result<(), EventError> {
        // The event object is the full subscription resource.
        let subscription: ProviderSubscription =
            serde_json::from_value(event.data.object.clone())
                .map_err(|e| EventError::Malformed(e.to_string()))?;
        let account_id = self.resolve_subscription_account(&subscription).await?;
        let reason = event
            .data
            .object
            .pointer("/cancellation_details/reason")
            .and_then(|v| v.as_str())
            .unwrap_or("deleted");

        self.subscriptions
            .handle_deleted(account_id, &subscription.id, reason)?;
        self.store
            .apply_event(&EventEffects::marker_only(event.id.as_str()))?;
        Ok(())
    }

    /// Our account id from subscription metadata, falling back to the
    /// customer record. Missing on both is a hard failure of the event.
    async fn resolve_subscription_account(
        &self,
        subscription: &ProviderSubscription,
    ) -> Result<AccountId, EventError> {
        if let Some(reference) = subscription.account_reference() {
            return parse_account_id(reference);
        }

        let customer_id = subscription
            .customer
            .as_deref()
            .ok_or(EventError::MissingField("subscription customer"))?;
        let customer = self.gateway.customer(customer_id).await?;
        let reference = customer
            .metadata
            .get("account_id")
            .and_then(|v| v.as_str())
            .ok_or(EventError::MissingField("customer account_id metadata"))?;
        parse_account_id(reference)
    }

    // =========================================================================
    // Refunds
    // =========================================================================

    async fn handle_refund(&self, event: &WebhookEvent) -> Result<(), EventError> {
        let object = &event.data.object;
        let refund_id = str_field(object, "id", "refund id")?;
        let amount_cents = object
            .get("amount")
            .and_then(serde_json::Value::as_i64)
            .ok_or(EventError::MissingField("refund amount"))?;
        let status = object
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("succeeded");

        let payment = self.correlate_payment(object).await?;

        match status {
            "succeeded" | "pending" => {
                let calculation = calculate_refund(&payment, amount_cents)?;
                let mut updated = payment.clone();
                updated.record_refund(amount_cents);

                let clawback = TokenTransaction::adjustment(
                    payment.account_id,
                    -calculation.tokens_to_deduct,
                    format!("refund:{refund_id}"),
                    serde_json::json!({
                        "refund_id": refund_id,
                        "refund_amount_cents": amount_cents,
                    }),
                );

                let effects = EventEffects {
                    event_id: event.id.clone(),
                    payment_insert: None,
                    payment_update: Some(updated),
                    transactions: vec![clawback],
                    standings: vec![],
                };
                self.store.apply_event(&effects)?;

                tracing::info!(
                    refund_id = %refund_id,
                    account_id = %payment.account_id,
                    tokens_deducted = calculation.tokens_to_deduct,
                    refund_amount_cents = amount_cents,
                    "Refund clawback applied"
                );
            }
            "canceled" | "failed" => {
                // The provider reversed a refund we already clawed back;
                // restore the proportional tokens. `refunded_amount_cents`
                // stays monotone.
                let tokens = units::proportional_tokens(
                    payment.credited_tokens,
                    amount_cents,
                    payment.amount_cents,
                )?;
                let restore = TokenTransaction::adjustment(
                    payment.account_id,
                    tokens,
                    format!("refund-canceled:{refund_id}"),
                    serde_json::json!({
                        "refund_id": refund_id,
                        "refund_amount_cents": amount_cents,
                    }),
                );

                let effects = EventEffects {
                    event_id: event.id.clone(),
                    payment_insert: None,
                    payment_update: None,
                    transactions: vec![restore],
                    standings: vec![],
                };
                self.store.apply_event(&effects)?;

                tracing::info!(
                    refund_id = %refund_id,
                    account_id = %payment.account_id,
                    tokens_restored = tokens,
                    "Canceled refund restored"
                );
            }
            other => {
                tracing::debug!(refund_id = %refund_id, status = %other, "Refund status ignored");
                self.store
                    .apply_event(&EventEffects::marker_only(event.id.as_str()))?;
            }
        }

        Ok(())
    }

    // =========================================================================
    // Disputes
    // =========================================================================

    async fn handle_dispute_created(&self, event: &WebhookEvent) -> Result<(), EventError> {
        let object = &event.data.object;
        let dispute_id = str_field(object, "id", "dispute id")?;
        let payment = self.correlate_payment(object).await?;

        let mut updated = payment.clone();
        updated.mark_disputed();

        let effects = EventEffects {
            event_id: event.id.clone(),
            payment_insert: None,
            payment_update: Some(updated),
            transactions: vec![],
            standings: vec![],
        };
        self.store.apply_event(&effects)?;

        tracing::warn!(
            dispute_id = %dispute_id,
            account_id = %payment.account_id,
            "Dispute opened against payment"
        );
        Ok(())
    }

    async fn handle_dispute_funds_withdrawn(&self, event: &WebhookEvent) -> Result<(), EventError> {
        let object = &event.data.object;
        let dispute_id = str_field(object, "id", "dispute id")?;
        let amount_cents = object
            .get("amount")
            .and_then(serde_json::Value::as_i64)
            .ok_or(EventError::MissingField("dispute amount"))?;
        let payment = self.correlate_payment(object).await?;

        let tokens =
            units::proportional_tokens(payment.credited_tokens, amount_cents, payment.amount_cents)?;
        let mut updated = payment.clone();
        updated.mark_disputed();

        let clawback = TokenTransaction::adjustment(
            payment.account_id,
            -tokens,
            format!("dispute:{dispute_id}"),
            serde_json::json!({
                "dispute_id": dispute_id,
                "dispute_amount_cents": amount_cents,
            }),
        );

        let effects = EventEffects {
            event_id: event.id.clone(),
            payment_insert: None,
            payment_update: Some(updated),
            transactions: vec![clawback],
            standings: vec![],
        };
        self.store.apply_event(&effects)?;

        tracing::warn!(
            dispute_id = %dispute_id,
            account_id = %payment.account_id,
            tokens_deducted = tokens,
            "Dispute funds withdrawn, tokens clawed back"
        );
        Ok(())
    }

    async fn handle_dispute_closed(&self, event: &WebhookEvent) -> Result<(), EventError> {
        let object = &event.data.object;
        let dispute_id = str_field(object, "id", "dispute id")?;
        let status = object
            .get("status")
            .and_then(|v| v.as_str())
            .ok_or(EventError::MissingField("dispute status"))?;

        if status != "won" {
            // "lost" and other closure outcomes are non-refundable; the
            // clawback stands.
            tracing::info!(dispute_id = %dispute_id, status = %status, "Dispute closed");
            self.store
                .apply_event(&EventEffects::marker_only(event.id.as_str()))?;
            return Ok(());
        }

        let amount_cents = object
            .get("amount")
            .and_then(serde_json::Value::as_i64)
            .ok_or(EventError::MissingField("dispute amount"))?;
        let payment = self.correlate_payment(object).await?;

        let tokens =
            units::proportional_tokens(payment.credited_tokens, amount_cents, payment.amount_cents)?;
        let restore = TokenTransaction::adjustment(
            payment.account_id,
            tokens,
            format!("dispute-won:{dispute_id}"),
            serde_json::json!({
                "dispute_id": dispute_id,
                "dispute_amount_cents": amount_cents,
            }),
        );

        let effects = EventEffects {
            event_id: event.id.clone(),
            payment_insert: None,
            payment_update: None,
            transactions: vec![restore],
            standings: vec![],
        };
        self.store.apply_event(&effects)?;

        tracing::info!(
            dispute_id = %dispute_id,
            account_id = %payment.account_id,
            tokens_restored = tokens,
            "Dispute won, tokens restored"
        );
        Ok(())
    }

    /// Correlate a refund/dispute object to our payment row via its
    /// payment-intent reference, falling back to a charge lookup.
    async fn correlate_payment(
        &self,
        object: &serde_json::Value,
    ) -> Result<Payment, EventError> {
        let intent_id = object.get("payment_intent").and_then(|v| v.as_str());
        if let Some(intent_id) = intent_id {
            if let Some(payment) = self.store.find_payment_by_intent(intent_id)? {
                return Ok(payment);
            }
        }

        if let Some(charge_id) = object.get("charge").and_then(|v| v.as_str()) {
            let charge = self.gateway.charge(charge_id).await?;
            if let Some(intent_id) = charge.payment_intent.as_deref() {
                if let Some(payment) = self.store.find_payment_by_intent(intent_id)? {
                    return Ok(payment);
                }
            }
            return Err(EventError::Ledger(LedgerError::PaymentNotFound {
                reference: charge_id.to_string(),
            }));
        }

        match intent_id {
            Some(intent_id) => Err(EventError::Ledger(LedgerError::PaymentNotFound {
                reference: intent_id.to_string(),
            })),
            None => Err(EventError::MissingField("payment_intent or charge")),
        }
    }
}

fn str_field<'a>(
    object: &'a serde_json::Value,
    name: &str,
    label: &'static str,
) -> Result<&'a str, EventError> {
    object
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or(EventError::MissingField(label))
}

fn parse_account_id(reference: &str) -> Result<AccountId, EventError> {
    reference
        .parse()
        .map_err(|_| EventError::Malformed(format!("invalid account id: {reference}")))
}
