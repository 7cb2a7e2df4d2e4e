//! Shared fixtures for engine integration tests: a tempdir-backed store,
//! mock gateway/validator collaborators, and signed payload builders.

#![allow(dead_code)] // Not every test file uses every helper.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;

use tokenledger_core::AccountId;
use tokenledger_engine::crypto::sign_payload;
use tokenledger_engine::{
    Charge, CheckoutSession, CheckoutValidator, CountingMetrics, Customer, EngineConfig,
    EventProcessor, GatewayError, PaymentGateway, PlanCatalog, ProviderSubscription,
    ReservationEngine, ResolvedCheckout, SubscriptionManager, TokenPack, ValidationError,
    WebhookConfig,
};
use tokenledger_store::{RocksStore, Store};

pub const SECRET: &str = "whsec_test";
pub const PRICE_BASIC: &str = "price_basic";
pub const TOKENS_PER_PERIOD: i64 = 2500;

/// Gateway backed by in-memory maps the tests seed directly.
#[derive(Default)]
pub struct MockGateway {
    pub sessions: Mutex<HashMap<String, CheckoutSession>>,
    pub subscriptions: Mutex<HashMap<String, ProviderSubscription>>,
    pub charges: Mutex<HashMap<String, Charge>>,
    pub customers: Mutex<HashMap<String, Customer>>,
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn checkout_session(
        &self,
        session_id: &str,
        _expand: &[&str],
    ) -> Result<CheckoutSession, GatewayError> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound {
                resource: session_id.to_string(),
            })
    }

    async fn subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, GatewayError> {
        self.subscriptions
            .lock()
            .unwrap()
            .get(subscription_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound {
                resource: subscription_id.to_string(),
            })
    }

    async fn charge(&self, charge_id: &str) -> Result<Charge, GatewayError> {
        self.charges
            .lock()
            .unwrap()
            .get(charge_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound {
                resource: charge_id.to_string(),
            })
    }

    async fn customer(&self, customer_id: &str) -> Result<Customer, GatewayError> {
        self.customers
            .lock()
            .unwrap()
            .get(customer_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound {
                resource: customer_id.to_string(),
            })
    }
}

/// Validator with seeded resolutions and optional injected failures, for
/// driving the redelivery-after-failure scenarios.
#[derive(Default)]
pub struct MockValidator {
    pub resolutions: Mutex<HashMap<String, ResolvedCheckout>>,
    pub failures_remaining: AtomicUsize,
}

#[async_trait]
impl CheckoutValidator for MockValidator {
    async fn resolve(
        &self,
        session: &CheckoutSession,
    ) -> Result<ResolvedCheckout, ValidationError> {
        if self.failures_remaining.load(Ordering::SeqCst) > 0 {
            self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(ValidationError::MissingField("injected failure".into()));
        }

        self.resolutions
            .lock()
            .unwrap()
            .get(&session.id)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownPack {
                pack_id: session.id.clone(),
            })
    }
}

pub struct TestHarness {
    pub store: Arc<dyn Store>,
    pub engine: Arc<ReservationEngine>,
    pub manager: Arc<SubscriptionManager>,
    pub processor: EventProcessor,
    pub gateway: Arc<MockGateway>,
    pub validator: Arc<MockValidator>,
    pub metrics: Arc<CountingMetrics>,
    _dir: TempDir,
}

pub fn harness() -> TestHarness {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn Store> = Arc::new(RocksStore::open(dir.path()).unwrap());
    let metrics = Arc::new(CountingMetrics::new());
    let engine = Arc::new(ReservationEngine::new(
        Arc::clone(&store),
        EngineConfig::default(),
        Arc::clone(&metrics),
    ));
    let manager = Arc::new(SubscriptionManager::new(
        Arc::clone(&store),
        Arc::clone(&engine),
        PlanCatalog::new([(PRICE_BASIC.to_string(), TOKENS_PER_PERIOD)]),
    ));
    let gateway = Arc::new(MockGateway::default());
    let validator = Arc::new(MockValidator::default());
    let processor = EventProcessor::new(
        Arc::clone(&store),
        Arc::clone(&gateway),
        Arc::clone(&validator),
        Arc::clone(&manager),
        Arc::clone(&metrics),
        WebhookConfig::new(SECRET),
    );

    TestHarness {
        store,
        engine,
        manager,
        processor,
        gateway,
        validator,
        metrics,
        _dir: dir,
    }
}

impl TestHarness {
    /// Seed a paid checkout session and its validated resolution.
    pub fn seed_checkout(
        &self,
        session_id: &str,
        intent_id: &str,
        account_id: AccountId,
        tokens: i64,
        amount_cents: i64,
    ) {
        self.gateway.sessions.lock().unwrap().insert(
            session_id.to_string(),
            CheckoutSession {
                id: session_id.to_string(),
                payment_status: Some("paid".to_string()),
                customer: Some("cus_1".to_string()),
                amount_total: Some(amount_cents),
                currency: Some("usd".to_string()),
                client_reference_id: Some(account_id.to_string()),
                payment_intent: Some(intent_id.to_string()),
                metadata: serde_json::Value::Null,
            },
        );
        self.validator.resolutions.lock().unwrap().insert(
            session_id.to_string(),
            ResolvedCheckout {
                packs: vec![TokenPack {
                    pack_id: PRICE_BASIC.to_string(),
                    tokens,
                    amount_cents,
                }],
                total_tokens: tokens,
                amount_cents,
                currency: "usd".to_string(),
            },
        );
    }

    /// Seed a subscription resource carrying our account id in metadata.
    pub fn seed_subscription(
        &self,
        subscription_id: &str,
        account_id: AccountId,
        period_start_epoch: i64,
    ) {
        self.gateway.subscriptions.lock().unwrap().insert(
            subscription_id.to_string(),
            ProviderSubscription {
                id: subscription_id.to_string(),
                customer: Some("cus_1".to_string()),
                status: Some("active".to_string()),
                current_period_start: period_start_epoch,
                price_id: Some(PRICE_BASIC.to_string()),
                metadata: serde_json::json!({ "account_id": account_id.to_string() }),
            },
        );
    }

    /// Deliver a payload with a valid signature.
    pub async fn deliver(
        &self,
        payload: &str,
    ) -> Result<tokenledger_engine::EventOutcome, tokenledger_engine::EventError> {
        let header = sign_payload(payload, SECRET, Utc::now().timestamp());
        self.processor.process(payload, &header).await
    }
}

/// Build a provider event payload around an object.
pub fn event_payload(event_id: &str, event_type: &str, object: serde_json::Value) -> String {
    serde_json::json!({
        "id": event_id,
        "type": event_type,
        "created": Utc::now().timestamp(),
        "data": { "object": object },
    })
    .to_string()
}

pub fn checkout_event(event_id: &str, session_id: &str) -> String {
    event_payload(
        event_id,
        "checkout.session.completed",
        serde_json::json!({ "id": session_id }),
    )
}

pub fn invoice_succeeded_event(event_id: &str, subscription_id: Option<&str>) -> String {
    event_payload(
        event_id,
        "invoice.payment_succeeded",
        serde_json::json!({ "id": "in_1", "subscription": subscription_id }),
    )
}

pub fn invoice_failed_event(event_id: &str, subscription_id: &str, reason: &str) -> String {
    event_payload(
        event_id,
        "invoice.payment_failed",
        serde_json::json!({
            "id": "in_2",
            "subscription": subscription_id,
            "billing_reason": reason,
        }),
    )
}

pub fn refund_event(
    event_id: &str,
    event_type: &str,
    refund_id: &str,
    intent_id: &str,
    amount_cents: i64,
    status: &str,
) -> String {
    event_payload(
        event_id,
        event_type,
        serde_json::json!({
            "id": refund_id,
            "payment_intent": intent_id,
            "amount": amount_cents,
            "status": status,
        }),
    )
}

pub fn dispute_event(
    event_id: &str,
    event_type: &str,
    dispute_id: &str,
    intent_id: &str,
    amount_cents: i64,
    status: &str,
) -> String {
    event_payload(
        event_id,
        event_type,
        serde_json::json!({
            "id": dispute_id,
            "payment_intent": intent_id,
            "amount": amount_cents,
            "status": status,
        }),
    )
}
