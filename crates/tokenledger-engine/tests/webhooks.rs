//! End-to-end webhook reconciliation scenarios: duplicate delivery,
//! signature rejection, mid-handler failure with clean redelivery, and
//! forward compatibility with unknown event types.

mod common;

use std::sync::atomic::Ordering;

use tokenledger_core::{AccountId, PaymentStatus, TransactionType};
use tokenledger_engine::{EventError, EventOutcome};

use tokenledger_store::Store;

use common::{checkout_event, harness, invoice_succeeded_event};

#[tokio::test]
async fn double_delivery_credits_exactly_once() {
    let h = harness();
    let account_id = AccountId::generate();
    h.seed_checkout("cs_1", "pi_1", account_id, 500, 1000);

    let payload = checkout_event("evt_1", "cs_1");
    assert_eq!(h.deliver(&payload).await.unwrap(), EventOutcome::Ok);
    assert_eq!(h.deliver(&payload).await.unwrap(), EventOutcome::Duplicate);

    // Exactly one payment row, one credit, one processed-event marker.
    let payment = h.store.find_payment_by_session("cs_1").unwrap().unwrap();
    assert_eq!(payment.credited_tokens, 500);
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert!(h.store.has_processed_event("evt_1").unwrap());

    let txs = h
        .store
        .list_transactions_by_account(&account_id, 100, 0)
        .unwrap();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].tx_type, TransactionType::Credit);
    assert_eq!(txs[0].amount_tokens, 500);
    assert_eq!(h.engine.balance(&account_id).unwrap(), 500);

    assert_eq!(h.metrics.get("webhook_ok:checkout.session.completed"), 1);
    assert_eq!(
        h.metrics.get("webhook_duplicate:checkout.session.completed"),
        1
    );
    assert_eq!(h.metrics.get("tokens_credited:purchase"), 500);
}

#[tokio::test]
async fn invalid_signature_is_rejected_before_any_effect() {
    let h = harness();
    let account_id = AccountId::generate();
    h.seed_checkout("cs_1", "pi_1", account_id, 500, 1000);

    let payload = checkout_event("evt_1", "cs_1");
    let result = h
        .processor
        .process(&payload, "t=1700000000,v1=deadbeef")
        .await;

    assert!(matches!(result, Err(EventError::Signature(_))));
    assert!(!h.store.has_processed_event("evt_1").unwrap());
    assert_eq!(h.engine.balance(&account_id).unwrap(), 0);
}

#[tokio::test]
async fn mid_handler_failure_rolls_back_and_redelivery_succeeds() {
    let h = harness();
    let account_id = AccountId::generate();
    h.seed_checkout("cs_1", "pi_1", account_id, 500, 1000);
    h.validator.failures_remaining.store(1, Ordering::SeqCst);

    let payload = checkout_event("evt_1", "cs_1");

    // First delivery dies inside the handler; nothing may be visible.
    let result = h.deliver(&payload).await;
    assert!(matches!(result, Err(EventError::Validation(_))));
    assert!(h.store.find_payment_by_session("cs_1").unwrap().is_none());
    assert!(!h.store.has_processed_event("evt_1").unwrap());
    assert_eq!(h.engine.balance(&account_id).unwrap(), 0);
    assert_eq!(
        h.metrics.get("webhook_failed:checkout.session.completed"),
        1
    );

    // Redelivery replays from a clean state and produces exactly one credit.
    assert_eq!(h.deliver(&payload).await.unwrap(), EventOutcome::Ok);
    assert_eq!(h.engine.balance(&account_id).unwrap(), 500);
    assert_eq!(
        h.store
            .list_transactions_by_account(&account_id, 100, 0)
            .unwrap()
            .len(),
        1
    );
    assert!(h.store.has_processed_event("evt_1").unwrap());
}

#[tokio::test]
async fn gateway_failure_surfaces_for_redelivery() {
    let h = harness();
    // Session never seeded: the lookup fails upstream.
    let payload = checkout_event("evt_1", "cs_missing");

    let result = h.deliver(&payload).await;
    assert!(matches!(result, Err(EventError::Gateway(_))));
    assert!(!h.store.has_processed_event("evt_1").unwrap());
}

#[tokio::test]
async fn unrecognized_event_type_is_acknowledged() {
    let h = harness();
    let payload = common::event_payload(
        "evt_1",
        "invoice.finalized",
        serde_json::json!({ "id": "in_1" }),
    );

    assert_eq!(h.deliver(&payload).await.unwrap(), EventOutcome::Ok);
    assert_eq!(h.metrics.get("webhook_ok:invoice.finalized"), 1);
    // No side effects: not even a processed marker for unknown kinds.
    assert!(!h.store.has_processed_event("evt_1").unwrap());
}

#[tokio::test]
async fn missing_client_reference_fails_the_event() {
    let h = harness();
    let account_id = AccountId::generate();
    h.seed_checkout("cs_1", "pi_1", account_id, 500, 1000);
    h.gateway
        .sessions
        .lock()
        .unwrap()
        .get_mut("cs_1")
        .unwrap()
        .client_reference_id = None;

    let result = h.deliver(&checkout_event("evt_1", "cs_1")).await;
    assert!(matches!(result, Err(EventError::MissingField(_))));
    assert!(!h.store.has_processed_event("evt_1").unwrap());
}

#[tokio::test]
async fn unparseable_account_id_fails_the_event() {
    let h = harness();
    let account_id = AccountId::generate();
    h.seed_checkout("cs_1", "pi_1", account_id, 500, 1000);
    h.gateway
        .sessions
        .lock()
        .unwrap()
        .get_mut("cs_1")
        .unwrap()
        .client_reference_id = Some("not-an-account".into());

    let result = h.deliver(&checkout_event("evt_1", "cs_1")).await;
    assert!(matches!(result, Err(EventError::Malformed(_))));
}

#[tokio::test]
async fn unpaid_session_is_a_recorded_noop() {
    let h = harness();
    let account_id = AccountId::generate();
    h.seed_checkout("cs_1", "pi_1", account_id, 500, 1000);
    h.gateway
        .sessions
        .lock()
        .unwrap()
        .get_mut("cs_1")
        .unwrap()
        .payment_status = Some("unpaid".into());

    assert_eq!(
        h.deliver(&checkout_event("evt_1", "cs_1")).await.unwrap(),
        EventOutcome::Ok
    );
    assert_eq!(h.engine.balance(&account_id).unwrap(), 0);
    assert!(h.store.find_payment_by_session("cs_1").unwrap().is_none());
    // The no-op is recorded: redelivery deduplicates.
    assert_eq!(
        h.deliver(&checkout_event("evt_1", "cs_1")).await.unwrap(),
        EventOutcome::Duplicate
    );
}

#[tokio::test]
async fn second_event_for_same_session_does_not_credit_again() {
    let h = harness();
    let account_id = AccountId::generate();
    h.seed_checkout("cs_1", "pi_1", account_id, 500, 1000);

    assert_eq!(
        h.deliver(&checkout_event("evt_1", "cs_1")).await.unwrap(),
        EventOutcome::Ok
    );
    // The provider re-emits completion under a fresh event id.
    assert_eq!(
        h.deliver(&checkout_event("evt_2", "cs_1")).await.unwrap(),
        EventOutcome::Ok
    );

    assert_eq!(h.engine.balance(&account_id).unwrap(), 500);
    assert_eq!(
        h.store
            .list_transactions_by_account(&account_id, 100, 0)
            .unwrap()
            .len(),
        1
    );
    assert!(h.store.has_processed_event("evt_2").unwrap());
}

#[tokio::test]
async fn malformed_payload_is_rejected() {
    let h = harness();
    let result = h.deliver("{\"id\": \"evt_1\"}").await;
    assert!(matches!(result, Err(EventError::Malformed(_))));
}

#[tokio::test]
async fn one_time_invoice_without_subscription_is_noop() {
    let h = harness();
    let payload = invoice_succeeded_event("evt_1", None);

    assert_eq!(h.deliver(&payload).await.unwrap(), EventOutcome::Ok);
    assert!(h.store.has_processed_event("evt_1").unwrap());
}
