//! Reservation lifecycle scenarios: balance math, the cap rule, ledger
//! conservation, and idempotency under concurrent identical calls.

mod common;

use std::sync::Arc;

use tokenledger_core::{
    Account, AccountId, CreditSource, LedgerError, ReservationState, TransactionType,
};

use tokenledger_store::Store;

use common::harness;

fn fund(h: &common::TestHarness, balance: i64) -> AccountId {
    let account_id = AccountId::generate();
    let mut account = Account::new(account_id);
    account.balance_tokens = balance;
    h.store.put_account(&account).unwrap();
    account_id
}

#[test]
fn reserve_1000_commit_600_writes_commit_and_release() {
    let h = harness();
    let account_id = fund(&h, 1000);

    let reservation = h.engine.reserve(account_id, 1000, "op-1").unwrap();
    let result = h.engine.commit(&reservation.id, 600, "op-1").unwrap();

    assert_eq!(result.committed_tokens, 600);
    assert_eq!(result.released_tokens, 400);
    assert_eq!(result.reservation.state, ReservationState::Committed);

    let txs = h
        .store
        .list_transactions_by_reservation(&reservation.id)
        .unwrap();
    let commits: Vec<_> = txs
        .iter()
        .filter(|tx| tx.tx_type == TransactionType::Commit)
        .collect();
    let releases: Vec<_> = txs
        .iter()
        .filter(|tx| tx.tx_type == TransactionType::Release)
        .collect();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].amount_tokens, 600);
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].amount_tokens, 400);
}

#[test]
fn terminal_reservations_conserve_the_estimate() {
    // Committed + released always sums to the reserved amount, whichever
    // terminal path the reservation takes.
    let h = harness();
    let account_id = fund(&h, 3000);

    let committed = h.engine.reserve(account_id, 1000, "op-commit").unwrap();
    h.engine.commit(&committed.id, 250, "op-commit").unwrap();

    let released = h.engine.reserve(account_id, 800, "op-release").unwrap();
    h.engine.release(&released.id, "op-release").unwrap();

    let cancelled = h.engine.reserve(account_id, 700, "op-cancel").unwrap();
    h.engine.cancel(&cancelled.id, "op-cancel").unwrap();

    for reservation in [&committed, &released, &cancelled] {
        let txs = h
            .store
            .list_transactions_by_reservation(&reservation.id)
            .unwrap();
        let committed_sum: i64 = txs
            .iter()
            .filter(|tx| tx.tx_type == TransactionType::Commit)
            .map(|tx| tx.amount_tokens)
            .sum();
        let released_sum: i64 = txs
            .iter()
            .filter(|tx| tx.tx_type == TransactionType::Release)
            .map(|tx| tx.amount_tokens)
            .sum();
        assert_eq!(
            committed_sum + released_sum,
            reservation.estimated_tokens,
            "conservation must hold for {:?}",
            reservation.id
        );
    }
}

#[test]
fn balance_equals_initial_plus_credits_minus_committed() {
    let h = harness();
    let account_id = fund(&h, 1000);

    h.engine
        .credit(
            account_id,
            500,
            "grant-1",
            CreditSource::Manual,
            serde_json::Value::Null,
        )
        .unwrap();

    let r1 = h.engine.reserve(account_id, 600, "op-1").unwrap();
    h.engine.commit(&r1.id, 400, "op-1").unwrap();

    let r2 = h.engine.reserve(account_id, 300, "op-2").unwrap();
    h.engine.release(&r2.id, "op-2").unwrap();

    h.engine
        .adjust(account_id, -50, "correction-1", serde_json::Value::Null)
        .unwrap();

    // 1000 + 500 (credit) - 50 (adjustment) - 400 (committed); the released
    // reservation leaves no trace on the balance.
    assert_eq!(h.engine.balance(&account_id).unwrap(), 1050);
    assert_eq!(h.engine.available(&account_id).unwrap(), 1050);
}

#[test]
fn reservations_do_not_move_the_balance() {
    let h = harness();
    let account_id = fund(&h, 1000);

    h.engine.reserve(account_id, 700, "op-1").unwrap();

    assert_eq!(h.engine.balance(&account_id).unwrap(), 1000);
    assert_eq!(h.engine.available(&account_id).unwrap(), 300);
}

#[test]
fn concurrent_identical_credits_produce_one_effect() {
    let h = harness();
    let account_id = fund(&h, 0);
    let engine = Arc::clone(&h.engine);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                engine.credit(
                    account_id,
                    500,
                    "checkout.session.completed:evt_1:cs_1",
                    CreditSource::Purchase,
                    serde_json::Value::Null,
                )
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|jh| jh.join().unwrap()).collect();
    let fresh = results.iter().filter(|r| r.is_ok()).count();
    let duplicates = results
        .iter()
        .filter(|r| matches!(r, Err(LedgerError::DuplicateOperation { .. })))
        .count();

    assert_eq!(fresh, 1, "exactly one call may credit");
    assert_eq!(duplicates, 7);
    assert_eq!(h.engine.balance(&account_id).unwrap(), 500);
    assert_eq!(
        h.store
            .list_transactions_by_account(&account_id, 100, 0)
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn concurrent_reserves_never_exceed_the_balance() {
    let h = harness();
    let account_id = fund(&h, 1000);
    let engine = Arc::clone(&h.engine);

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || engine.reserve(account_id, 300, &format!("op-{i}")))
        })
        .collect();

    let successes = handles
        .into_iter()
        .map(|jh| jh.join().unwrap())
        .filter(Result::is_ok)
        .count();

    // 10 holds of 300 against 1000: at most 3 fit.
    assert!(successes <= 3, "got {successes} holds against 1000 tokens");
    let account = h.store.get_account(&account_id).unwrap().unwrap();
    assert!(account.reserved_tokens <= account.balance_tokens);
    assert!(account.available_tokens() >= 0);
}

#[test]
fn commit_zero_actual_releases_everything() {
    let h = harness();
    let account_id = fund(&h, 1000);

    let reservation = h.engine.reserve(account_id, 500, "op-1").unwrap();
    let result = h.engine.commit(&reservation.id, 0, "op-1").unwrap();

    assert_eq!(result.committed_tokens, 0);
    assert_eq!(result.released_tokens, 500);
    assert_eq!(h.engine.balance(&account_id).unwrap(), 1000);
}

#[test]
fn expired_reservation_rejects_commit() {
    let h = harness();
    let account_id = fund(&h, 1000);

    let reservation = h.engine.reserve(account_id, 500, "op-1").unwrap();
    h.engine.expire(&reservation.id).unwrap();

    let err = h.engine.commit(&reservation.id, 100, "op-1").unwrap_err();
    assert!(matches!(
        err,
        LedgerError::IllegalTransition {
            from: ReservationState::Expired,
            to: ReservationState::Committed,
        }
    ));
    // The hold returned to availability when it expired.
    assert_eq!(h.engine.available(&account_id).unwrap(), 1000);
}
