//! Failures inside a settlement roll the whole transaction back: the
//! payment stays PENDING, no journal row or event survives, and a later
//! delivery settles it normally.
//!
//! The ledger is disturbed from outside through a second raw connection on
//! a temporary file database, the way a concurrent writer or an operator
//! would.

use cardledger_core::{
    allocation,
    clock::LedgerClock,
    config::LedgerConfig,
    error::LedgerError,
    intent_service::PaymentIntentService,
    model::{Card, CardStatus, Outcome, PaymentMethod, PaymentStatus, Statement},
    notification::{ChannelDispatcher, Notification},
    settlement_finalizer::SettlementFinalizer,
    store::LedgerStore,
};
use chrono::NaiveDate;
use rusqlite::Connection;
use std::sync::{mpsc::Receiver, Arc};

struct Harness {
    path: String,
    store: LedgerStore,
    finalizer: SettlementFinalizer,
    notifications: Receiver<Notification>,
    raw: Connection,
}

impl Drop for Harness {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", self.path));
        }
    }
}

fn card() -> Card {
    Card {
        card_id: "card-1".into(),
        user_id: "user-1".into(),
        last4: "8080".into(),
        status: CardStatus::Active,
        credit_limit: 100_000,
    }
}

/// `card-1` with statements of 1_000 (due March) and 2_000 (due April).
fn build() -> Harness {
    let path = std::env::temp_dir()
        .join(format!("ledger-rollback-{}.db", uuid::Uuid::new_v4().simple()))
        .display()
        .to_string();
    let store = LedgerStore::open(&path).unwrap();
    store.migrate().unwrap();
    store.insert_card(&card()).unwrap();

    let now = LedgerClock::fixed_millis(1_710_000_000_000).now();
    for (id, month, balance) in [("stmt-mar", 3, 1_000), ("stmt-apr", 4, 2_000)] {
        store
            .insert_statement(
                &Statement {
                    statement_id: id.into(),
                    card_id: "card-1".into(),
                    period_month: month - 1,
                    period_year: 2024,
                    due_date: NaiveDate::from_ymd_opt(2024, month, 15).unwrap(),
                    balance,
                    minimum_due: balance / 10,
                    paid: false,
                },
                now,
            )
            .unwrap();
    }

    let (dispatcher, notifications) = ChannelDispatcher::new();
    let finalizer = SettlementFinalizer::new(store.reopen().unwrap(), Arc::new(dispatcher));
    let raw = Connection::open(&path).unwrap();
    Harness {
        path,
        store,
        finalizer,
        notifications,
        raw,
    }
}

fn pay(h: &Harness, amount: i64) -> String {
    PaymentIntentService::new(h.store.reopen().unwrap(), &LedgerConfig::default_test())
        .create_payment("card-1", "user-1", amount, PaymentMethod::Bank)
        .unwrap()
        .payment_id
}

/// Nothing of the failed attempt may be visible.
fn assert_untouched(h: &Harness, payment_id: &str) {
    let payment = h.store.get_payment(payment_id).unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.external_ref, None);
    assert_eq!(
        allocation::outstanding(&h.store.unpaid_statements("card-1").unwrap()),
        3_000
    );
    assert_eq!(h.store.allocation_entry_count().unwrap(), 0);
    let events: Vec<_> = h
        .store
        .events_for_payment(payment_id)
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(events, ["payment_created"]);
    assert!(h.notifications.try_recv().is_err(), "nothing is notified");
}

#[test]
fn statement_write_skipped_underneath_settlement_rolls_back() {
    let mut h = build();
    let id = pay(&h, 2_500);

    // The second statement silently refuses balance updates, so the
    // compare-and-set on it matches no row.
    h.raw
        .execute_batch(
            "CREATE TRIGGER freeze_april BEFORE UPDATE OF balance ON statement
             WHEN OLD.statement_id = 'stmt-apr'
             BEGIN SELECT RAISE(IGNORE); END;",
        )
        .unwrap();

    let err = h.finalizer.finalize(&id, Outcome::Success, Some("gw-1")).unwrap_err();

    assert!(
        matches!(&err, LedgerError::LedgerConflict { statement_id, .. } if statement_id == "stmt-apr"),
        "{err}"
    );
    assert_eq!(err.code(), "INTERNAL_ERROR");
    // The March statement was updated inside the transaction before the
    // conflict; it must be back to its original balance too.
    assert_eq!(h.store.get_statement("stmt-mar").unwrap().unwrap().balance, 1_000);
    assert_untouched(&h, &id);

    h.raw.execute_batch("DROP TRIGGER freeze_april;").unwrap();
    let retry = h.finalizer.finalize(&id, Outcome::Success, Some("gw-1")).unwrap();

    assert!(retry.applied);
    assert_eq!(retry.payment.status, PaymentStatus::Success);
    assert_eq!(
        allocation::outstanding(&h.store.unpaid_statements("card-1").unwrap()),
        500
    );
    assert_eq!(h.store.allocation_entry_count().unwrap(), 2);
    assert_eq!(h.notifications.try_iter().count(), 1);
}

#[test]
fn storage_error_inside_settlement_rolls_back() {
    let mut h = build();
    let id = pay(&h, 1_500);

    h.raw
        .execute_batch(
            "CREATE TRIGGER journal_offline BEFORE INSERT ON allocation_entry
             BEGIN SELECT RAISE(ABORT, 'journal offline'); END;",
        )
        .unwrap();

    let err = h.finalizer.finalize(&id, Outcome::Success, None).unwrap_err();

    assert!(matches!(err, LedgerError::Database(_)), "{err}");
    assert_untouched(&h, &id);

    h.raw.execute_batch("DROP TRIGGER journal_offline;").unwrap();
    assert!(h.finalizer.finalize(&id, Outcome::Success, None).unwrap().applied);
    assert_eq!(h.store.get_statement("stmt-mar").unwrap().unwrap().balance, 0);
    assert_eq!(h.store.get_statement("stmt-apr").unwrap().unwrap().balance, 1_500);
}

#[test]
fn missing_card_is_reported_corrupt_and_rolls_back() {
    let mut h = build();
    let id = pay(&h, 1_000);

    // Only possible behind the store's back, with foreign keys off.
    h.raw
        .execute_batch(
            "PRAGMA foreign_keys = OFF;
             DELETE FROM card WHERE card_id = 'card-1';",
        )
        .unwrap();

    let err = h.finalizer.finalize(&id, Outcome::Failed, None).unwrap_err();

    assert!(matches!(err, LedgerError::Corrupt(_)), "{err}");
    assert!(!err.is_client_error());
    assert_untouched(&h, &id);

    h.store.insert_card(&card()).unwrap();
    let retry = h.finalizer.finalize(&id, Outcome::Failed, None).unwrap();
    assert!(retry.applied);
    assert_eq!(retry.payment.status, PaymentStatus::Failed);
}
