//! Settlement finalizer tests.
//!
//! Cover the worked examples (full payoff, partial payoff, oldest-first
//! across two statements, duplicate delivery), FAILED outcomes, the audit
//! trail, post-commit notification and the unapplied-remainder path.

use cardledger_core::{
    clock::LedgerClock,
    config::LedgerConfig,
    error::LedgerError,
    event::LedgerEvent,
    intent_service::PaymentIntentService,
    model::{Card, CardStatus, Outcome, PaymentMethod, PaymentStatus, Statement},
    notification::{ChannelDispatcher, Notification, NotificationDispatcher},
    settlement_finalizer::SettlementFinalizer,
    store::LedgerStore,
};
use chrono::NaiveDate;
use std::sync::{mpsc::Receiver, Arc};

const NOW_MS: i64 = 1_710_000_000_000;

struct Harness {
    store: LedgerStore,
    intents: PaymentIntentService,
    finalizer: SettlementFinalizer,
    notifications: Receiver<Notification>,
}

/// One ACTIVE card `card-1` owned by `user-1`, plus the given statements
/// as (id, due date, balance). Periods are assigned in list order.
fn build(statements: &[(&str, &str, i64)]) -> Harness {
    build_with(statements, LedgerConfig::default_test())
}

fn build_with(statements: &[(&str, &str, i64)], config: LedgerConfig) -> Harness {
    let store = LedgerStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    store
        .insert_card(&Card {
            card_id: "card-1".into(),
            user_id: "user-1".into(),
            last4: "4242".into(),
            status: CardStatus::Active,
            credit_limit: 1_000_000,
        })
        .expect("insert card");

    let clock = LedgerClock::fixed_millis(NOW_MS);
    for (i, (id, due, balance)) in statements.iter().enumerate() {
        store
            .insert_statement(
                &Statement {
                    statement_id: id.to_string(),
                    card_id: "card-1".into(),
                    period_month: (i % 12) as u32 + 1,
                    period_year: 2023 + (i / 12) as i32,
                    due_date: NaiveDate::parse_from_str(due, "%Y-%m-%d").unwrap(),
                    balance: *balance,
                    minimum_due: balance / 10,
                    paid: false,
                },
                clock.now(),
            )
            .expect("insert statement");
    }

    let (dispatcher, notifications) = ChannelDispatcher::new();
    let intents =
        PaymentIntentService::new(store.reopen().unwrap(), &config).with_clock(clock);
    let finalizer = SettlementFinalizer::new(store.reopen().unwrap(), Arc::new(dispatcher))
        .with_clock(clock);

    Harness {
        store,
        intents,
        finalizer,
        notifications,
    }
}

fn pay(h: &mut Harness, amount: i64) -> String {
    h.intents
        .create_payment("card-1", "user-1", amount, PaymentMethod::Bank)
        .expect("create payment")
        .payment_id
}

fn balance(h: &Harness, statement_id: &str) -> (i64, bool) {
    let s = h.store.get_statement(statement_id).unwrap().unwrap();
    (s.balance, s.paid)
}

#[test]
fn full_amount_pays_off_single_statement() {
    let mut h = build(&[("stmt-a", "2024-03-15", 45_320)]);
    let id = pay(&mut h, 45_320);

    let result = h.finalizer.finalize(&id, Outcome::Success, Some("gw-1")).unwrap();

    assert!(result.applied);
    assert_eq!(result.payment.status, PaymentStatus::Success);
    assert_eq!(balance(&h, "stmt-a"), (0, true));
}

#[test]
fn partial_amount_leaves_statement_open() {
    let mut h = build(&[("stmt-a", "2024-03-15", 45_320)]);
    let id = pay(&mut h, 20_000);

    h.finalizer.finalize(&id, Outcome::Success, None).unwrap();

    assert_eq!(balance(&h, "stmt-a"), (25_320, false));
}

#[test]
fn earlier_due_statement_is_paid_before_later_one() {
    let mut h = build(&[("stmt-b", "2024-04-15", 2_000), ("stmt-a", "2024-03-15", 1_000)]);
    let id = pay(&mut h, 2_500);

    let result = h.finalizer.finalize(&id, Outcome::Success, None).unwrap();

    assert_eq!(balance(&h, "stmt-a"), (0, true));
    assert_eq!(balance(&h, "stmt-b"), (500, false));
    let order: Vec<_> = result
        .allocation
        .deltas
        .iter()
        .map(|d| d.statement_id.as_str())
        .collect();
    assert_eq!(order, ["stmt-a", "stmt-b"]);
}

#[test]
fn second_delivery_changes_nothing() {
    let mut h = build(&[("stmt-a", "2024-03-15", 1_000), ("stmt-b", "2024-04-15", 2_000)]);
    let id = pay(&mut h, 2_500);

    let first = h.finalizer.finalize(&id, Outcome::Success, Some("gw-1")).unwrap();
    let after_first = h.store.statements_for_card("card-1").unwrap();

    let second = h.finalizer.finalize(&id, Outcome::Success, Some("gw-1")).unwrap();
    let after_second = h.store.statements_for_card("card-1").unwrap();

    assert!(first.applied);
    assert!(!second.applied);
    assert_eq!(after_first, after_second);
    assert_eq!(first.payment.status, second.payment.status);
    assert_eq!(first.allocation, second.allocation, "duplicate reports the recorded allocation");
    assert_eq!(h.store.allocations_for_payment(&id).unwrap().len(), 2);
    assert_eq!(h.notifications.try_iter().count(), 1, "only the first call notifies");
}

#[test]
fn conflicting_late_outcome_is_ignored() {
    let mut h = build(&[("stmt-a", "2024-03-15", 1_000)]);
    let id = pay(&mut h, 600);

    h.finalizer.finalize(&id, Outcome::Failed, Some("gw-1")).unwrap();
    let late = h.finalizer.finalize(&id, Outcome::Success, Some("gw-2")).unwrap();

    assert!(!late.applied);
    assert_eq!(late.payment.status, PaymentStatus::Failed);
    assert_eq!(late.payment.external_ref.as_deref(), Some("gw-1"));
    assert_eq!(balance(&h, "stmt-a"), (1_000, false));
}

#[test]
fn failed_outcome_touches_no_statement() {
    let mut h = build(&[("stmt-a", "2024-03-15", 1_000)]);
    let id = pay(&mut h, 1_000);

    let result = h.finalizer.finalize(&id, Outcome::Failed, None).unwrap();

    assert!(result.applied);
    assert_eq!(result.payment.status, PaymentStatus::Failed);
    assert!(result.allocation.deltas.is_empty());
    assert_eq!(balance(&h, "stmt-a"), (1_000, false));
    assert_eq!(h.store.allocation_entry_count().unwrap(), 0);

    let n = h.notifications.try_recv().expect("failure is notified too");
    assert_eq!(n.outcome, Outcome::Failed);
    assert_eq!(n.card_last4, "4242");
}

#[test]
fn settlement_writes_journal_and_events() {
    let mut h = build(&[("stmt-a", "2024-03-15", 1_000), ("stmt-b", "2024-04-15", 2_000)]);
    let id = pay(&mut h, 2_500);
    h.finalizer.finalize(&id, Outcome::Success, Some("gw-9")).unwrap();

    let journal = h.store.allocations_for_payment(&id).unwrap();
    assert_eq!(journal.len(), 2);
    assert_eq!(journal[0].statement_id, "stmt-a");
    assert_eq!(journal[0].amount_applied, 1_000);
    assert!(journal[0].paid_off);
    assert_eq!(journal[1].balance_before, 2_000);
    assert_eq!(journal[1].balance_after, 500);
    assert_eq!(journal.iter().map(|e| e.amount_applied).sum::<i64>(), 2_500);

    let types: Vec<_> = h
        .store
        .events_for_payment(&id)
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(types, ["payment_created", "payment_settled"]);

    let settled = h.store.events_for_payment(&id).unwrap()[1].decode().unwrap();
    assert_eq!(
        settled,
        LedgerEvent::PaymentSettled {
            payment_id: id.clone(),
            card_id: "card-1".into(),
            amount: 2_500,
            statements_touched: 2,
            statements_paid_off: 1,
            external_ref: Some("gw-9".into()),
        }
    );

    let payment = h.store.get_payment(&id).unwrap().unwrap();
    assert_eq!(payment.external_ref.as_deref(), Some("gw-9"));
    assert_eq!(payment.updated_at.timestamp_millis(), NOW_MS);
}

#[test]
fn notification_carries_card_and_amount() {
    let mut h = build(&[("stmt-a", "2024-03-15", 5_000)]);
    let id = pay(&mut h, 1_234);
    h.finalizer.finalize(&id, Outcome::Success, None).unwrap();

    let n = h.notifications.try_recv().unwrap();
    assert_eq!(n.payment_id, id);
    assert_eq!(n.user_id, "user-1");
    assert_eq!(n.card_id, "card-1");
    assert_eq!(n.amount, 1_234);
    assert_eq!(n.outcome, Outcome::Success);
}

struct BrokenDispatcher;

impl NotificationDispatcher for BrokenDispatcher {
    fn notify(&self, _: &Notification) -> anyhow::Result<()> {
        anyhow::bail!("smtp relay unreachable")
    }
}

#[test]
fn failed_notification_does_not_roll_back_settlement() {
    let mut h = build(&[("stmt-a", "2024-03-15", 1_000)]);
    let id = pay(&mut h, 1_000);

    let mut finalizer = SettlementFinalizer::new(h.store.reopen().unwrap(), Arc::new(BrokenDispatcher));
    let result = finalizer.finalize(&id, Outcome::Success, None).unwrap();

    assert!(result.applied);
    assert_eq!(h.store.get_payment(&id).unwrap().unwrap().status, PaymentStatus::Success);
    assert_eq!(balance(&h, "stmt-a"), (0, true));
}

#[test]
fn unknown_payment_is_not_found() {
    let mut h = build(&[("stmt-a", "2024-03-15", 1_000)]);
    let err = h.finalizer.finalize("no-such-payment", Outcome::Success, None).unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { entity: "payment", .. }));
    assert_eq!(err.code(), "NOT_FOUND");
}

#[test]
fn remainder_is_recorded_not_dropped() {
    // Without the pending reservation both intents pass against the same balance.
    let mut config = LedgerConfig::default_test();
    config.reserve_pending_payments = false;
    let mut h = build_with(&[("stmt-a", "2024-03-15", 1_000)], config);

    let first = pay(&mut h, 1_000);
    let second = pay(&mut h, 700);
    h.finalizer.finalize(&first, Outcome::Success, None).unwrap();
    let result = h.finalizer.finalize(&second, Outcome::Success, None).unwrap();

    assert!(result.applied);
    assert!(result.allocation.deltas.is_empty());
    assert_eq!(result.allocation.remainder, 700);
    assert_eq!(result.payment.unapplied_amount, 700);

    let stored = h.store.get_payment(&second).unwrap().unwrap();
    assert_eq!(stored.unapplied_amount, 700);
    assert_eq!(h.store.event_count("remainder_unapplied").unwrap(), 1);
    assert_eq!(balance(&h, "stmt-a"), (0, true));
}

#[test]
fn settlement_spans_only_the_payments_card() {
    let mut h = build(&[("stmt-a", "2024-03-15", 1_000)]);
    h.store
        .insert_card(&Card {
            card_id: "card-2".into(),
            user_id: "user-1".into(),
            last4: "9999".into(),
            status: CardStatus::Active,
            credit_limit: 1_000_000,
        })
        .unwrap();
    h.store
        .insert_statement(
            &Statement {
                statement_id: "stmt-other".into(),
                card_id: "card-2".into(),
                period_month: 1,
                period_year: 2024,
                due_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
                balance: 5_000,
                minimum_due: 500,
                paid: false,
            },
            LedgerClock::fixed_millis(NOW_MS).now(),
        )
        .unwrap();

    let id = pay(&mut h, 1_000);
    h.finalizer.finalize(&id, Outcome::Success, None).unwrap();

    assert_eq!(balance(&h, "stmt-a"), (0, true));
    let other = h.store.get_statement("stmt-other").unwrap().unwrap();
    assert_eq!(other.balance, 5_000, "older statement on another card is untouched");
}
