//! Settlement finalizer: the single entry point through which a PENDING
//! payment reaches SUCCESS or FAILED.
//!
//! Both outcome sources (delayed simulator, webhook) end up here, possibly
//! at the same moment for the same payment. Correctness rests on three
//! rules:
//!
//!   1. The payment row is claimed with a compare-and-set on
//!      `status = 'PENDING'` inside a `BEGIN IMMEDIATE` transaction.
//!      Whoever loses the claim sees a terminal payment and returns the
//!      recorded result without touching a statement.
//!   2. Statement deltas, journal rows, events and the status transition
//!      commit together or not at all. Any error rolls the whole thing
//!      back and the payment stays PENDING for a later delivery.
//!   3. The notification is sent after commit, best-effort, never retried.

use crate::{
    allocation::{allocate, Allocation, StatementDelta},
    clock::LedgerClock,
    error::{LedgerError, LedgerResult},
    event::LedgerEvent,
    model::{Outcome, Payment, PaymentStatus},
    notification::{Notification, NotificationDispatcher},
    store::{AllocationEntryRow, LedgerStore},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizationResult {
    /// The payment as it stands after this call.
    pub payment: Payment,
    /// True only for the call that moved the payment out of PENDING.
    pub applied: bool,
    /// Deltas recorded for this payment. Empty for FAILED payments.
    pub allocation: Allocation,
}

pub struct SettlementFinalizer {
    store: LedgerStore,
    dispatcher: Arc<dyn NotificationDispatcher>,
    clock: LedgerClock,
}

impl SettlementFinalizer {
    pub fn new(store: LedgerStore, dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            clock: LedgerClock::System,
        }
    }

    pub fn with_clock(mut self, clock: LedgerClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    /// A second finalizer on its own connection, sharing the dispatcher.
    /// Hand one to every thread that may finalize concurrently.
    pub fn reopen(&self) -> LedgerResult<Self> {
        Ok(Self {
            store: self.store.reopen()?,
            dispatcher: Arc::clone(&self.dispatcher),
            clock: self.clock,
        })
    }

    pub fn finalize(
        &mut self,
        payment_id: &str,
        outcome: Outcome,
        external_ref: Option<&str>,
    ) -> LedgerResult<FinalizationResult> {
        let now = self.clock.now();
        let tx = self.store.begin_immediate()?;

        let mut payment = tx
            .payment(payment_id)?
            .ok_or_else(|| LedgerError::not_found("payment", payment_id))?;

        let claimed = !payment.status.is_terminal()
            && tx.transition_payment(payment_id, outcome.as_status(), external_ref, now)?;
        if !claimed {
            // Lost the claim: roll back (nothing was written) and report what
            // the winning call recorded.
            drop(tx);
            return self.already_final(payment_id, outcome);
        }

        let card = tx.card(&payment.card_id)?.ok_or_else(|| {
            LedgerError::Corrupt(format!(
                "payment {payment_id} references missing card {}",
                payment.card_id
            ))
        })?;

        let allocation = match outcome {
            Outcome::Success => {
                let statements = tx.unpaid_statements(&payment.card_id)?;
                let allocation = allocate(payment.amount, &statements);
                for delta in &allocation.deltas {
                    if !tx.apply_statement_delta(delta, now)? {
                        return Err(LedgerError::LedgerConflict {
                            payment_id: payment_id.to_string(),
                            statement_id: delta.statement_id.clone(),
                        });
                    }
                    tx.insert_allocation_entry(payment_id, delta, now)?;
                }
                tx.append_event(
                    &LedgerEvent::PaymentSettled {
                        payment_id: payment_id.to_string(),
                        card_id: payment.card_id.clone(),
                        amount: payment.amount,
                        statements_touched: allocation.deltas.len(),
                        statements_paid_off: allocation.paid_off_count(),
                        external_ref: external_ref.map(str::to_string),
                    },
                    now,
                )?;
                if allocation.remainder > 0 {
                    tx.set_unapplied_amount(payment_id, allocation.remainder)?;
                    tx.append_event(
                        &LedgerEvent::RemainderUnapplied {
                            payment_id: payment_id.to_string(),
                            card_id: payment.card_id.clone(),
                            remainder: allocation.remainder,
                        },
                        now,
                    )?;
                }
                allocation
            }
            Outcome::Failed => {
                tx.append_event(
                    &LedgerEvent::PaymentFailed {
                        payment_id: payment_id.to_string(),
                        card_id: payment.card_id.clone(),
                        external_ref: external_ref.map(str::to_string),
                    },
                    now,
                )?;
                Allocation::default()
            }
        };

        tx.commit()?;

        payment.status = outcome.as_status();
        payment.external_ref = external_ref.map(str::to_string).or(payment.external_ref);
        payment.unapplied_amount = allocation.remainder;
        payment.updated_at = now;

        if allocation.remainder > 0 {
            log::warn!(
                "finalizer: payment {payment_id} settled with {} unapplied (card {} has no open balance left)",
                allocation.remainder,
                payment.card_id
            );
        }
        log::info!(
            "finalizer: payment {payment_id} -> {} card={} amount={} statements={} paid_off={}",
            payment.status,
            payment.card_id,
            payment.amount,
            allocation.deltas.len(),
            allocation.paid_off_count()
        );

        let notification = Notification {
            payment_id: payment.payment_id.clone(),
            user_id: payment.user_id.clone(),
            card_id: card.card_id,
            card_last4: card.last4,
            outcome,
            amount: payment.amount,
        };
        if let Err(e) = self.dispatcher.notify(&notification) {
            log::warn!("finalizer: notification for payment {payment_id} dropped: {e}");
        }

        Ok(FinalizationResult {
            payment,
            applied: true,
            allocation,
        })
    }

    /// Rebuild the recorded result of a payment that is already terminal.
    fn already_final(
        &self,
        payment_id: &str,
        requested: Outcome,
    ) -> LedgerResult<FinalizationResult> {
        let payment = self
            .store
            .get_payment(payment_id)?
            .ok_or_else(|| LedgerError::not_found("payment", payment_id))?;

        if payment.status != requested.as_status() {
            log::info!(
                "finalizer: payment {payment_id} already {}, ignoring conflicting {} delivery",
                payment.status,
                requested.as_str()
            );
        } else {
            log::debug!("finalizer: payment {payment_id} already {}, duplicate delivery ignored", payment.status);
        }

        let allocation = if payment.status == PaymentStatus::Success {
            Allocation {
                deltas: self
                    .store
                    .allocations_for_payment(payment_id)?
                    .into_iter()
                    .map(delta_from_entry)
                    .collect(),
                remainder: payment.unapplied_amount,
            }
        } else {
            Allocation::default()
        };

        Ok(FinalizationResult {
            payment,
            applied: false,
            allocation,
        })
    }
}

fn delta_from_entry(row: AllocationEntryRow) -> StatementDelta {
    StatementDelta {
        statement_id: row.statement_id,
        balance_before: row.balance_before,
        balance_after: row.balance_after,
        applied: row.amount_applied,
        paid_off: row.paid_off,
    }
}
