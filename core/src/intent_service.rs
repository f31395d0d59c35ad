//! Payment intent service: validates a payment request and records it as
//! PENDING.
//!
//! Checks run in a fixed order and all of them finish before anything is
//! written:
//!   1. amount is positive and under the configured ceiling
//!   2. card exists and belongs to the caller       (else NOT_FOUND)
//!   3. card is ACTIVE                              (else FORBIDDEN)
//!   4. amount fits within the outstanding balance  (else VALIDATION_ERROR)
//!
//! Statements are never touched here. Resolution happens later through
//! the settlement finalizer.

use crate::{
    allocation,
    clock::LedgerClock,
    config::LedgerConfig,
    error::{LedgerError, LedgerResult},
    event::LedgerEvent,
    model::{CardStatus, Payment, PaymentMethod, PaymentStatus},
    store::LedgerStore,
    types::Amount,
};

pub struct PaymentIntentService {
    store: LedgerStore,
    max_payment_amount: Amount,
    reserve_pending_payments: bool,
    clock: LedgerClock,
}

impl PaymentIntentService {
    pub fn new(store: LedgerStore, config: &LedgerConfig) -> Self {
        Self {
            store,
            max_payment_amount: config.max_payment_amount,
            reserve_pending_payments: config.reserve_pending_payments,
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

    pub fn create_payment(
        &mut self,
        card_id: &str,
        user_id: &str,
        amount: Amount,
        method: PaymentMethod,
    ) -> LedgerResult<Payment> {
        if amount <= 0 {
            return Err(LedgerError::Validation(format!(
                "amount must be positive (got {amount})"
            )));
        }
        if amount > self.max_payment_amount {
            return Err(LedgerError::Validation(format!(
                "amount {amount} exceeds the per-payment ceiling of {}",
                self.max_payment_amount
            )));
        }

        let now = self.clock.now();
        let reserve_pending = self.reserve_pending_payments;
        let tx = self.store.begin_immediate()?;

        let card = match tx.card(card_id)? {
            Some(card) if card.user_id == user_id => card,
            // A card owned by someone else is reported exactly like a missing one.
            _ => return Err(LedgerError::not_found("card", card_id)),
        };
        if card.status != CardStatus::Active {
            return Err(LedgerError::Forbidden(format!(
                "card {card_id} is {} and cannot accept payments",
                card.status.as_str()
            )));
        }

        let outstanding = allocation::outstanding(&tx.unpaid_statements(card_id)?);
        let reserved = if reserve_pending {
            tx.pending_total_for_card(card_id)?
        } else {
            0
        };
        let payable = (outstanding - reserved).max(0);
        if amount > payable {
            return Err(LedgerError::Validation(format!(
                "amount {amount} exceeds payable balance {payable} \
                 (outstanding {outstanding}, pending {reserved})"
            )));
        }

        let payment = Payment {
            payment_id: uuid::Uuid::new_v4().to_string(),
            card_id: card.card_id.clone(),
            user_id: user_id.to_string(),
            amount,
            method,
            status: PaymentStatus::Pending,
            external_ref: None,
            unapplied_amount: 0,
            created_at: now,
            updated_at: now,
        };
        tx.insert_payment(&payment)?;
        tx.append_event(
            &LedgerEvent::PaymentCreated {
                payment_id: payment.payment_id.clone(),
                card_id: payment.card_id.clone(),
                user_id: payment.user_id.clone(),
                amount,
                method: method.as_str().to_string(),
            },
            now,
        )?;
        tx.commit()?;

        log::info!(
            "intent: payment {} created card={} amount={} method={} payable_before={}",
            payment.payment_id,
            card_id,
            amount,
            method.as_str(),
            payable
        );
        Ok(payment)
    }
}
