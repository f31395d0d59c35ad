//! Transport-agnostic API facade: the operations exposed to callers, with
//! wire-shaped requests, responses and error codes.
//!
//! Authentication is out of scope: every call takes the already
//! authenticated `user_id`. Route wiring only has to deserialize a request,
//! call one method and serialize what comes back.

use crate::{
    allocation,
    clock::LedgerClock,
    config::LedgerConfig,
    error::{LedgerError, LedgerResult},
    intent_service::PaymentIntentService,
    model::{Payment, PaymentMethod, PaymentStatus, Statement},
    notification::NotificationDispatcher,
    outcome_simulator::OutcomeSimulator,
    settlement_finalizer::SettlementFinalizer,
    store::{AllocationEntryRow, LedgerStore, PaymentFilter},
    types::Amount,
    webhook_receiver::{WebhookPayload, WebhookReceiver},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::JoinHandle;

// ── Wire types ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        if e.is_client_error() {
            Self {
                code: e.code().to_string(),
                message: e.to_string(),
            }
        } else {
            log::warn!("api: internal error: {e}");
            Self {
                code: e.code().to_string(),
                message: "internal error".to_string(),
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    pub card_id: String,
    pub amount: Amount,
    pub method: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentResponse {
    pub payment_id: String,
    pub amount: Amount,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookAck {
    pub processed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentView {
    pub payment_id: String,
    pub card_id: String,
    pub amount: Amount,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub external_ref: Option<String>,
    pub unapplied_amount: Amount,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Payment> for PaymentView {
    fn from(p: Payment) -> Self {
        Self {
            payment_id: p.payment_id,
            card_id: p.card_id,
            amount: p.amount,
            method: p.method,
            status: p.status,
            external_ref: p.external_ref,
            unapplied_amount: p.unapplied_amount,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

/// Query-string shaped filter: enum fields arrive as raw strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentQuery {
    pub card_id: Option<String>,
    pub status: Option<String>,
    pub method: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementView {
    pub statement_id: String,
    pub period_month: u32,
    pub period_year: i32,
    pub due_date: NaiveDate,
    pub balance: Amount,
    pub minimum_due: Amount,
}

impl From<Statement> for StatementView {
    fn from(s: Statement) -> Self {
        Self {
            statement_id: s.statement_id,
            period_month: s.period_month,
            period_year: s.period_year,
            due_date: s.due_date,
            balance: s.balance,
            minimum_due: s.minimum_due,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutstandingView {
    pub card_id: String,
    pub outstanding: Amount,
    /// Unpaid statements in the order a payment would be applied.
    pub statements: Vec<StatementView>,
}

// ── Facade ─────────────────────────────────────────────────────

pub struct LedgerApi {
    reader: LedgerStore,
    intents: PaymentIntentService,
    webhooks: WebhookReceiver,
    simulator: Option<OutcomeSimulator>,
    scheduled: Vec<JoinHandle<()>>,
}

impl LedgerApi {
    /// Wire every component onto its own connection to `store`'s database.
    pub fn build(
        store: LedgerStore,
        config: &LedgerConfig,
        dispatcher: Arc<dyn NotificationDispatcher>,
        clock: LedgerClock,
    ) -> LedgerResult<Self> {
        let intents = PaymentIntentService::new(store.reopen()?, config).with_clock(clock);
        let finalizer = SettlementFinalizer::new(store.reopen()?, dispatcher).with_clock(clock);
        let simulator = if config.simulator.enabled {
            Some(OutcomeSimulator::new(finalizer.reopen()?, &config.simulator))
        } else {
            None
        };
        Ok(Self {
            reader: store,
            intents,
            webhooks: WebhookReceiver::new(finalizer),
            simulator,
            scheduled: Vec::new(),
        })
    }

    pub fn store(&self) -> &LedgerStore {
        &self.reader
    }

    /// `POST create-payment`
    pub fn create_payment(
        &mut self,
        user_id: &str,
        req: &CreatePaymentRequest,
    ) -> ApiResult<CreatePaymentResponse> {
        let method: PaymentMethod = req.method.parse()?;
        let payment = self
            .intents
            .create_payment(&req.card_id, user_id, req.amount, method)?;

        if let Some(sim) = self.simulator.as_mut() {
            match sim.schedule(&payment.payment_id) {
                Ok(handle) => self.track(handle),
                // The payment exists; a webhook or recovery pass can still resolve it.
                Err(e) => log::warn!(
                    "api: could not schedule simulator for payment {}: {e}",
                    payment.payment_id
                ),
            }
        }

        Ok(CreatePaymentResponse {
            payment_id: payment.payment_id,
            amount: payment.amount,
            method: payment.method,
            status: payment.status,
            created_at: payment.created_at,
        })
    }

    /// `POST webhook`. Repeated delivery is not an error.
    pub fn webhook(&mut self, payload: &WebhookPayload) -> ApiResult<WebhookAck> {
        self.webhooks.receive(payload)?;
        Ok(WebhookAck { processed: true })
    }

    /// `GET payment/{id}`
    pub fn get_payment(&self, user_id: &str, payment_id: &str) -> ApiResult<PaymentView> {
        Ok(self.owned_payment(user_id, payment_id)?.into())
    }

    /// `GET payments?filters`
    pub fn list_payments(&self, user_id: &str, query: &PaymentQuery) -> ApiResult<Vec<PaymentView>> {
        let filter = PaymentFilter {
            user_id: Some(user_id.to_string()),
            card_id: query.card_id.clone(),
            status: query.status.as_deref().map(parse_status_filter).transpose()?,
            method: query.method.as_deref().map(str::parse::<PaymentMethod>).transpose()?,
            limit: query.limit,
        };
        let payments = self.reader.list_payments(&filter)?;
        Ok(payments.into_iter().map(PaymentView::from).collect())
    }

    /// Outstanding balance of one card and the statements behind it.
    pub fn card_outstanding(&self, user_id: &str, card_id: &str) -> ApiResult<OutstandingView> {
        match self.reader.get_card(card_id)? {
            Some(card) if card.user_id == user_id => {}
            _ => return Err(LedgerError::not_found("card", card_id).into()),
        }
        let statements = self.reader.unpaid_statements(card_id)?;
        Ok(OutstandingView {
            card_id: card_id.to_string(),
            outstanding: allocation::outstanding(&statements),
            statements: statements.into_iter().map(StatementView::from).collect(),
        })
    }

    /// Journal rows written when the payment settled.
    pub fn payment_allocations(
        &self,
        user_id: &str,
        payment_id: &str,
    ) -> ApiResult<Vec<AllocationEntryRow>> {
        self.owned_payment(user_id, payment_id)?;
        Ok(self.reader.allocations_for_payment(payment_id)?)
    }

    /// Hand every PENDING payment back to the simulator. Returns how many
    /// were scheduled; zero when the simulator is disabled.
    pub fn recover_pending(&mut self) -> LedgerResult<usize> {
        let Some(sim) = self.simulator.as_mut() else {
            return Ok(0);
        };
        let handles = sim.recover_pending()?;
        let n = handles.len();
        for handle in handles {
            self.track(handle);
        }
        Ok(n)
    }

    /// Simulator tasks scheduled but not yet finished.
    pub fn in_flight(&mut self) -> usize {
        self.reap_finished();
        self.scheduled.len()
    }

    /// Block until every scheduled simulator task has finished.
    pub fn drain(&mut self) {
        for handle in self.scheduled.drain(..) {
            if handle.join().is_err() {
                log::warn!("api: a simulator task panicked");
            }
        }
    }

    fn track(&mut self, handle: JoinHandle<()>) {
        self.reap_finished();
        self.scheduled.push(handle);
    }

    /// Join every task that has already run to completion.
    fn reap_finished(&mut self) {
        let (finished, running): (Vec<_>, Vec<_>) = self
            .scheduled
            .drain(..)
            .partition(|handle| handle.is_finished());
        self.scheduled = running;
        for handle in finished {
            if handle.join().is_err() {
                log::warn!("api: a simulator task panicked");
            }
        }
    }

    fn owned_payment(&self, user_id: &str, payment_id: &str) -> LedgerResult<Payment> {
        match self.reader.get_payment(payment_id)? {
            Some(p) if p.user_id == user_id => Ok(p),
            _ => Err(LedgerError::not_found("payment", payment_id)),
        }
    }
}

fn parse_status_filter(raw: &str) -> LedgerResult<PaymentStatus> {
    raw.parse()
        .map_err(|_| LedgerError::Validation(format!("unknown payment status '{raw}'")))
}
