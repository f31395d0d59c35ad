//! Inbound webhook adapter.
//!
//! The external authority may deliver the same outcome zero, one or many
//! times. Every delivery for a known payment is handed to the finalizer,
//! which makes repeats harmless.

use crate::{
    error::{LedgerError, LedgerResult},
    model::Outcome,
    settlement_finalizer::{FinalizationResult, SettlementFinalizer},
    types::PaymentId,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub payment_id: PaymentId,
    pub outcome: Outcome,
    #[serde(default)]
    pub external_ref: Option<String>,
}

pub struct WebhookReceiver {
    finalizer: SettlementFinalizer,
}

impl WebhookReceiver {
    pub fn new(finalizer: SettlementFinalizer) -> Self {
        Self { finalizer }
    }

    /// Another receiver on its own connection, for a concurrent request path.
    pub fn reopen(&self) -> LedgerResult<Self> {
        Ok(Self {
            finalizer: self.finalizer.reopen()?,
        })
    }

    pub fn receive(&mut self, payload: &WebhookPayload) -> LedgerResult<FinalizationResult> {
        if self
            .finalizer
            .store()
            .get_payment(&payload.payment_id)?
            .is_none()
        {
            return Err(LedgerError::not_found("payment", &payload.payment_id));
        }
        log::debug!(
            "webhook: delivery for payment {} outcome={} ref={:?}",
            payload.payment_id,
            payload.outcome.as_str(),
            payload.external_ref
        );
        self.finalizer.finalize(
            &payload.payment_id,
            payload.outcome,
            payload.external_ref.as_deref(),
        )
    }
}
