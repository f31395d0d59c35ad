//! The ledger event log: the audit trail of every state change.
//!
//! RULE: Events are written inside the same transaction as the mutation
//! they describe. A rolled-back settlement leaves no event behind.

use crate::types::{Amount, CardId, PaymentId, UserId};
use serde::{Deserialize, Serialize};

/// Every event recorded by the ledger.
/// Variants are only ever appended, never removed or reordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    PaymentCreated {
        payment_id: PaymentId,
        card_id: CardId,
        user_id: UserId,
        amount: Amount,
        method: String,
    },
    PaymentSettled {
        payment_id: PaymentId,
        card_id: CardId,
        amount: Amount,
        statements_touched: usize,
        statements_paid_off: usize,
        external_ref: Option<String>,
    },
    PaymentFailed {
        payment_id: PaymentId,
        card_id: CardId,
        external_ref: Option<String>,
    },
    RemainderUnapplied {
        payment_id: PaymentId,
        card_id: CardId,
        remainder: Amount,
    },
}

impl LedgerEvent {
    /// Stable name for the event_type column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::PaymentCreated { .. } => "payment_created",
            Self::PaymentSettled { .. } => "payment_settled",
            Self::PaymentFailed { .. } => "payment_failed",
            Self::RemainderUnapplied { .. } => "remainder_unapplied",
        }
    }

    pub fn payment_id(&self) -> &str {
        match self {
            Self::PaymentCreated { payment_id, .. }
            | Self::PaymentSettled { payment_id, .. }
            | Self::PaymentFailed { payment_id, .. }
            | Self::RemainderUnapplied { payment_id, .. } => payment_id,
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub payment_id: PaymentId,
    pub event_type: String,
    pub payload: String, // JSON-serialized LedgerEvent
    pub created_at_ms: i64,
}

impl EventLogEntry {
    pub fn decode(&self) -> serde_json::Result<LedgerEvent> {
        serde_json::from_str(&self.payload)
    }
}
