//! Ledger records: Card, Statement, Payment and their status enums.
//!
//! Enum columns are persisted as their `as_str()` form. `FromStr` is the
//! only way back; an unknown string read from the store is a corrupt row.

use crate::{
    error::LedgerError,
    types::{Amount, CardId, PaymentId, StatementId, UserId},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

// ── Card ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardStatus {
    Active,
    Blocked,
    Inactive,
}

impl CardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Blocked => "BLOCKED",
            Self::Inactive => "INACTIVE",
        }
    }
}

impl FromStr for CardStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "BLOCKED" => Ok(Self::Blocked),
            "INACTIVE" => Ok(Self::Inactive),
            other => Err(LedgerError::Corrupt(format!("unknown card status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub card_id: CardId,
    pub user_id: UserId,
    pub last4: String,
    pub status: CardStatus,
    pub credit_limit: Amount,
}

// ── Statement ──────────────────────────────────────────────────

/// One billing period's balance on a card.
/// `paid` is true iff `balance == 0` after a settlement closed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub statement_id: StatementId,
    pub card_id: CardId,
    pub period_month: u32,
    pub period_year: i32,
    pub due_date: NaiveDate,
    pub balance: Amount,
    pub minimum_due: Amount,
    pub paid: bool,
}

// ── Payment ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    /// SUCCESS and FAILED never change again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl FromStr for PaymentStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            other => Err(LedgerError::Corrupt(format!("unknown payment status '{other}'"))),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Bank,
    Card,
    Instant,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bank => "bank",
            Self::Card => "card",
            Self::Instant => "instant",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = LedgerError;

    /// Caller-supplied input, so a bad value is a validation failure.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bank" => Ok(Self::Bank),
            "card" => Ok(Self::Card),
            "instant" => Ok(Self::Instant),
            other => Err(LedgerError::Validation(format!(
                "method must be one of bank, card, instant (got '{other}')"
            ))),
        }
    }
}

/// Terminal verdict delivered by an outcome source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Success,
    Failed,
}

impl Outcome {
    pub fn as_status(&self) -> PaymentStatus {
        match self {
            Self::Success => PaymentStatus::Success,
            Self::Failed => PaymentStatus::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.as_status().as_str()
    }
}

impl FromStr for Outcome {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            other => Err(LedgerError::Validation(format!(
                "outcome must be SUCCESS or FAILED (got '{other}')"
            ))),
        }
    }
}

/// One settlement attempt. `amount` is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: PaymentId,
    pub card_id: CardId,
    pub user_id: UserId,
    pub amount: Amount,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub external_ref: Option<String>,
    /// Portion of `amount` that found no open statement at settlement.
    pub unapplied_amount: Amount,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip_through_from_str() {
        for status in [PaymentStatus::Pending, PaymentStatus::Success, PaymentStatus::Failed] {
            assert_eq!(status.as_str().parse::<PaymentStatus>().unwrap(), status);
        }
        for status in [CardStatus::Active, CardStatus::Blocked, CardStatus::Inactive] {
            assert_eq!(status.as_str().parse::<CardStatus>().unwrap(), status);
        }
    }

    #[test]
    fn unknown_method_is_a_validation_error() {
        let err = "wire".parse::<PaymentMethod>().unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Success.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
    }
}
