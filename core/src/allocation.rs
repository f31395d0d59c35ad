//! Statement allocation: distributes a payment amount over a card's
//! unpaid statements.
//!
//! RULE: This module is pure. No store, no clock, no logging. The
//! finalizer feeds it the statements it loaded inside its transaction and
//! writes back whatever deltas come out.
//!
//! Ordering: ascending due date, ties broken by ascending statement id.
//! The input order is irrelevant; the engine sorts its own copy.

use crate::{
    model::Statement,
    types::{Amount, StatementId},
};
use serde::{Deserialize, Serialize};

/// The change one allocation makes to a single statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementDelta {
    pub statement_id: StatementId,
    pub balance_before: Amount,
    pub balance_after: Amount,
    pub applied: Amount,
    pub paid_off: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Allocation {
    /// In application order (oldest due first).
    pub deltas: Vec<StatementDelta>,
    /// Amount left over once every unpaid statement reached zero.
    pub remainder: Amount,
}

impl Allocation {
    /// Sum of what was actually applied to statements.
    pub fn applied_total(&self) -> Amount {
        self.deltas.iter().map(|d| d.applied).sum()
    }

    pub fn paid_off_count(&self) -> usize {
        self.deltas.iter().filter(|d| d.paid_off).count()
    }
}

/// Allocate `amount` oldest-due-first across `statements`.
///
/// Statements already paid or with a zero balance are skipped. Never
/// fails: a non-positive amount yields no deltas, and anything left after
/// the last statement is reported in `remainder` for the caller to handle.
pub fn allocate(amount: Amount, statements: &[Statement]) -> Allocation {
    let mut open: Vec<&Statement> = statements
        .iter()
        .filter(|s| !s.paid && s.balance > 0)
        .collect();
    open.sort_by(|a, b| {
        a.due_date
            .cmp(&b.due_date)
            .then_with(|| a.statement_id.cmp(&b.statement_id))
    });

    let mut left = amount.max(0);
    let mut deltas = Vec::new();

    for stmt in open {
        if left == 0 {
            break;
        }
        if left >= stmt.balance {
            deltas.push(StatementDelta {
                statement_id: stmt.statement_id.clone(),
                balance_before: stmt.balance,
                balance_after: 0,
                applied: stmt.balance,
                paid_off: true,
            });
            left -= stmt.balance;
        } else {
            deltas.push(StatementDelta {
                statement_id: stmt.statement_id.clone(),
                balance_before: stmt.balance,
                balance_after: stmt.balance - left,
                applied: left,
                paid_off: false,
            });
            left = 0;
        }
    }

    Allocation {
        deltas,
        remainder: left,
    }
}

/// Outstanding balance: the sum of balances over unpaid statements.
pub fn outstanding(statements: &[Statement]) -> Amount {
    statements
        .iter()
        .filter(|s| !s.paid)
        .map(|s| s.balance.max(0))
        .sum()
}
