use super::{parse_column, timestamp_column, LedgerStore, LedgerTx};
use crate::{
    error::LedgerResult,
    model::{Payment, PaymentMethod, PaymentStatus},
    types::Amount,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

const PAYMENT_COLUMNS: &str = "payment_id, card_id, user_id, amount, method, status,
                               external_ref, unapplied_amount, created_at, updated_at";

/// Read-side filter for payment listings. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFilter {
    pub user_id: Option<String>,
    pub card_id: Option<String>,
    pub status: Option<PaymentStatus>,
    pub method: Option<PaymentMethod>,
    pub limit: Option<u32>,
}

impl LedgerStore {
    // ── Payment ───────────────────────────────────────────────────

    pub fn get_payment(&self, payment_id: &str) -> LedgerResult<Option<Payment>> {
        select_payment(&self.conn, payment_id)
    }

    /// Newest first; ties broken by id so listings are stable.
    pub fn list_payments(&self, filter: &PaymentFilter) -> LedgerResult<Vec<Payment>> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment
             WHERE (?1 IS NULL OR user_id = ?1)
               AND (?2 IS NULL OR card_id = ?2)
               AND (?3 IS NULL OR status = ?3)
               AND (?4 IS NULL OR method = ?4)
             ORDER BY created_at DESC, payment_id ASC
             LIMIT ?5"
        );
        let limit = filter.limit.map(i64::from).unwrap_or(-1);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                filter.user_id,
                filter.card_id,
                filter.status.map(|s| s.as_str()),
                filter.method.map(|m| m.as_str()),
                limit,
            ],
            payment_from_row,
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Ids of every payment still waiting for an outcome, oldest first.
    pub fn pending_payment_ids(&self) -> LedgerResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT payment_id FROM payment WHERE status = 'PENDING'
             ORDER BY created_at ASC, payment_id ASC",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn payment_count(&self, status: PaymentStatus) -> LedgerResult<i64> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM payment WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

impl LedgerTx<'_> {
    pub fn payment(&self, payment_id: &str) -> LedgerResult<Option<Payment>> {
        select_payment(&self.tx, payment_id)
    }

    pub fn insert_payment(&self, p: &Payment) -> LedgerResult<()> {
        self.tx.execute(
            "INSERT INTO payment (
                payment_id, card_id, user_id, amount, method, status,
                external_ref, unapplied_amount, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                p.payment_id,
                p.card_id,
                p.user_id,
                p.amount,
                p.method.as_str(),
                p.status.as_str(),
                p.external_ref,
                p.unapplied_amount,
                p.created_at.timestamp_millis(),
                p.updated_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    /// Move a payment out of PENDING.
    ///
    /// Compare-and-set on `status = 'PENDING'`: returns false, touching
    /// nothing, when the payment is already terminal. A `None` external
    /// reference keeps whatever was stored before.
    pub fn transition_payment(
        &self,
        payment_id: &str,
        to: PaymentStatus,
        external_ref: Option<&str>,
        at: DateTime<Utc>,
    ) -> LedgerResult<bool> {
        let changed = self.tx.execute(
            "UPDATE payment
             SET status = ?1,
                 external_ref = COALESCE(?2, external_ref),
                 updated_at = ?3
             WHERE payment_id = ?4 AND status = 'PENDING'",
            params![to.as_str(), external_ref, at.timestamp_millis(), payment_id],
        )?;
        Ok(changed == 1)
    }

    pub fn set_unapplied_amount(&self, payment_id: &str, amount: Amount) -> LedgerResult<()> {
        self.tx.execute(
            "UPDATE payment SET unapplied_amount = ?1 WHERE payment_id = ?2",
            params![amount, payment_id],
        )?;
        Ok(())
    }

    /// Sum of amounts of the card's PENDING payments.
    pub fn pending_total_for_card(&self, card_id: &str) -> LedgerResult<Amount> {
        let total = self.tx.query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM payment
             WHERE card_id = ?1 AND status = 'PENDING'",
            params![card_id],
            |row| row.get(0),
        )?;
        Ok(total)
    }
}

fn select_payment(conn: &Connection, payment_id: &str) -> LedgerResult<Option<Payment>> {
    let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payment WHERE payment_id = ?1");
    let payment = conn
        .query_row(&sql, params![payment_id], payment_from_row)
        .optional()?;
    Ok(payment)
}

fn payment_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Payment> {
    Ok(Payment {
        payment_id: row.get(0)?,
        card_id: row.get(1)?,
        user_id: row.get(2)?,
        amount: row.get(3)?,
        method: parse_column(4, &row.get::<_, String>(4)?)?,
        status: parse_column(5, &row.get::<_, String>(5)?)?,
        external_ref: row.get(6)?,
        unapplied_amount: row.get(7)?,
        created_at: timestamp_column(8, row.get(8)?)?,
        updated_at: timestamp_column(9, row.get(9)?)?,
    })
}
