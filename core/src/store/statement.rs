use super::{LedgerStore, LedgerTx};
use crate::{
    allocation::StatementDelta,
    error::LedgerResult,
    model::Statement,
    types::Amount,
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, types::Type, Connection, OptionalExtension};

const DUE_DATE_FORMAT: &str = "%Y-%m-%d";

const STATEMENT_COLUMNS: &str = "statement_id, card_id, period_month, period_year, due_date,
                                 balance, minimum_due, paid";

impl LedgerStore {
    // ── Statement ─────────────────────────────────────────────────

    /// Statements are produced by the billing cycle, outside the engine.
    pub fn insert_statement(&self, stmt: &Statement, at: DateTime<Utc>) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO statement (
                statement_id, card_id, period_month, period_year, due_date,
                balance, minimum_due, paid, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                stmt.statement_id,
                stmt.card_id,
                stmt.period_month,
                stmt.period_year,
                stmt.due_date.format(DUE_DATE_FORMAT).to_string(),
                stmt.balance,
                stmt.minimum_due,
                stmt.paid as i32,
                at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn get_statement(&self, statement_id: &str) -> LedgerResult<Option<Statement>> {
        let sql = format!("SELECT {STATEMENT_COLUMNS} FROM statement WHERE statement_id = ?1");
        let stmt = self
            .conn
            .query_row(&sql, params![statement_id], statement_from_row)
            .optional()?;
        Ok(stmt)
    }

    /// Every statement of a card, paid or not, in allocation order.
    pub fn statements_for_card(&self, card_id: &str) -> LedgerResult<Vec<Statement>> {
        let sql = format!(
            "SELECT {STATEMENT_COLUMNS} FROM statement
             WHERE card_id = ?1
             ORDER BY due_date ASC, statement_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![card_id], statement_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn unpaid_statements(&self, card_id: &str) -> LedgerResult<Vec<Statement>> {
        select_unpaid(&self.conn, card_id)
    }

    pub fn total_statement_balance(&self) -> LedgerResult<Amount> {
        let total = self.conn.query_row(
            "SELECT COALESCE(SUM(balance), 0) FROM statement",
            [],
            |row| row.get(0),
        )?;
        Ok(total)
    }
}

impl LedgerTx<'_> {
    pub fn unpaid_statements(&self, card_id: &str) -> LedgerResult<Vec<Statement>> {
        select_unpaid(&self.tx, card_id)
    }

    /// Write one allocation delta.
    ///
    /// Compare-and-set on the balance the allocation was computed from:
    /// returns false, touching nothing, if the row no longer matches.
    pub fn apply_statement_delta(
        &self,
        delta: &StatementDelta,
        at: DateTime<Utc>,
    ) -> LedgerResult<bool> {
        let changed = self.tx.execute(
            "UPDATE statement SET balance = ?1, paid = ?2, updated_at = ?3
             WHERE statement_id = ?4 AND balance = ?5 AND paid = 0",
            params![
                delta.balance_after,
                delta.paid_off as i32,
                at.timestamp_millis(),
                delta.statement_id,
                delta.balance_before,
            ],
        )?;
        Ok(changed == 1)
    }
}

fn select_unpaid(conn: &Connection, card_id: &str) -> LedgerResult<Vec<Statement>> {
    let sql = format!(
        "SELECT {STATEMENT_COLUMNS} FROM statement
         WHERE card_id = ?1 AND paid = 0
         ORDER BY due_date ASC, statement_id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![card_id], statement_from_row)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

fn statement_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Statement> {
    let due_raw: String = row.get(4)?;
    let due_date = NaiveDate::parse_from_str(&due_raw, DUE_DATE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    Ok(Statement {
        statement_id: row.get(0)?,
        card_id: row.get(1)?,
        period_month: row.get(2)?,
        period_year: row.get(3)?,
        due_date,
        balance: row.get(5)?,
        minimum_due: row.get(6)?,
        paid: row.get::<_, i32>(7)? != 0,
    })
}
