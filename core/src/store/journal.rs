use super::{AllocationEntryRow, LedgerStore, LedgerTx};
use crate::{allocation::StatementDelta, error::LedgerResult};
use chrono::{DateTime, Utc};
use rusqlite::params;

impl LedgerStore {
    // ── Allocation journal ────────────────────────────────────────

    pub fn allocations_for_payment(&self, payment_id: &str) -> LedgerResult<Vec<AllocationEntryRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT payment_id, statement_id, amount_applied, balance_before,
                    balance_after, paid_off, created_at
             FROM allocation_entry WHERE payment_id = ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![payment_id], |row| {
                Ok(AllocationEntryRow {
                    payment_id: row.get(0)?,
                    statement_id: row.get(1)?,
                    amount_applied: row.get(2)?,
                    balance_before: row.get(3)?,
                    balance_after: row.get(4)?,
                    paid_off: row.get::<_, i32>(5)? != 0,
                    created_at_ms: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn allocation_entry_count(&self) -> LedgerResult<i64> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM allocation_entry", [], |row| row.get(0))?;
        Ok(n)
    }
}

impl LedgerTx<'_> {
    pub fn insert_allocation_entry(
        &self,
        payment_id: &str,
        delta: &StatementDelta,
        at: DateTime<Utc>,
    ) -> LedgerResult<()> {
        self.tx.execute(
            "INSERT INTO allocation_entry (
                payment_id, statement_id, amount_applied, balance_before,
                balance_after, paid_off, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                payment_id,
                delta.statement_id,
                delta.applied,
                delta.balance_before,
                delta.balance_after,
                delta.paid_off as i32,
                at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }
}
