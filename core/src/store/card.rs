use super::{parse_column, LedgerStore, LedgerTx};
use crate::{
    error::LedgerResult,
    model::{Card, CardStatus},
};
use rusqlite::{params, Connection, OptionalExtension};

impl LedgerStore {
    // ── Card ──────────────────────────────────────────────────────

    pub fn insert_card(&self, card: &Card) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO card (card_id, user_id, last4, status, credit_limit)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                card.card_id,
                card.user_id,
                card.last4,
                card.status.as_str(),
                card.credit_limit,
            ],
        )?;
        Ok(())
    }

    /// Card status is owned by the card-management collaborator.
    /// The settlement engine only ever reads it.
    pub fn set_card_status(&self, card_id: &str, status: CardStatus) -> LedgerResult<bool> {
        let changed = self.conn.execute(
            "UPDATE card SET status = ?1 WHERE card_id = ?2",
            params![status.as_str(), card_id],
        )?;
        Ok(changed == 1)
    }

    pub fn get_card(&self, card_id: &str) -> LedgerResult<Option<Card>> {
        select_card(&self.conn, card_id)
    }

    pub fn cards(&self) -> LedgerResult<Vec<Card>> {
        let mut stmt = self.conn.prepare(
            "SELECT card_id, user_id, last4, status, credit_limit
             FROM card ORDER BY card_id ASC",
        )?;
        let rows = stmt.query_map([], card_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

impl LedgerTx<'_> {
    pub fn card(&self, card_id: &str) -> LedgerResult<Option<Card>> {
        select_card(&self.tx, card_id)
    }
}

fn select_card(conn: &Connection, card_id: &str) -> LedgerResult<Option<Card>> {
    let card = conn
        .query_row(
            "SELECT card_id, user_id, last4, status, credit_limit
             FROM card WHERE card_id = ?1",
            params![card_id],
            card_from_row,
        )
        .optional()?;
    Ok(card)
}

fn card_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Card> {
    Ok(Card {
        card_id: row.get(0)?,
        user_id: row.get(1)?,
        last4: row.get(2)?,
        status: parse_column(3, &row.get::<_, String>(3)?)?,
        credit_limit: row.get(4)?,
    })
}
