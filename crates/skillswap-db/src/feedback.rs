use anyhow::Result;
use rusqlite::Row;

use crate::models::FeedbackRow;
use crate::{Database, id_list};

const FEEDBACK_COLS: &str = "id, exchange_id, from_user_id, to_user_id, rating, comment, created_at";

impl Database {
    /// Insert-or-update keyed by (exchange, author). The uniqueness
    /// constraint makes concurrent submissions collapse to one row instead
    /// of read-then-write producing two.
    pub fn upsert_feedback(
        &self,
        exchange_id: i64,
        from_user_id: i64,
        to_user_id: i64,
        rating: i64,
        comment: &str,
        now: &str,
    ) -> Result<FeedbackRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO exchange_feedback
                     (exchange_id, from_user_id, to_user_id, rating, comment, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(exchange_id, from_user_id) DO UPDATE SET
                     rating = excluded.rating,
                     comment = excluded.comment,
                     to_user_id = excluded.to_user_id",
                rusqlite::params![exchange_id, from_user_id, to_user_id, rating, comment, now],
            )?;
            let row = conn.query_row(
                &format!(
                    "SELECT {FEEDBACK_COLS} FROM exchange_feedback
                     WHERE exchange_id = ?1 AND from_user_id = ?2"
                ),
                rusqlite::params![exchange_id, from_user_id],
                map_feedback,
            )?;
            Ok(row)
        })
    }

    pub fn feedback_for_exchange(&self, exchange_id: i64) -> Result<Vec<FeedbackRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {FEEDBACK_COLS} FROM exchange_feedback
                 WHERE exchange_id = ?1 ORDER BY created_at, id"
            ))?;
            let rows = stmt
                .query_map([exchange_id], map_feedback)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn feedback_for_exchanges(&self, exchange_ids: &[i64]) -> Result<Vec<FeedbackRow>> {
        if exchange_ids.is_empty() {
            return Ok(vec![]);
        }
        let list = id_list(exchange_ids);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {FEEDBACK_COLS} FROM exchange_feedback WHERE exchange_id IN ({list})"
            ))?;
            let rows = stmt
                .query_map([], map_feedback)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Per-user reputation: (average, count) over all feedback addressed to
    /// the user, with no skill attribution.
    pub fn user_reputation(&self, user_id: i64) -> Result<(f64, i64)> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COALESCE(AVG(rating), 0), COUNT(*)
                 FROM exchange_feedback WHERE to_user_id = ?1",
                [user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?)
        })
    }
}

fn map_feedback(row: &Row) -> rusqlite::Result<FeedbackRow> {
    Ok(FeedbackRow {
        id: row.get(0)?,
        exchange_id: row.get(1)?,
        from_user_id: row.get(2)?,
        to_user_id: row.get(3)?,
        rating: row.get(4)?,
        comment: row.get(5)?,
        created_at: row.get(6)?,
    })
}
