use std::collections::HashMap;

use anyhow::Result;
use rusqlite::Row;

use crate::models::{AttachmentRow, MessageRow, ReactionRow};
use crate::{Database, OptionalExt, id_list};

const MESSAGE_COLS: &str = "m.id, m.exchange_id, m.from_user_id, u.name, m.to_user_id, m.body, \
     m.delivered_at, m.read_at, m.created_at";

impl Database {
    pub fn insert_message(
        &self,
        exchange_id: i64,
        from_user_id: i64,
        to_user_id: i64,
        body: &str,
        now: &str,
    ) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO exchange_messages
                     (exchange_id, from_user_id, to_user_id, body, delivered_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                rusqlite::params![exchange_id, from_user_id, to_user_id, body, now],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn insert_attachment(
        &self,
        message_id: i64,
        url: &str,
        mime_type: &str,
        original_name: &str,
        size_bytes: i64,
    ) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO message_attachments (message_id, url, mime_type, original_name, size_bytes)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![message_id, url, mime_type, original_name, size_bytes],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn count_messages(&self, exchange_id: i64) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM exchange_messages WHERE exchange_id = ?1",
                [exchange_id],
                |row| row.get(0),
            )?)
        })
    }

    /// One chat page, oldest first, with sender names joined in one query.
    pub fn list_messages(&self, exchange_id: i64, limit: u32, offset: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLS}
                 FROM exchange_messages m
                 LEFT JOIN users u ON m.from_user_id = u.id
                 WHERE m.exchange_id = ?1
                 ORDER BY m.created_at ASC, m.id ASC
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![exchange_id, limit, offset], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_message(&self, message_id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {MESSAGE_COLS}
                     FROM exchange_messages m
                     LEFT JOIN users u ON m.from_user_id = u.id
                     WHERE m.id = ?1"
                ),
                [message_id],
                map_message,
            )
            .optional()
        })
    }

    /// Batch-fetch attachments for a page of messages, insertion-ordered.
    pub fn attachments_for_messages(&self, message_ids: &[i64]) -> Result<Vec<AttachmentRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }
        let list = id_list(message_ids);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT id, message_id, url, mime_type, original_name, size_bytes
                 FROM message_attachments WHERE message_id IN ({list}) ORDER BY id"
            ))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(AttachmentRow {
                        id: row.get(0)?,
                        message_id: row.get(1)?,
                        url: row.get(2)?,
                        mime_type: row.get(3)?,
                        original_name: row.get(4)?,
                        size_bytes: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Batch-fetch reactions, ordered by reaction time for stable display.
    /// A removed-then-re-added reaction moves to the end of the order.
    pub fn reactions_for_messages(&self, message_ids: &[i64]) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }
        let list = id_list(message_ids);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT id, message_id, user_id, emoji, created_at
                 FROM message_reactions WHERE message_id IN ({list})
                 ORDER BY created_at, id"
            ))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(ReactionRow {
                        id: row.get(0)?,
                        message_id: row.get(1)?,
                        user_id: row.get(2)?,
                        emoji: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Toggle a reaction: removes if present, inserts if not.
    /// Returns true when the reaction was added.
    pub fn toggle_reaction(&self, message_id: i64, user_id: i64, emoji: &str, now: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let existing: Option<i64> = conn
                .query_row(
                    "SELECT id FROM message_reactions
                     WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                    rusqlite::params![message_id, user_id, emoji],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(id) = existing {
                conn.execute("DELETE FROM message_reactions WHERE id = ?1", [id])?;
                Ok(false)
            } else {
                conn.execute(
                    "INSERT INTO message_reactions (message_id, user_id, emoji, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![message_id, user_id, emoji, now],
                )?;
                Ok(true)
            }
        })
    }

    /// Bulk-set `read_at` on unread messages addressed to the user.
    /// Idempotent; returns the number of rows updated.
    pub fn mark_read(&self, exchange_id: i64, to_user_id: i64, now: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE exchange_messages SET read_at = ?1
                 WHERE exchange_id = ?2 AND to_user_id = ?3 AND read_at IS NULL",
                rusqlite::params![now, exchange_id, to_user_id],
            )?;
            Ok(changed)
        })
    }

    /// Most recent message per exchange: (body, created_at).
    pub fn last_message_per_exchange(
        &self,
        exchange_ids: &[i64],
    ) -> Result<HashMap<i64, (String, String)>> {
        if exchange_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let list = id_list(exchange_ids);
        self.with_conn(|conn| {
            // Bare columns resolve to the row that wins the MAX() — a
            // documented SQLite behavior for single-aggregate grouping.
            let mut stmt = conn.prepare(&format!(
                "SELECT exchange_id, body, created_at,
                        MAX(created_at || printf('#%020d', id))
                 FROM exchange_messages
                 WHERE exchange_id IN ({list})
                 GROUP BY exchange_id"
            ))?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    (row.get::<_, String>(1)?, row.get::<_, String>(2)?),
                ))
            })?;
            Ok(rows.collect::<std::result::Result<HashMap<_, _>, _>>()?)
        })
    }

    /// Unread message count per exchange for the given recipient.
    pub fn unread_counts(&self, exchange_ids: &[i64], to_user_id: i64) -> Result<HashMap<i64, i64>> {
        if exchange_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let list = id_list(exchange_ids);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT exchange_id, COUNT(*) FROM exchange_messages
                 WHERE exchange_id IN ({list}) AND to_user_id = ?1 AND read_at IS NULL
                 GROUP BY exchange_id"
            ))?;
            let rows = stmt.query_map([to_user_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
            Ok(rows.collect::<std::result::Result<HashMap<i64, i64>, _>>()?)
        })
    }
}

fn map_message(row: &Row) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        exchange_id: row.get(1)?,
        from_user_id: row.get(2)?,
        from_name: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        to_user_id: row.get(4)?,
        body: row.get(5)?,
        delivered_at: row.get(6)?,
        read_at: row.get(7)?,
        created_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::now_rfc3339;

    fn accepted_exchange(db: &Database) -> (i64, i64, i64) {
        let alice = db.insert_user("Alice").unwrap();
        let bob = db.insert_user("Bob").unwrap();
        let guitar = db.insert_skill(alice, "Guitar", "").unwrap();
        let sketching = db.insert_skill(bob, "Sketching", "").unwrap();
        let id = db
            .create_exchange(alice, bob, "", &[guitar], &[sketching], &now_rfc3339())
            .unwrap();
        db.accept_exchange(id, guitar, sketching).unwrap();
        (id, alice, bob)
    }

    #[test]
    fn listing_pages_ascending_with_sender_names() {
        let db = Database::open_in_memory().unwrap();
        let (ex, alice, bob) = accepted_exchange(&db);

        for i in 0..5 {
            db.insert_message(ex, alice, bob, &format!("m{i}"), &format!("2026-01-01T00:00:0{i}.000000Z"))
                .unwrap();
        }

        assert_eq!(db.count_messages(ex).unwrap(), 5);
        let page = db.list_messages(ex, 2, 1).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].body, "m1");
        assert_eq!(page[1].body, "m2");
        assert_eq!(page[0].from_name, "Alice");
    }

    #[test]
    fn mark_read_updates_only_recipient_unread() {
        let db = Database::open_in_memory().unwrap();
        let (ex, alice, bob) = accepted_exchange(&db);

        db.insert_message(ex, alice, bob, "one", &now_rfc3339()).unwrap();
        db.insert_message(ex, alice, bob, "two", &now_rfc3339()).unwrap();
        db.insert_message(ex, bob, alice, "reply", &now_rfc3339()).unwrap();

        assert_eq!(db.mark_read(ex, bob, &now_rfc3339()).unwrap(), 2);
        // Idempotent: nothing left unread for bob.
        assert_eq!(db.mark_read(ex, bob, &now_rfc3339()).unwrap(), 0);
        assert_eq!(db.unread_counts(&[ex], alice).unwrap()[&ex], 1);
    }

    #[test]
    fn reaction_toggle_and_reorder_on_re_add() {
        let db = Database::open_in_memory().unwrap();
        let (ex, alice, bob) = accepted_exchange(&db);
        let msg = db.insert_message(ex, alice, bob, "hi", &now_rfc3339()).unwrap();

        assert!(db.toggle_reaction(msg, bob, "👍", "2026-01-01T00:00:01.000000Z").unwrap());
        assert!(db.toggle_reaction(msg, alice, "🎸", "2026-01-01T00:00:02.000000Z").unwrap());
        // Toggle off, then back on later: moves to the end of display order.
        assert!(!db.toggle_reaction(msg, bob, "👍", "2026-01-01T00:00:03.000000Z").unwrap());
        assert!(db.toggle_reaction(msg, bob, "👍", "2026-01-01T00:00:04.000000Z").unwrap());

        let reactions = db.reactions_for_messages(&[msg]).unwrap();
        let order: Vec<(i64, &str)> = reactions.iter().map(|r| (r.user_id, r.emoji.as_str())).collect();
        assert_eq!(order, vec![(alice, "🎸"), (bob, "👍")]);
    }

    #[test]
    fn same_user_two_emojis_are_distinct() {
        let db = Database::open_in_memory().unwrap();
        let (ex, alice, bob) = accepted_exchange(&db);
        let msg = db.insert_message(ex, alice, bob, "hi", &now_rfc3339()).unwrap();

        assert!(db.toggle_reaction(msg, bob, "👍", &now_rfc3339()).unwrap());
        assert!(db.toggle_reaction(msg, bob, "🔥", &now_rfc3339()).unwrap());
        assert_eq!(db.reactions_for_messages(&[msg]).unwrap().len(), 2);
    }

    #[test]
    fn conversation_rollups() {
        let db = Database::open_in_memory().unwrap();
        let (ex, alice, bob) = accepted_exchange(&db);

        db.insert_message(ex, alice, bob, "first", "2026-01-01T00:00:01.000000Z").unwrap();
        db.insert_message(ex, alice, bob, "latest", "2026-01-01T00:00:02.000000Z").unwrap();

        let last = db.last_message_per_exchange(&[ex]).unwrap();
        assert_eq!(last[&ex].0, "latest");
        assert_eq!(db.unread_counts(&[ex], bob).unwrap()[&ex], 2);

        let attachment_free = db.attachments_for_messages(&[]).unwrap();
        assert!(attachment_free.is_empty());
    }
}
