use anyhow::Result;
use rusqlite::{Connection, Row};
use skillswap_types::models::ExchangeStatus;

use crate::models::{ExchangeRow, ParticipantSide};
use crate::{Database, OptionalExt, id_list};

const EXCHANGE_COLS: &str = "id, requester_id, owner_id, skill_offered_id, skill_requested_id, \
     status, message, completed_by_requester_at, completed_by_owner_at, completed_at, created_at";

impl Database {
    /// Persist a new pending exchange together with its negotiation arrays,
    /// in one transaction. A lost duplicate race surfaces here as a
    /// uniqueness violation from `idx_exchanges_live_pair`.
    pub fn create_exchange(
        &self,
        requester_id: i64,
        owner_id: i64,
        message: &str,
        offered: &[i64],
        interested: &[i64],
        now: &str,
    ) -> Result<i64> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO exchanges (requester_id, owner_id, message, status, created_at)
                 VALUES (?1, ?2, ?3, 'pending', ?4)",
                rusqlite::params![requester_id, owner_id, message, now],
            )?;
            let exchange_id = tx.last_insert_rowid();

            for skill_id in offered {
                tx.execute(
                    "INSERT INTO exchange_skills (exchange_id, skill_id, side) VALUES (?1, ?2, 'offered')",
                    rusqlite::params![exchange_id, skill_id],
                )?;
            }
            for skill_id in interested {
                tx.execute(
                    "INSERT INTO exchange_skills (exchange_id, skill_id, side) VALUES (?1, ?2, 'interested')",
                    rusqlite::params![exchange_id, skill_id],
                )?;
            }

            tx.commit()?;
            Ok(exchange_id)
        })
    }

    /// Existing exchange for this ordered (requester, owner) pair that still
    /// blocks a new request. The check is deliberately asymmetric: the
    /// reversed pair is a separate barter thread.
    pub fn find_live_exchange(
        &self,
        requester_id: i64,
        owner_id: i64,
    ) -> Result<Option<(i64, ExchangeStatus)>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, status FROM exchanges
                 WHERE requester_id = ?1 AND owner_id = ?2
                   AND status IN ('pending','accepted','completed')",
                rusqlite::params![requester_id, owner_id],
                |row| {
                    let status: String = row.get(1)?;
                    Ok((row.get::<_, i64>(0)?, status))
                },
            )
            .optional()?
            .map(|(id, status)| {
                parse_status(&status).map(|s| (id, s))
            })
            .transpose()
        })
    }

    pub fn get_exchange(&self, id: i64) -> Result<Option<ExchangeRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {EXCHANGE_COLS} FROM exchanges WHERE id = ?1"),
                [id],
                map_exchange,
            )
            .optional()
        })
    }

    /// The negotiation arrays, insertion-ordered.
    pub fn negotiation_skills(&self, exchange_id: i64) -> Result<(Vec<i64>, Vec<i64>)> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT skill_id, side FROM exchange_skills WHERE exchange_id = ?1 ORDER BY rowid",
            )?;
            let mut offered = Vec::new();
            let mut interested = Vec::new();
            let rows = stmt.query_map([exchange_id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (skill_id, side) = row?;
                if side == "offered" {
                    offered.push(skill_id);
                } else {
                    interested.push(skill_id);
                }
            }
            Ok((offered, interested))
        })
    }

    /// Every exchange the user participates in, newest first.
    pub fn list_exchanges_for_user(&self, user_id: i64) -> Result<Vec<ExchangeRow>> {
        self.with_conn(|conn| {
            query_exchanges(
                conn,
                &format!(
                    "SELECT {EXCHANGE_COLS} FROM exchanges
                     WHERE requester_id = ?1 OR owner_id = ?1
                     ORDER BY created_at DESC, id DESC"
                ),
                user_id,
            )
        })
    }

    /// Accepted and completed exchanges the user participates in (the
    /// chat-eligible set), newest first.
    pub fn list_open_exchanges_for_user(&self, user_id: i64) -> Result<Vec<ExchangeRow>> {
        self.with_conn(|conn| {
            query_exchanges(
                conn,
                &format!(
                    "SELECT {EXCHANGE_COLS} FROM exchanges
                     WHERE (requester_id = ?1 OR owner_id = ?1)
                       AND status IN ('accepted','completed')
                     ORDER BY created_at DESC, id DESC"
                ),
                user_id,
            )
        })
    }

    /// Resolve a pending exchange to rejected or cancelled. Conditional on
    /// the row still being pending; returns false if another responder won.
    pub fn resolve_exchange(&self, id: i64, status: ExchangeStatus) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE exchanges SET status = ?1 WHERE id = ?2 AND status = 'pending'",
                rusqlite::params![status.as_str(), id],
            )?;
            Ok(changed == 1)
        })
    }

    /// Accept a pending exchange, fixing the final skill pairing.
    pub fn accept_exchange(&self, id: i64, offered_id: i64, requested_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE exchanges
                 SET status = 'accepted', skill_offered_id = ?1, skill_requested_id = ?2
                 WHERE id = ?3 AND status = 'pending'",
                rusqlite::params![offered_id, requested_id, id],
            )?;
            Ok(changed == 1)
        })
    }

    /// Record one party's completion confirmation. Set-if-null so a retried
    /// or concurrent confirmation by the same party never moves the
    /// timestamp.
    pub fn confirm_completion(&self, id: i64, side: ParticipantSide, now: &str) -> Result<()> {
        let column = match side {
            ParticipantSide::Requester => "completed_by_requester_at",
            ParticipantSide::Owner => "completed_by_owner_at",
        };
        self.with_conn(|conn| {
            conn.execute(
                &format!("UPDATE exchanges SET {column} = ?1 WHERE id = ?2 AND {column} IS NULL"),
                rusqlite::params![now, id],
            )?;
            Ok(())
        })
    }

    /// Promote an accepted, dually-confirmed exchange to completed. Guarded
    /// so only one of two racing promotions flips the status, and
    /// `completed_at` is never overwritten once set.
    pub fn promote_completed(&self, id: i64, now: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE exchanges
                 SET status = 'completed', completed_at = COALESCE(completed_at, ?1)
                 WHERE id = ?2 AND status = 'accepted'
                   AND completed_by_requester_at IS NOT NULL
                   AND completed_by_owner_at IS NOT NULL",
                rusqlite::params![now, id],
            )?;
            Ok(changed == 1)
        })
    }

    /// Exchanges that are effectively completed (physically completed, or
    /// accepted with both confirmations in) whose final pairing references
    /// any of the given skills. Input to the rating aggregator.
    pub fn completed_exchanges_for_skills(&self, skill_ids: &[i64]) -> Result<Vec<ExchangeRow>> {
        if skill_ids.is_empty() {
            return Ok(vec![]);
        }
        let ids = id_list(skill_ids);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EXCHANGE_COLS} FROM exchanges
                 WHERE (status = 'completed'
                        OR (status = 'accepted'
                            AND completed_by_requester_at IS NOT NULL
                            AND completed_by_owner_at IS NOT NULL))
                   AND (skill_requested_id IN ({ids}) OR skill_offered_id IN ({ids}))"
            ))?;
            let rows = stmt
                .query_map([], map_exchange)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Skill-deletion guard for the catalog collaborator: true when the
    /// skill is tied to any exchange that is not pending/rejected/cancelled.
    pub fn skill_in_active_exchange(&self, skill_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM exchanges
                 WHERE status NOT IN ('pending','rejected','cancelled')
                   AND (skill_offered_id = ?1 OR skill_requested_id = ?1)",
                [skill_id],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }
}

fn query_exchanges(conn: &Connection, sql: &str, user_id: i64) -> Result<Vec<ExchangeRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([user_id], map_exchange)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_exchange(row: &Row) -> rusqlite::Result<ExchangeRow> {
    let status: String = row.get(5)?;
    Ok(ExchangeRow {
        id: row.get(0)?,
        requester_id: row.get(1)?,
        owner_id: row.get(2)?,
        skill_offered_id: row.get(3)?,
        skill_requested_id: row.get(4)?,
        status: parse_status_sql(5, &status)?,
        message: row.get(6)?,
        completed_by_requester_at: row.get(7)?,
        completed_by_owner_at: row.get(8)?,
        completed_at: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn parse_status_sql(idx: usize, raw: &str) -> rusqlite::Result<ExchangeStatus> {
    ExchangeStatus::parse(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown exchange status: {raw}").into(),
        )
    })
}

fn parse_status(raw: &str) -> Result<ExchangeStatus> {
    ExchangeStatus::parse(raw).ok_or_else(|| anyhow::anyhow!("unknown exchange status: {raw}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{is_unique_violation, now_rfc3339};

    fn seed(db: &Database) -> (i64, i64, i64, i64) {
        let alice = db.insert_user("Alice").unwrap();
        let bob = db.insert_user("Bob").unwrap();
        let guitar = db.insert_skill(alice, "Guitar", "Strumming basics").unwrap();
        let sketching = db.insert_skill(bob, "Sketching", "Urban sketching").unwrap();
        (alice, bob, guitar, sketching)
    }

    fn create(db: &Database, requester: i64, owner: i64, offered: &[i64], interested: &[i64]) -> i64 {
        db.create_exchange(requester, owner, "", offered, interested, &now_rfc3339())
            .unwrap()
    }

    #[test]
    fn create_persists_negotiation_arrays() {
        let db = Database::open_in_memory().unwrap();
        let (alice, bob, guitar, sketching) = seed(&db);

        let id = create(&db, alice, bob, &[guitar], &[sketching]);
        let (offered, interested) = db.negotiation_skills(id).unwrap();
        assert_eq!(offered, vec![guitar]);
        assert_eq!(interested, vec![sketching]);

        let row = db.get_exchange(id).unwrap().unwrap();
        assert_eq!(row.status, ExchangeStatus::Pending);
        assert_eq!(row.skill_offered_id, None);
        assert_eq!(row.skill_requested_id, None);
    }

    #[test]
    fn live_pair_index_rejects_duplicate_at_commit() {
        let db = Database::open_in_memory().unwrap();
        let (alice, bob, guitar, sketching) = seed(&db);

        create(&db, alice, bob, &[guitar], &[sketching]);
        let err = db
            .create_exchange(alice, bob, "", &[guitar], &[sketching], &now_rfc3339())
            .unwrap_err();
        assert!(is_unique_violation(&err));

        // Reversed pair is a different barter thread and is allowed.
        create(&db, bob, alice, &[sketching], &[guitar]);
    }

    #[test]
    fn duplicate_allowed_after_terminal_status() {
        let db = Database::open_in_memory().unwrap();
        let (alice, bob, guitar, sketching) = seed(&db);

        let id = create(&db, alice, bob, &[guitar], &[sketching]);
        assert!(db.resolve_exchange(id, ExchangeStatus::Rejected).unwrap());

        // Rejected no longer blocks a new request for the same pair.
        create(&db, alice, bob, &[guitar], &[sketching]);
    }

    #[test]
    fn respond_is_conditional_on_pending() {
        let db = Database::open_in_memory().unwrap();
        let (alice, bob, guitar, sketching) = seed(&db);

        let id = create(&db, alice, bob, &[guitar], &[sketching]);
        assert!(db.accept_exchange(id, guitar, sketching).unwrap());
        // Second responder loses: the row is no longer pending.
        assert!(!db.resolve_exchange(id, ExchangeStatus::Rejected).unwrap());

        let row = db.get_exchange(id).unwrap().unwrap();
        assert_eq!(row.status, ExchangeStatus::Accepted);
        assert_eq!(row.skill_offered_id, Some(guitar));
        assert_eq!(row.skill_requested_id, Some(sketching));
    }

    #[test]
    fn confirmation_timestamp_is_set_if_null() {
        let db = Database::open_in_memory().unwrap();
        let (alice, bob, guitar, sketching) = seed(&db);
        let id = create(&db, alice, bob, &[guitar], &[sketching]);
        db.accept_exchange(id, guitar, sketching).unwrap();

        db.confirm_completion(id, ParticipantSide::Requester, "2026-01-01T00:00:00.000000Z")
            .unwrap();
        db.confirm_completion(id, ParticipantSide::Requester, "2026-02-02T00:00:00.000000Z")
            .unwrap();

        let row = db.get_exchange(id).unwrap().unwrap();
        assert_eq!(
            row.completed_by_requester_at.as_deref(),
            Some("2026-01-01T00:00:00.000000Z")
        );
        assert_eq!(row.completed_by_owner_at, None);
    }

    #[test]
    fn promotion_requires_both_confirmations_and_runs_once() {
        let db = Database::open_in_memory().unwrap();
        let (alice, bob, guitar, sketching) = seed(&db);
        let id = create(&db, alice, bob, &[guitar], &[sketching]);
        db.accept_exchange(id, guitar, sketching).unwrap();

        db.confirm_completion(id, ParticipantSide::Requester, &now_rfc3339()).unwrap();
        assert!(!db.promote_completed(id, &now_rfc3339()).unwrap());

        db.confirm_completion(id, ParticipantSide::Owner, &now_rfc3339()).unwrap();
        assert!(db.promote_completed(id, "2026-03-03T00:00:00.000000Z").unwrap());
        // Second racing promotion observes the flip and does nothing.
        assert!(!db.promote_completed(id, "2026-04-04T00:00:00.000000Z").unwrap());

        let row = db.get_exchange(id).unwrap().unwrap();
        assert_eq!(row.status, ExchangeStatus::Completed);
        assert_eq!(row.completed_at.as_deref(), Some("2026-03-03T00:00:00.000000Z"));
    }

    #[test]
    fn skill_active_guard_ignores_resolved_exchanges() {
        let db = Database::open_in_memory().unwrap();
        let (alice, bob, guitar, sketching) = seed(&db);
        let id = create(&db, alice, bob, &[guitar], &[sketching]);

        // Pending exchanges have no final pairing yet.
        assert!(!db.skill_in_active_exchange(guitar).unwrap());

        db.accept_exchange(id, guitar, sketching).unwrap();
        assert!(db.skill_in_active_exchange(guitar).unwrap());
        assert!(db.skill_in_active_exchange(sketching).unwrap());
    }

    #[test]
    fn listing_filters_by_participant_and_status() {
        let db = Database::open_in_memory().unwrap();
        let (alice, bob, guitar, sketching) = seed(&db);
        let carol = db.insert_user("Carol").unwrap();
        let yoga = db.insert_skill(carol, "Yoga", "").unwrap();

        let ab = create(&db, alice, bob, &[guitar], &[sketching]);
        let ac = create(&db, alice, carol, &[guitar], &[yoga]);
        db.accept_exchange(ab, guitar, sketching).unwrap();

        let all: Vec<i64> = db.list_exchanges_for_user(alice).unwrap().iter().map(|e| e.id).collect();
        assert_eq!(all.len(), 2);
        assert!(all.contains(&ab) && all.contains(&ac));

        let open: Vec<i64> = db
            .list_open_exchanges_for_user(alice)
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(open, vec![ab]);
        assert!(db.list_open_exchanges_for_user(carol).unwrap().is_empty());
    }
}
