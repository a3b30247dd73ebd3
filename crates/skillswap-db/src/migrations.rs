use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Users and skills are owned by the identity/catalog collaborators;
        -- the exchange core only reads them for lookups and joins.
        CREATE TABLE IF NOT EXISTS users (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS skills (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     INTEGER NOT NULL REFERENCES users(id),
            title       TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS exchanges (
            id                          INTEGER PRIMARY KEY AUTOINCREMENT,
            requester_id                INTEGER NOT NULL REFERENCES users(id),
            owner_id                    INTEGER NOT NULL REFERENCES users(id),
            skill_offered_id            INTEGER,
            skill_requested_id          INTEGER,
            status                      TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending','accepted','rejected','cancelled','completed')),
            message                     TEXT NOT NULL DEFAULT '',
            completed_by_requester_at   TEXT,
            completed_by_owner_at       TEXT,
            completed_at                TEXT,
            created_at                  TEXT NOT NULL DEFAULT (datetime('now')),
            CHECK (requester_id <> owner_id)
        );

        -- Hard duplicate-exchange guard: one live exchange per ordered
        -- (requester, owner) pair. The application pre-check produces the
        -- friendly message; this index wins the race.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_exchanges_live_pair
            ON exchanges(requester_id, owner_id)
            WHERE status IN ('pending','accepted','completed');

        -- Negotiation arrays: candidate skill ids proposed before acceptance.
        CREATE TABLE IF NOT EXISTS exchange_skills (
            exchange_id INTEGER NOT NULL REFERENCES exchanges(id),
            skill_id    INTEGER NOT NULL REFERENCES skills(id),
            side        TEXT NOT NULL CHECK (side IN ('offered','interested')),
            UNIQUE(exchange_id, side, skill_id)
        );

        CREATE TABLE IF NOT EXISTS exchange_messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            exchange_id     INTEGER NOT NULL REFERENCES exchanges(id),
            from_user_id    INTEGER NOT NULL REFERENCES users(id),
            to_user_id      INTEGER NOT NULL REFERENCES users(id),
            body            TEXT NOT NULL DEFAULT '',
            delivered_at    TEXT NOT NULL,
            read_at         TEXT,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_exchange
            ON exchange_messages(exchange_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_messages_unread
            ON exchange_messages(exchange_id, to_user_id)
            WHERE read_at IS NULL;

        CREATE TABLE IF NOT EXISTS message_attachments (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id      INTEGER NOT NULL REFERENCES exchange_messages(id),
            url             TEXT NOT NULL,
            mime_type       TEXT NOT NULL DEFAULT '',
            original_name   TEXT NOT NULL DEFAULT '',
            size_bytes      INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_attachments_message
            ON message_attachments(message_id);

        CREATE TABLE IF NOT EXISTS message_reactions (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id  INTEGER NOT NULL REFERENCES exchange_messages(id),
            user_id     INTEGER NOT NULL REFERENCES users(id),
            emoji       TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(message_id, user_id, emoji)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_message
            ON message_reactions(message_id);

        CREATE TABLE IF NOT EXISTS exchange_feedback (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            exchange_id     INTEGER NOT NULL REFERENCES exchanges(id),
            from_user_id    INTEGER NOT NULL REFERENCES users(id),
            to_user_id      INTEGER NOT NULL REFERENCES users(id),
            rating          INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
            comment         TEXT NOT NULL DEFAULT '',
            created_at      TEXT NOT NULL,
            UNIQUE(exchange_id, from_user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_feedback_recipient
            ON exchange_feedback(to_user_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
