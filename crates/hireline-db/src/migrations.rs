use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                email       TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                role        TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE companies (
                id          TEXT PRIMARY KEY,
                owner_id    TEXT NOT NULL REFERENCES users(id),
                name        TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_companies_owner ON companies(owner_id);

            -- direct_key is the uniqueness anchor for two-party threads;
            -- NULL for group conversations (NULLs never collide).
            CREATE TABLE conversations (
                id          TEXT PRIMARY KEY,
                is_direct   INTEGER NOT NULL,
                direct_key  TEXT UNIQUE,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE TABLE conversation_participants (
                id              TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                user_id         TEXT NOT NULL REFERENCES users(id),
                joined_at       TEXT NOT NULL,
                last_read_at    TEXT,
                UNIQUE(conversation_id, user_id)
            );

            CREATE INDEX idx_participants_user ON conversation_participants(user_id);

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                sender_id       TEXT NOT NULL REFERENCES users(id),
                body            TEXT NOT NULL,
                meta            TEXT,
                created_at      TEXT NOT NULL,
                delivered_at    TEXT,
                read_at         TEXT
            );

            CREATE INDEX idx_messages_conversation ON messages(conversation_id, created_at);

            CREATE TABLE notifications (
                id          TEXT PRIMARY KEY,
                receiver_id TEXT NOT NULL REFERENCES users(id),
                type        TEXT NOT NULL,
                payload     TEXT NOT NULL,
                status      TEXT NOT NULL DEFAULT 'PENDING',
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_notifications_receiver ON notifications(receiver_id, status);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
