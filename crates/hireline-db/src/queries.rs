use crate::Database;
use crate::models::{CompanyRow, ConversationRow, MessageRow, ParticipantRow, UserRow};
use anyhow::Result;
use hireline_types::models::Role;
use rusqlite::{Connection, Row};

pub(crate) const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, body, meta, created_at, delivered_at, read_at";

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, email: &str, password_hash: &str, role: Role) -> Result<()> {
        let now = crate::now_timestamp();
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, password, role, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, email, password_hash, role.as_str(), &now),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    // -- Companies --

    pub fn create_company(&self, id: &str, owner_id: &str, name: &str) -> Result<CompanyRow> {
        let now = crate::now_timestamp();
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO companies (id, owner_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
                (id, owner_id, name, &now),
            )?;
            Ok(CompanyRow {
                id: id.to_string(),
                owner_id: owner_id.to_string(),
                name: name.to_string(),
                created_at: now,
            })
        })
    }

    pub fn get_company(&self, id: &str) -> Result<Option<CompanyRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, owner_id, name, created_at FROM companies WHERE id = ?1",
                [id],
                |row| {
                    Ok(CompanyRow {
                        id: row.get(0)?,
                        owner_id: row.get(1)?,
                        name: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Map a receiver id onto the user space: a user id is returned as-is, a
    /// company id becomes its owner's user id. `None` if neither exists.
    pub fn resolve_receiver(&self, id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            if user_exists(conn, id)? {
                return Ok(Some(id.to_string()));
            }
            conn.query_row("SELECT owner_id FROM companies WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()
        })
    }

    // -- Conversations --

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, is_direct, direct_key, created_at, updated_at
                 FROM conversations WHERE id = ?1",
                [id],
                conversation_from_row,
            )
            .optional()
        })
    }

    /// Conversations the user participates in, most recently active first.
    pub fn list_conversations_for_user(&self, user_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.is_direct, c.direct_key, c.created_at, c.updated_at
                 FROM conversations c
                 JOIN conversation_participants p ON p.conversation_id = c.id
                 WHERE p.user_id = ?1
                 ORDER BY c.updated_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id], conversation_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_participants(&self, conversation_id: &str) -> Result<Vec<ParticipantRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT p.id, p.conversation_id, p.user_id, u.role, p.joined_at, p.last_read_at
                 FROM conversation_participants p
                 LEFT JOIN users u ON u.id = p.user_id
                 WHERE p.conversation_id = ?1
                 ORDER BY p.joined_at",
            )?;
            let rows = stmt
                .query_map([conversation_id], |row| {
                    Ok(ParticipantRow {
                        id: row.get(0)?,
                        conversation_id: row.get(1)?,
                        user_id: row.get(2)?,
                        role: row.get(3)?,
                        joined_at: row.get(4)?,
                        last_read_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn is_participant(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM conversation_participants
                     WHERE conversation_id = ?1 AND user_id = ?2",
                    [conversation_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    // -- Messages --

    /// The newest `limit` messages, returned oldest first.
    pub fn recent_messages(&self, conversation_id: &str, limit: u32) -> Result<Vec<MessageRow>> {
        self.messages_before(conversation_id, None, limit)
    }

    /// Up to `limit` messages strictly older than `before` (or the newest ones
    /// when no cursor is given), returned oldest first.
    pub fn messages_before(
        &self,
        conversation_id: &str,
        before: Option<&str>,
        limit: u32,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE conversation_id = ?1 AND (?2 IS NULL OR created_at < ?2)
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt
                .query_map(rusqlite::params![conversation_id, before, limit], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
    }

    pub fn count_messages(&self, conversation_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                [conversation_id],
                |row| row.get(0),
            )?;
            Ok(n as u64)
        })
    }

    // -- Read receipts --

    /// Advance the participant's read marker. Returns false when the user is
    /// not a participant of the conversation.
    pub fn mark_read(&self, conversation_id: &str, user_id: &str, at: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let updated = conn.execute(
                "UPDATE conversation_participants SET last_read_at = ?1
                 WHERE conversation_id = ?2 AND user_id = ?3",
                (at, conversation_id, user_id),
            )?;
            Ok(updated > 0)
        })
    }
}

pub(crate) fn user_exists(conn: &Connection, id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE id = ?1", [id], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT id, email, password, role, created_at FROM users WHERE {column} = ?1");
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                email: row.get(1)?,
                password: row.get(2)?,
                role: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        is_direct: row.get(1)?,
        direct_key: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

pub(crate) fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        body: row.get(3)?,
        meta: row.get(4)?,
        created_at: row.get(5)?,
        delivered_at: row.get(6)?,
        read_at: row.get(7)?,
    })
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
