//! Direct (two-party) conversation resolution.
//!
//! Every unordered pair of users owns at most one direct conversation, keyed by
//! [`direct_key`]. The UNIQUE constraint on `conversations.direct_key` is the
//! only concurrency control: when two first-contact sends race, the loser's
//! transaction fails on the constraint and falls back to appending to the
//! winner's conversation.

use anyhow::{Result, anyhow};
use rusqlite::{Connection, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use crate::Database;
use crate::models::MessageRow;
use crate::queries::{MESSAGE_COLUMNS, OptionalExt, message_from_row, user_exists};

/// Order-independent key for the direct conversation between `a` and `b`.
pub fn direct_key(a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("direct:{}:{}", lo, hi)
}

/// Outcome of trying to create a brand-new direct conversation.
pub enum CreateOutcome {
    Created(MessageRow),
    /// Another writer committed a conversation with the same key first.
    KeyTaken,
}

impl Database {
    /// Append `body` to the direct conversation identified by `key`, creating
    /// the conversation (and both participant rows) on first contact.
    ///
    /// Returns `Ok(None)` when the conversation does not exist yet and either
    /// participant id does not name an existing user.
    pub fn resolve_or_create(
        &self,
        key: &str,
        sender_id: &str,
        receiver_id: &str,
        body: &str,
        meta: Option<&serde_json::Value>,
    ) -> Result<Option<MessageRow>> {
        let meta = meta.map(|m| m.to_string());

        if let Some(conversation_id) = self.find_direct(key)? {
            return self
                .append_message(&conversation_id, sender_id, body, meta.as_deref())
                .map(Some);
        }

        let participants_exist = self
            .with_conn(|conn| Ok(user_exists(conn, sender_id)? && user_exists(conn, receiver_id)?))?;
        if !participants_exist {
            debug!("Direct conversation {} not created: participant not found", key);
            return Ok(None);
        }

        match self.create_direct(key, sender_id, receiver_id, body, meta.as_deref())? {
            CreateOutcome::Created(row) => {
                info!("Created direct conversation {} ({})", row.conversation_id, key);
                Ok(Some(row))
            }
            CreateOutcome::KeyTaken => {
                debug!("Direct conversation {} created concurrently, appending", key);
                let conversation_id = self
                    .find_direct(key)?
                    .ok_or_else(|| anyhow!("Direct conversation {} vanished after conflict", key))?;
                self.append_message(&conversation_id, sender_id, body, meta.as_deref())
                    .map(Some)
            }
        }
    }

    pub fn find_direct(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id FROM conversations WHERE direct_key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()
        })
    }

    /// Atomically create the conversation, both participants and the first
    /// message. A `direct_key` collision rolls everything back.
    pub fn create_direct(
        &self,
        key: &str,
        sender_id: &str,
        receiver_id: &str,
        body: &str,
        meta: Option<&str>,
    ) -> Result<CreateOutcome> {
        let conversation_id = Uuid::new_v4().to_string();
        let now = crate::now_timestamp();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let inserted = tx.execute(
                "INSERT INTO conversations (id, is_direct, direct_key, created_at, updated_at)
                 VALUES (?1, 1, ?2, ?3, ?3)",
                (&conversation_id, key, &now),
            );
            match inserted {
                Ok(_) => {}
                Err(e) if is_direct_key_conflict(&e) => return Ok(CreateOutcome::KeyTaken),
                Err(e) => return Err(e.into()),
            }

            for user_id in [sender_id, receiver_id] {
                tx.execute(
                    "INSERT INTO conversation_participants (id, conversation_id, user_id, joined_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    (Uuid::new_v4().to_string(), &conversation_id, user_id, &now),
                )?;
            }

            let row = insert_message(&tx, &conversation_id, sender_id, body, meta, &now)?;
            tx.commit()?;
            Ok(CreateOutcome::Created(row))
        })
    }

    /// Append a message to an existing conversation and bump its `updated_at`.
    pub fn append_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        body: &str,
        meta: Option<&str>,
    ) -> Result<MessageRow> {
        let now = crate::now_timestamp();
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let row = insert_message(&tx, conversation_id, sender_id, body, meta, &now)?;
            tx.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                (&now, conversation_id),
            )?;
            tx.commit()?;
            Ok(row)
        })
    }
}

fn insert_message(
    tx: &Transaction<'_>,
    conversation_id: &str,
    sender_id: &str,
    body: &str,
    meta: Option<&str>,
    now: &str,
) -> Result<MessageRow> {
    let id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO messages (id, conversation_id, sender_id, body, meta, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![id, conversation_id, sender_id, body, meta, now],
    )?;
    fetch_message(tx, &id)
}

fn fetch_message(conn: &Connection, id: &str) -> Result<MessageRow> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], message_from_row)?)
}

fn is_direct_key_conflict(err: &rusqlite::Error) -> bool {
    crate::sqlite_unique_violation(err, "direct_key")
}
