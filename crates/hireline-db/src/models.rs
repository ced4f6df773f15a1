//! Database row types. These map directly to SQLite rows.
//! Distinct from hireline-types API models to keep the DB layer independent.

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use hireline_types::models::{
    Company, Message, Notification, NotificationStatus, NotificationType, ParticipantSummary,
};

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub password: String,
    pub role: String,
    pub created_at: String,
}

pub struct CompanyRow {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub created_at: String,
}

pub struct ConversationRow {
    pub id: String,
    pub is_direct: bool,
    pub direct_key: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub struct ParticipantRow {
    pub id: String,
    pub conversation_id: String,
    pub user_id: String,
    /// Joined from `users`; `None` if the account is gone.
    pub role: Option<String>,
    pub joined_at: String,
    pub last_read_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub body: String,
    pub meta: Option<String>,
    pub created_at: String,
    pub delivered_at: Option<String>,
    pub read_at: Option<String>,
}

pub struct NotificationRow {
    pub id: String,
    pub receiver_id: String,
    pub kind: String,
    pub payload: String,
    pub status: String,
    pub created_at: String,
}

pub fn parse_uuid(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        Uuid::default()
    })
}

pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // datetime('now') style: "YYYY-MM-DD HH:MM:SS" without timezone
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

fn parse_optional_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.map(parse_timestamp)
}

impl MessageRow {
    pub fn to_message(&self) -> Message {
        Message {
            id: parse_uuid(&self.id, "message id"),
            conversation_id: parse_uuid(&self.conversation_id, "conversation id"),
            sender_id: parse_uuid(&self.sender_id, "sender id"),
            body: self.body.clone(),
            meta: self.meta.as_deref().and_then(|m| {
                serde_json::from_str(m)
                    .map_err(|e| warn!("Corrupt meta on message '{}': {}", self.id, e))
                    .ok()
            }),
            created_at: parse_timestamp(&self.created_at),
            delivered_at: parse_optional_timestamp(self.delivered_at.as_deref()),
            read_at: parse_optional_timestamp(self.read_at.as_deref()),
        }
    }
}

impl ParticipantRow {
    pub fn to_summary(&self) -> ParticipantSummary {
        ParticipantSummary {
            user_id: parse_uuid(&self.user_id, "participant user id"),
            role: self.role.as_deref().and_then(|r| r.parse().ok()),
            joined_at: parse_timestamp(&self.joined_at),
            last_read_at: parse_optional_timestamp(self.last_read_at.as_deref()),
        }
    }
}

impl NotificationRow {
    pub fn to_notification(&self) -> Notification {
        Notification {
            id: parse_uuid(&self.id, "notification id"),
            receiver_id: parse_uuid(&self.receiver_id, "receiver id"),
            kind: self.kind.parse().unwrap_or_else(|e| {
                warn!("Corrupt type on notification '{}': {}", self.id, e);
                NotificationType::NewMessage
            }),
            payload: serde_json::from_str(&self.payload).unwrap_or_else(|e| {
                warn!("Corrupt payload on notification '{}': {}", self.id, e);
                serde_json::Value::Null
            }),
            status: self.status.parse().unwrap_or_else(|e| {
                warn!("Corrupt status on notification '{}': {}", self.id, e);
                NotificationStatus::Pending
            }),
            created_at: parse_timestamp(&self.created_at),
        }
    }
}

impl CompanyRow {
    pub fn to_company(&self) -> Company {
        Company {
            id: parse_uuid(&self.id, "company id"),
            owner_id: parse_uuid(&self.owner_id, "company owner id"),
            name: self.name.clone(),
            created_at: parse_timestamp(&self.created_at),
        }
    }
}
