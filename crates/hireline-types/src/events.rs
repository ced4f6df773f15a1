use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, Role};

/// Longest body prefix carried by notifications and toasts.
pub const SNIPPET_CHARS: usize = 200;

/// First [`SNIPPET_CHARS`] characters of a message body.
pub fn body_snippet(body: &str) -> String {
    body.chars().take(SNIPPET_CHARS).collect()
}

/// Events sent FROM server TO client over the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    /// Handshake accepted; sent once per connection before anything else
    #[serde(rename = "ready")]
    Ready {
        user_id: Uuid,
        role: Role,
        connection_id: Uuid,
    },

    /// A message was persisted in a conversation this connection is subscribed to
    #[serde(rename = "chat:new")]
    ChatNew(Message),

    /// A participant advanced their read marker
    #[serde(rename = "chat:read")]
    ChatRead { conversation_id: Uuid, user_id: Uuid },

    #[serde(rename = "typing")]
    Typing { conversation_id: Uuid, from: Uuid },

    #[serde(rename = "typing:stop")]
    TypingStop { conversation_id: Uuid, from: Uuid },

    /// A user's first connection opened or last connection closed
    #[serde(rename = "presence:update")]
    PresenceUpdate { user_id: Uuid, status: PresenceStatus },

    /// Summary pushed to the receiver's personal channel
    #[serde(rename = "notification")]
    Notification(NotificationSummary),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSummary {
    #[serde(rename = "type")]
    pub kind: String,
    pub conversation_id: Uuid,
    pub message: MessageSnippet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSnippet {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub body_snippet: String,
    pub created_at: DateTime<Utc>,
}

impl NotificationSummary {
    pub fn new_message(message: &Message) -> Self {
        Self {
            kind: "new_message".to_string(),
            conversation_id: message.conversation_id,
            message: MessageSnippet {
                id: message.id,
                sender_id: message.sender_id,
                body_snippet: body_snippet(&message.body),
                created_at: message.created_at,
            },
        }
    }
}

/// Reply to an acknowledged client request. Exactly one is sent per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_read_at: Option<DateTime<Utc>>,
}

impl AckReply {
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: None,
            message: None,
            conversation_id: None,
            last_read_at: None,
        }
    }

    pub fn sent(message: Message) -> Self {
        Self {
            conversation_id: Some(message.conversation_id),
            message: Some(message),
            ..Self::ok()
        }
    }

    pub fn read(conversation_id: Uuid, last_read_at: DateTime<Utc>) -> Self {
        Self {
            conversation_id: Some(conversation_id),
            last_read_at: Some(last_read_at),
            ..Self::ok()
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(reason.into()),
            ..Self::ok()
        }
    }
}

/// Wire frame carrying an [`AckReply`] back to the requesting connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckFrame {
    #[serde(rename = "type")]
    pub kind: String,
    pub ack: u64,
    pub data: AckReply,
}

impl AckFrame {
    pub fn new(ack: u64, data: AckReply) -> Self {
        Self {
            kind: "ack".to_string(),
            ack,
            data,
        }
    }
}

/// Raw inbound frame: `{ "type": "...", "data": {...}, "ack": 7 }`.
///
/// The event name and payload are decoded in two steps so that a frame with a
/// bad payload can still be acknowledged with an error.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientFrame {
    #[serde(rename = "type")]
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub ack: Option<u64>,
}

/// Commands sent FROM client TO server.
#[derive(Debug, Clone)]
pub enum ClientCommand {
    Send(SendPayload),
    MarkRead(ConversationRef),
    TypingStart(ConversationRef),
    TypingStop(ConversationRef),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameError {
    UnknownEvent(String),
    EmptyPayload,
    BadPayload(String),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownEvent(name) => write!(f, "unknown event '{}'", name),
            Self::EmptyPayload => f.write_str("empty payload"),
            Self::BadPayload(reason) => write!(f, "malformed payload: {}", reason),
        }
    }
}

impl std::error::Error for FrameError {}

impl ClientFrame {
    pub fn command(&self) -> Result<ClientCommand, FrameError> {
        match self.event.as_str() {
            "chat:send" => self.payload().map(ClientCommand::Send),
            "chat:markRead" => self.payload().map(ClientCommand::MarkRead),
            "typing:start" => self.payload().map(ClientCommand::TypingStart),
            "typing:stop" => self.payload().map(ClientCommand::TypingStop),
            other => Err(FrameError::UnknownEvent(other.to_string())),
        }
    }

    fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, FrameError> {
        match &self.data {
            serde_json::Value::Null => Err(FrameError::EmptyPayload),
            serde_json::Value::Object(map) if map.is_empty() => Err(FrameError::EmptyPayload),
            data => serde_json::from_value(data.clone())
                .map_err(|e| FrameError::BadPayload(e.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendPayload {
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    /// A user id, or a company id that resolves to the company's owner.
    #[serde(default)]
    pub receiver_id: Option<Uuid>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationRef {
    pub conversation_id: Uuid,
}
