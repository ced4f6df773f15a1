use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use hireline_db::Database;
use hireline_db::models::{ConversationRow, parse_timestamp, parse_uuid};
use hireline_db::format_timestamp;
use hireline_types::api::ConversationResponse;
use hireline_types::models::{AuthenticatedUser, Message};

use crate::{AppState, blocking};

const MAX_PAGE: u32 = 200;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// How many recent messages to embed per conversation.
    pub preview: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor: the `created_at` of the oldest message already held.
    pub before: Option<DateTime<Utc>>,
}

fn default_limit() -> u32 {
    50
}

fn to_response(db: &Database, row: ConversationRow, preview: u32) -> anyhow::Result<ConversationResponse> {
    let participants = db
        .get_participants(&row.id)?
        .iter()
        .map(|p| p.to_summary())
        .collect();
    let messages = if preview == 0 {
        Vec::new()
    } else {
        db.recent_messages(&row.id, preview)?
            .iter()
            .map(|m| m.to_message())
            .collect()
    };

    Ok(ConversationResponse {
        id: parse_uuid(&row.id, "conversation id"),
        is_direct: row.is_direct,
        created_at: parse_timestamp(&row.created_at),
        updated_at: parse_timestamp(&row.updated_at),
        participants,
        messages,
    })
}

/// Fails with 404 for an unknown conversation and 403 for an outsider.
fn ensure_member(db: &Database, conversation_id: &str, user_id: &str) -> anyhow::Result<Result<ConversationRow, StatusCode>> {
    let Some(row) = db.get_conversation(conversation_id)? else {
        return Ok(Err(StatusCode::NOT_FOUND));
    };
    if !db.is_participant(conversation_id, user_id)? {
        return Ok(Err(StatusCode::FORBIDDEN));
    }
    Ok(Ok(row))
}

/// GET /conversations: the caller's threads, most recently active first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let preview = query.preview.unwrap_or(state.history_preview).min(MAX_PAGE);
    let uid = user.id.to_string();

    let conversations = blocking(&state, move |db| {
        db.list_conversations_for_user(&uid)?
            .into_iter()
            .map(|row| to_response(db, row, preview))
            .collect::<anyhow::Result<Vec<_>>>()
    })
    .await?;

    Ok(Json(conversations))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let preview = state.history_preview;
    let (cid, uid) = (conversation_id.to_string(), user.id.to_string());

    let conversation = blocking(&state, move |db| {
        match ensure_member(db, &cid, &uid)? {
            Ok(row) => Ok(Ok(to_response(db, row, preview)?)),
            Err(status) => Ok(Err(status)),
        }
    })
    .await??;

    Ok(Json(conversation))
}

/// GET /conversations/{id}/messages: one page of history, oldest first.
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let limit = query.limit.clamp(1, MAX_PAGE);
    let before = query.before.as_ref().map(format_timestamp);
    let (cid, uid) = (conversation_id.to_string(), user.id.to_string());

    let messages: Vec<Message> = blocking(&state, move |db| {
        if let Err(status) = ensure_member(db, &cid, &uid)? {
            return Ok(Err(status));
        }
        let rows = db.messages_before(&cid, before.as_deref(), limit)?;
        Ok(Ok(rows.iter().map(|m| m.to_message()).collect()))
    })
    .await??;

    Ok(Json(messages))
}
