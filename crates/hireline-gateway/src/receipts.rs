use chrono::{DateTime, Utc};
use tracing::trace;
use uuid::Uuid;

use hireline_db::format_timestamp;
use hireline_db::models::parse_timestamp;
use hireline_types::events::ServerEvent;

use crate::error::SendError;
use crate::pipeline::ChatService;

impl ChatService {
    /// Advance the user's read marker and tell the room. Repeating the call
    /// only moves the timestamp forward.
    pub async fn mark_read(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<DateTime<Utc>, SendError> {
        let at = format_timestamp(&Utc::now());
        let (conv, user, stamp) = (conversation_id.to_string(), user_id.to_string(), at.clone());

        let updated = self
            .blocking(move |db| {
                if db.get_conversation(&conv)?.is_none() {
                    return Ok(None);
                }
                Ok(Some(db.mark_read(&conv, &user, &stamp)?))
            })
            .await?;

        match updated {
            None => return Err(SendError::ConversationNotFound),
            Some(false) => return Err(SendError::NotParticipant),
            Some(true) => {}
        }

        self.hub()
            .emit_to_room(
                conversation_id,
                ServerEvent::ChatRead {
                    conversation_id,
                    user_id,
                },
                None,
            )
            .await;

        Ok(parse_timestamp(&at))
    }

    /// Relay a typing indicator to the rest of the room. Never persisted;
    /// dropped when the origin connection is not subscribed to the room.
    pub async fn typing(
        &self,
        user_id: Uuid,
        connection_id: Uuid,
        conversation_id: Uuid,
        active: bool,
    ) -> usize {
        if !self.hub().in_room(conversation_id, connection_id).await {
            trace!("typing from {} dropped: not in room {}", connection_id, conversation_id);
            return 0;
        }
        let event = if active {
            ServerEvent::Typing {
                conversation_id,
                from: user_id,
            }
        } else {
            ServerEvent::TypingStop {
                conversation_id,
                from: user_id,
            }
        };
        self.hub()
            .emit_to_room(conversation_id, event, Some(connection_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fixture, drain_events};
    use hireline_types::events::SendPayload;
    use hireline_types::models::Role;

    #[tokio::test]
    async fn mark_read_is_idempotent_and_broadcast() {
        let fx = Fixture::new();
        let a = fx.user("a@example.test", Role::Jobseeker);
        let b = fx.user("b@example.test", Role::Employer);
        let (conn_a, _ta, mut rx_a) = fx.chat.hub().connect(a).await;
        let message = fx
            .chat
            .send_message(
                a,
                conn_a,
                SendPayload { receiver_id: Some(b), body: "Hi".into(), ..Default::default() },
            )
            .await
            .unwrap();
        let conv = message.conversation_id;
        drain_events(&mut rx_a);

        let first = fx.chat.mark_read(b, conv).await.unwrap();
        let second = fx.chat.mark_read(b, conv).await.unwrap();
        assert!(second >= first);

        let rows: Vec<_> = fx
            .chat
            .db()
            .get_participants(&conv.to_string())
            .unwrap()
            .into_iter()
            .filter(|p| p.user_id == b.to_string())
            .collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].to_summary().last_read_at, Some(second));

        let reads = drain_events(&mut rx_a)
            .into_iter()
            .filter(|e| matches!(e, ServerEvent::ChatRead { user_id, .. } if *user_id == b))
            .count();
        assert_eq!(reads, 2);
    }

    #[tokio::test]
    async fn mark_read_rejects_unknown_conversation_and_outsiders() {
        let fx = Fixture::new();
        let a = fx.user("a@example.test", Role::Jobseeker);
        let b = fx.user("b@example.test", Role::Employer);
        let outsider = fx.user("c@example.test", Role::Jobseeker);
        let (conn_a, _ta, _ra) = fx.chat.hub().connect(a).await;
        let message = fx
            .chat
            .send_message(
                a,
                conn_a,
                SendPayload { receiver_id: Some(b), body: "Hi".into(), ..Default::default() },
            )
            .await
            .unwrap();

        let err = fx.chat.mark_read(a, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, SendError::ConversationNotFound));
        let err = fx.chat.mark_read(outsider, message.conversation_id).await.unwrap_err();
        assert!(matches!(err, SendError::NotParticipant));
    }

    #[tokio::test]
    async fn typing_never_echoes_to_its_origin() {
        let fx = Fixture::new();
        let a = fx.user("a@example.test", Role::Jobseeker);
        let b = fx.user("b@example.test", Role::Employer);
        let (conn_a, _ta, mut rx_a) = fx.chat.hub().connect(a).await;
        let (second_tab, _ta2, mut rx_a2) = fx.chat.hub().connect(a).await;
        let (_conn_b, _tb, mut rx_b) = fx.chat.hub().connect(b).await;
        let message = fx
            .chat
            .send_message(
                a,
                conn_a,
                SendPayload { receiver_id: Some(b), body: "Hi".into(), ..Default::default() },
            )
            .await
            .unwrap();
        fx.chat.hub().join_room(message.conversation_id, second_tab).await;
        drain_events(&mut rx_a);
        drain_events(&mut rx_a2);
        drain_events(&mut rx_b);

        let reached = fx.chat.typing(a, conn_a, message.conversation_id, true).await;
        assert_eq!(reached, 2);
        assert!(drain_events(&mut rx_a).is_empty());
        assert!(matches!(drain_events(&mut rx_a2)[..], [ServerEvent::Typing { .. }]));
        assert!(matches!(
            drain_events(&mut rx_b)[..],
            [ServerEvent::Typing { from, .. }] if from == a
        ));

        fx.chat.typing(a, conn_a, message.conversation_id, false).await;
        assert!(matches!(drain_events(&mut rx_b)[..], [ServerEvent::TypingStop { .. }]));
    }

    #[tokio::test]
    async fn typing_outside_a_room_is_dropped() {
        let fx = Fixture::new();
        let a = fx.user("a@example.test", Role::Jobseeker);
        let (conn_a, _ta, _ra) = fx.chat.hub().connect(a).await;
        assert_eq!(fx.chat.typing(a, conn_a, Uuid::new_v4(), true).await, 0);
    }
}
