use tracing::debug;
use uuid::Uuid;

use hireline_db::models::parse_uuid;
use hireline_types::events::{NotificationSummary, ServerEvent, body_snippet};
use hireline_types::models::{Message, NotificationType};

use crate::pipeline::ChatService;

/// How a persisted message reached its receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Receiver online: these connections were subscribed to the room.
    Live { connections: usize },
    /// Receiver offline: a PENDING mailbox entry was written.
    Mailbox { notification_id: Uuid },
}

impl ChatService {
    /// Live delivery when the receiver has a connection, mailbox otherwise.
    /// Either way a summary goes to the receiver's personal channel.
    pub async fn deliver_or_notify(
        &self,
        message: &Message,
        receiver_id: Uuid,
    ) -> anyhow::Result<Delivery> {
        let delivery = if self.hub().is_online(receiver_id) {
            let connections = self.hub().connections_of(receiver_id);
            for conn_id in &connections {
                self.hub().join_room(message.conversation_id, *conn_id).await;
            }
            Delivery::Live {
                connections: connections.len(),
            }
        } else {
            let payload = serde_json::json!({
                "conversation_id": message.conversation_id,
                "message_id": message.id,
                "sender_id": message.sender_id,
                "body_snippet": body_snippet(&message.body),
            });
            let receiver = receiver_id.to_string();
            let row = self
                .blocking(move |db| {
                    db.create_notification(&receiver, NotificationType::NewMessage, &payload)
                })
                .await?;
            debug!("Receiver {} offline, queued notification {}", receiver_id, row.id);
            Delivery::Mailbox {
                notification_id: parse_uuid(&row.id, "notification id"),
            }
        };

        self.hub()
            .emit_to_user(
                receiver_id,
                ServerEvent::Notification(NotificationSummary::new_message(message)),
            )
            .await;

        Ok(delivery)
    }
}
