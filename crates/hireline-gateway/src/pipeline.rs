//! Message delivery pipeline: validate, resolve the receiver, persist through
//! the direct-conversation resolver, then broadcast and notify.
//!
//! Everything after persistence is best effort. Once the message row is
//! committed the send has succeeded, whatever happens to the live fan-out.
//! Persistence and fan-out run in their own task, so a caller that goes away
//! mid-send cannot leave a stored message without its broadcast or mailbox
//! entry.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use hireline_db::{Database, direct_key};
use hireline_types::events::{SendPayload, ServerEvent};
use hireline_types::models::Message;

use crate::error::SendError;
use crate::hub::Hub;
use crate::keyed::KeyedLocks;

/// Shared handle to the store and the hub, cloned into every connection.
#[derive(Clone)]
pub struct ChatService {
    db: Arc<Database>,
    hub: Hub,
    notify_timeout: Duration,
    /// Per-pair locks keyed by direct key
    ordering: Arc<KeyedLocks>,
}

impl ChatService {
    pub fn new(db: Arc<Database>, hub: Hub, notify_timeout: Duration) -> Self {
        Self {
            db,
            hub,
            notify_timeout,
            ordering: Arc::new(KeyedLocks::new()),
        }
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    /// Run a store call off the async runtime.
    pub(crate) async fn blocking<F, T>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                anyhow!("store task failed: {}", e)
            })?
    }

    /// Persist a message from `sender_id` (on connection `connection_id`) and
    /// fan it out. Fails only before the message is stored.
    pub async fn send_message(
        &self,
        sender_id: Uuid,
        connection_id: Uuid,
        payload: SendPayload,
    ) -> Result<Message, SendError> {
        if payload.body.trim().is_empty() {
            return Err(SendError::validation("message body is required"));
        }
        let receiver_id = payload
            .receiver_id
            .ok_or_else(|| SendError::validation("receiver_id is required"))?;

        let receiver_id = self
            .resolve_receiver(receiver_id)
            .await?
            .ok_or(SendError::ParticipantNotFound)?;
        if receiver_id == sender_id {
            return Err(SendError::validation("cannot send a message to yourself"));
        }

        // The rest runs detached: dropping the caller after the commit must
        // not cancel the fan-out or the mailbox write.
        let this = self.clone();
        tokio::spawn(async move { this.commit_and_fan_out(sender_id, receiver_id, connection_id, payload).await })
            .await
            .map_err(|e| {
                error!("Send task for {} failed: {}", sender_id, e);
                SendError::Persistence(anyhow!("send task failed: {}", e))
            })?
    }

    async fn commit_and_fan_out(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        connection_id: Uuid,
        payload: SendPayload,
    ) -> Result<Message, SendError> {
        let key = direct_key(&sender_id.to_string(), &receiver_id.to_string());
        let (sender, receiver) = (sender_id.to_string(), receiver_id.to_string());
        let SendPayload { body, meta, conversation_id: requested, .. } = payload;

        // chat:new for a pair goes out in commit order
        let ordering = self.ordering.lock(&key).await;
        let row = self
            .blocking(move |db| db.resolve_or_create(&key, &sender, &receiver, &body, meta.as_ref()))
            .await
            .map_err(|e| {
                error!("Failed to persist message from {}: {:#}", sender_id, e);
                SendError::Persistence(e)
            })?
            .ok_or(SendError::ParticipantNotFound)?;
        let message = row.to_message();

        if requested.is_some_and(|c| c != message.conversation_id) {
            warn!(
                "{} addressed conversation {:?} but the pair resolves to {}",
                sender_id, requested, message.conversation_id
            );
        }
        info!(
            "Message {} stored in {} ({} -> {})",
            message.id, message.conversation_id, sender_id, receiver_id
        );

        self.hub.join_room(message.conversation_id, connection_id).await;
        let live = self
            .hub
            .emit_to_room(message.conversation_id, ServerEvent::ChatNew(message.clone()), None)
            .await;
        drop(ordering);
        debug!("chat:new {} queued for {} connections", message.id, live);

        match tokio::time::timeout(self.notify_timeout, self.deliver_or_notify(&message, receiver_id)).await {
            Ok(Ok(delivery)) => debug!("Message {} delivery: {:?}", message.id, delivery),
            Ok(Err(e)) => error!("Notify step failed for message {}: {:#}", message.id, e),
            Err(_) => error!(
                "Notify step for message {} exceeded {:?}",
                message.id, self.notify_timeout
            ),
        }

        Ok(message)
    }

    /// Map a user or company id onto a user id.
    pub async fn resolve_receiver(&self, id: Uuid) -> Result<Option<Uuid>, SendError> {
        let raw = id.to_string();
        let resolved = self.blocking(move |db| db.resolve_receiver(&raw)).await?;
        Ok(resolved.and_then(|r| r.parse().ok()))
    }

    /// Subscribe a fresh connection to every conversation its user is in.
    pub async fn join_conversations(&self, user_id: Uuid, connection_id: Uuid) -> anyhow::Result<usize> {
        let uid = user_id.to_string();
        let rows = self.blocking(move |db| db.list_conversations_for_user(&uid)).await?;
        let mut joined = 0;
        for row in rows {
            if let Ok(conversation_id) = row.id.parse::<Uuid>() {
                self.hub.join_room(conversation_id, connection_id).await;
                joined += 1;
            }
        }
        Ok(joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fixture, drain_events};
    use hireline_types::models::Role;

    fn payload(receiver: Uuid, body: &str) -> SendPayload {
        SendPayload {
            receiver_id: Some(receiver),
            body: body.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn first_message_creates_conversation_and_reaches_room() {
        let fx = Fixture::new();
        let a = fx.user("a@example.test", Role::Jobseeker);
        let b = fx.user("b@example.test", Role::Employer);
        let (conn_a, _tx, mut rx_a) = fx.chat.hub().connect(a).await;

        let message = fx.chat.send_message(a, conn_a, payload(b, "Hi")).await.unwrap();

        let key = direct_key(&a.to_string(), &b.to_string());
        let conversation = fx.chat.db().find_direct(&key).unwrap().unwrap();
        assert_eq!(conversation, message.conversation_id.to_string());
        assert_eq!(fx.chat.db().count_messages(&conversation).unwrap(), 1);
        assert!(fx.chat.hub().in_room(message.conversation_id, conn_a).await);

        let events = drain_events(&mut rx_a);
        assert!(events.iter().any(|e| matches!(e, ServerEvent::ChatNew(m) if m.id == message.id)));
    }

    #[tokio::test]
    async fn second_message_appends_to_existing_conversation() {
        let fx = Fixture::new();
        let a = fx.user("a@example.test", Role::Jobseeker);
        let b = fx.user("b@example.test", Role::Employer);
        let (conn_a, _tx, _rx) = fx.chat.hub().connect(a).await;

        let first = fx.chat.send_message(a, conn_a, payload(b, "Hi")).await.unwrap();
        let second = fx.chat.send_message(a, conn_a, payload(b, "Still there?")).await.unwrap();

        assert_eq!(first.conversation_id, second.conversation_id);
        let all = fx.chat.db().list_conversations_for_user(&a.to_string()).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(fx.chat.db().count_messages(&all[0].id).unwrap(), 2);
    }

    #[tokio::test]
    async fn invalid_payloads_have_no_side_effects() {
        let fx = Fixture::new();
        let a = fx.user("a@example.test", Role::Jobseeker);
        let b = fx.user("b@example.test", Role::Employer);
        let (conn_a, _tx, _rx) = fx.chat.hub().connect(a).await;

        let err = fx.chat.send_message(a, conn_a, payload(b, "   ")).await.unwrap_err();
        assert!(matches!(err, SendError::Validation(_)));

        let err = fx
            .chat
            .send_message(a, conn_a, SendPayload { body: "Hi".into(), ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Validation(_)));

        let err = fx.chat.send_message(a, conn_a, payload(a, "me")).await.unwrap_err();
        assert!(matches!(err, SendError::Validation(_)));

        let err = fx.chat.send_message(a, conn_a, payload(Uuid::new_v4(), "Hi")).await.unwrap_err();
        assert!(matches!(err, SendError::ParticipantNotFound));

        assert!(fx.chat.db().list_conversations_for_user(&a.to_string()).unwrap().is_empty());
        assert!(fx.chat.db().list_pending_notifications(&b.to_string()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn company_receiver_resolves_to_owner() {
        let fx = Fixture::new();
        let seeker = fx.user("seeker@example.test", Role::Jobseeker);
        let owner = fx.user("owner@acme.test", Role::Employer);
        let company = Uuid::new_v4();
        fx.chat
            .db()
            .create_company(&company.to_string(), &owner.to_string(), "Acme")
            .unwrap();
        let (conn, _tx, _rx) = fx.chat.hub().connect(seeker).await;

        let message = fx.chat.send_message(seeker, conn, payload(company, "Hello Acme")).await.unwrap();

        let participants: Vec<String> = fx
            .chat
            .db()
            .get_participants(&message.conversation_id.to_string())
            .unwrap()
            .into_iter()
            .map(|p| p.user_id)
            .collect();
        assert!(participants.contains(&owner.to_string()));
        assert!(!participants.contains(&company.to_string()));

        let pending = fx.chat.db().list_pending_notifications(&owner.to_string()).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].receiver_id, owner.to_string());
        assert!(fx.chat.db().list_pending_notifications(&company.to_string()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_first_contact_sends_share_one_conversation() {
        let fx = Fixture::new();
        let a = fx.user("a@example.test", Role::Jobseeker);
        let b = fx.user("b@example.test", Role::Employer);
        let (conn_a, _ta, _ra) = fx.chat.hub().connect(a).await;
        let (conn_b, _tb, _rb) = fx.chat.hub().connect(b).await;

        let (ra, rb) = tokio::join!(
            fx.chat.send_message(a, conn_a, payload(b, "from a")),
            fx.chat.send_message(b, conn_b, payload(a, "from b")),
        );
        let (ma, mb) = (ra.unwrap(), rb.unwrap());

        assert_eq!(ma.conversation_id, mb.conversation_id);
        let key = direct_key(&a.to_string(), &b.to_string());
        assert!(fx.chat.db().find_direct(&key).unwrap().is_some());
        assert_eq!(fx.chat.db().list_conversations_for_user(&a.to_string()).unwrap().len(), 1);
        assert_eq!(fx.chat.db().count_messages(&ma.conversation_id.to_string()).unwrap(), 2);
    }

    #[tokio::test]
    async fn abandoned_send_still_reaches_the_mailbox() {
        let fx = Fixture::new();
        let a = fx.user("a@example.test", Role::Jobseeker);
        let b = fx.user("b@example.test", Role::Employer);
        let (conn_a, _tx, _rx) = fx.chat.hub().connect(a).await;

        let chat = fx.chat.clone();
        let handle = tokio::spawn(async move { chat.send_message(a, conn_a, payload(b, "Hi")).await });

        // Give up on the send as soon as the conversation is committed
        let key = direct_key(&a.to_string(), &b.to_string());
        while fx.chat.db().find_direct(&key).unwrap().is_none() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        handle.abort();

        let receiver = b.to_string();
        let pending = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let pending = fx.chat.db().list_pending_notifications(&receiver).unwrap();
                if !pending.is_empty() {
                    return pending;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("mailbox entry never written");
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn chat_new_follows_commit_order() {
        let fx = Fixture::new();
        let a = fx.user("a@example.test", Role::Jobseeker);
        let b = fx.user("b@example.test", Role::Employer);
        let (conn_a, _ta, mut rx_a) = fx.chat.hub().connect(a).await;
        let (conn_b, _tb, _rb) = fx.chat.hub().connect(b).await;

        let first = fx.chat.send_message(a, conn_a, payload(b, "opening")).await.unwrap();
        let conversation = first.conversation_id;
        assert!(fx.chat.hub().in_room(conversation, conn_b).await);
        drain_events(&mut rx_a);

        let mut sends = Vec::new();
        for i in 0..20 {
            let chat = fx.chat.clone();
            let (from, conn, to) = if i % 2 == 0 { (a, conn_a, b) } else { (b, conn_b, a) };
            sends.push(tokio::spawn(async move {
                chat.send_message(from, conn, payload(to, &format!("message {}", i))).await
            }));
        }
        for send in sends {
            send.await.unwrap().unwrap();
        }

        let broadcast: Vec<String> = drain_events(&mut rx_a)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::ChatNew(m) => Some(m.id.to_string()),
                _ => None,
            })
            .collect();
        let stored: Vec<String> = fx
            .chat
            .db()
            .recent_messages(&conversation.to_string(), 100)
            .unwrap()
            .into_iter()
            .skip(1)
            .map(|m| m.id)
            .collect();
        assert_eq!(broadcast.len(), 20);
        assert_eq!(broadcast, stored);
    }

    #[tokio::test]
    async fn reconnecting_user_rejoins_existing_rooms() {
        let fx = Fixture::new();
        let a = fx.user("a@example.test", Role::Jobseeker);
        let b = fx.user("b@example.test", Role::Employer);
        let (conn_a, _tx, _rx) = fx.chat.hub().connect(a).await;
        let message = fx.chat.send_message(a, conn_a, payload(b, "Hi")).await.unwrap();

        let (conn_b, _tb, _rb) = fx.chat.hub().connect(b).await;
        assert_eq!(fx.chat.join_conversations(b, conn_b).await.unwrap(), 1);
        assert!(fx.chat.hub().in_room(message.conversation_id, conn_b).await);
    }
}
