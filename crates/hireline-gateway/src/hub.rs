use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::debug;
use uuid::Uuid;

use hireline_types::events::{AckFrame, PresenceStatus, ServerEvent};

use crate::presence::{PresenceChange, PresenceRegistry};

/// Frame queued for a single connection's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    Event(ServerEvent),
    Ack(AckFrame),
}

pub type OutboundSender = mpsc::UnboundedSender<Outbound>;
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

/// Routes events to connections: globally (presence), per user (personal
/// channel) and per conversation room.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    /// Global events; every connection receives these
    broadcast_tx: broadcast::Sender<ServerEvent>,

    presence: PresenceRegistry,

    /// Per-connection outbound queues: connection_id -> sender
    connections: RwLock<HashMap<Uuid, OutboundSender>>,

    /// Conversation rooms: conversation_id -> subscribed connection ids
    rooms: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(HubInner {
                broadcast_tx,
                presence: PresenceRegistry::new(),
                connections: RwLock::new(HashMap::new()),
                rooms: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to global events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: ServerEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a new connection for `user_id`. Returns the connection id, a
    /// sender for frames addressed to it, and the receiving end for its writer.
    pub async fn connect(&self, user_id: Uuid) -> (Uuid, OutboundSender, OutboundReceiver) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.connections.write().await.insert(conn_id, tx.clone());

        if let Some(change) = self.inner.presence.register(user_id, conn_id) {
            self.announce(change);
        }
        (conn_id, tx, rx)
    }

    /// Drop a connection from every room and from presence.
    pub async fn disconnect(&self, conn_id: Uuid) {
        self.inner.connections.write().await.remove(&conn_id);
        {
            let mut rooms = self.inner.rooms.write().await;
            rooms.retain(|_, members| {
                members.remove(&conn_id);
                !members.is_empty()
            });
        }

        if let Some(change) = self.inner.presence.unregister(conn_id) {
            self.announce(change);
        }
    }

    fn announce(&self, change: PresenceChange) {
        let (user_id, status) = match change {
            PresenceChange::Online(user_id) => (user_id, PresenceStatus::Online),
            PresenceChange::Offline(user_id) => (user_id, PresenceStatus::Offline),
        };
        debug!("User {} is now {:?}", user_id, status);
        self.broadcast(ServerEvent::PresenceUpdate { user_id, status });
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.presence.is_online(user_id)
    }

    pub fn connections_of(&self, user_id: Uuid) -> Vec<Uuid> {
        self.inner.presence.connections_of(user_id)
    }

    pub fn online_users(&self) -> Vec<Uuid> {
        self.inner.presence.online_users()
    }

    /// Subscribe a connection to a conversation room. Idempotent; returns true
    /// if the connection was not yet a member.
    pub async fn join_room(&self, conversation_id: Uuid, conn_id: Uuid) -> bool {
        // Lock order is rooms then connections. disconnect removes the
        // connection before sweeping rooms, so a join that sees it live here
        // is swept afterwards.
        let mut rooms = self.inner.rooms.write().await;
        if !self.inner.connections.read().await.contains_key(&conn_id) {
            return false;
        }
        rooms.entry(conversation_id).or_default().insert(conn_id)
    }

    pub async fn in_room(&self, conversation_id: Uuid, conn_id: Uuid) -> bool {
        self.inner
            .rooms
            .read()
            .await
            .get(&conversation_id)
            .is_some_and(|m| m.contains(&conn_id))
    }

    pub async fn room_members(&self, conversation_id: Uuid) -> Vec<Uuid> {
        self.inner
            .rooms
            .read()
            .await
            .get(&conversation_id)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Send an event to every connection in the room, optionally skipping one.
    /// Returns the number of connections the event was queued for.
    pub async fn emit_to_room(
        &self,
        conversation_id: Uuid,
        event: ServerEvent,
        except: Option<Uuid>,
    ) -> usize {
        let members = self.room_members(conversation_id).await;
        let connections = self.inner.connections.read().await;
        let mut sent = 0;
        for conn_id in members.into_iter().filter(|c| Some(*c) != except) {
            if let Some(tx) = connections.get(&conn_id) {
                if tx.send(Outbound::Event(event.clone())).is_ok() {
                    sent += 1;
                }
            }
        }
        sent
    }

    /// Send an event to all of a user's connections (their personal channel).
    pub async fn emit_to_user(&self, user_id: Uuid, event: ServerEvent) -> usize {
        let targets = self.connections_of(user_id);
        let connections = self.inner.connections.read().await;
        let mut sent = 0;
        for conn_id in targets {
            if let Some(tx) = connections.get(&conn_id) {
                if tx.send(Outbound::Event(event.clone())).is_ok() {
                    sent += 1;
                }
            }
        }
        sent
    }
}
