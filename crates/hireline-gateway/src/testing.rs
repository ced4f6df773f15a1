use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use uuid::Uuid;

use hireline_db::Database;
use hireline_types::events::{AckFrame, ServerEvent};
use hireline_types::models::Role;

use crate::hub::{Hub, Outbound, OutboundReceiver};
use crate::pipeline::ChatService;

pub struct Fixture {
    _dir: TempDir,
    pub chat: ChatService,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let db = Database::open(&dir.path().join("chat.db"), Duration::from_secs(5)).unwrap();
        let chat = ChatService::new(Arc::new(db), Hub::new(), Duration::from_secs(5));
        Self { _dir: dir, chat }
    }

    pub fn user(&self, email: &str, role: Role) -> Uuid {
        let id = Uuid::new_v4();
        self.chat.db().create_user(&id.to_string(), email, "hash", role).unwrap();
        id
    }
}

pub fn drain(rx: &mut OutboundReceiver) -> Vec<Outbound> {
    let mut out = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        out.push(frame);
    }
    out
}

pub fn drain_events(rx: &mut OutboundReceiver) -> Vec<ServerEvent> {
    drain(rx)
        .into_iter()
        .filter_map(|f| match f {
            Outbound::Event(e) => Some(e),
            Outbound::Ack(_) => None,
        })
        .collect()
}

pub fn drain_acks(rx: &mut OutboundReceiver) -> Vec<AckFrame> {
    drain(rx)
        .into_iter()
        .filter_map(|f| match f {
            Outbound::Ack(a) => Some(a),
            Outbound::Event(_) => None,
        })
        .collect()
}
