//! Single-assignment acknowledgement for client requests.
//!
//! `send` consumes the [`Ack`], so a second reply cannot be written. If the
//! handler returns without replying, dropping the ack sends a failure so the
//! client is never left waiting.

use tracing::trace;

use hireline_types::events::{AckFrame, AckReply};

use crate::hub::{Outbound, OutboundSender};

pub struct Ack {
    id: Option<u64>,
    tx: OutboundSender,
    done: bool,
}

impl Ack {
    /// `id` is the client's ack id; requests without one are answered silently.
    pub fn new(tx: OutboundSender, id: Option<u64>) -> Self {
        Self { id, tx, done: false }
    }

    pub fn send(mut self, reply: AckReply) {
        self.deliver(reply);
    }

    fn deliver(&mut self, reply: AckReply) {
        if self.done {
            return;
        }
        self.done = true;
        if let Some(id) = self.id {
            trace!("ack {} ok={}", id, reply.ok);
            let _ = self.tx.send(Outbound::Ack(AckFrame::new(id, reply)));
        }
    }
}

impl Drop for Ack {
    fn drop(&mut self) {
        self.deliver(AckReply::error("no response"));
    }
}
