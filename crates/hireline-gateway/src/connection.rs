use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use hireline_types::events::{
    AckReply, ClientCommand, ClientFrame, ConversationRef, PresenceStatus, ServerEvent,
};
use hireline_types::models::AuthenticatedUser;

use crate::ack::Ack;
use crate::hub::{Hub, Outbound, OutboundReceiver, OutboundSender};
use crate::pipeline::ChatService;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

type WsSink = SplitSink<WebSocket, Message>;

/// Drive one authenticated WebSocket until either side goes away.
/// The credential was verified at the HTTP upgrade, so the first frame we
/// write is `ready`.
pub async fn handle_connection(socket: WebSocket, chat: ChatService, user: AuthenticatedUser) {
    let (mut sender, receiver) = socket.split();
    let hub = chat.hub().clone();

    let (broadcast_rx, existing) = presence_snapshot(&hub, user.id);
    let (conn_id, tx, user_rx) = hub.connect(user.id).await;
    info!("{} ({}) connected to gateway as {}", user.id, user.role, conn_id);

    let ready = ServerEvent::Ready {
        user_id: user.id,
        role: user.role,
        connection_id: conn_id,
    };
    let mut greeting = vec![ready];
    greeting.extend(existing.into_iter().map(|user_id| ServerEvent::PresenceUpdate {
        user_id,
        status: PresenceStatus::Online,
    }));
    for event in &greeting {
        if !write_json(&mut sender, event).await {
            hub.disconnect(conn_id).await;
            return;
        }
    }

    match chat.join_conversations(user.id, conn_id).await {
        Ok(n) => debug!("{} joined {} conversation rooms", conn_id, n),
        Err(e) => warn!("Failed to join rooms for {}: {:#}", user.id, e),
    }

    run_connection_loop(sender, receiver, broadcast_rx, user_rx, tx, chat, user, conn_id).await;

    hub.disconnect(conn_id).await;
    info!("{} ({}) disconnected from gateway", user.id, conn_id);
}

/// Subscribe to presence changes, then list who is already online besides
/// `user_id`. Anyone coming online after the subscription shows up on the
/// receiver, so the greeting can only repeat a user, never miss one.
pub(crate) fn presence_snapshot(hub: &Hub, user_id: Uuid) -> (broadcast::Receiver<ServerEvent>, Vec<Uuid>) {
    let broadcast_rx = hub.subscribe();
    let existing = hub.online_users().into_iter().filter(|u| *u != user_id).collect();
    (broadcast_rx, existing)
}

#[allow(clippy::too_many_arguments)]
async fn run_connection_loop(
    mut sender: WsSink,
    mut receiver: SplitStream<WebSocket>,
    mut broadcast_rx: broadcast::Receiver<ServerEvent>,
    mut user_rx: OutboundReceiver,
    tx: OutboundSender,
    chat: ChatService,
    user: AuthenticatedUser,
    conn_id: Uuid,
) {
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };
                    if !write_json(&mut sender, &event).await {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let sent = match result {
                        Some(Outbound::Event(event)) => write_json(&mut sender, &event).await,
                        Some(Outbound::Ack(frame)) => write_json(&mut sender, &frame).await,
                        None => break,
                    };
                    if !sent {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => handle_text(&chat, user, conn_id, &tx, text.as_str()).await,
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

/// Serialize and write one frame. Returns false once the socket is gone.
async fn write_json<T: Serialize>(sender: &mut WsSink, value: &T) -> bool {
    match serde_json::to_string(value) {
        Ok(text) => sender.send(Message::Text(text.into())).await.is_ok(),
        Err(e) => {
            warn!("Dropping unserializable frame: {}", e);
            true
        }
    }
}

pub(crate) async fn handle_text(
    chat: &ChatService,
    user: AuthenticatedUser,
    conn_id: Uuid,
    tx: &OutboundSender,
    text: &str,
) {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => dispatch(chat, user, conn_id, tx, frame).await,
        Err(e) => {
            warn!(
                "{} bad frame: {} -- raw: {}",
                user.id,
                e,
                text.chars().take(200).collect::<String>()
            );
            let ack_id = serde_json::from_str::<serde_json::Value>(text)
                .ok()
                .and_then(|v| v.get("ack").and_then(|a| a.as_u64()));
            Ack::new(tx.clone(), ack_id).send(AckReply::error("malformed frame"));
        }
    }
}

/// Route one parsed frame and answer its ack exactly once.
pub(crate) async fn dispatch(
    chat: &ChatService,
    user: AuthenticatedUser,
    conn_id: Uuid,
    tx: &OutboundSender,
    frame: ClientFrame,
) {
    let ack = Ack::new(tx.clone(), frame.ack);
    let command = match frame.command() {
        Ok(command) => command,
        Err(e) => {
            warn!("{} rejected '{}' frame: {}", user.id, frame.event, e);
            ack.send(AckReply::error(e.to_string()));
            return;
        }
    };

    match command {
        ClientCommand::Send(payload) => match chat.send_message(user.id, conn_id, payload).await {
            Ok(message) => ack.send(AckReply::sent(message)),
            Err(e) => {
                debug!("chat:send from {} failed: {}", user.id, e);
                ack.send(AckReply::error(e.to_string()));
            }
        },
        ClientCommand::MarkRead(ConversationRef { conversation_id }) => {
            match chat.mark_read(user.id, conversation_id).await {
                Ok(at) => ack.send(AckReply::read(conversation_id, at)),
                Err(e) => ack.send(AckReply::error(e.to_string())),
            }
        }
        ClientCommand::TypingStart(ConversationRef { conversation_id }) => {
            chat.typing(user.id, conn_id, conversation_id, true).await;
            ack.send(AckReply::ok());
        }
        ClientCommand::TypingStop(ConversationRef { conversation_id }) => {
            chat.typing(user.id, conn_id, conversation_id, false).await;
            ack.send(AckReply::ok());
        }
    }
}
