use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use uuid::Uuid;

use hireline_api::AppState;
use hireline_api::auth::create_token;
use hireline_server::config::ServerConfig;
use hireline_server::{build_app, build_state, serve};
use hireline_types::models::Role;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SECRET: &str = "gateway-test-secret";

struct Server {
    _dir: TempDir,
    addr: SocketAddr,
    state: AppState,
}

async fn start() -> Server {
    let dir = TempDir::new().unwrap();
    let config = ServerConfig {
        jwt_secret: SECRET.into(),
        db_path: dir.path().join("gateway.db"),
        host: "127.0.0.1".into(),
        port: 0,
        notify_timeout: Duration::from_secs(5),
        db_busy_timeout: Duration::from_secs(5),
        history_preview: 20,
    };
    let state = build_state(&config).unwrap();
    let app = build_app(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, app));

    Server { _dir: dir, addr, state }
}

impl Server {
    fn user(&self, email: &str, role: Role) -> (Uuid, String) {
        let id = Uuid::new_v4();
        self.state.db.create_user(&id.to_string(), email, "hash", role).unwrap();
        (id, create_token(SECRET, id, role).unwrap())
    }

    async fn connect_query(&self, token: &str) -> Ws {
        let url = format!("ws://{}/gateway?token={}", self.addr, token);
        connect_async(url).await.unwrap().0
    }

    async fn connect_header(&self, token: &str) -> Ws {
        let mut request = format!("ws://{}/gateway", self.addr).into_client_request().unwrap();
        request
            .headers_mut()
            .insert("Authorization", format!("Bearer {}", token).parse().unwrap());
        connect_async(request).await.unwrap().0
    }
}

async fn next_json(ws: &mut Ws) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Skip frames until one matches.
async fn wait_for(ws: &mut Ws, pred: impl Fn(&Value) -> bool) -> Value {
    loop {
        let frame = next_json(ws).await;
        if pred(&frame) {
            return frame;
        }
    }
}

fn presence(user: Uuid, status: &'static str) -> impl Fn(&Value) -> bool {
    move |f| {
        f["type"] == "presence:update"
            && f["data"]["user_id"] == user.to_string()
            && f["data"]["status"] == status
    }
}

#[tokio::test]
async fn handshake_without_valid_token_is_rejected() {
    let server = start().await;

    for url in [
        format!("ws://{}/gateway", server.addr),
        format!("ws://{}/gateway?token=not-a-jwt", server.addr),
    ] {
        match connect_async(url).await {
            Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 401),
            other => panic!("expected 401, got {:?}", other.map(|(_, r)| r.status())),
        }
    }
    assert!(server.state.chat.hub().online_users().is_empty());
}

#[tokio::test]
async fn send_ack_delivery_and_presence_end_to_end() {
    let server = start().await;
    let (a, token_a) = server.user("a@example.test", Role::Jobseeker);
    let (b, token_b) = server.user("b@example.test", Role::Employer);

    let mut ws_a = server.connect_query(&token_a).await;
    let ready = next_json(&mut ws_a).await;
    assert_eq!(ready["type"], "ready");
    assert_eq!(ready["data"]["user_id"], a.to_string());
    assert_eq!(ready["data"]["role"], "JOBSEEKER");

    let mut ws_b = server.connect_header(&token_b).await;
    let ready = next_json(&mut ws_b).await;
    assert_eq!(ready["type"], "ready");
    // b's greeting includes a, who was already online
    wait_for(&mut ws_b, presence(a, "online")).await;
    wait_for(&mut ws_a, presence(b, "online")).await;

    let send = json!({
        "type": "chat:send",
        "data": { "receiver_id": b, "body": "Hello from a" },
        "ack": 1
    });
    ws_a.send(Message::Text(send.to_string().into())).await.unwrap();

    let ack = wait_for(&mut ws_a, |f| f["type"] == "ack").await;
    assert_eq!(ack["ack"], 1);
    assert_eq!(ack["data"]["ok"], true);
    assert_eq!(ack["data"]["message"]["body"], "Hello from a");
    let conversation = ack["data"]["conversation_id"].as_str().unwrap().to_string();

    let toast = wait_for(&mut ws_b, |f| f["type"] == "notification").await;
    assert_eq!(toast["data"]["type"], "new_message");
    assert_eq!(toast["data"]["conversation_id"], conversation);
    assert_eq!(toast["data"]["message"]["body_snippet"], "Hello from a");

    // b was joined to the room, so the reply reaches a as chat:new
    let reply = json!({
        "type": "chat:send",
        "data": { "receiver_id": a, "body": "Hi a" },
        "ack": 2
    });
    ws_b.send(Message::Text(reply.to_string().into())).await.unwrap();
    let ack = wait_for(&mut ws_b, |f| f["type"] == "ack").await;
    assert_eq!(ack["data"]["conversation_id"], conversation);
    let new = wait_for(&mut ws_a, |f| f["type"] == "chat:new" && f["data"]["sender_id"] == b.to_string()).await;
    assert_eq!(new["data"]["body"], "Hi a");
    assert_eq!(new["data"]["sender_id"], b.to_string());

    // Online receivers get no mailbox entry
    assert!(server.state.db.list_pending_notifications(&b.to_string()).unwrap().is_empty());

    ws_b.close(None).await.unwrap();
    wait_for(&mut ws_a, presence(b, "offline")).await;
    assert!(!server.state.chat.hub().is_online(b));
    assert!(server.state.chat.hub().is_online(a));
}

#[tokio::test]
async fn malformed_frame_is_acked_and_connection_survives() {
    let server = start().await;
    let (_, token) = server.user("a@example.test", Role::Jobseeker);
    let mut ws = server.connect_query(&token).await;
    next_json(&mut ws).await;

    let bad = json!({ "type": "chat:send", "data": {}, "ack": 7 });
    ws.send(Message::Text(bad.to_string().into())).await.unwrap();
    let ack = wait_for(&mut ws, |f| f["type"] == "ack").await;
    assert_eq!(ack["ack"], 7);
    assert_eq!(ack["data"]["ok"], false);

    let unknown = json!({ "type": "chat:markRead", "data": { "conversation_id": Uuid::new_v4() }, "ack": 8 });
    ws.send(Message::Text(unknown.to_string().into())).await.unwrap();
    let ack = wait_for(&mut ws, |f| f["type"] == "ack").await;
    assert_eq!(ack["ack"], 8);
    assert_eq!(ack["data"]["error"], "conversation not found");
}
