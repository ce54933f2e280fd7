//! In-process message server for transport, api, and session tests.
//!
//! Serves the websocket on `/socket` and the conversation list on `/chat`,
//! both behind `Authorization: Bearer test-token`. Conversations are kept as
//! raw JSON in the server's wire shape (`_id`, `createdAt`, `type`).

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use frames::Frame;
use serde_json::{Value, json};
use tokio::sync::broadcast;

use crate::config::{BackoffConfig, SessionConfig};
use crate::credential::Credential;
use crate::events::{
    INITIALIZE_CONVERSATION, JOIN_OLD_CONVERSATIONS, MARK_MESSAGE_AS_SEEN, SEND_MESSAGE, USER_CONNECT,
};

pub(crate) const TOKEN: &str = "test-token";

#[derive(Clone)]
pub(crate) struct MockState {
    conversations: Arc<Mutex<Vec<Value>>>,
    received: Arc<Mutex<Vec<Frame>>>,
    silent: Arc<Mutex<HashSet<String>>>,
    rejected: Arc<Mutex<HashSet<String>>>,
    list_in_connect_ack: Arc<AtomicBool>,
    list_unavailable: Arc<AtomicBool>,
    connections: Arc<AtomicUsize>,
    push: broadcast::Sender<Frame>,
    kick: broadcast::Sender<()>,
}

pub(crate) struct MockServer {
    addr: SocketAddr,
    state: MockState,
}

impl MockServer {
    pub(crate) async fn start(conversations: Vec<Value>) -> Self {
        let (push, _) = broadcast::channel(64);
        let (kick, _) = broadcast::channel(4);
        let state = MockState {
            conversations: Arc::new(Mutex::new(conversations)),
            received: Arc::default(),
            silent: Arc::default(),
            rejected: Arc::default(),
            list_in_connect_ack: Arc::new(AtomicBool::new(true)),
            list_unavailable: Arc::default(),
            connections: Arc::default(),
            push,
            kick,
        };

        let app = Router::new()
            .route("/socket", get(socket_handler))
            .route("/chat", get(chat_handler))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind mock server");
        let addr = listener.local_addr().expect("mock server addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state }
    }

    pub(crate) fn socket_url(&self) -> String {
        format!("ws://{}/socket", self.addr)
    }

    pub(crate) fn api_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Session config pointed at this server with fast retries.
    pub(crate) fn config(&self) -> SessionConfig {
        let mut config = SessionConfig::new(self.socket_url(), self.api_url());
        config.ack_timeout = Duration::from_millis(300);
        config.backoff = BackoffConfig {
            initial: Duration::from_millis(20),
            max: Duration::from_millis(100),
            jitter: false,
        };
        config
    }

    pub(crate) fn credential() -> Credential {
        Credential::new(TOKEN)
    }

    /// Broadcast a server-initiated frame to every open socket.
    pub(crate) fn push(&self, frame: Frame) {
        let _ = self.state.push.send(frame);
    }

    /// Close every open socket from the server side.
    pub(crate) fn kick(&self) {
        let _ = self.state.kick.send(());
    }

    /// Never acknowledge `event`.
    pub(crate) fn silence(&self, event: &str) {
        self.state.silent.lock().expect("silent lock").insert(event.to_owned());
    }

    /// Acknowledge `event` with an error frame.
    pub(crate) fn reject(&self, event: &str) {
        self.state.rejected.lock().expect("rejected lock").insert(event.to_owned());
    }

    /// Acknowledge `USER_CONNECT` without a conversation list.
    pub(crate) fn omit_list_from_connect_ack(&self) {
        self.state.list_in_connect_ack.store(false, Ordering::SeqCst);
    }

    /// Answer `GET /chat` with 503 from now on.
    pub(crate) fn take_list_offline(&self) {
        self.state.list_unavailable.store(true, Ordering::SeqCst);
    }

    pub(crate) fn received(&self, event: &str) -> Vec<Frame> {
        self.state
            .received
            .lock()
            .expect("received lock")
            .iter()
            .filter(|f| f.event == event)
            .cloned()
            .collect()
    }

    pub(crate) fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub(crate) fn conversation(&self, id: &str) -> Option<Value> {
        self.state
            .conversations
            .lock()
            .expect("conversations lock")
            .iter()
            .find(|c| c["_id"] == id)
            .cloned()
    }
}

/// Poll `check` every 10ms until it holds, panicking after two seconds.
pub(crate) async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Direct conversation between `a` and `b` with the given `(sender, content, seen)` messages.
pub(crate) fn conversation_json(id: &str, a: &str, b: &str, messages: &[(&str, &str, Option<i64>)]) -> Value {
    let messages: Vec<Value> = messages
        .iter()
        .enumerate()
        .map(|(i, (user, content, seen))| {
            json!({
                "content": content,
                "user": user,
                "seen": seen,
                "createdAt": 1_700_000_000_000_i64 + i64::try_from(i).unwrap_or_default(),
                "type": "text",
            })
        })
        .collect();
    json!({
        "_id": id,
        "type": "DIRECT",
        "participants": [
            { "_id": a, "name": format!("User {a}") },
            { "_id": b, "name": format!("User {b}"), "profileImage": format!("https://img.test/{b}.png") },
        ],
        "messages": messages,
        "createdAt": 1_700_000_000_000_i64,
    })
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

async fn chat_handler(State(state): State<MockState>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "bad token").into_response();
    }
    if state.list_unavailable.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, "list offline").into_response();
    }
    let list = state.conversations.lock().expect("conversations lock").clone();
    axum::Json(json!({ "data": list })).into_response()
}

async fn socket_handler(State(state): State<MockState>, headers: HeaderMap, ws: WebSocketUpgrade) -> Response {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "bad token").into_response();
    }
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(mut socket: WebSocket, state: MockState) {
    state.connections.fetch_add(1, Ordering::SeqCst);
    let mut push = state.push.subscribe();
    let mut kick = state.kick.subscribe();

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let bytes = match msg {
                    Some(Ok(Message::Binary(bytes))) => bytes,
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                let Ok(frame) = frames::decode_frame(&bytes) else { continue };
                state.received.lock().expect("received lock").push(frame.clone());
                if let Some(reply) = state.respond(&frame)
                    && socket.send(Message::Binary(frames::encode_frame(&reply).into())).await.is_err()
                {
                    break;
                }
            }
            pushed = push.recv() => {
                let Ok(frame) = pushed else { continue };
                if socket.send(Message::Binary(frames::encode_frame(&frame).into())).await.is_err() {
                    break;
                }
            }
            _ = kick.recv() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

impl MockState {
    fn respond(&self, req: &Frame) -> Option<Frame> {
        if self.silent.lock().expect("silent lock").contains(&req.event) {
            return None;
        }
        if self.rejected.lock().expect("rejected lock").contains(&req.event) {
            return Some(req.error(format!("{} rejected", req.event)));
        }

        let data = match req.event.as_str() {
            USER_CONNECT => {
                if self.list_in_connect_ack.load(Ordering::SeqCst) {
                    let list = self.conversations.lock().expect("conversations lock").clone();
                    json!({ "conversations": list })
                } else {
                    json!({})
                }
            }
            JOIN_OLD_CONVERSATIONS => json!({}),
            INITIALIZE_CONVERSATION => json!({ "conversation": self.initialize(&req.data) }),
            SEND_MESSAGE => match self.append(&req.data) {
                Some(message) => json!({ "message": message }),
                None => return Some(req.error("unknown conversation")),
            },
            MARK_MESSAGE_AS_SEEN => {
                self.mark_seen(&req.data);
                json!({})
            }
            _ => return Some(req.error("unknown event")),
        };
        Some(req.done(data))
    }

    fn initialize(&self, data: &Value) -> Value {
        let sender = data["senderId"].as_str().unwrap_or_default();
        let recipient = data["recipient"].as_str().unwrap_or_default();
        let id = format!("c-{sender}-{recipient}");

        let mut list = self.conversations.lock().expect("conversations lock");
        if let Some(existing) = list.iter().find(|c| c["_id"] == id.as_str()) {
            return existing.clone();
        }
        let conversation = conversation_json(&id, sender, recipient, &[]);
        list.push(conversation.clone());
        conversation
    }

    fn append(&self, data: &Value) -> Option<Value> {
        let mut list = self.conversations.lock().expect("conversations lock");
        let conversation = list.iter_mut().find(|c| c["_id"] == data["conversationId"])?;
        let message = json!({
            "content": data["content"],
            "user": data["senderId"],
            "seen": null,
            "createdAt": frames::now_ms(),
            "type": data["type"],
        });
        conversation["messages"].as_array_mut()?.push(message.clone());
        Some(message)
    }

    fn mark_seen(&self, data: &Value) {
        let mut list = self.conversations.lock().expect("conversations lock");
        let Some(conversation) = list.iter_mut().find(|c| c["_id"] == data["conversationId"]) else {
            return;
        };
        let Some(messages) = conversation["messages"].as_array_mut() else {
            return;
        };
        for message in messages.iter_mut().filter(|m| m["user"] == data["recipientId"]) {
            message["seen"] = data["seen"].clone();
        }
    }
}
