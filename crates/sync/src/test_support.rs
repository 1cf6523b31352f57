//! Test doubles: in-memory history sources and a local HTTP + WebSocket
//! server speaking the console's wire protocol.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as WsMessage, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use opsdeck_protocol::{ConversationRecord, ConversationStatus, HistoryEntry, HistoryPayload, Role};

use crate::channel::ChannelSettings;
use crate::config::SyncConfig;
use crate::error::LoadError;
use crate::loader::{HistorySource, TranscriptLoader};
use crate::session::SessionSnapshot;
use crate::session_actor::{SessionActorHandle, SessionContext};

/// Two-message history without ids or timestamps
pub fn sample_record() -> ConversationRecord {
    ConversationRecord {
        id: Some("conv-001".into()),
        title: Some("Kafka Topic Creation - prod-events".into()),
        status: Some(ConversationStatus::Active),
        summary: None,
        messages: vec![
            entry(Role::User, "Hello, I need to create a new Kafka topic for production events."),
            entry(Role::Counterparty, "Which cluster should it be created on?"),
        ],
    }
}

pub fn record_with(contents: &[(Role, &str)]) -> ConversationRecord {
    ConversationRecord {
        messages: contents
            .iter()
            .map(|(role, content)| entry(*role, content))
            .collect(),
        ..Default::default()
    }
}

fn entry(role: Role, content: &str) -> HistoryEntry {
    HistoryEntry {
        id: None,
        role,
        content: content.to_string(),
        timestamp: None,
        status: None,
        metadata: Default::default(),
    }
}

#[derive(Default, Clone)]
pub struct MemoryHistorySource {
    conversations: HashMap<String, ConversationRecord>,
}

impl MemoryHistorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: &str, record: ConversationRecord) -> Self {
        self.conversations.insert(id.to_string(), record);
        self
    }
}

impl HistorySource for MemoryHistorySource {
    fn fetch(
        &self,
        conversation_id: &str,
    ) -> BoxFuture<'static, Result<HistoryPayload, LoadError>> {
        let result = self
            .conversations
            .get(conversation_id)
            .cloned()
            .map(HistoryPayload::Record)
            .ok_or_else(|| LoadError::NotFound(conversation_id.to_string()));
        async move { result }.boxed()
    }
}

/// History source whose responses can be held back per conversation.
pub struct GatedHistorySource {
    inner: MemoryHistorySource,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
}

impl GatedHistorySource {
    pub fn new(inner: MemoryHistorySource) -> Self {
        Self {
            inner,
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Hold fetches for `id` until [`release`](Self::release).
    pub fn gate(&self, id: &str) {
        self.gates
            .lock()
            .unwrap()
            .insert(id.to_string(), Arc::new(Notify::new()));
    }

    pub fn release(&self, id: &str) {
        if let Some(gate) = self.gates.lock().unwrap().get(id) {
            gate.notify_one();
        }
    }
}

impl HistorySource for GatedHistorySource {
    fn fetch(
        &self,
        conversation_id: &str,
    ) -> BoxFuture<'static, Result<HistoryPayload, LoadError>> {
        let gate = self.gates.lock().unwrap().get(conversation_id).cloned();
        let fetch = self.inner.fetch(conversation_id);
        async move {
            if let Some(gate) = gate {
                gate.notified().await;
            }
            fetch.await
        }
        .boxed()
    }
}

struct ServerState {
    histories: HashMap<String, String>,
    on_connect: HashMap<String, Vec<String>>,
    open_sockets: AtomicUsize,
}

#[derive(Default)]
pub struct TestServerBuilder {
    histories: HashMap<String, String>,
    on_connect: HashMap<String, Vec<String>>,
}

impl TestServerBuilder {
    pub fn conversation(mut self, id: &str, record: ConversationRecord) -> Self {
        let body = serde_json::to_string(&record).unwrap();
        self.histories.insert(id.to_string(), body);
        self
    }

    pub fn raw_history(mut self, id: &str, body: &str) -> Self {
        self.histories.insert(id.to_string(), body.to_string());
        self
    }

    /// Frames pushed to every channel opened for `id`, right after the upgrade.
    pub fn on_connect(mut self, id: &str, frames: &[&str]) -> Self {
        self.on_connect
            .insert(id.to_string(), frames.iter().map(|f| f.to_string()).collect());
        self
    }

    pub async fn start(self) -> TestServer {
        let state = Arc::new(ServerState {
            histories: self.histories,
            on_connect: self.on_connect,
            open_sockets: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/conversations/{id}", get(history_route))
            .route("/ws/chat", get(ws_route))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        TestServer { addr, task, state }
    }
}

/// Local server: `GET /conversations/{id}` and `GET /ws/chat?conversation_id=`.
///
/// Socket script for inbound text:
/// - `fail <detail>` → `ERROR: <detail>`
/// - `plain <text>` → `<text>` as a plain frame
/// - `close` → close 1000, `drop` → close 1011
/// - `silent` → no reply
/// - anything else → `{"content":"ack: <text>"}`
///
/// A missing `conversation_id` is rejected with close code 4400.
pub struct TestServer {
    addr: SocketAddr,
    task: JoinHandle<()>,
    state: Arc<ServerState>,
}

impl TestServer {
    pub fn builder() -> TestServerBuilder {
        TestServerBuilder::default()
    }

    pub fn history_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn channel_url(&self) -> String {
        format!("ws://{}/ws/chat", self.addr)
    }

    pub fn open_sockets(&self) -> usize {
        self.state.open_sockets.load(Ordering::SeqCst)
    }

    /// Poll until the number of open sockets equals `expected`.
    pub async fn wait_for_open_sockets(&self, expected: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.open_sockets() != expected {
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {expected} open sockets, have {}",
                self.open_sockets()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn history_route(
    Path(id): Path<String>,
    State(state): State<Arc<ServerState>>,
) -> Response {
    match state.histories.get(&id) {
        Some(body) => ([(header::CONTENT_TYPE, "application/json")], body.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn ws_route(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<ServerState>>,
) -> Response {
    let id = params.get("conversation_id").cloned().unwrap_or_default();
    ws.on_upgrade(move |socket| serve_socket(socket, id, state))
}

async fn serve_socket(mut socket: WebSocket, id: String, state: Arc<ServerState>) {
    if id.is_empty() {
        let _ = socket
            .send(WsMessage::Close(Some(CloseFrame {
                code: 4400,
                reason: Utf8Bytes::from_static("conversation_id is required"),
            })))
            .await;
        return;
    }

    state.open_sockets.fetch_add(1, Ordering::SeqCst);

    for frame in state.on_connect.get(&id).cloned().unwrap_or_default() {
        if socket.send(WsMessage::Text(frame.into())).await.is_err() {
            break;
        }
    }

    while let Some(Ok(msg)) = socket.recv().await {
        let text = match msg {
            WsMessage::Text(text) => text.as_str().to_string(),
            WsMessage::Close(_) => break,
            _ => continue,
        };

        let reply = if let Some(detail) = text.strip_prefix("fail ") {
            Some(format!("ERROR: {detail}"))
        } else if let Some(plain) = text.strip_prefix("plain ") {
            Some(plain.to_string())
        } else if text == "close" || text == "drop" {
            let code = if text == "close" { 1000 } else { 1011 };
            let _ = socket
                .send(WsMessage::Close(Some(CloseFrame {
                    code,
                    reason: Utf8Bytes::from_static("server closing"),
                })))
                .await;
            break;
        } else if text == "silent" {
            None
        } else {
            Some(serde_json::json!({ "content": format!("ack: {text}") }).to_string())
        };

        if let Some(reply) = reply {
            if socket.send(WsMessage::Text(reply.into())).await.is_err() {
                break;
            }
        }
    }

    state.open_sockets.fetch_sub(1, Ordering::SeqCst);
}

/// Session context over `source` with the channel pointed at `channel_url`
pub fn test_context(source: Arc<dyn HistorySource>, channel_url: &str) -> SessionContext {
    let config = SyncConfig {
        channel_url: channel_url.to_string(),
        ..Default::default()
    };
    let channel = ChannelSettings::from_config(&config).unwrap();
    SessionContext::new(config, TranscriptLoader::new(source, None), channel)
}

/// Poll a session's snapshot until `check` passes (5s limit).
pub async fn wait_for_snapshot(
    handle: &SessionActorHandle,
    what: &str,
    check: impl Fn(&SessionSnapshot) -> bool,
) -> Arc<SessionSnapshot> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let snap = handle.snapshot();
        if check(&snap) {
            return snap;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}; last snapshot: {snap:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
