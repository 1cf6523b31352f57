//! Live channel: one WebSocket per open conversation.
//!
//! A thin wrapper over the transport: it reports lifecycle events and
//! decoded frames, and sends plain text. It never reconnects; what to do
//! after a drop is the session's decision.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use futures::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use opsdeck_protocol::{ConnectionState, InboundFrame};

use crate::config::{parse_url, SyncConfig};
use crate::error::{ChannelError, ConfigError};

/// Normal closure
pub const NORMAL_CLOSE: u16 = 1000;
/// Close frame without a status code
pub const NO_STATUS_CLOSE: u16 = 1005;
/// Connection lost without a close frame
pub const ABNORMAL_CLOSE: u16 = 1006;

const OUTBOUND_QUEUE: usize = 64;
const CLIENT_CLOSE_REASON: &str = "closed by client";

/// Lifecycle and data events emitted by a channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Opened,
    /// A chat frame; never [`InboundFrame::ErrorSentinel`]
    Message(InboundFrame),
    Error(String),
    Closed { code: u16, reason: String },
}

/// How channels are opened
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    url: Url,
    handshake_timeout: Option<Duration>,
    error_sentinel: String,
    event_buffer: usize,
}

impl ChannelSettings {
    pub fn from_config(config: &SyncConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            url: parse_url("channel", &config.channel_url)?,
            handshake_timeout: config.handshake_timeout(),
            error_sentinel: config.error_sentinel.clone(),
            event_buffer: config.event_buffer.max(1),
        })
    }

    /// Channel address for a conversation. An empty id leaves the parameter
    /// off so the server can reject it.
    pub fn address_for(&self, conversation_id: &str) -> Url {
        let mut url = self.url.clone();
        if !conversation_id.is_empty() {
            url.query_pairs_mut()
                .append_pair("conversation_id", conversation_id);
        }
        url
    }
}

/// Handle to an open (or opening) channel. Dropping it closes the connection.
pub struct LiveChannel {
    conversation_id: String,
    state: Arc<ArcSwap<ConnectionState>>,
    outbound_tx: mpsc::Sender<String>,
    shutdown: Arc<Notify>,
    closed: AtomicBool,
}

struct ChannelTask {
    conversation_id: String,
    url: Url,
    handshake_timeout: Option<Duration>,
    error_sentinel: String,
    state: Arc<ArcSwap<ConnectionState>>,
    shutdown: Arc<Notify>,
    event_tx: mpsc::Sender<ChannelEvent>,
    outbound_rx: mpsc::Receiver<String>,
}

impl LiveChannel {
    /// Start connecting. Events arrive on the returned receiver, starting
    /// with `Opened` or an `Error`/`Closed` pair.
    pub fn open(
        settings: &ChannelSettings,
        conversation_id: &str,
    ) -> (Self, mpsc::Receiver<ChannelEvent>) {
        let (event_tx, event_rx) = mpsc::channel(settings.event_buffer);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let state = Arc::new(ArcSwap::from_pointee(ConnectionState::Connecting));
        let shutdown = Arc::new(Notify::new());

        tokio::spawn(run_channel(ChannelTask {
            conversation_id: conversation_id.to_string(),
            url: settings.address_for(conversation_id),
            handshake_timeout: settings.handshake_timeout,
            error_sentinel: settings.error_sentinel.clone(),
            state: state.clone(),
            shutdown: shutdown.clone(),
            event_tx,
            outbound_rx,
        }));

        let channel = Self {
            conversation_id: conversation_id.to_string(),
            state,
            outbound_tx,
            shutdown,
            closed: AtomicBool::new(false),
        };
        (channel, event_rx)
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state.load().as_ref().clone()
    }

    /// Queue a plain text frame. Fails unless the channel is open.
    pub fn send(&self, text: &str) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::SeqCst) || !self.state.load().is_open() {
            return Err(ChannelError::NotConnected);
        }
        self.outbound_tx
            .try_send(text.to_string())
            .map_err(|e| match e {
                TrySendError::Full(_) => {
                    ChannelError::Transport("outbound queue is full".to_string())
                }
                TrySendError::Closed(_) => ChannelError::NotConnected,
            })
    }

    /// Close the connection. Safe to call more than once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(
            component = "channel",
            event = "channel.close_requested",
            conversation_id = %self.conversation_id,
            "Closing live channel"
        );
        self.shutdown.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_channel(task: ChannelTask) {
    let ChannelTask {
        conversation_id,
        url,
        handshake_timeout,
        error_sentinel,
        state,
        shutdown,
        event_tx,
        mut outbound_rx,
    } = task;

    info!(
        component = "channel",
        event = "channel.connecting",
        conversation_id = %conversation_id,
        url = %url,
        "Opening live channel"
    );

    let connect = async {
        let handshake = connect_async(url.as_str());
        match handshake_timeout {
            Some(limit) => match tokio::time::timeout(limit, handshake).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(format!("handshake timed out after {}ms", limit.as_millis())),
            },
            None => handshake.await.map_err(|e| e.to_string()),
        }
    };

    let ws = tokio::select! {
        result = connect => match result {
            Ok((ws, _response)) => ws,
            Err(detail) => {
                fail(&conversation_id, &state, &event_tx, detail).await;
                return;
            }
        },
        _ = shutdown.notified() => {
            let reason = CLIENT_CLOSE_REASON.to_string();
            finish(&conversation_id, &state, &event_tx, NORMAL_CLOSE, reason).await;
            return;
        }
    };

    state.store(Arc::new(ConnectionState::Open));
    info!(
        component = "channel",
        event = "channel.opened",
        conversation_id = %conversation_id,
        "Live channel open"
    );
    let _ = event_tx.send(ChannelEvent::Opened).await;

    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    let event = decode_event(&conversation_id, text.as_str(), &error_sentinel);
                    let _ = event_tx.send(event).await;
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    let text = String::from_utf8_lossy(&data);
                    let event = decode_event(&conversation_id, &text, &error_sentinel);
                    let _ = event_tx.send(event).await;
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.as_str().to_string()))
                        .unwrap_or((NO_STATUS_CLOSE, String::new()));
                    finish(&conversation_id, &state, &event_tx, code, reason).await;
                    break;
                }
                // Ping/pong are answered by the transport
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    fail(&conversation_id, &state, &event_tx, e.to_string()).await;
                    break;
                }
                None => {
                    let detail = "connection dropped".to_string();
                    fail(&conversation_id, &state, &event_tx, detail).await;
                    break;
                }
            },

            Some(text) = outbound_rx.recv() => {
                debug!(
                    component = "channel",
                    event = "channel.send",
                    conversation_id = %conversation_id,
                    payload_bytes = text.len(),
                    "Sending frame"
                );
                if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
                    fail(&conversation_id, &state, &event_tx, e.to_string()).await;
                    break;
                }
            }

            _ = shutdown.notified() => {
                let _ = sink
                    .send(WsMessage::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: CLIENT_CLOSE_REASON.into(),
                    })))
                    .await;
                let _ = sink.close().await;
                let reason = CLIENT_CLOSE_REASON.to_string();
                finish(&conversation_id, &state, &event_tx, NORMAL_CLOSE, reason).await;
                break;
            }
        }
    }
}

fn decode_event(conversation_id: &str, raw: &str, sentinel: &str) -> ChannelEvent {
    match InboundFrame::decode(raw, sentinel) {
        InboundFrame::ErrorSentinel(detail) => {
            warn!(
                component = "channel",
                event = "channel.upstream_error",
                conversation_id = %conversation_id,
                detail = %truncate_for_log(&detail, 240),
                "Upstream error frame"
            );
            ChannelEvent::Error(detail)
        }
        frame => {
            debug!(
                component = "channel",
                event = "channel.frame",
                conversation_id = %conversation_id,
                payload_bytes = raw.len(),
                payload_preview = %truncate_for_log(raw, 240),
                "Inbound frame"
            );
            ChannelEvent::Message(frame)
        }
    }
}

async fn finish(
    conversation_id: &str,
    state: &ArcSwap<ConnectionState>,
    event_tx: &mpsc::Sender<ChannelEvent>,
    code: u16,
    reason: String,
) {
    let next = if code == NORMAL_CLOSE {
        ConnectionState::ClosedNormal
    } else {
        ConnectionState::ClosedError {
            code,
            reason: reason.clone(),
        }
    };
    state.store(Arc::new(next));
    info!(
        component = "channel",
        event = "channel.closed",
        conversation_id = %conversation_id,
        code,
        reason = %reason,
        "Live channel closed"
    );
    let _ = event_tx.send(ChannelEvent::Closed { code, reason }).await;
}

async fn fail(
    conversation_id: &str,
    state: &ArcSwap<ConnectionState>,
    event_tx: &mpsc::Sender<ChannelEvent>,
    detail: String,
) {
    warn!(
        component = "channel",
        event = "channel.transport_error",
        conversation_id = %conversation_id,
        error = %detail,
        "Live channel transport error"
    );
    let _ = event_tx.send(ChannelEvent::Error(detail.clone())).await;
    finish(conversation_id, state, event_tx, ABNORMAL_CLOSE, detail).await;
}

fn truncate_for_log(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
