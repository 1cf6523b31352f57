//! Session actor: owns a ConversationSession and its live channel.
//!
//! Each session runs as its own tokio task. History, channel events and
//! commands all funnel into that task, so the transcript has exactly one
//! writer. Callers talk to it through `SessionActorHandle`; lock-free reads
//! go through `ArcSwap`.

use std::sync::Arc;

use arc_swap::ArcSwap;
use futures::future::{BoxFuture, OptionFuture};
use futures::FutureExt;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use opsdeck_protocol::Message;

use crate::channel::{ChannelEvent, ChannelSettings, LiveChannel};
use crate::config::SyncConfig;
use crate::error::{ConfigError, LoadError, SessionError};
use crate::loader::{Transcript, TranscriptLoader};
use crate::session::{ConversationSession, SessionSnapshot, SessionUpdate};
use crate::session_command::{SessionCommand, SubscribeResult};

const COMMAND_BUFFER: usize = 64;

/// Everything needed to start sessions
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<SyncConfig>,
    pub loader: TranscriptLoader,
    pub channel: ChannelSettings,
}

impl SessionContext {
    pub fn new(config: SyncConfig, loader: TranscriptLoader, channel: ChannelSettings) -> Self {
        Self {
            config: Arc::new(config),
            loader,
            channel,
        }
    }

    /// HTTP history and WebSocket channel, both taken from `config`
    pub fn from_config(config: SyncConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let loader = TranscriptLoader::from_config(&config)?;
        let channel = ChannelSettings::from_config(&config)?;
        Ok(Self::new(config, loader, channel))
    }
}

/// How a session's transcript starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    /// Fetch history for an existing conversation
    Existing,
    /// A new conversation; there is no history to fetch
    Fresh,
}

/// Handle to a running session actor (cheap to Clone).
#[derive(Clone)]
pub struct SessionActorHandle {
    conversation_id: String,
    command_tx: mpsc::Sender<SessionCommand>,
    snapshot: Arc<ArcSwap<SessionSnapshot>>,
}

impl SessionActorHandle {
    /// Start a session: open the channel, start the history fetch and spawn
    /// the actor task.
    pub fn spawn(ctx: &SessionContext, conversation_id: &str, origin: SessionOrigin) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (update_tx, _) = broadcast::channel(ctx.config.event_buffer.max(1));

        let mut session = ConversationSession::new(conversation_id, &ctx.config);
        session.begin();

        let history: Option<BoxFuture<'static, Result<Transcript, LoadError>>> = match origin {
            SessionOrigin::Existing => {
                let loader = ctx.loader.clone();
                let id = conversation_id.to_string();
                Some(async move { loader.load(&id).await }.boxed())
            }
            SessionOrigin::Fresh => {
                session.apply_history(conversation_id, Ok(Transcript::empty(conversation_id)));
                None
            }
        };

        let snapshot = Arc::new(ArcSwap::from_pointee(session.snapshot()));
        let (channel, channel_rx) = LiveChannel::open(&ctx.channel, conversation_id);

        info!(
            component = "session_actor",
            event = "session.spawned",
            conversation_id = %conversation_id,
            origin = ?origin,
            "Session actor started"
        );

        tokio::spawn(run_session_actor(SessionActor {
            session,
            channel,
            snapshot: snapshot.clone(),
            update_tx,
            channel_rx,
            command_rx,
            history,
        }));

        Self {
            conversation_id: conversation_id.to_string(),
            command_tx,
            snapshot,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Lock-free snapshot read.
    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        self.snapshot.load_full()
    }

    /// Whether both handles point at the same running actor.
    pub fn same_session(&self, other: &SessionActorHandle) -> bool {
        self.command_tx.same_channel(&other.command_tx)
    }

    /// True once the actor task has stopped.
    pub fn is_finished(&self) -> bool {
        self.command_tx.is_closed()
    }

    pub async fn subscribe(&self) -> Result<SubscribeResult, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Subscribe { reply }).await?;
        rx.await.map_err(|_| SessionError::Ended)
    }

    /// Submit user text. The returned message is already in the transcript,
    /// or held right behind history while the session is still loading.
    pub async fn submit(&self, text: impl Into<String>) -> Result<Message, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Submit {
            text: text.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SessionError::Ended)?
    }

    pub async fn scroll(&self, scroll_top: f64, scroll_height: f64, client_height: f64) {
        let _ = self
            .send(SessionCommand::Scroll {
                scroll_top,
                scroll_height,
                client_height,
            })
            .await;
    }

    pub async fn jump_to_latest(&self) {
        let _ = self.send(SessionCommand::JumpToLatest).await;
    }

    /// End the session and wait for the actor to release it. No-op when the
    /// session already ended.
    pub async fn end(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(SessionCommand::End { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn send(&self, cmd: SessionCommand) -> Result<(), SessionError> {
        self.command_tx.send(cmd).await.map_err(|_| {
            debug!(
                component = "session_actor",
                conversation_id = %self.conversation_id,
                "Actor channel closed, command dropped"
            );
            SessionError::Ended
        })
    }
}

struct SessionActor {
    session: ConversationSession,
    channel: LiveChannel,
    snapshot: Arc<ArcSwap<SessionSnapshot>>,
    update_tx: broadcast::Sender<SessionUpdate>,
    channel_rx: mpsc::Receiver<ChannelEvent>,
    command_rx: mpsc::Receiver<SessionCommand>,
    history: Option<BoxFuture<'static, Result<Transcript, LoadError>>>,
}

impl SessionActor {
    /// Publish the new snapshot, then fan out updates.
    fn publish(&self, updates: Vec<SessionUpdate>) {
        if updates.is_empty() {
            return;
        }
        self.snapshot.store(Arc::new(self.session.snapshot()));
        for update in updates {
            // No subscribers is fine
            let _ = self.update_tx.send(update);
        }
    }

    fn shutdown(&mut self) {
        self.channel.close();
        let updates = self.session.end();
        self.publish(updates);
    }

    /// Returns false when the actor should stop.
    fn handle_command(&mut self, cmd: SessionCommand) -> bool {
        match cmd {
            SessionCommand::Subscribe { reply } => {
                let _ = reply.send(SubscribeResult {
                    snapshot: self.snapshot.load_full(),
                    rx: self.update_tx.subscribe(),
                });
            }
            SessionCommand::Submit { text, reply } => {
                let result = match self.session.stage_submission(&text) {
                    Ok((message, updates)) => {
                        self.publish(updates);
                        let sent = self.channel.send(&message.content);
                        let updates = self.session.record_send(sent.clone());
                        self.publish(updates);
                        sent.map(|()| message).map_err(SessionError::from)
                    }
                    Err(err) => {
                        debug!(
                            component = "session_actor",
                            event = "session.submit_rejected",
                            conversation_id = %self.session.conversation_id(),
                            error = %err,
                            "Submission rejected"
                        );
                        Err(err)
                    }
                };
                let _ = reply.send(result);
            }
            SessionCommand::Scroll {
                scroll_top,
                scroll_height,
                client_height,
            } => {
                let updates = self
                    .session
                    .on_scroll(scroll_top, scroll_height, client_height);
                self.publish(updates);
            }
            SessionCommand::JumpToLatest => {
                let updates = self.session.jump_to_latest();
                self.publish(updates);
            }
            SessionCommand::End { reply } => {
                self.shutdown();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }
}

async fn run_session_actor(mut actor: SessionActor) {
    let mut history_pending = actor.history.is_some();
    let mut history = OptionFuture::from(actor.history.take());
    let mut channel_live = true;

    loop {
        tokio::select! {
            Some(result) = &mut history, if history_pending => {
                history_pending = false;
                let id = actor.session.conversation_id().to_string();
                let updates = actor.session.apply_history(&id, result);
                actor.publish(updates);
            }

            event = actor.channel_rx.recv(), if channel_live => match event {
                Some(event) => {
                    let updates = actor.session.apply_channel_event(event);
                    actor.publish(updates);
                }
                None => channel_live = false,
            },

            cmd = actor.command_rx.recv() => match cmd {
                Some(cmd) => {
                    if !actor.handle_command(cmd) {
                        break;
                    }
                }
                None => {
                    warn!(
                        component = "session_actor",
                        conversation_id = %actor.session.conversation_id(),
                        "All handles dropped, ending session"
                    );
                    actor.shutdown();
                    break;
                }
            },
        }
    }

    info!(
        component = "session_actor",
        event = "session.stopped",
        conversation_id = %actor.session.conversation_id(),
        "Session actor stopped"
    );
}
