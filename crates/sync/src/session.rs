//! Conversation session state machine.
//!
//! Pure and synchronous: every input returns the updates it produced, and
//! the actor in `session_actor` performs the IO around it. The phases are
//! `Idle -> Loading -> Active -> Ended`.

use tracing::{debug, info, warn};

use opsdeck_protocol::{new_id, now_timestamp, ConnectionState, ConversationStatus, Message};

use crate::channel::{ChannelEvent, NORMAL_CLOSE};
use crate::config::SyncConfig;
use crate::error::{ChannelError, LoadError, SessionError};
use crate::loader::Transcript;
use crate::merger::{MergeOutcome, MergeSource, MessageMerger};
use crate::scroll::{ScrollIntent, ScrollTracker};

/// Id given to the configured greeting message
pub const GREETING_MESSAGE_ID: &str = "greeting";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Loading,
    Active,
    Ended,
}

/// What changed as the result of one input
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    PhaseChanged(SessionPhase),
    ConnectionChanged(ConnectionState),
    /// Messages that just became visible, in display order
    MessagesAppended(Vec<Message>),
    /// A live or local message is waiting for history
    MessageHeld { pending: usize },
    Fault(SessionError),
    AwaitingReply(bool),
    ScrollIntentChanged(ScrollIntent),
    /// The view should scroll to the latest message
    ScrollToBottom,
}

/// Read-only view of a session, published after every step
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub conversation_id: String,
    pub phase: SessionPhase,
    pub connection: ConnectionState,
    pub messages: Vec<Message>,
    /// Live or local messages waiting for history
    pub pending_live: usize,
    pub fault: Option<SessionError>,
    pub awaiting_reply: bool,
    pub scroll_intent: ScrollIntent,
    pub show_jump_button: bool,
    pub title: Option<String>,
    pub conversation_status: Option<ConversationStatus>,
    pub summary: Option<String>,
    pub revision: u64,
}

impl SessionSnapshot {
    /// Snapshot of a session that has not started yet
    pub fn idle(conversation_id: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            phase: SessionPhase::Idle,
            connection: ConnectionState::Connecting,
            messages: Vec::new(),
            pending_live: 0,
            fault: None,
            awaiting_reply: false,
            scroll_intent: ScrollIntent::Following,
            show_jump_button: false,
            title: None,
            conversation_status: None,
            summary: None,
            revision: 0,
        }
    }
}

pub struct ConversationSession {
    conversation_id: String,
    phase: SessionPhase,
    connection: ConnectionState,
    merger: MessageMerger,
    scroll: ScrollTracker,
    fault: Option<SessionError>,
    awaiting_reply: bool,
    /// Set by a channel error or close; sends stay refused for the rest
    /// of the session
    channel_faulted: bool,
    title: Option<String>,
    conversation_status: Option<ConversationStatus>,
    summary: Option<String>,
    greeting: Option<String>,
    missing_identifier_code: u16,
    revision: u64,
}

impl ConversationSession {
    pub fn new(conversation_id: &str, config: &SyncConfig) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            phase: SessionPhase::Idle,
            connection: ConnectionState::Connecting,
            merger: MessageMerger::new(),
            scroll: ScrollTracker::new(config.scroll_threshold),
            fault: None,
            awaiting_reply: false,
            channel_faulted: false,
            title: None,
            conversation_status: None,
            summary: None,
            greeting: config.greeting.clone(),
            missing_identifier_code: config.missing_identifier_close_code,
            revision: 0,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn messages(&self) -> &[Message] {
        self.merger.messages()
    }

    pub fn fault(&self) -> Option<&SessionError> {
        self.fault.as_ref()
    }

    pub fn is_awaiting_reply(&self) -> bool {
        self.awaiting_reply
    }

    /// Whether sends are refused until a new session starts
    pub fn is_channel_faulted(&self) -> bool {
        self.channel_faulted
    }

    pub fn should_auto_scroll(&self) -> bool {
        self.scroll.should_auto_scroll()
    }

    /// Enter the conversation. History fetch and channel open start now.
    pub fn begin(&mut self) -> Vec<SessionUpdate> {
        if self.phase != SessionPhase::Idle {
            return Vec::new();
        }
        self.phase = SessionPhase::Loading;
        self.connection = ConnectionState::Connecting;
        self.finish(vec![
            SessionUpdate::PhaseChanged(SessionPhase::Loading),
            SessionUpdate::ConnectionChanged(ConnectionState::Connecting),
        ])
    }

    /// Apply the history result for `conversation_id`. Results for another
    /// identity, or arriving outside `Loading`, are ignored.
    pub fn apply_history(
        &mut self,
        conversation_id: &str,
        result: Result<Transcript, LoadError>,
    ) -> Vec<SessionUpdate> {
        if conversation_id != self.conversation_id || self.phase != SessionPhase::Loading {
            debug!(
                component = "session",
                event = "session.history_stale",
                conversation_id = %self.conversation_id,
                response_for = %conversation_id,
                phase = ?self.phase,
                "Ignoring stale history response"
            );
            return Vec::new();
        }

        let mut updates = Vec::new();
        let before = self.merger.len();

        match result {
            Ok(transcript) => {
                self.title = transcript.title;
                self.conversation_status = transcript.status;
                self.summary = transcript.summary;

                let mut batch = transcript.messages;
                if batch.is_empty() {
                    if let Some(greeting) = &self.greeting {
                        batch.push(Message::counterparty(
                            GREETING_MESSAGE_ID.to_string(),
                            greeting.clone(),
                            now_timestamp(),
                        ));
                    }
                }
                self.merger.apply_batch(batch, MergeSource::History);
            }
            Err(err) => {
                // Held live messages are still shown; history is simply absent.
                let err = SessionError::from(err);
                warn!(
                    component = "session",
                    event = "session.history_failed",
                    conversation_id = %self.conversation_id,
                    error = %err,
                    "History unavailable"
                );
                self.merger.settle();
                self.fault = Some(err.clone());
                updates.push(SessionUpdate::Fault(err));
            }
        }

        self.push_appended(before, &mut updates);
        self.phase = SessionPhase::Active;
        updates.push(SessionUpdate::PhaseChanged(SessionPhase::Active));

        info!(
            component = "session",
            event = "session.active",
            conversation_id = %self.conversation_id,
            message_count = self.merger.len(),
            "Conversation active"
        );
        self.finish(updates)
    }

    /// Fold a channel event into session state.
    pub fn apply_channel_event(&mut self, event: ChannelEvent) -> Vec<SessionUpdate> {
        if self.phase == SessionPhase::Ended {
            return Vec::new();
        }

        let mut updates = Vec::new();
        match event {
            ChannelEvent::Opened => {
                self.connection = ConnectionState::Open;
                updates.push(SessionUpdate::ConnectionChanged(ConnectionState::Open));
            }
            ChannelEvent::Message(frame) => {
                self.clear_awaiting(&mut updates);
                let Some(message) = frame.into_message(new_id(), now_timestamp()) else {
                    return self.finish(updates);
                };
                let before = self.merger.len();
                let outcome = self.merger.apply_one(message, MergeSource::Live);
                if outcome == MergeOutcome::Duplicate {
                    debug!(
                        component = "session",
                        event = "session.live_duplicate",
                        conversation_id = %self.conversation_id,
                        "Dropped duplicate live message"
                    );
                }
                self.push_merged(outcome, before, &mut updates);
            }
            ChannelEvent::Error(detail) => {
                self.clear_awaiting(&mut updates);
                self.channel_faulted = true;
                self.raise(SessionError::Channel(detail), &mut updates);
            }
            ChannelEvent::Closed { code, reason } => {
                self.clear_awaiting(&mut updates);
                self.channel_faulted = true;
                self.connection = if code == NORMAL_CLOSE {
                    ConnectionState::ClosedNormal
                } else {
                    ConnectionState::ClosedError {
                        code,
                        reason: reason.clone(),
                    }
                };
                updates.push(SessionUpdate::ConnectionChanged(self.connection.clone()));

                let err = if code == self.missing_identifier_code {
                    SessionError::MissingIdentifier { code, reason }
                } else if code == NORMAL_CLOSE {
                    SessionError::Channel("the server closed the connection".to_string())
                } else if reason.is_empty() {
                    SessionError::Channel(format!("connection closed (code {code})"))
                } else {
                    SessionError::Channel(format!("connection closed (code {code}): {reason}"))
                };
                self.raise(err, &mut updates);
            }
        }
        self.finish(updates)
    }

    /// Validate a submission and append it optimistically as a local
    /// message. While history is still loading the message is held and
    /// shows up right after the history batch. The caller sends
    /// `message.content` on the channel and reports the outcome through
    /// [`record_send`](Self::record_send).
    ///
    /// A rejected submission leaves the transcript untouched.
    pub fn stage_submission(
        &mut self,
        text: &str,
    ) -> Result<(Message, Vec<SessionUpdate>), SessionError> {
        if text.trim().is_empty() {
            return Err(SessionError::EmptyInput);
        }
        match self.phase {
            SessionPhase::Ended => return Err(SessionError::Ended),
            SessionPhase::Idle => return Err(SessionError::NotConnected),
            SessionPhase::Loading | SessionPhase::Active => {}
        }
        if self.awaiting_reply {
            return Err(SessionError::AwaitingReply);
        }
        if self.channel_faulted || !self.connection.is_open() {
            return Err(SessionError::NotConnected);
        }

        let message = Message::user(new_id(), text.to_string(), now_timestamp());
        let mut updates = Vec::new();
        let before = self.merger.len();
        let outcome = self.merger.apply_one(message.clone(), MergeSource::Local);
        self.push_merged(outcome, before, &mut updates);

        self.awaiting_reply = true;
        updates.push(SessionUpdate::AwaitingReply(true));
        Ok((message, self.finish(updates)))
    }

    /// Outcome of sending a staged submission. A failure never retracts the
    /// optimistic message.
    pub fn record_send(&mut self, result: Result<(), ChannelError>) -> Vec<SessionUpdate> {
        let Err(err) = result else {
            return Vec::new();
        };
        let mut updates = Vec::new();
        self.clear_awaiting(&mut updates);
        self.raise(SessionError::from(err), &mut updates);
        self.finish(updates)
    }

    pub fn on_scroll(
        &mut self,
        scroll_top: f64,
        scroll_height: f64,
        client_height: f64,
    ) -> Vec<SessionUpdate> {
        let previous = self.scroll.intent();
        let intent = self.scroll.on_scroll(scroll_top, scroll_height, client_height);
        if intent == previous {
            return Vec::new();
        }
        self.finish(vec![SessionUpdate::ScrollIntentChanged(intent)])
    }

    /// Resume following and scroll once, wherever the view is.
    pub fn jump_to_latest(&mut self) -> Vec<SessionUpdate> {
        let previous = self.scroll.intent();
        self.scroll.jump_to_latest();
        let mut updates = Vec::new();
        if previous != ScrollIntent::Following {
            updates.push(SessionUpdate::ScrollIntentChanged(ScrollIntent::Following));
        }
        updates.push(SessionUpdate::ScrollToBottom);
        self.finish(updates)
    }

    /// Leave the conversation: drop the transcript and any held messages.
    /// Later history or channel input is ignored.
    pub fn end(&mut self) -> Vec<SessionUpdate> {
        if self.phase == SessionPhase::Ended {
            return Vec::new();
        }
        self.phase = SessionPhase::Ended;
        self.merger.clear();
        self.awaiting_reply = false;
        if !self.connection.is_closed() {
            self.connection = ConnectionState::ClosedNormal;
        }
        info!(
            component = "session",
            event = "session.ended",
            conversation_id = %self.conversation_id,
            "Conversation session ended"
        );
        self.finish(vec![
            SessionUpdate::ConnectionChanged(self.connection.clone()),
            SessionUpdate::PhaseChanged(SessionPhase::Ended),
        ])
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            conversation_id: self.conversation_id.clone(),
            phase: self.phase,
            connection: self.connection.clone(),
            messages: self.merger.messages().to_vec(),
            pending_live: self.merger.held_len(),
            fault: self.fault.clone(),
            awaiting_reply: self.awaiting_reply,
            scroll_intent: self.scroll.intent(),
            show_jump_button: self.scroll.show_jump_button(),
            title: self.title.clone(),
            conversation_status: self.conversation_status,
            summary: self.summary.clone(),
            revision: self.revision,
        }
    }

    fn push_merged(
        &self,
        outcome: MergeOutcome,
        before: usize,
        updates: &mut Vec<SessionUpdate>,
    ) {
        match outcome {
            MergeOutcome::Held => updates.push(SessionUpdate::MessageHeld {
                pending: self.merger.held_len(),
            }),
            MergeOutcome::Accepted => self.push_appended(before, updates),
            MergeOutcome::Duplicate => {}
        }
    }

    fn push_appended(&self, before: usize, updates: &mut Vec<SessionUpdate>) {
        let appended = &self.merger.messages()[before..];
        if appended.is_empty() {
            return;
        }
        updates.push(SessionUpdate::MessagesAppended(appended.to_vec()));
        if self.scroll.should_auto_scroll() {
            updates.push(SessionUpdate::ScrollToBottom);
        }
    }

    fn clear_awaiting(&mut self, updates: &mut Vec<SessionUpdate>) {
        if self.awaiting_reply {
            self.awaiting_reply = false;
            updates.push(SessionUpdate::AwaitingReply(false));
        }
    }

    fn raise(&mut self, err: SessionError, updates: &mut Vec<SessionUpdate>) {
        warn!(
            component = "session",
            event = "session.fault",
            conversation_id = %self.conversation_id,
            error = %err,
            terminal = err.is_terminal(),
            "Session fault"
        );
        self.fault = Some(err.clone());
        updates.push(SessionUpdate::Fault(err));
    }

    fn finish(&mut self, updates: Vec<SessionUpdate>) -> Vec<SessionUpdate> {
        if !updates.is_empty() {
            self.revision += 1;
        }
        updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsdeck_protocol::{InboundFrame, Role, StructuredFrame};

    fn config() -> SyncConfig {
        SyncConfig::default()
    }

    fn active_session(history: &[&str]) -> ConversationSession {
        let mut session = ConversationSession::new("conv-001", &config());
        session.begin();
        session.apply_channel_event(ChannelEvent::Opened);
        session.apply_history("conv-001", Ok(transcript(history)));
        session
    }

    fn transcript(contents: &[&str]) -> Transcript {
        Transcript {
            conversation_id: "conv-001".into(),
            messages: contents
                .iter()
                .map(|c| Message::counterparty(c.to_string(), c.to_string(), "0Z".into()))
                .collect(),
            ..Default::default()
        }
    }

    fn structured(id: &str, content: &str) -> ChannelEvent {
        ChannelEvent::Message(InboundFrame::Structured(StructuredFrame {
            content: content.into(),
            id: Some(id.into()),
            ..Default::default()
        }))
    }

    fn contents(session: &ConversationSession) -> Vec<&str> {
        session.messages().iter().map(|m| m.content.as_str()).collect()
    }

    #[test]
    fn begin_moves_idle_to_loading_once() {
        let mut session = ConversationSession::new("conv-001", &config());
        assert_eq!(session.phase(), SessionPhase::Idle);

        let updates = session.begin();
        assert!(updates.contains(&SessionUpdate::PhaseChanged(SessionPhase::Loading)));
        assert_eq!(session.phase(), SessionPhase::Loading);
        assert!(session.begin().is_empty());
    }

    #[test]
    fn live_message_before_history_is_applied_after_it() {
        let mut session = ConversationSession::new("conv-001", &config());
        session.begin();
        session.apply_channel_event(ChannelEvent::Opened);

        let updates = session.apply_channel_event(structured("C", "C"));
        assert_eq!(updates, vec![SessionUpdate::MessageHeld { pending: 1 }]);
        assert_eq!(session.snapshot().pending_live, 1);
        assert!(session.messages().is_empty());

        let updates = session.apply_history("conv-001", Ok(transcript(&["A", "B"])));
        assert_eq!(contents(&session), vec!["A", "B", "C"]);
        assert_eq!(session.phase(), SessionPhase::Active);
        match &updates[0] {
            SessionUpdate::MessagesAppended(messages) => assert_eq!(messages.len(), 3),
            other => panic!("expected appended messages, got {other:?}"),
        }
        assert!(updates.contains(&SessionUpdate::ScrollToBottom));
    }

    #[test]
    fn history_for_another_identity_is_ignored() {
        let mut session = ConversationSession::new("conv-Y", &config());
        session.begin();

        assert!(session.apply_history("conv-X", Ok(transcript(&["stale"]))).is_empty());
        assert_eq!(session.phase(), SessionPhase::Loading);
        assert!(session.messages().is_empty());
    }

    #[test]
    fn history_after_end_is_ignored() {
        let mut session = ConversationSession::new("conv-001", &config());
        session.begin();
        session.end();

        assert!(session.apply_history("conv-001", Ok(transcript(&["late"]))).is_empty());
        assert_eq!(session.phase(), SessionPhase::Ended);
        assert!(session.messages().is_empty());
    }

    #[test]
    fn not_found_leaves_an_empty_active_session_with_a_terminal_fault() {
        let cfg = SyncConfig {
            greeting: Some("Hi".into()),
            ..config()
        };
        let mut session = ConversationSession::new("conv-404", &cfg);
        session.begin();
        session.apply_history("conv-404", Err(LoadError::NotFound("conv-404".into())));

        assert_eq!(session.phase(), SessionPhase::Active);
        assert!(session.messages().is_empty());
        let fault = session.fault().cloned().unwrap();
        assert_eq!(fault, SessionError::NotFound("conv-404".into()));
        assert!(fault.is_terminal());
    }

    #[test]
    fn transport_error_keeps_held_live_messages() {
        let mut session = ConversationSession::new("conv-001", &config());
        session.begin();
        session.apply_channel_event(structured("L", "live"));
        session.apply_history("conv-001", Err(LoadError::Transport("refused".into())));

        assert_eq!(contents(&session), vec!["live"]);
        assert_eq!(
            session.fault(),
            Some(&SessionError::Transport("refused".into()))
        );
        assert!(!session.fault().unwrap().is_terminal());
    }

    #[test]
    fn greeting_fills_an_empty_history() {
        let cfg = SyncConfig {
            greeting: Some("Hello! How can I help?".into()),
            ..config()
        };
        let mut session = ConversationSession::new("conv-001", &cfg);
        session.begin();
        session.apply_history("conv-001", Ok(Transcript::empty("conv-001")));

        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.messages()[0].id, GREETING_MESSAGE_ID);
        assert_eq!(session.messages()[0].role, Role::Counterparty);
    }

    #[test]
    fn transcript_metadata_lands_on_snapshot() {
        let mut session = ConversationSession::new("conv-001", &config());
        session.begin();
        session.apply_history(
            "conv-001",
            Ok(Transcript {
                conversation_id: "conv-001".into(),
                title: Some("Kafka Topic Creation".into()),
                status: Some(ConversationStatus::Completed),
                summary: Some("Created prod-events".into()),
                messages: Vec::new(),
            }),
        );

        let snap = session.snapshot();
        assert_eq!(snap.title.as_deref(), Some("Kafka Topic Creation"));
        assert_eq!(snap.conversation_status, Some(ConversationStatus::Completed));
        assert_eq!(snap.summary.as_deref(), Some("Created prod-events"));
    }

    #[test]
    fn submit_while_not_open_leaves_transcript_untouched() {
        let mut session = ConversationSession::new("conv-001", &config());
        session.begin();
        session.apply_history("conv-001", Ok(transcript(&["A"])));
        let before = session.snapshot();

        assert_eq!(
            session.stage_submission("create topic").unwrap_err(),
            SessionError::NotConnected
        );
        assert_eq!(session.snapshot(), before);
    }

    #[test]
    fn submission_validation() {
        let mut session = active_session(&["A"]);

        assert_eq!(session.stage_submission("   ").unwrap_err(), SessionError::EmptyInput);

        let (message, updates) = session.stage_submission("list topics").unwrap();
        assert_eq!(message.role, Role::User);
        assert_eq!(message.content, "list topics");
        assert!(updates.contains(&SessionUpdate::AwaitingReply(true)));
        assert_eq!(contents(&session), vec!["A", "list topics"]);

        assert_eq!(
            session.stage_submission("again").unwrap_err(),
            SessionError::AwaitingReply
        );

        session.end();
        assert_eq!(session.stage_submission("late").unwrap_err(), SessionError::Ended);
    }

    #[test]
    fn failed_send_keeps_the_optimistic_message() {
        let mut session = active_session(&[]);
        session.stage_submission("create topic").unwrap();

        let updates = session.record_send(Err(ChannelError::NotConnected));

        assert!(updates.contains(&SessionUpdate::AwaitingReply(false)));
        assert!(updates.contains(&SessionUpdate::Fault(SessionError::NotConnected)));
        assert_eq!(contents(&session), vec!["create topic"]);
        assert!(!session.is_awaiting_reply());
    }

    #[test]
    fn reply_clears_awaiting() {
        let mut session = active_session(&[]);
        session.stage_submission("status").unwrap();
        assert!(session.is_awaiting_reply());

        let updates = session.apply_channel_event(ChannelEvent::Message(InboundFrame::Text(
            "all good".into(),
        )));
        assert!(updates.contains(&SessionUpdate::AwaitingReply(false)));
        assert!(!session.is_awaiting_reply());
        assert_eq!(contents(&session), vec!["status", "all good"]);
    }

    #[test]
    fn duplicate_live_ids_are_dropped() {
        let mut session = active_session(&["A"]);
        session.apply_channel_event(structured("X", "first"));
        let updates = session.apply_channel_event(structured("X", "second"));

        assert!(updates.is_empty());
        assert_eq!(contents(&session), vec!["A", "first"]);
    }

    #[test]
    fn error_frame_refuses_further_sends_without_ending() {
        let mut session = active_session(&["A"]);
        session.stage_submission("create").unwrap();

        session.apply_channel_event(ChannelEvent::Error("kafka unreachable".into()));

        assert_eq!(
            session.fault(),
            Some(&SessionError::Channel("kafka unreachable".into()))
        );
        assert_eq!(session.phase(), SessionPhase::Active);
        assert!(session.connection().is_open());
        assert!(!session.is_awaiting_reply());
        assert!(session.is_channel_faulted());

        let before = session.snapshot();
        assert_eq!(
            session.stage_submission("hello").unwrap_err(),
            SessionError::NotConnected
        );
        assert_eq!(session.snapshot(), before);
        assert_eq!(contents(&session), vec!["A", "create"]);
    }

    #[test]
    fn submission_while_loading_is_held_until_history() {
        let mut session = ConversationSession::new("conv-001", &config());
        session.begin();
        session.apply_channel_event(ChannelEvent::Opened);

        let (message, updates) = session.stage_submission("early").unwrap();
        assert_eq!(
            updates,
            vec![
                SessionUpdate::MessageHeld { pending: 1 },
                SessionUpdate::AwaitingReply(true)
            ]
        );
        assert!(session.messages().is_empty());
        assert_eq!(session.snapshot().pending_live, 1);

        session.apply_history("conv-001", Ok(transcript(&["A", "B"])));
        assert_eq!(contents(&session), vec!["A", "B", "early"]);
        assert_eq!(session.messages()[2].id, message.id);
        assert_eq!(session.snapshot().pending_live, 0);
    }

    #[test]
    fn missing_identifier_close_is_distinct_and_terminal() {
        let mut session = active_session(&[]);
        session.apply_channel_event(ChannelEvent::Closed {
            code: 4400,
            reason: "conversation_id is required".into(),
        });

        let fault = session.fault().cloned().unwrap();
        assert!(matches!(fault, SessionError::MissingIdentifier { code: 4400, .. }));
        assert!(fault.is_terminal());
        assert_eq!(session.phase(), SessionPhase::Active);
        assert_eq!(
            session.stage_submission("hello").unwrap_err(),
            SessionError::NotConnected
        );
    }

    #[test]
    fn unexpected_close_raises_channel_fault() {
        let mut session = active_session(&[]);
        session.apply_channel_event(ChannelEvent::Closed {
            code: 1011,
            reason: "server closing".into(),
        });
        assert_eq!(
            session.fault(),
            Some(&SessionError::Channel(
                "connection closed (code 1011): server closing".into()
            ))
        );
        assert!(matches!(
            session.connection(),
            ConnectionState::ClosedError { code: 1011, .. }
        ));
        assert!(session.is_channel_faulted());
        assert_eq!(
            session.stage_submission("retry").unwrap_err(),
            SessionError::NotConnected
        );
    }

    #[test]
    fn channel_events_after_end_are_ignored() {
        let mut session = active_session(&["A"]);
        session.end();

        assert!(session.apply_channel_event(structured("Z", "late")).is_empty());
        assert!(session
            .apply_channel_event(ChannelEvent::Closed {
                code: 1000,
                reason: String::new()
            })
            .is_empty());
        assert!(session.fault().is_none());
        assert!(session.messages().is_empty());
    }

    #[test]
    fn pinned_view_appends_without_scrolling() {
        let mut session = active_session(&["A"]);
        let updates = session.on_scroll(0.0, 2000.0, 400.0);
        assert_eq!(updates, vec![SessionUpdate::ScrollIntentChanged(ScrollIntent::Pinned)]);
        assert!(session.snapshot().show_jump_button);

        let updates = session.apply_channel_event(structured("B", "B"));
        assert!(!updates.contains(&SessionUpdate::ScrollToBottom));

        let updates = session.jump_to_latest();
        assert_eq!(
            updates,
            vec![
                SessionUpdate::ScrollIntentChanged(ScrollIntent::Following),
                SessionUpdate::ScrollToBottom
            ]
        );
        // Jumping while already following still scrolls once
        assert_eq!(session.jump_to_latest(), vec![SessionUpdate::ScrollToBottom]);
    }

    #[test]
    fn end_discards_transcript_and_is_idempotent() {
        let mut session = active_session(&["A", "B"]);
        let updates = session.end();
        assert!(updates.contains(&SessionUpdate::PhaseChanged(SessionPhase::Ended)));
        assert!(session.messages().is_empty());
        assert!(session.connection().is_closed());
        assert!(session.end().is_empty());
    }

    #[test]
    fn history_then_structured_reply_end_to_end() {
        let mut session = ConversationSession::new("conv-001", &config());
        session.begin();
        session.apply_channel_event(ChannelEvent::Opened);
        session.apply_history("conv-001", Ok(transcript(&["first", "second"])));
        session.apply_channel_event(ChannelEvent::Message(InboundFrame::decode(
            r#"{"content":"done"}"#,
            "ERROR:",
        )));

        let snap = session.snapshot();
        assert_eq!(snap.messages.len(), 3);
        assert_eq!(snap.messages[2].role, Role::Counterparty);
        assert_eq!(snap.messages[2].content, "done");
    }

    #[test]
    fn revision_moves_with_every_visible_change() {
        let mut session = ConversationSession::new("conv-001", &config());
        let r0 = session.snapshot().revision;
        session.begin();
        let r1 = session.snapshot().revision;
        assert!(r1 > r0);

        session.on_scroll(0.0, 100.0, 100.0);
        assert_eq!(session.snapshot().revision, r1);
    }
}
