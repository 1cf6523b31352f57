//! Conversation navigator.
//!
//! Keeps at most one live session. Moving to another conversation ends the
//! current session (closing its channel) before the next one starts.

use tracing::info;

use opsdeck_protocol::{new_conversation_id, Role};

use crate::session_actor::{SessionActorHandle, SessionContext, SessionOrigin};

struct ActiveSession {
    handle: SessionActorHandle,
    origin: SessionOrigin,
}

pub struct Console {
    ctx: SessionContext,
    active: Option<ActiveSession>,
}

impl Console {
    pub fn new(ctx: SessionContext) -> Self {
        Self { ctx, active: None }
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// The current session, if any.
    pub fn active(&self) -> Option<&SessionActorHandle> {
        self.active.as_ref().map(|a| &a.handle)
    }

    /// Enter an existing conversation. Re-opening the current one returns
    /// its running session.
    pub async fn open(&mut self, conversation_id: &str) -> SessionActorHandle {
        if let Some(active) = &self.active {
            if active.handle.conversation_id() == conversation_id && !active.handle.is_finished() {
                return active.handle.clone();
            }
        }
        self.switch_to(conversation_id, SessionOrigin::Existing).await
    }

    /// Start a new conversation with a fresh identity.
    pub async fn start_new(&mut self) -> SessionActorHandle {
        let conversation_id = new_conversation_id();
        self.switch_to(&conversation_id, SessionOrigin::Fresh).await
    }

    /// Restart the current conversation with a new session. A new
    /// conversation that has sent something is reloaded from history.
    pub async fn reload(&mut self) -> Option<SessionActorHandle> {
        let (conversation_id, origin) = {
            let active = self.active.as_ref()?;
            let snap = active.handle.snapshot();
            let origin = match active.origin {
                SessionOrigin::Fresh if !snap.messages.iter().any(|m| m.role == Role::User) => {
                    SessionOrigin::Fresh
                }
                _ => SessionOrigin::Existing,
            };
            (active.handle.conversation_id().to_string(), origin)
        };
        info!(
            component = "console",
            event = "console.reload",
            conversation_id = %conversation_id,
            "Reloading conversation"
        );
        Some(self.switch_to(&conversation_id, origin).await)
    }

    /// End the current session, if any.
    pub async fn leave(&mut self) {
        if let Some(active) = self.active.take() {
            active.handle.end().await;
        }
    }

    async fn switch_to(
        &mut self,
        conversation_id: &str,
        origin: SessionOrigin,
    ) -> SessionActorHandle {
        let previous = self
            .active
            .as_ref()
            .map(|a| a.handle.conversation_id().to_string());
        self.leave().await;

        info!(
            component = "console",
            event = "console.switch",
            from = previous.as_deref().unwrap_or(""),
            conversation_id = %conversation_id,
            "Switching conversation"
        );

        let handle = SessionActorHandle::spawn(&self.ctx, conversation_id, origin);
        self.active = Some(ActiveSession {
            handle: handle.clone(),
            origin,
        });
        handle
    }
}
