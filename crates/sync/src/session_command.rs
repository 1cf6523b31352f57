//! Commands sent to a session actor by its handle.

use std::sync::Arc;

use tokio::sync::{broadcast, oneshot};

use opsdeck_protocol::Message;

use crate::error::SessionError;
use crate::session::{SessionSnapshot, SessionUpdate};

pub enum SessionCommand {
    // -- Queries --
    /// Current snapshot plus a receiver for every later update
    Subscribe {
        reply: oneshot::Sender<SubscribeResult>,
    },

    // -- Mutations --
    /// Append optimistically and send on the live channel
    Submit {
        text: String,
        reply: oneshot::Sender<Result<Message, SessionError>>,
    },
    Scroll {
        scroll_top: f64,
        scroll_height: f64,
        client_height: f64,
    },
    JumpToLatest,

    /// Close the channel, drop the transcript and stop the actor
    End { reply: oneshot::Sender<()> },
}

/// Result of a Subscribe command
pub struct SubscribeResult {
    pub snapshot: Arc<SessionSnapshot>,
    pub rx: broadcast::Receiver<SessionUpdate>,
}
