//! OpsDeck Sync
//!
//! Keeps a conversation transcript consistent while it is fed by two
//! sources: a one-shot history fetch and a live WebSocket channel. Each
//! open conversation runs as a session actor that owns its channel and the
//! single-writer message merger.

pub mod channel;
pub mod config;
pub mod console;
pub mod error;
pub mod loader;
pub mod merger;
pub mod scroll;
pub mod session;
pub mod session_actor;
pub mod session_command;

#[cfg(test)]
mod test_support;

pub use channel::{ChannelEvent, ChannelSettings, LiveChannel};
pub use config::{resolve_data_dir, SyncConfig};
pub use console::Console;
pub use error::{ChannelError, ConfigError, LoadError, SessionError};
pub use loader::{HistorySource, HttpHistorySource, Transcript, TranscriptLoader};
pub use merger::{MergeOutcome, MergeSource, MessageMerger};
pub use scroll::{ScrollIntent, ScrollTracker};
pub use session::{ConversationSession, SessionPhase, SessionSnapshot, SessionUpdate};
pub use session_actor::{SessionActorHandle, SessionContext, SessionOrigin};
pub use session_command::SubscribeResult;
