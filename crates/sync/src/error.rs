//! Error taxonomy for the synchronizer.
//!
//! Loader and channel failures are caught at their boundary and folded into
//! a [`SessionError`], which the session keeps as its banner state.

use thiserror::Error;

/// Failure fetching a conversation's history
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("history transport error: {0}")]
    Transport(String),

    #[error("conversation not found: {0}")]
    NotFound(String),
}

/// Failure on the live channel
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("live channel is not connected")]
    NotConnected,

    #[error("live channel transport error: {0}")]
    Transport(String),
}

/// User-visible session error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Could not load conversation history: {0}")]
    Transport(String),

    #[error("Conversation {0} doesn't exist or has been deleted")]
    NotFound(String),

    #[error("Connection error: {0}")]
    Channel(String),

    #[error("The server rejected this conversation: identifier missing or invalid ({reason})")]
    MissingIdentifier { code: u16, reason: String },

    #[error("Not connected: the message was not sent")]
    NotConnected,

    #[error("Nothing to send")]
    EmptyInput,

    #[error("Still waiting for a reply to the previous command")]
    AwaitingReply,

    #[error("This conversation session has ended")]
    Ended,
}

impl SessionError {
    /// Errors after which the same conversation identity cannot recover.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionError::NotFound(_) | SessionError::MissingIdentifier { .. }
        )
    }
}

impl From<LoadError> for SessionError {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::Transport(detail) => SessionError::Transport(detail),
            LoadError::NotFound(id) => SessionError::NotFound(id),
        }
    }
}

impl From<ChannelError> for SessionError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::NotConnected => SessionError::NotConnected,
            ChannelError::Transport(detail) => SessionError::Channel(detail),
        }
    }
}

/// Failure resolving configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid {field} url {value:?}: {detail}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        detail: String,
    },

    #[error("invalid value for {key}: {value:?}")]
    InvalidOverride { key: &'static str, value: String },

    #[error("no home directory; pass --data-dir or set OPSDECK_DATA_DIR")]
    NoDataDir,

    #[error("failed to build http client: {0}")]
    HttpClient(String),
}
