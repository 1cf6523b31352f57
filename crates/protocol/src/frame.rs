//! Live channel frames (server → console).
//!
//! Every inbound text frame is decoded exactly once into an [`InboundFrame`].
//! Decoding never fails: anything that is not a recognizable structured
//! payload is treated as plain text content.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::history::{stringify_metadata, value_as_string};
use crate::types::{Message, MessageStatus};

/// Default prefix marking an upstream error frame
pub const DEFAULT_ERROR_SENTINEL: &str = "ERROR:";

/// Content shown for an empty inbound frame
pub const EMPTY_PAYLOAD_PLACEHOLDER: &str = "Received response";

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Plain text, rendered verbatim
    Text(String),
    /// JSON object carrying `content` (or `message`)
    Structured(StructuredFrame),
    /// Upstream error signal; the sentinel prefix is stripped
    ErrorSentinel(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructuredFrame {
    pub content: String,
    pub id: Option<String>,
    pub status: Option<MessageStatus>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct RawStructured {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    status: Option<Value>,
    #[serde(default)]
    metadata: Option<BTreeMap<String, Value>>,
}

impl InboundFrame {
    /// Decode a raw text payload. An empty `sentinel` disables error routing.
    pub fn decode(raw: &str, sentinel: &str) -> Self {
        if !sentinel.is_empty() {
            if let Some(detail) = raw.trim_start().strip_prefix(sentinel) {
                return InboundFrame::ErrorSentinel(detail.trim().to_string());
            }
        }

        match serde_json::from_str::<RawStructured>(raw) {
            Ok(parsed) => match parsed.content.or(parsed.message) {
                Some(content) => InboundFrame::Structured(StructuredFrame {
                    content,
                    id: parsed.id.as_ref().and_then(value_as_string),
                    status: parsed
                        .status
                        .and_then(|s| serde_json::from_value(s).ok()),
                    metadata: parsed.metadata.map(stringify_metadata).unwrap_or_default(),
                }),
                None => InboundFrame::Text(raw.to_string()),
            },
            Err(_) => InboundFrame::Text(raw.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, InboundFrame::ErrorSentinel(_))
    }

    /// Turn a chat frame into a counterparty message. `fallback_id` is used
    /// when the frame carries no id of its own. Error frames yield `None`.
    pub fn into_message(self, fallback_id: String, timestamp: String) -> Option<Message> {
        match self {
            InboundFrame::Text(text) => {
                let content = if text.is_empty() {
                    EMPTY_PAYLOAD_PLACEHOLDER.to_string()
                } else {
                    text
                };
                Some(Message::counterparty(fallback_id, content, timestamp))
            }
            InboundFrame::Structured(frame) => {
                let mut message = Message::counterparty(
                    frame.id.unwrap_or(fallback_id),
                    frame.content,
                    timestamp,
                );
                message.status = frame.status;
                message.metadata = frame.metadata;
                Some(message)
            }
            InboundFrame::ErrorSentinel(_) => None,
        }
    }
}
