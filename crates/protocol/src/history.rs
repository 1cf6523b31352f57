//! History payloads served by the conversation endpoint.
//!
//! Upstream shapes vary: a wrapped `{ "conversation": { ... } }` object, a
//! bare record with `messages`, or just the list of entries. Entries may
//! omit `id` and `timestamp`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ConversationStatus, Message, MessageStatus, Role};

/// Any of the accepted history response bodies
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HistoryPayload {
    Wrapped { conversation: ConversationRecord },
    Record(ConversationRecord),
    Entries(Vec<HistoryEntry>),
}

impl HistoryPayload {
    pub fn into_record(self) -> ConversationRecord {
        match self {
            HistoryPayload::Wrapped { conversation } => conversation,
            HistoryPayload::Record(record) => record,
            HistoryPayload::Entries(messages) => ConversationRecord {
                messages,
                ..Default::default()
            },
        }
    }
}

/// A conversation as stored by the history service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ConversationStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Absent for a conversation with nothing stored yet
    #[serde(default, alias = "history")]
    pub messages: Vec<HistoryEntry>,
}

/// One stored message. Only `role` and `content` are guaranteed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub role: Role,
    #[serde(alias = "message")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl HistoryEntry {
    /// Build a canonical message. `index` is the entry's position in its
    /// batch and becomes the id when the upstream omitted one.
    pub fn into_message(self, index: usize, captured_at: &str) -> Message {
        let id = self
            .id
            .as_ref()
            .and_then(value_as_string)
            .unwrap_or_else(|| format!("history-{index}"));

        Message {
            id,
            content: self.content,
            role: self.role,
            timestamp: self.timestamp.unwrap_or_else(|| captured_at.to_string()),
            status: self.status,
            metadata: stringify_metadata(self.metadata),
        }
    }
}

pub(crate) fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn stringify_metadata(raw: BTreeMap<String, Value>) -> BTreeMap<String, String> {
    raw.into_iter()
        .filter_map(|(key, value)| match value {
            Value::Null => None,
            Value::String(s) => Some((key, s)),
            other => Some((key, other.to_string())),
        })
        .collect()
}
