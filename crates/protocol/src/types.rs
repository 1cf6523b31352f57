//! Core types shared across the protocol

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Metadata key carrying the ticket generated for a command.
pub const TICKET_ID_KEY: &str = "ticketId";

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    /// The operations backend answering the user. Older payloads call it
    /// `system` or `assistant`.
    #[serde(alias = "system", alias = "assistant", alias = "bot")]
    Counterparty,
}

impl Role {
    /// Label shown next to a message
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "You",
            Role::Counterparty => "System",
        }
    }
}

/// Outcome attached to a counterparty message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Success,
    Error,
}

impl MessageStatus {
    pub fn label(self) -> &'static str {
        match self {
            MessageStatus::Pending => "Pending",
            MessageStatus::Success => "Success",
            MessageStatus::Error => "Error",
        }
    }
}

/// A message in a conversation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub content: String,
    pub role: Role,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Message {
    /// Message typed by the local user
    pub fn user(id: String, content: String, timestamp: String) -> Self {
        Self {
            id,
            content,
            role: Role::User,
            timestamp,
            status: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Message produced by the counterparty
    pub fn counterparty(id: String, content: String, timestamp: String) -> Self {
        Self {
            id,
            content,
            role: Role::Counterparty,
            timestamp,
            status: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Content with markdown bold markers stripped, as rendered in the console.
    pub fn display_content(&self) -> String {
        self.content.replace("**", "")
    }

    pub fn ticket_id(&self) -> Option<&str> {
        self.metadata.get(TICKET_ID_KEY).map(String::as_str)
    }
}

/// Lifecycle of a conversation as reported by the history service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Completed,
    Error,
}

/// State of the live channel for one conversation
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Connecting,
    Open,
    ClosedNormal,
    ClosedError { code: u16, reason: String },
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            ConnectionState::ClosedNormal | ConnectionState::ClosedError { .. }
        )
    }
}
