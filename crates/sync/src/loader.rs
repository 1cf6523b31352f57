//! Transcript loader: fetches a conversation's history once.
//!
//! The loader only returns data. Merging it into the transcript is the
//! session's job.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::{StatusCode, Url};
use tracing::{debug, warn};

use opsdeck_protocol::{now_timestamp, ConversationStatus, HistoryPayload, Message};

use crate::config::{parse_url, SyncConfig};
use crate::error::{ConfigError, LoadError};

/// Normalized history for one conversation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    pub conversation_id: String,
    pub title: Option<String>,
    pub status: Option<ConversationStatus>,
    pub summary: Option<String>,
    pub messages: Vec<Message>,
}

impl Transcript {
    pub fn empty(conversation_id: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            ..Default::default()
        }
    }

    /// Normalize an upstream payload. Entries without an id get their batch
    /// position; entries without a timestamp get `captured_at`.
    pub fn from_payload(conversation_id: &str, payload: HistoryPayload, captured_at: &str) -> Self {
        let record = payload.into_record();
        let messages = record
            .messages
            .into_iter()
            .enumerate()
            .map(|(index, entry)| entry.into_message(index, captured_at))
            .collect();

        Self {
            conversation_id: conversation_id.to_string(),
            title: record.title,
            status: record.status,
            summary: record.summary,
            messages,
        }
    }
}

/// Where history comes from
pub trait HistorySource: Send + Sync {
    fn fetch(&self, conversation_id: &str) -> BoxFuture<'static, Result<HistoryPayload, LoadError>>;
}

/// History served over HTTP at `{base}/conversations/{id}`
#[derive(Clone)]
pub struct HttpHistorySource {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpHistorySource {
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self {
            client,
            base_url: parse_url("history", base_url)?,
        })
    }

    pub fn conversation_url(&self, conversation_id: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push("conversations")
                .push(conversation_id);
        }
        url
    }
}

impl HistorySource for HttpHistorySource {
    fn fetch(
        &self,
        conversation_id: &str,
    ) -> BoxFuture<'static, Result<HistoryPayload, LoadError>> {
        let client = self.client.clone();
        let url = self.conversation_url(conversation_id);
        let conversation_id = conversation_id.to_string();

        async move {
            let response = client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| LoadError::Transport(e.to_string()))?;

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                return Err(LoadError::NotFound(conversation_id));
            }
            if !status.is_success() {
                return Err(LoadError::Transport(format!("{url} returned HTTP {status}")));
            }

            let body = response
                .text()
                .await
                .map_err(|e| LoadError::Transport(e.to_string()))?;
            serde_json::from_str::<HistoryPayload>(&body)
                .map_err(|e| LoadError::Transport(format!("invalid history payload: {e}")))
        }
        .boxed()
    }
}

/// Fetches and normalizes history, with an optional timeout.
#[derive(Clone)]
pub struct TranscriptLoader {
    source: Arc<dyn HistorySource>,
    timeout: Option<Duration>,
}

impl TranscriptLoader {
    pub fn new(source: Arc<dyn HistorySource>, timeout: Option<Duration>) -> Self {
        Self { source, timeout }
    }

    /// HTTP loader built from config
    pub fn from_config(config: &SyncConfig) -> Result<Self, ConfigError> {
        let source = HttpHistorySource::new(&config.history_url)?;
        Ok(Self::new(Arc::new(source), config.history_timeout()))
    }

    pub async fn load(&self, conversation_id: &str) -> Result<Transcript, LoadError> {
        if conversation_id.trim().is_empty() {
            return Err(LoadError::NotFound(conversation_id.to_string()));
        }

        let fetch = self.source.fetch(conversation_id);
        let payload = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, fetch).await.map_err(|_| {
                LoadError::Transport(format!(
                    "history fetch timed out after {}ms",
                    limit.as_millis()
                ))
            })?,
            None => fetch.await,
        };

        match payload {
            Ok(payload) => {
                let transcript =
                    Transcript::from_payload(conversation_id, payload, &now_timestamp());
                debug!(
                    component = "loader",
                    event = "history.loaded",
                    conversation_id = %conversation_id,
                    message_count = transcript.messages.len(),
                    "History loaded"
                );
                Ok(transcript)
            }
            Err(err) => {
                warn!(
                    component = "loader",
                    event = "history.failed",
                    conversation_id = %conversation_id,
                    error = %err,
                    "History fetch failed"
                );
                Err(err)
            }
        }
    }
}
